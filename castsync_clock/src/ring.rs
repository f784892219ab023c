//! The jitter buffer between the network thread and the audio output thread.
//!
//! Unlike a FIFO, this buffer is addressed by frame number: the writer stores each
//! packet at the position given by its timestamp, and the reader fetches the frames
//! at its own playback position. Both positions are free-running `u32` frame
//! counters, folded into the buffer's window with a modulo.
//!
//! ## Concurrency
//!
//! There is no lock. Samples are stored in relaxed atomics, so concurrent access is
//! always memory safe, but it is **the caller's job** to keep the reader and the
//! writer on different regions: the window is twice the target latency, so a reader
//! trailing the writer by the target latency never touches frames being written.
//! If a stall or a misconfiguration breaks that, playback glitches, nothing more.
//! [`read_write_diff`](RingBuffer::read_write_diff) is the health signal for this.

use std::sync::{
    Arc,
    atomic::{AtomicI16, AtomicUsize, Ordering},
};

use castsync_proto::Format;

/// Fixed-size, frame-addressed sample store.
#[derive(Debug)]
pub struct RingBuffer {
    window_frames: u32,
    channels: usize,
    // invariant: data.len() == window_frames * channels
    data: Box<[AtomicI16]>,
    last_read: AtomicUsize,
    last_write: AtomicUsize,
}

impl RingBuffer {
    /// Creates a zeroed buffer holding `period_size * 2 * latency` frames.
    ///
    /// # Panics
    ///
    /// If that many frames overflow a `u32`. Formats are checked beforehand with
    /// [`Format::checked_capacity_samples`].
    pub fn new(period_size: u32, channels: u32, latency: u32) -> Self {
        let window_frames = period_size
            .checked_mul(2)
            .and_then(|n| n.checked_mul(latency))
            .expect("ERROR: ring buffer window overflows u32");

        let capacity = window_frames as usize * channels as usize;

        Self {
            window_frames,
            channels: channels as usize,
            data: (0..capacity).map(|_| AtomicI16::new(0)).collect(),
            last_read: AtomicUsize::new(0),
            last_write: AtomicUsize::new(0),
        }
    }

    #[inline(always)]
    pub fn for_format(format: &Format) -> Self {
        Self::new(format.period_size(), format.channels(), format.latency_periods())
    }

    /// Total number of samples (not frames) stored.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    pub const fn window_frames(&self) -> u32 {
        self.window_frames
    }

    #[inline(always)]
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Sample offset of the given frame.
    #[inline(always)]
    fn position(&self, frame: u32) -> usize {
        (frame % self.window_frames) as usize * self.channels
    }

    /// Returns the two contiguous regions, in buffer order, that a span of `len`
    /// samples starting at `pos` occupies. The second is empty unless the span
    /// crosses the end of the buffer. Spans longer than the buffer are cut to
    /// its capacity.
    #[inline(always)]
    fn regions(&self, pos: usize, len: usize) -> (core::ops::Range<usize>, core::ops::Range<usize>) {
        let len = len.min(self.capacity());
        let head = len.min(self.capacity() - pos);
        (pos..pos + head, 0..len - head)
    }

    /// Stores `samples` (interleaved, a whole number of frames) starting at `frame`.
    ///
    /// At most one window's worth of samples is stored, the rest is dropped.
    pub fn write(&self, frame: u32, samples: &[i16]) {
        let pos = self.position(frame);
        self.last_write.store(pos, Ordering::Relaxed);

        let (head, tail) = self.regions(pos, samples.len());
        let (src_head, src_tail) = samples.split_at(head.len());

        for (dest, &src) in self.data[head].iter().zip(src_head) {
            dest.store(src, Ordering::Relaxed);
        }

        for (dest, &src) in self.data[tail].iter().zip(src_tail) {
            dest.store(src, Ordering::Relaxed);
        }
    }

    /// Fills `out` (interleaved, a whole number of frames) with the samples stored
    /// starting at `frame`.
    ///
    /// If `out` is longer than the buffer, only the first window's worth is filled.
    pub fn read(&self, frame: u32, out: &mut [i16]) {
        let pos = self.position(frame);
        self.last_read.store(pos, Ordering::Relaxed);

        let (head, tail) = self.regions(pos, out.len());
        let (dest_head, dest_tail) = out.split_at_mut(head.len());

        for (dest, src) in dest_head.iter_mut().zip(&self.data[head]) {
            *dest = src.load(Ordering::Relaxed);
        }

        for (dest, src) in dest_tail.iter_mut().zip(&self.data[tail]) {
            *dest = src.load(Ordering::Relaxed);
        }
    }

    /// Returns the distance, in frames, between the most recent write and the most
    /// recent read positions.
    ///
    /// This is the raw distance inside the buffer, it is not corrected for the
    /// wrap: a healthy stream reports either the target latency or the window minus
    /// the target latency, depending on which side of the wrap the writer is.
    #[inline]
    pub fn read_write_diff(&self) -> usize {
        let write = self.last_write.load(Ordering::Relaxed);
        let read = self.last_read.load(Ordering::Relaxed);
        write.abs_diff(read) / self.channels
    }
}

/// The write side of a shared [`RingBuffer`]. There is only ever one.
#[derive(Debug)]
pub struct RingWriter(Arc<RingBuffer>);

/// The read side of a shared [`RingBuffer`]. There is only ever one.
#[derive(Debug)]
pub struct RingReader(Arc<RingBuffer>);

/// Creates a buffer for the given format, and splits it into its two roles.
pub fn ring_buffer(format: &Format) -> (RingWriter, RingReader) {
    let buffer = Arc::new(RingBuffer::for_format(format));
    (RingWriter(Arc::clone(&buffer)), RingReader(buffer))
}

impl RingWriter {
    #[inline(always)]
    pub fn write(&mut self, frame: u32, samples: &[i16]) {
        self.0.write(frame, samples)
    }

    #[inline(always)]
    pub fn buffer(&self) -> &RingBuffer {
        &self.0
    }
}

impl RingReader {
    #[inline(always)]
    pub fn read(&mut self, frame: u32, out: &mut [i16]) {
        self.0.read(frame, out)
    }

    #[inline(always)]
    pub fn buffer(&self) -> &RingBuffer {
        &self.0
    }
}
