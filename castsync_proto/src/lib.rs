#![no_std]
//! Wire format for real-time PCM audio streamed over UDP multicast.
//!
//! ## Packet layout
//!
//! Every datagram carries exactly one period of audio:
//!
//! | offset | size | content |
//! |---|---|---|
//! | 0 | 4 | frame timestamp, `u32`, **big endian** (network byte order) |
//! | 4 | `period_size * channels * 2` | interleaved `i16` samples, **little endian** |
//!
//! The timestamp is the sender's frame number of the first frame in the packet. It
//! wraps at 2^32, so receivers must only ever use it in modular arithmetic.
//!
//! There is no sequence number, loss is tolerated by the receiver's jitter buffer,
//! which is addressed by the timestamp directly.

extern crate alloc;

pub mod format;

use alloc::boxed::Box;

pub use format::Format;

/// Size of the packet header, in bytes.
pub const HEADER_LEN: usize = size_of::<u32>();

/// A received audio packet, borrowing the datagram it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioPacket<'a> {
    pub timestamp: u32,
    pub payload: &'a [u8],
}

impl<'a> AudioPacket<'a> {
    /// Parses a datagram. Returns `None` if it is too short to contain a header.
    #[inline]
    pub fn parse(datagram: &'a [u8]) -> Option<Self> {
        let (&timestamp, payload) = datagram.split_first_chunk::<HEADER_LEN>()?;

        Some(Self {
            timestamp: u32::from_be_bytes(timestamp),
            payload,
        })
    }

    /// Returns the number of complete samples in the payload.
    #[inline(always)]
    pub const fn n_samples(&self) -> usize {
        self.payload.len() / format::SAMPLE_SIZE
    }

    /// Decodes the payload's samples into `out`.
    ///
    /// Returns how many samples were written, which is the minimum of `out.len()`
    /// and [`self.n_samples()`](Self::n_samples). A trailing odd byte is ignored.
    #[inline]
    pub fn decode_samples(&self, out: &mut [i16]) -> usize {
        let (chunks, _rem) = self.payload.as_chunks::<{ format::SAMPLE_SIZE }>();

        let mut n = 0;
        for (dest, &bytes) in core::iter::zip(out, chunks) {
            *dest = i16::from_le_bytes(bytes);
            n += 1;
        }
        n
    }
}

/// An owned, fixed-size packet buffer, used on the sending side.
///
/// These are meant to be allocated once and recycled through a pool, the buffer
/// is never resized after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketBuf {
    // invariant: bytes.len() >= HEADER_LEN
    bytes: Box<[u8]>,
}

impl PacketBuf {
    /// Allocates a zeroed packet with room for `payload_len` bytes of audio.
    #[inline]
    pub fn new(payload_len: usize) -> Self {
        Self {
            bytes: alloc::vec![0; HEADER_LEN + payload_len].into_boxed_slice(),
        }
    }

    /// Allocates a zeroed packet sized for one period of the given format.
    #[inline(always)]
    pub fn for_format(format: &Format) -> Self {
        Self::new(format.payload_bytes())
    }

    #[inline(always)]
    fn split_mut(&mut self) -> (&mut [u8; HEADER_LEN], &mut [u8]) {
        // the buffer always contains at least HEADER_LEN bytes
        self.bytes.split_first_chunk_mut().unwrap()
    }

    #[inline(always)]
    pub fn timestamp(&self) -> u32 {
        let (&header, _) = self.bytes.split_first_chunk().unwrap();
        u32::from_be_bytes(header)
    }

    #[inline(always)]
    pub fn set_timestamp(&mut self, timestamp: u32) {
        *self.split_mut().0 = timestamp.to_be_bytes();
    }

    #[inline(always)]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.split_mut().1
    }

    /// Fills the payload with the given samples, stopping at whichever runs out
    /// first. Returns the number of samples written.
    #[inline]
    pub fn encode_samples(&mut self, samples: impl IntoIterator<Item = i16>) -> usize {
        let (chunks, _rem) = self.payload_mut().as_chunks_mut::<{ format::SAMPLE_SIZE }>();

        let mut n = 0;
        for (dest, sample) in core::iter::zip(chunks, samples) {
            *dest = sample.to_le_bytes();
            n += 1;
        }
        n
    }

    /// Returns the whole datagram, header included.
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Borrows this buffer as a parsed packet.
    #[inline(always)]
    pub fn as_packet(&self) -> AudioPacket<'_> {
        // the buffer always contains at least HEADER_LEN bytes
        AudioPacket::parse(&self.bytes).unwrap()
    }
}
