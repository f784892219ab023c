//! The audio output side of the loop.

use castsync_proto::Format;

use crate::{
    bridge::{AudioClockSample, ClockSender},
    ring::RingReader,
    timebase,
};

/// Reads the jitter buffer once per playback period, and reports the output
/// clock back to the synchronizer.
///
/// The first period is read `target_latency_frames` behind the current wall clock
/// frame, from then on the read position advances by exactly the frames played.
/// Like the senders' numbering, it restarts from `0` when it reaches the end of
/// the day.
#[derive(Debug)]
pub struct Playout {
    reader: RingReader,
    clock: ClockSender,
    sample_rate: u32,
    channels: usize,
    target_latency: u64,
    day_frames: u64,
    /// Index of the next frame to play within the day.
    frame: Option<u64>,
    dropped_samples: u64,
}

impl Playout {
    pub fn new(format: &Format, reader: RingReader, clock: ClockSender) -> Self {
        Self {
            reader,
            clock,
            sample_rate: format.sample_rate(),
            channels: format.channels() as usize,
            target_latency: u64::from(format.target_latency_frames()),
            day_frames: timebase::day_frames(format.sample_rate()),
            frame: None,
            dropped_samples: 0,
        }
    }

    /// The frame the next period will be read from, if playback has started.
    #[inline(always)]
    pub fn position(&self) -> Option<u32> {
        self.frame.map(|frame| frame as u32)
    }

    /// Number of clock samples that couldn't be delivered because the bridge was
    /// full.
    #[inline(always)]
    pub const fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    #[inline(always)]
    pub fn reader(&self) -> &RingReader {
        &self.reader
    }

    /// Fills `out` (interleaved) with the next period of audio.
    ///
    /// `now` is the current wall clock time, `until_next` the time left before the
    /// next period starts. Must not block, this runs on the audio thread.
    pub fn process(&mut self, now: f64, until_next: f64, out: &mut [i16]) {
        let day_frames = self.day_frames;
        let frame = *self.frame.get_or_insert_with(|| {
            let now = timebase::day_frame(now, self.sample_rate);
            (now + day_frames - self.target_latency % day_frames) % day_frames
        });

        self.reader.read(frame as u32, out);

        let frames = (out.len() / self.channels) as u32;
        self.frame = Some((frame + u64::from(frames)) % day_frames);

        let sample = AudioClockSample {
            t1: now + until_next,
            k1: frames,
        };

        if !self.clock.push(sample) {
            self.dropped_samples += 1;
        }

        self.clock.set_streaming();
    }
}
