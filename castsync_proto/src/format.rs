//! Audio stream format definitions.
//!
//! A [`Format`] is fixed for the lifetime of a stream: both ends must agree on it
//! out of band, there is no negotiation on the wire.

use core::num;

/// Size of one sample on the wire, in bytes. Samples are signed 16-bit, little endian.
pub const SAMPLE_SIZE: usize = size_of::<i16>();

/// A validated audio sample rate, in frames per second.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SampleRate(pub num::NonZeroU32);

/// Number of interleaved audio channels.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ChannelCount(pub num::NonZeroU32);

/// Duration of one hardware period (and one packet), in microseconds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PeriodTime(pub num::NonZeroU32);

/// Target playback latency, expressed in periods.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Latency(pub num::NonZeroU32);

/// A complete audio stream format description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Format {
    pub sample_rate: SampleRate,
    pub period_time: PeriodTime,
    pub channel_count: ChannelCount,
    /// Only meaningful on the receiving side, senders ignore it.
    pub latency: Latency,
}

impl Default for Format {
    #[inline(always)]
    fn default() -> Self {
        Self::standard()
    }
}

impl Format {
    /// Returns the default format:
    ///
    /// 48 kHz, stereo, 1 ms periods, 10 periods of latency.
    #[inline(always)]
    pub const fn standard() -> Format {
        Format {
            sample_rate: SampleRate(num::NonZeroU32::new(48000).unwrap()),
            period_time: PeriodTime(num::NonZeroU32::new(1000).unwrap()),
            channel_count: ChannelCount(num::NonZeroU32::new(2).unwrap()),
            latency: Latency(num::NonZeroU32::new(10).unwrap()),
        }
    }

    #[inline(always)]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate.0.get()
    }

    #[inline(always)]
    pub const fn channels(&self) -> u32 {
        self.channel_count.0.get()
    }

    #[inline(always)]
    pub const fn latency_periods(&self) -> u32 {
        self.latency.0.get()
    }

    #[inline(always)]
    pub const fn period_time_us(&self) -> u32 {
        self.period_time.0.get()
    }

    /// Returns the duration of one period in seconds.
    #[inline(always)]
    pub fn period_secs(&self) -> f64 {
        f64::from(self.period_time_us()) * 1e-6
    }

    /// Returns the number of frames in one period, rounded up.
    ///
    /// Computed in integer arithmetic, so that e.g. 48 kHz and 1000 µs give
    /// exactly 48 frames.
    #[inline(always)]
    pub const fn period_size(&self) -> u32 {
        let num = self.sample_rate() as u64 * self.period_time_us() as u64;
        num.div_ceil(1_000_000) as u32
    }

    /// Returns the number of frames the jitter buffer can address before wrapping.
    ///
    /// This is twice the target latency, so that a reader trailing the writer by
    /// the target latency never meets it from the other side.
    #[inline(always)]
    pub const fn window_frames(&self) -> u32 {
        self.period_size() * 2 * self.latency_periods()
    }

    /// This is the same as [`self.window_frames()`](Self::window_frames)` *
    /// `[`self.channels()`](Self::channels)
    #[inline(always)]
    pub const fn capacity_samples(&self) -> u32 {
        self.window_frames() * self.channels()
    }

    /// Returns [`self.capacity_samples()`](Self::capacity_samples), or `None` when
    /// the format is too large for the jitter buffer's `u32` frame and sample
    /// counts.
    ///
    /// The unchecked size helpers are only meaningful for formats that pass this.
    pub const fn checked_capacity_samples(&self) -> Option<u32> {
        let period_size =
            (self.sample_rate() as u64 * self.period_time_us() as u64).div_ceil(1_000_000);

        let capacity = match period_size.checked_mul(2 * self.latency_periods() as u64) {
            Some(window) => window.checked_mul(self.channels() as u64),
            None => None,
        };

        match capacity {
            Some(capacity) if capacity <= u32::MAX as u64 => Some(capacity as u32),
            _ => None,
        }
    }

    /// Returns the playback delay, in frames, the receiver steers towards.
    #[inline(always)]
    pub const fn target_latency_frames(&self) -> u32 {
        self.latency_periods() * self.period_size()
    }

    /// Returns the number of interleaved samples in one period.
    #[inline(always)]
    pub const fn period_samples(&self) -> u32 {
        self.period_size() * self.channels()
    }

    /// Returns the size of an audio packet's payload, in bytes.
    #[inline(always)]
    pub const fn payload_bytes(&self) -> usize {
        self.period_samples() as usize * SAMPLE_SIZE
    }

    /// Returns the size of a complete audio packet (header included), in bytes.
    #[inline(always)]
    pub const fn packet_bytes(&self) -> usize {
        crate::HEADER_LEN + self.payload_bytes()
    }
}
