//! The receiver's control loop.
//!
//! For every packet received, the [`StreamSynchronizer`]:
//!
//! 1. updates its delay-locked loop with the arrival time, yielding a smoothed
//!    estimate `tN` of when the packet really arrived,
//! 2. pulls the latest audio output clock sample from the bridge, and keeps the last
//!    two as anchors `(tA0, kA0)`, `(tA1, kA1)` of a linear model of
//!    "frames played at time t",
//! 3. compares frames received with frames played at `tN`; the difference, minus
//!    the target latency, is the latency error,
//! 4. feeds the error to the ratio estimator, clamps the ratio and resamples the
//!    packet with it. The ratio is only updated when the oldest anchor lies in the
//!    past of `tN`, the packet is resampled with the previous ratio otherwise,
//! 5. writes the result into the ring buffer at the packet's own timestamp.
//!
//! Frame counters are `u32` and wrap; all differences between them are taken
//! modulo 2^32. Times jump back by a day at midnight: the loop's own times are
//! moved along, and clock samples are brought to the same side of midnight as the
//! DLL before use.

use castsync_proto::{AudioPacket, Format};

use crate::{
    bridge::{AudioClockSample, ClockReceiver},
    dll::DelayLockedLoop,
    ratio::RatioEstimator,
    resample::Resample,
    ring::RingWriter,
    timebase,
};

/// The resampling ratio is always kept within `1 ± MAX_RATIO_DEVIATION`.
pub const MAX_RATIO_DEVIATION: f64 = 0.05;

/// Lowest ratio handed to the resampler.
pub const MIN_RATIO: f64 = 1. - MAX_RATIO_DEVIATION;
/// Highest ratio handed to the resampler.
pub const MAX_RATIO: f64 = 1. + MAX_RATIO_DEVIATION;

/// How often (in packets) the loop's state gets logged.
pub const REPORT_INTERVAL: u64 = 1000;

/// A point of the audio output timeline: `k` frames had been played at time `t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub t: f64,
    pub k: u32,
}

/// What happened to a packet handed to [`StreamSynchronizer::on_packet`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacketOutcome {
    /// Audio output hasn't started yet, the packet was only used to train the DLL.
    NotStreaming,
    /// No usable audio clock anchor yet, nothing was written.
    AwaitingAnchor,
    /// The packet's payload doesn't hold exactly one period.
    BadPayload { n_samples: usize },
    /// The packet was resampled and stored.
    Written { frames: u32 },
    /// The resampler failed, the packet was dropped.
    ResampleFailed,
}

pub struct StreamSynchronizer<R> {
    format: Format,
    dll: DelayLockedLoop,
    estimator: RatioEstimator,
    resampler: R,
    writer: RingWriter,
    clock: ClockReceiver,
    /// Frames produced by the resampler so far.
    received_frames: u32,
    anchors: [Anchor; 2],
    ratio: f64,
    err: f64,
    n_packets: u64,
    scratch: Vec<i16>,
}

impl<R: Resample> StreamSynchronizer<R> {
    /// Builds a fresh loop, anchoring its DLL at `now`.
    pub fn new(
        format: Format,
        resampler: R,
        writer: RingWriter,
        clock: ClockReceiver,
        now: f64,
    ) -> Self {
        let mut dll = DelayLockedLoop::new(format.period_secs());
        dll.reset(now);

        let period_size = format.period_size();

        Self {
            format,
            estimator: RatioEstimator::new(period_size, format.sample_rate()),
            resampler,
            writer,
            clock,
            received_frames: 0,
            anchors: [
                // never in the past: no ratio update happens before a real anchor pair
                Anchor {
                    t: f64::INFINITY,
                    k: 0,
                },
                Anchor {
                    t: dll.t1(),
                    k: 0u32.wrapping_sub(period_size),
                },
            ],
            dll,
            ratio: 1.,
            err: 0.,
            n_packets: 0,
            scratch: vec![0; format.period_samples() as usize],
        }
    }

    #[inline(always)]
    pub const fn ratio(&self) -> f64 {
        self.ratio
    }

    #[inline(always)]
    pub const fn delay_error(&self) -> f64 {
        self.err
    }

    #[inline(always)]
    pub const fn received_frames(&self) -> u32 {
        self.received_frames
    }

    #[inline(always)]
    pub const fn anchors(&self) -> &[Anchor; 2] {
        &self.anchors
    }

    #[inline(always)]
    pub const fn dll(&self) -> &DelayLockedLoop {
        &self.dll
    }

    #[inline(always)]
    pub fn writer(&self) -> &RingWriter {
        &self.writer
    }

    /// Gives the ring writer and the clock receiver back, so that a new loop can
    /// be built on them.
    pub fn into_parts(self) -> (RingWriter, ClockReceiver) {
        (self.writer, self.clock)
    }

    /// Shifts in a new audio clock sample.
    fn push_anchor(&mut self, sample: AudioClockSample) {
        let t = sample.t1 + timebase::wrap_shift(sample.t1, self.dll.t0());

        let [old, new] = &mut self.anchors;
        *old = *new;
        new.t = t;
        // accumulates forever, wrapping
        new.k = new.k.wrapping_add(sample.k1);
    }

    /// Computes the latency error at time `t_n` and updates the ratio.
    ///
    /// Returns `None`, leaving the ratio untouched, if the anchors can't be used:
    /// before the first clock sample, or when both anchors share a timestamp.
    pub fn update_ratio(&mut self, t_n: f64) -> Option<f64> {
        let [a0, a1] = self.anchors;

        let elapsed = t_n - a0.t;
        if !(elapsed > 0.) {
            return None;
        }

        let span = a1.t - a0.t;
        if !(span > 0.) {
            log::debug!("Degenerate audio clock anchors (span {span}s), ratio kept");
            return None;
        }

        let k_n = self.received_frames.wrapping_add(self.format.period_size());
        let d_a = f64::from(a1.k.wrapping_sub(a0.k)) * elapsed / span;
        let d_n = f64::from(k_n.wrapping_sub(a0.k));

        self.err = d_n - d_a - f64::from(self.format.target_latency_frames());
        self.ratio = self
            .estimator
            .estimate_ratio(self.err)
            .clamp(MIN_RATIO, MAX_RATIO);

        Some(self.ratio)
    }

    /// Moves the loop's times by `dt`, following the timebase across midnight.
    fn shift(&mut self, dt: f64) {
        self.dll.shift(dt);
        for anchor in &mut self.anchors {
            // the initial anchor stays at infinity
            anchor.t += dt;
        }
    }

    /// Runs one iteration of the loop for a packet received at wall clock time `now`.
    pub fn on_packet(&mut self, now: f64, packet: AudioPacket<'_>) -> PacketOutcome {
        let shift = timebase::wrap_shift(self.dll.t1(), now);
        if shift != 0. {
            log::info!("Wall clock wrapped at midnight, shifting loop by {shift}s");
            self.shift(shift);
        }

        self.dll.update(now);

        if !self.clock.is_streaming() {
            return PacketOutcome::NotStreaming;
        }

        let t_n = self.dll.t0();

        if let Some(sample) = self.clock.try_recv() {
            self.push_anchor(sample);
        }

        // until the first clock sample, the oldest anchor lies at infinity
        if !self.anchors[0].t.is_finite() {
            return PacketOutcome::AwaitingAnchor;
        }

        if self.update_ratio(t_n).is_some()
            && let Err(e) = self.resampler.set_ratio(self.ratio)
        {
            log::warn!("Failed to set resampling ratio {}: {e}", self.ratio);
        }

        let n_samples = packet.n_samples();
        if n_samples != self.scratch.len() {
            return PacketOutcome::BadPayload { n_samples };
        }
        packet.decode_samples(&mut self.scratch);

        let output = match self.resampler.process(&self.scratch) {
            Ok(output) => output,
            Err(e) => {
                log::warn!("Dropping packet {}: {e}", packet.timestamp);
                return PacketOutcome::ResampleFailed;
            }
        };

        let frames = (output.len() / self.format.channels() as usize) as u32;
        self.received_frames = self.received_frames.wrapping_add(frames);

        self.writer.write(packet.timestamp, output);

        if self.n_packets % REPORT_INTERVAL == 0 {
            log::info!(
                "Resampling ratio: {:.6}, delay error: {:.2}, read/write distance: {}",
                self.ratio,
                self.err,
                self.writer.buffer().read_write_diff(),
            );
        }
        self.n_packets += 1;

        PacketOutcome::Written { frames }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bridge, ring};

    /// Copies its input, the ratio is only recorded.
    #[derive(Default)]
    struct Passthrough {
        ratios: Vec<f64>,
        out: Vec<i16>,
    }

    impl Resample for Passthrough {
        fn set_ratio(&mut self, ratio: f64) -> crate::Result<()> {
            self.ratios.push(ratio);
            Ok(())
        }

        fn process(&mut self, input: &[i16]) -> crate::Result<&[i16]> {
            self.out.clear();
            self.out.extend_from_slice(input);
            Ok(&self.out)
        }
    }

    struct Fixture {
        sync: StreamSynchronizer<Passthrough>,
        clock_tx: bridge::ClockSender,
        reader: ring::RingReader,
        format: Format,
    }

    const T0: f64 = 1_000.;

    fn fixture() -> Fixture {
        let format = Format::standard();
        let (writer, reader) = ring::ring_buffer(&format);
        let (clock_tx, clock_rx) = bridge::audio_clock_bridge(bridge::DEFAULT_CAPACITY);
        let sync = StreamSynchronizer::new(format, Passthrough::default(), writer, clock_rx, T0);
        Fixture {
            sync,
            clock_tx,
            reader,
            format,
        }
    }

    fn datagram(timestamp: u32, format: &Format, value: i16) -> Vec<u8> {
        let mut packet = castsync_proto::PacketBuf::for_format(format);
        packet.set_timestamp(timestamp);
        packet.encode_samples(core::iter::repeat(value));
        packet.as_bytes().to_vec()
    }

    #[test]
    fn ignores_packets_until_streaming() {
        let mut f = fixture();
        let bytes = datagram(0, &f.format, 7);

        let outcome = f.sync.on_packet(T0 + 0.001, AudioPacket::parse(&bytes).unwrap());
        assert_eq!(outcome, PacketOutcome::NotStreaming);
        assert_eq!(f.sync.received_frames(), 0);
        // the DLL still advanced
        assert_eq!(f.sync.dll().t0(), T0 + 0.001);
    }

    #[test]
    fn nothing_is_written_before_the_first_anchor() {
        let mut f = fixture();
        f.clock_tx.set_streaming();

        let bytes = datagram(0, &f.format, 7);
        for n in 1..20 {
            let now = T0 + f64::from(n) * 0.001;
            let outcome = f.sync.on_packet(now, AudioPacket::parse(&bytes).unwrap());
            assert_eq!(outcome, PacketOutcome::AwaitingAnchor);
        }

        assert_eq!(f.sync.ratio(), 1.);
        assert!(f.sync.resampler.ratios.is_empty());

        let mut out = vec![1; 96];
        f.reader.read(0, &mut out);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn ratio_update_without_anchors_is_a_no_op() {
        let mut f = fixture();
        assert_eq!(f.sync.update_ratio(T0 + 10.), None);
        assert_eq!(f.sync.ratio(), 1.);
        assert_eq!(f.sync.delay_error(), 0.);
    }

    #[test]
    fn coincident_anchors_are_skipped() {
        let mut f = fixture();
        let t = f.sync.anchors()[1].t;
        f.sync.push_anchor(AudioClockSample { t1: t, k1: 48 });

        assert_eq!(f.sync.update_ratio(t + 1.), None);
        assert!(f.sync.delay_error().is_finite());
        assert_eq!(f.sync.ratio(), 1.);
    }

    #[test]
    fn anchors_shift_and_accumulate() {
        let mut f = fixture();
        let initial = f.sync.anchors()[1];
        assert_eq!(initial.k, 0u32.wrapping_sub(48));

        f.sync.push_anchor(AudioClockSample { t1: 5., k1: 48 });
        f.sync.push_anchor(AudioClockSample { t1: 6., k1: 50 });

        let [a0, a1] = *f.sync.anchors();
        assert_eq!(a0, Anchor { t: 5., k: 0 });
        assert_eq!(a1, Anchor { t: 6., k: 50 });
    }

    /// Starts streaming, and brings the loop to the point where the next packet,
    /// received at `T0 + 0.002`, has a usable pair of anchors.
    fn prime(f: &mut Fixture) {
        f.clock_tx.set_streaming();

        let bytes = datagram(0, &f.format, 1);
        let outcome = f.sync.on_packet(T0 + 0.001, AudioPacket::parse(&bytes).unwrap());
        assert_eq!(outcome, PacketOutcome::AwaitingAnchor);

        assert!(f.clock_tx.push(AudioClockSample {
            t1: T0 + 0.0015,
            k1: 48
        }));
    }

    #[test]
    fn writes_at_the_packet_timestamp() {
        let mut f = fixture();
        prime(&mut f);

        let bytes = datagram(4242, &f.format, -3);
        let outcome = f.sync.on_packet(T0 + 0.002, AudioPacket::parse(&bytes).unwrap());
        assert_eq!(outcome, PacketOutcome::Written { frames: 48 });
        assert_eq!(f.sync.received_frames(), 48);
        assert_eq!(f.sync.resampler.ratios.len(), 1);

        let mut out = vec![0; 96];
        f.reader.read(4242, &mut out);
        assert!(out.iter().all(|&s| s == -3));

        // the priming packet was never stored
        f.reader.read(0, &mut out);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn short_payloads_are_rejected() {
        let mut f = fixture();
        prime(&mut f);

        let bytes = [0, 0, 0, 1, 0xAA, 0xBB];
        let outcome = f.sync.on_packet(T0 + 0.002, AudioPacket::parse(&bytes).unwrap());
        assert_eq!(outcome, PacketOutcome::BadPayload { n_samples: 1 });
        assert_eq!(f.sync.received_frames(), 0);
    }

    #[test]
    fn ratio_is_always_clamped() {
        let mut f = fixture();

        // a wildly negative error: audio played far more than was received
        f.sync.push_anchor(AudioClockSample { t1: T0, k1: 0 });
        f.sync.push_anchor(AudioClockSample { t1: T0 + 0.001, k1: 1_000_000 });

        for n in 0..500 {
            let ratio = f.sync.update_ratio(T0 + 0.002 + f64::from(n) * 0.001).unwrap();
            assert!((MIN_RATIO..=MAX_RATIO).contains(&ratio));
        }
        assert_eq!(f.sync.ratio(), MAX_RATIO);
    }

    #[test]
    fn error_is_fill_level_minus_target() {
        let mut f = fixture();
        // 480 frames played at T0, 528 at T0 + 1ms
        f.sync.received_frames = 1000;
        f.sync.anchors = [Anchor { t: T0, k: 480 }, Anchor { t: T0 + 0.001, k: 528 }];

        f.sync.update_ratio(T0 + 0.0005).unwrap();

        // received 1000 + 48 - 480, played 24, target 480
        let expected = (1048. - 480.) - 24. - 480.;
        assert!((f.sync.delay_error() - expected).abs() < 1e-6);
        assert!(f.sync.ratio() < 1.);
    }

    #[test]
    fn loop_and_anchors_follow_midnight() {
        let day = timebase::DAY_SECS as f64;
        let format = Format::standard();
        let (writer, _reader) = ring::ring_buffer(&format);
        let (mut clock_tx, clock_rx) = bridge::audio_clock_bridge(bridge::DEFAULT_CAPACITY);
        let mut sync =
            StreamSynchronizer::new(format, Passthrough::default(), writer, clock_rx, day - 0.01);
        clock_tx.set_streaming();

        let bytes = datagram(0, &format, 1);
        let mut now = day - 0.01;
        for _ in 0..9 {
            now += 0.001;
            assert!(clock_tx.push(AudioClockSample { t1: now, k1: 48 }));
            sync.on_packet(now, AudioPacket::parse(&bytes).unwrap());
        }
        let error = sync.delay_error();

        // the anchors were taken before midnight
        assert!(sync.anchors().iter().all(|a| a.t > day - 0.01));

        // at midnight, the loop and its anchors move to the new day
        now = 0.;
        assert!(clock_tx.push(AudioClockSample { t1: now, k1: 48 }));
        sync.on_packet(now, AudioPacket::parse(&bytes).unwrap());

        assert!((sync.dll().t0() - now).abs() < 1e-4, "t0 {}", sync.dll().t0());
        let [a0, a1] = *sync.anchors();
        assert!((a0.t + 0.001).abs() < 1e-9, "a0 {}", a0.t);
        assert!((a1.t - now).abs() < 1e-9, "a1 {}", a1.t);
        assert!((sync.delay_error() - error).abs() < 1., "{error} then {}", sync.delay_error());
        assert!((MIN_RATIO..=MAX_RATIO).contains(&sync.ratio()));
    }

    #[test]
    fn counters_wrap() {
        let mut f = fixture();
        f.sync.received_frames = u32::MAX - 10;
        f.sync.anchors = [
            Anchor {
                t: T0,
                k: u32::MAX - 500,
            },
            Anchor {
                t: T0 + 0.001,
                k: (u32::MAX - 500).wrapping_add(48),
            },
        ];

        f.sync.update_ratio(T0 + 0.001).unwrap();

        // received: (MAX - 10 + 48) - (MAX - 500) = 538, played 48
        let expected = 538. - 48. - 480.;
        assert!((f.sync.delay_error() - expected).abs() < 1e-6);
    }
}
