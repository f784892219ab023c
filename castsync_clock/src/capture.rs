//! Packet timestamping on the sending side.

use castsync_proto::Format;

use crate::{dll::DelayLockedLoop, timebase};

/// The timestamp to put on an outgoing packet, and how far the capture clock
/// strayed from the expected position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub timestamp: u32,
    /// Frames between where this period actually started and where it was
    /// expected to. Always `0` for the first period.
    pub drift: i32,
}

/// Numbers outgoing periods on the day-wrapped frame timeline.
///
/// Capture callbacks fire with a lot of scheduling jitter, so each period's start
/// time is taken from a [`DelayLockedLoop`] rather than read directly. Timestamps
/// advance by exactly one period from one packet to the next, a drifting or
/// overrunning capture clock is only reported.
///
/// At midnight the numbering restarts along with the frame timeline: the period
/// starting on the new day is numbered from `0`, the one before it keeps its
/// old number.
#[derive(Debug, Clone)]
pub struct CaptureClock {
    dll: DelayLockedLoop,
    sample_rate: u32,
    period_size: u32,
    day_frames: i64,
    /// Frame within the day the previous period started at. Moved by a day, and
    /// possibly out of `0..day_frames`, when the clock crosses midnight.
    last_raw: Option<i64>,
}

impl CaptureClock {
    pub fn new(format: &Format) -> Self {
        Self {
            dll: DelayLockedLoop::new(format.period_secs()),
            sample_rate: format.sample_rate(),
            period_size: format.period_size(),
            day_frames: timebase::day_frames(format.sample_rate()) as i64,
            last_raw: None,
        }
    }

    /// Anchors the clock at `now`, the next stamp starts a new sequence.
    pub fn reset(&mut self, now: f64) {
        self.dll.reset(now);
        self.last_raw = None;
    }

    #[inline(always)]
    pub const fn dll(&self) -> &DelayLockedLoop {
        &self.dll
    }

    /// Moves the DLL and the last period's number onto the other side of midnight.
    fn follow_wrap(&mut self, shift: f64) {
        self.dll.shift(shift);

        let day_frames = if shift < 0. {
            -self.day_frames
        } else {
            self.day_frames
        };
        self.last_raw = self.last_raw.map(|raw| raw + day_frames);

        log::info!("Wall clock wrapped at midnight, frame numbering restarts");
    }

    /// Computes the timestamp of the period that started at (about) `now`.
    pub fn stamp(&mut self, now: f64) -> Stamp {
        let shift = timebase::wrap_shift(self.dll.t1(), now);
        if shift != 0. {
            self.follow_wrap(shift);
        }

        self.dll.update(now);
        // t0 may sit a hair outside of the day right around midnight
        let raw = (self.dll.t0() * f64::from(self.sample_rate) + 0.5).floor() as i64;

        let Some(last_raw) = self.last_raw.replace(raw) else {
            return Stamp {
                timestamp: self.number(raw),
                drift: 0,
            };
        };

        let expected = last_raw + i64::from(self.period_size);
        let timestamp = self.number(expected);
        let drift = (raw - expected).clamp(i32::MIN.into(), i32::MAX.into()) as i32;

        if drift != 0 {
            if drift.unsigned_abs() <= self.period_size {
                log::debug!("Capture clock drifted by {drift} frames at {timestamp}");
            } else {
                log::warn!("Capture clock jumped by {drift} frames at {timestamp}, overrun?");
            }
        }

        Stamp { timestamp, drift }
    }

    /// The wire number of a frame: its index within the day, wrapping at 2^32.
    #[inline(always)]
    fn number(&self, frame: i64) -> u32 {
        frame.rem_euclid(self.day_frames) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castsync_proto::format::SampleRate;
    use core::num::NonZeroU32;

    fn format(rate: u32) -> Format {
        Format {
            sample_rate: SampleRate(NonZeroU32::new(rate).unwrap()),
            ..Format::standard()
        }
    }

    #[test]
    fn first_stamp_is_the_wall_clock_frame() {
        let mut clock = CaptureClock::new(&Format::standard());
        clock.reset(10.);

        let stamp = clock.stamp(10.001);
        // the DLL's t0 after one update is its prediction from the reset
        assert_eq!(stamp.timestamp, 480_048);
        assert_eq!(stamp.drift, 0);
    }

    #[test]
    fn timestamps_advance_by_one_period() {
        let mut clock = CaptureClock::new(&Format::standard());
        clock.reset(100.);

        let mut previous = clock.stamp(100.001).timestamp;
        for n in 2..5_000u32 {
            let stamp = clock.stamp(100. + f64::from(n) * 0.001);
            assert_eq!(stamp.timestamp, previous.wrapping_add(48));
            assert!(stamp.drift.abs() <= 1, "period {n}: drift {}", stamp.drift);
            previous = stamp.timestamp;
        }
    }

    #[test]
    fn continuous_across_u32_wrap() {
        // at 192 kHz the frame counter wraps after about 22370 s
        let format = format(192_000);
        let period = format.period_size();
        assert_eq!(period, 192);

        let start = (f64::from(u32::MAX) - 2_000.) / 192_000.;
        let mut clock = CaptureClock::new(&format);
        clock.reset(start);

        let mut previous = clock.stamp(start + 0.001).timestamp;
        let mut wrapped = false;
        for n in 2..100u32 {
            let stamp = clock.stamp(start + f64::from(n) * 0.001);
            assert_eq!(stamp.timestamp, previous.wrapping_add(period));
            wrapped |= stamp.timestamp < previous;
            previous = stamp.timestamp;
        }
        assert!(wrapped);
    }

    #[test]
    fn jumps_are_reported_not_followed() {
        let mut clock = CaptureClock::new(&Format::standard());
        clock.reset(0.);

        let mut t = 0.;
        let mut previous = 0;
        for _ in 0..1_000 {
            t += 0.001;
            previous = clock.stamp(t).timestamp;
        }

        // an overrun: the callback shows up 20 periods late
        t += 0.021;
        let stamp = clock.stamp(t);
        assert_eq!(stamp.timestamp, previous.wrapping_add(48));

        let stamp = clock.stamp(t + 0.001);
        assert!(stamp.drift > 0);
    }

    #[test]
    fn numbering_restarts_at_midnight() {
        let mut clock = CaptureClock::new(&Format::standard());
        // midnight falls inside a period
        let start = 86_399.500_3;
        clock.reset(start);

        let day = 86_400.;
        let day_frames = timebase::day_frames(48_000);
        let mut previous = clock.stamp(start + 0.001).timestamp;

        for n in 2..1_000u32 {
            let t = start + f64::from(n) * 0.001;
            let stamp = clock.stamp(if t >= day { t - day } else { t });

            // still one period apart, on the day-wrapped timeline
            let expected = (u64::from(previous) + 48) % day_frames;
            assert_eq!(u64::from(stamp.timestamp), expected, "period {n}");
            assert!(stamp.drift.abs() <= 1, "period {n}: drift {}", stamp.drift);
            previous = stamp.timestamp;
        }

        // 499 periods into the new day
        assert!(previous < 48 * 500);
    }

    #[test]
    fn period_ending_at_midnight_keeps_its_number() {
        let mut clock = CaptureClock::new(&Format::standard());
        let day = 86_400.;
        let day_frames = timebase::day_frames(48_000) as u32;

        // periods start exactly on the frame grid, the last one of the day at
        // 1 ms before midnight
        let start = day - 0.1;
        clock.reset(start);
        let mut previous = clock.stamp(start + 0.001).timestamp;
        for n in 2..100u32 {
            previous = clock.stamp(start + f64::from(n) * 0.001).timestamp;
        }
        assert_eq!(previous, day_frames - 48);

        // a late capture callback, just after midnight
        let stamp = clock.stamp(0.000_01);
        assert_eq!(stamp.timestamp, 0);
        assert!(stamp.drift.abs() <= 1, "drift {}", stamp.drift);

        // a callback that fires early, the DLL still places it before midnight
        let mut clock = CaptureClock::new(&Format::standard());
        clock.reset(start);
        for n in 1..100u32 {
            previous = clock.stamp(start + f64::from(n) * 0.001).timestamp;
        }
        let stamp = clock.stamp(day - 0.000_01);
        assert_eq!(stamp.timestamp, 0);
        let stamp = clock.stamp(0.001);
        assert_eq!(stamp.timestamp, 48, "after {previous}");
    }
}
