//! Wall clock sampling.
//!
//! All times handled by this crate are `f64` seconds since the last midnight (UTC).
//! Wrapping at day boundaries keeps the magnitude small, so that the sub-microsecond
//! precision the control loops need survives long uptimes.

/// Number of seconds in the day-aligned window.
pub const DAY_SECS: u64 = 86_400;

/// Returns the current wall clock time, in seconds within the current day.
///
/// If the system clock reads before the unix epoch, `0.0` is returned.
#[inline]
pub fn now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(day_secs)
        .unwrap_or(0.)
}

/// Folds a duration since the unix epoch into the day-aligned window.
#[inline(always)]
pub fn day_secs(since_epoch: core::time::Duration) -> f64 {
    (since_epoch.as_secs() % DAY_SECS) as f64 + f64::from(since_epoch.subsec_nanos()) * 1e-9
}

/// Returns how far `t` must be moved, `0` or a whole day either way, to lie within
/// half a day of `reference`.
///
/// Times are only comparable once they are on the same side of a midnight.
#[inline]
pub fn wrap_shift(t: f64, reference: f64) -> f64 {
    const DAY: f64 = DAY_SECS as f64;

    let diff = t - reference;
    if diff > DAY / 2. {
        -DAY
    } else if diff < -DAY / 2. {
        DAY
    } else {
        0.
    }
}

/// Number of frames in a day.
#[inline(always)]
pub const fn day_frames(sample_rate: u32) -> u64 {
    DAY_SECS * sample_rate as u64
}

/// Converts a time in seconds into the index of the frame within the day.
#[inline(always)]
pub fn day_frame(t: f64, sample_rate: u32) -> u64 {
    // `as` saturates, the result is in [0, DAY_SECS * rate] for valid times
    (t * f64::from(sample_rate) + 0.5).floor() as u64
}

/// Converts a time in seconds into a frame number, wrapping at 2^32.
///
/// Both ends number frames this way, so that packet timestamps and playback
/// positions share one timeline. The timeline restarts from `0` at midnight.
#[inline(always)]
pub fn frame_at(t: f64, sample_rate: u32) -> u32 {
    day_frame(t, sample_rate) as u32
}
