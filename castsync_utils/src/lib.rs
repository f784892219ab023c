//! Utilities for building predictable, low-latency, allocation-conscious audio pipelines.
//!
//! This crate provides lightweight primitives shared by the capture, network and
//! playback threads: a buffer pool for recycling fixed-size packets, a cancellation
//! token for breaking blocking loops from another thread, and a timer for detecting
//! stalled streams.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

pub mod pool;

pub use rtrb;

/// A lightweight wrapper around [`std::time::Instant`] used to detect stalls.
/// Stores the instant at which the timer was last reset.
///
/// This type is primarily intended for noticing that a connectionless stream
/// (e.g. UDP multicast) has stopped delivering data.
///
/// ```ignore
/// let mut timer = StallTimer::new();
///
/// // we have received a packet.
/// timer.reset();
///
/// if timer.elapsed() > STALL_WARNING {
///     // report the stream as stalled
/// }
/// ```
#[derive(Debug, Clone)]
pub struct StallTimer(std::time::Instant);

impl Default for StallTimer {
    fn default() -> Self {
        Self(std::time::Instant::now())
    }
}

impl StallTimer {
    /// Creates a new timer starting at the current instant.
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the timer to start measuring elapsed time from now.
    #[inline(always)]
    pub fn reset(&mut self) {
        *self = Self::new()
    }

    /// Returns the amount of time elapsed since the last reset.
    #[inline(always)]
    pub fn elapsed(&self) -> core::time::Duration {
        self.0.elapsed()
    }
}

/// A shared flag used to ask a looping thread to stop.
///
/// Cloning the token yields another handle to the same flag. Cancellation is
/// sticky: once cancelled, a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
