//! Second order delay-locked loop.
//!
//! Given a stream of noisy timestamps, one per period, the loop tracks the true
//! period boundaries. Its natural frequency is a tenth of the nominal period rate
//! and it is critically damped, so jitter is filtered out while a slowly drifting
//! period (a clock running slightly fast or slow) is followed without steady-state
//! error.

use core::f64::consts::{PI, SQRT_2};

#[derive(Debug, Clone, PartialEq)]
pub struct DelayLockedLoop {
    /// Nominal period, in seconds.
    tper: f64,
    b: f64,
    c: f64,
    t0: f64,
    t1: f64,
    e2: f64,
}

impl DelayLockedLoop {
    /// Creates a loop for periods of `period_secs` seconds.
    ///
    /// The loop must be [`reset`](Self::reset) before its estimates mean anything.
    pub fn new(period_secs: f64) -> Self {
        let omega = 2. * PI * 0.1 * period_secs;

        Self {
            tper: period_secs,
            b: SQRT_2 * omega,
            c: omega * omega,
            t0: 0.,
            t1: 0.,
            e2: 0.,
        }
    }

    /// Anchors the loop at time `t`, assuming the nominal period.
    #[inline]
    pub fn reset(&mut self, t: f64) {
        self.e2 = self.tper;
        self.t0 = t;
        self.t1 = t + self.e2;
    }

    /// Feeds the observed time of the next period boundary.
    #[inline]
    pub fn update(&mut self, t: f64) {
        let e = t - self.t1;
        self.t0 = self.t1;
        self.t1 += self.b * e + self.e2;
        self.e2 += self.c * e;
    }

    /// Filtered time of the current period's start.
    #[inline(always)]
    pub const fn t0(&self) -> f64 {
        self.t0
    }

    /// Predicted time of the next period's start.
    #[inline(always)]
    pub const fn t1(&self) -> f64 {
        self.t1
    }

    /// Current estimate of the period's duration.
    #[inline(always)]
    pub const fn period_time(&self) -> f64 {
        self.t1 - self.t0
    }

    /// The period the loop was built for, in seconds.
    #[inline(always)]
    pub const fn nominal_period(&self) -> f64 {
        self.tper
    }

    /// Moves the loop's phase by `dt` seconds, keeping its period estimate.
    ///
    /// Used to follow the timebase across midnight.
    #[inline]
    pub fn shift(&mut self, dt: f64) {
        self.t0 += dt;
        self.t1 += dt;
    }
}
