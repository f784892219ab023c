//! Latency error to resampling ratio.

/// Bandwidth the estimator starts with.
pub const DEFAULT_BANDWIDTH: f64 = 0.1;

/// Cascaded low-pass and integrator turning a latency error (in frames) into a
/// playback rate multiplier.
///
/// `z1` low-passes the scaled error, `z2` smooths `z1` and provides the fast
/// proportional correction, `z3` integrates `z2` and absorbs the long-term clock
/// drift. The ratio is `1 - (z2 + z3)`.
///
/// The output is **not** clamped, callers must bound it before handing it to a
/// resampler.
#[derive(Debug, Clone, PartialEq)]
pub struct RatioEstimator {
    period_size: f64,
    sample_rate: f64,
    w0: f64,
    w1: f64,
    w2: f64,
    z1: f64,
    z2: f64,
    z3: f64,
}

impl RatioEstimator {
    pub fn new(period_size: u32, sample_rate: u32) -> Self {
        let mut this = Self {
            period_size: f64::from(period_size),
            sample_rate: f64::from(sample_rate),
            w0: 0.,
            w1: 0.,
            w2: 0.,
            z1: 0.,
            z2: 0.,
            z3: 0.,
        };
        this.set_bandwidth(DEFAULT_BANDWIDTH);
        this
    }

    /// Retunes the filter gains. The integrator state is kept.
    pub fn set_bandwidth(&mut self, bandwidth: f64) {
        let omega = 6.28 * bandwidth * self.period_size / self.sample_rate;
        self.w0 = 1. - (-20. * omega).exp();
        self.w1 = omega * 1.5 / self.period_size;
        self.w2 = omega / 1.5;
    }

    /// Feeds one error sample and returns the updated ratio.
    #[inline]
    pub fn estimate_ratio(&mut self, err: f64) -> f64 {
        self.z1 += self.w0 * (self.w1 * err - self.z1);
        self.z2 += self.w0 * (self.z1 - self.z2);
        self.z3 += self.w2 * self.z2;
        1. - (self.z2 + self.z3)
    }
}
