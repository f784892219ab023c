//! Clock recovery and drift compensation for streamed PCM audio.
//!
//! Sender and receiver run their audio hardware from independent clocks that tick
//! at nominally, but never exactly, the same rate. This crate keeps playback latency
//! bounded in spite of that:
//!
//! - [`dll::DelayLockedLoop`] smooths jittery period timestamps into a clean
//!   estimate of period boundaries. It is used on both ends, by
//!   [`capture::CaptureClock`] to timestamp outgoing packets, and by the
//!   [`synchronizer::StreamSynchronizer`] to estimate when packets truly arrived.
//! - [`ratio::RatioEstimator`] turns the measured latency error into a resampling
//!   ratio.
//! - [`ring`] is the jitter buffer between the network thread (writer) and the
//!   audio output thread (reader).
//! - [`bridge`] carries the audio output clock back to the network thread.
//! - [`playout::Playout`] is the audio output side of the loop.
//!
//! The actual interpolation is delegated to an implementation of
//! [`resample::Resample`].

pub mod bridge;
pub mod capture;
pub mod dll;
pub mod playout;
pub mod ratio;
pub mod resample;
pub mod ring;
pub mod synchronizer;
pub mod timebase;

pub use castsync_proto as proto;

/// Errors raised by the resampling stage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to construct resampler: {0}")]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),
    #[error("resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
    #[error("expected {expected} input samples, got {got}")]
    InputLength { expected: usize, got: usize },
}

pub type Result<T> = core::result::Result<T, Error>;
