//! The resampling stage.
//!
//! The synchronizer only decides *which* ratio to resample at, the interpolation
//! itself happens behind the [`Resample`] trait. [`SincResampler`] is the
//! implementation used in production, built on [`rubato`].

use rubato::Resampler as _;

use castsync_proto::Format;

/// Ratios are always clamped to `1 ± 0.05` before reaching a resampler, leave some
/// headroom above that.
pub const MAX_RELATIVE_RATIO: f64 = 1.1;

const SINC_LEN: usize = 128;

/// Converts one period of interleaved `i16` audio at an adjustable ratio.
pub trait Resample {
    /// Sets the output/input rate ratio used by subsequent calls to
    /// [`process`](Resample::process).
    fn set_ratio(&mut self, ratio: f64) -> crate::Result<()>;

    /// Resamples one period of interleaved input.
    ///
    /// The output is interleaved too, its length varies from call to call: the
    /// number of frames produced is `output.len() / channels`.
    fn process(&mut self, input: &[i16]) -> crate::Result<&[i16]>;
}

/// Band-limited sinc interpolation, one period in, a variable number of frames out.
pub struct SincResampler {
    inner: rubato::SincFixedIn<f32>,
    channels: usize,
    period_size: usize,
    // one buffer per channel, rubato works on planar data
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    interleaved: Vec<i16>,
}

impl SincResampler {
    pub fn new(format: &Format) -> crate::Result<Self> {
        let channels = format.channels() as usize;
        let period_size = format.period_size() as usize;

        let window = rubato::WindowFunction::BlackmanHarris2;
        let parameters = rubato::SincInterpolationParameters {
            sinc_len: SINC_LEN,
            f_cutoff: rubato::calculate_cutoff(SINC_LEN, window),
            interpolation: rubato::SincInterpolationType::Linear,
            oversampling_factor: 128,
            window,
        };

        let inner = rubato::SincFixedIn::<f32>::new(
            1.,
            MAX_RELATIVE_RATIO,
            parameters,
            period_size,
            channels,
        )?;

        let max_out = inner.output_frames_max();

        log::debug!(
            "Sinc resampler: {channels} channels, {period_size} frames in, at most {max_out} out"
        );

        Ok(Self {
            inner,
            channels,
            period_size,
            input: vec![vec![0.; period_size]; channels],
            output: vec![vec![0.; max_out]; channels],
            interleaved: Vec::with_capacity(max_out * channels),
        })
    }
}

/// Converts a wire sample to the `[-1, 1)` float range.
#[inline(always)]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.
}

/// Out of range input saturates.
#[inline(always)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.).round().clamp(-32768., 32767.) as i16
}

impl Resample for SincResampler {
    fn set_ratio(&mut self, ratio: f64) -> crate::Result<()> {
        self.inner.set_resample_ratio(ratio, true)?;
        Ok(())
    }

    fn process(&mut self, input: &[i16]) -> crate::Result<&[i16]> {
        let expected = self.period_size * self.channels;
        if input.len() != expected {
            return Err(crate::Error::InputLength {
                expected,
                got: input.len(),
            });
        }

        for (i, frame) in input.chunks_exact(self.channels).enumerate() {
            for (channel, &sample) in self.input.iter_mut().zip(frame) {
                channel[i] = i16_to_f32(sample);
            }
        }

        let (_frames_in, frames_out) =
            self.inner
                .process_into_buffer(&self.input, &mut self.output, None)?;

        self.interleaved.clear();
        for i in 0..frames_out {
            self.interleaved
                .extend(self.output.iter().map(|channel| f32_to_i16(channel[i])));
        }

        Ok(&self.interleaved)
    }
}
