//! A test signal, in place of the captured audio.

use core::f64::consts::TAU;

pub const CLICK_FREQUENCY: f64 = 1760.;

/// Length of each click, in frames.
pub const CLICK_FRAMES: u32 = 1000;

const AMPLITUDE: f64 = 0.5 * 32768.;

/// Generates a short sine burst at the start of every second of the frame
/// timeline, identical on all channels.
///
/// Since the bursts are aligned to the timestamps, the offset between the clicks
/// of two hosts shows how well their playback is synchronized.
#[derive(Debug, Clone)]
pub struct ClickGenerator {
    sample_rate: u32,
    channels: usize,
    step: f64,
    phase: f64,
}

impl ClickGenerator {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
            step: TAU * CLICK_FREQUENCY / f64::from(sample_rate),
            phase: 0.,
        }
    }

    /// Fills `out` (interleaved) with the frames starting at `first_frame`.
    pub fn fill(&mut self, first_frame: u32, out: &mut [i16]) {
        for (i, frame) in out.chunks_exact_mut(self.channels).enumerate() {
            let position = first_frame.wrapping_add(i as u32) % self.sample_rate;

            let value = if position < CLICK_FRAMES {
                let value = (self.phase.sin() * AMPLITUDE) as i16;
                self.phase += self.step;
                if self.phase >= TAU {
                    self.phase -= TAU;
                }
                value
            } else {
                self.phase = 0.;
                0
            };

            frame.fill(value);
        }
    }
}
