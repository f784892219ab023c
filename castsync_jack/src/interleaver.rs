//! Conversion between JACK's planar `f32` ports and interleaved `i16` periods.

use castsync_clock::resample::{f32_to_i16, i16_to_f32};

/// A non-empty set of ports of the same direction, one per channel.
pub(crate) struct Interleaver<T> {
    ports: Box<[jack::Port<T>]>,
}

impl<T: jack::PortSpec> Interleaver<T> {
    /// Returns `None` if `ports` is empty.
    pub fn new(ports: impl IntoIterator<Item = jack::Port<T>>) -> Option<Self> {
        let ports: Box<[_]> = ports.into_iter().collect();
        (!ports.is_empty()).then_some(Self { ports })
    }

    /// Full names (`client:port`) of the ports, in channel order.
    pub fn names(&self) -> Result<Vec<String>, jack::Error> {
        self.ports.iter().map(jack::Port::name).collect()
    }
}

impl Interleaver<jack::AudioIn> {
    /// Interleaves this cycle's input into `out`.
    #[inline]
    pub fn interleave(&self, scope: &jack::ProcessScope, out: &mut [i16]) {
        interleave(self.ports.iter().map(|p| p.as_slice(scope)), out);
    }
}

impl Interleaver<jack::AudioOut> {
    /// Spreads `src` over this cycle's output buffers.
    #[inline]
    pub fn deinterleave(&mut self, scope: &jack::ProcessScope, src: &[i16]) {
        let n_ports = self.ports.len();
        deinterleave(src, n_ports, self.ports.iter_mut().map(|p| p.as_mut_slice(scope)));
    }
}

/// Writes the channels' samples, frame after frame, into `out`.
///
/// Stops at whichever of the channels or `out` runs out first, the rest of `out`
/// is left untouched.
pub(crate) fn interleave<'a>(channels: impl ExactSizeIterator<Item = &'a [f32]>, out: &mut [i16]) {
    let n_channels = channels.len();

    for (c, channel) in channels.enumerate() {
        let dests = out.iter_mut().skip(c).step_by(n_channels);
        for (dest, &src) in dests.zip(channel) {
            *dest = f32_to_i16(src);
        }
    }
}

/// Spreads interleaved `src` over `n_channels` channel buffers. Samples missing
/// from `src` are written as silence.
pub(crate) fn deinterleave<'a>(
    src: &[i16],
    n_channels: usize,
    channels: impl Iterator<Item = &'a mut [f32]>,
) {
    for (c, channel) in channels.enumerate() {
        let mut srcs = src.iter().skip(c).step_by(n_channels);
        for dest in channel {
            *dest = srcs.next().copied().map_or(0., i16_to_f32);
        }
    }
}
