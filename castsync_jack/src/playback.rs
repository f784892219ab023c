//! The receiving end's JACK process handler.

use castsync_clock::{playout::Playout, timebase};
use castsync_proto::Format;

use crate::interleaver::Interleaver;

pub struct PlaybackHandler {
    playout: Playout,
    ports: Interleaver<jack::AudioOut>,
    scratch: Box<[i16]>,
    period_secs: f64,
    period_size: u32,
}

impl PlaybackHandler {
    pub(crate) fn new(format: &Format, playout: Playout, ports: Interleaver<jack::AudioOut>) -> Self {
        Self {
            playout,
            ports,
            scratch: vec![0; format.period_samples() as usize].into_boxed_slice(),
            period_secs: format.period_secs(),
            period_size: format.period_size(),
        }
    }

    #[inline(always)]
    pub fn playout(&self) -> &Playout {
        &self.playout
    }
}

/// Seconds from `now_usecs` to the start of the next cycle, if it's ahead.
fn until_next_cycle(now_usecs: jack::Time, next_usecs: jack::Time) -> Option<f64> {
    let remaining = next_usecs.checked_sub(now_usecs)?;
    Some(remaining as f64 * 1e-6)
}

impl jack::ProcessHandler for PlaybackHandler {
    fn process(&mut self, client: &jack::Client, scope: &jack::ProcessScope) -> jack::Control {
        let now = timebase::now();

        let until_next = scope
            .cycle_times()
            .ok()
            .and_then(|times| until_next_cycle(client.time(), times.next_usecs))
            .unwrap_or(self.period_secs);

        self.playout.process(now, until_next, &mut self.scratch);
        self.ports.deinterleave(scope, &self.scratch);

        jack::Control::Continue
    }

    fn buffer_size(&mut self, _client: &jack::Client, size: jack::Frames) -> jack::Control {
        if size == self.period_size {
            jack::Control::Continue
        } else {
            log::error!(
                "JACK buffer size changed to {size} frames, the stream needs {}",
                self.period_size
            );
            jack::Control::Quit
        }
    }
}
