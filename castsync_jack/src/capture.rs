//! The sending end's JACK process handler.

use castsync_clock::{capture::CaptureClock, timebase};
use castsync_network::transmitter::PacketSink;
use castsync_proto::Format;

use crate::{click::ClickGenerator, interleaver::Interleaver};

/// Where the sent audio comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureSource {
    /// The client's input ports.
    #[default]
    Ports,
    /// A [`ClickGenerator`], the input ports aren't registered.
    Click,
}

pub(crate) enum Input {
    Ports(Interleaver<jack::AudioIn>),
    Click(ClickGenerator),
}

/// Timestamps captured periods and hands them to the transmitter.
struct Packetizer {
    clock: CaptureClock,
    sink: PacketSink,
    scratch: Box<[i16]>,
    period_secs: f64,
    started: bool,
}

impl Packetizer {
    /// Sends the period whose delivery to us started at `now`. `fill` receives its
    /// timestamp, and writes its samples.
    fn period(&mut self, now: f64, fill: impl FnOnce(u32, &mut [i16])) -> Option<u32> {
        // the period we're handed was captured during the previous one
        let start = now - self.period_secs;

        if !core::mem::replace(&mut self.started, true) {
            self.clock.reset(start - self.period_secs);
        }

        let timestamp = self.clock.stamp(start).timestamp;
        fill(timestamp, &mut self.scratch);

        let mut packet = self.sink.take()?;
        packet.set_timestamp(timestamp);
        packet.encode_samples(self.scratch.iter().copied());

        // can't be full, the packet comes from the sink's own pool
        let _ = self.sink.send(packet);

        Some(timestamp)
    }
}

pub struct CaptureHandler {
    input: Input,
    packetizer: Packetizer,
    period_size: u32,
}

impl CaptureHandler {
    pub(crate) fn new(format: &Format, input: Input, sink: PacketSink) -> Self {
        Self {
            input,
            packetizer: Packetizer {
                clock: CaptureClock::new(format),
                sink,
                scratch: vec![0; format.period_samples() as usize].into_boxed_slice(),
                period_secs: format.period_secs(),
                started: false,
            },
            period_size: format.period_size(),
        }
    }

    /// Names of the input ports, empty when generating a click.
    pub fn port_names(&self) -> Result<Vec<String>, jack::Error> {
        match &self.input {
            Input::Ports(interleaver) => interleaver.names(),
            Input::Click(_) => Ok(Vec::new()),
        }
    }
}

impl jack::ProcessHandler for CaptureHandler {
    fn process(&mut self, _client: &jack::Client, scope: &jack::ProcessScope) -> jack::Control {
        let input = &mut self.input;

        self.packetizer
            .period(timebase::now(), |timestamp, out| match input {
                Input::Ports(interleaver) => interleaver.interleave(scope, out),
                Input::Click(click) => click.fill(timestamp, out),
            });

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
