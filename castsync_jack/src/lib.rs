//! JACK front ends for castsync: a capture client feeding the transmitter, and a
//! playback client reading from the jitter buffer.

pub use castsync_clock as clock;
pub use castsync_network as network;
pub use castsync_proto as proto;

use std::io;

use castsync_proto::Format;

pub mod capture;
pub mod cli;
pub mod click;
mod interleaver;
pub mod playback;

pub use capture::{CaptureHandler, CaptureSource};
pub use playback::PlaybackHandler;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("JACK error: {0}")]
    Jack(#[from] jack::Error),
    #[error("JACK runs {actual} frame periods, the stream needs {expected}")]
    PeriodMismatch { expected: u32, actual: u32 },
    #[error("JACK runs at {actual} Hz, the stream needs {expected} Hz")]
    SampleRateMismatch { expected: u32, actual: usize },
    #[error("a {latency} period latency doesn't fit in the jitter buffer")]
    FormatTooLarge { latency: u32 },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to install the interrupt handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub type Result<T> = core::result::Result<T, Error>;

/// Checks that a JACK server running at `sample_rate`, with `buffer_size` frame
/// periods, can carry `format`.
///
/// Periods are never split or merged, so the buffer size must equal the stream's
/// period size exactly. The format's jitter buffer must also be addressable.
pub fn validate(format: &Format, sample_rate: usize, buffer_size: u32) -> Result<()> {
    if format.checked_capacity_samples().is_none() {
        return Err(Error::FormatTooLarge {
            latency: format.latency_periods(),
        });
    }

    if usize::try_from(format.sample_rate()).ok() != Some(sample_rate) {
        return Err(Error::SampleRateMismatch {
            expected: format.sample_rate(),
            actual: sample_rate,
        });
    }

    if buffer_size != format.period_size() {
        return Err(Error::PeriodMismatch {
            expected: format.period_size(),
            actual: buffer_size,
        });
    }

    Ok(())
}

fn no_channels<T>(interleaver: Option<T>) -> Result<T> {
    interleaver.ok_or_else(|| Error::Io(io::Error::other("no audio channels")))
}

/// Connects to a running JACK server, which must be able to carry `format`.
pub fn open_client(name: &str, format: &Format) -> Result<jack::Client> {
    log::info!("Creating JACK client...");
    let (client, status) = jack::Client::new(name, jack::ClientOptions::NO_START_SERVER)?;
    log::debug!("JACK client {} opened ({status:?})", client.name());

    validate(format, client.sample_rate() as usize, client.buffer_size())?;

    Ok(client)
}

/// Starts capturing from `source` into `sink`.
///
/// When capturing from ports, one input port is registered per channel, and
/// connected to `device`'s capture ports when they exist. Failing that, they are
/// left for the user to connect.
pub fn start_capture(
    client: jack::Client,
    format: &Format,
    device: &str,
    source: CaptureSource,
    sink: castsync_network::transmitter::PacketSink,
) -> Result<jack::AsyncClient<(), CaptureHandler>> {
    let input = match source {
        CaptureSource::Ports => {
            let ports = (1..=format.channels())
                .map(|i| client.register_port(&format!("input_{i}"), jack::AudioIn::default()))
                .collect::<core::result::Result<Vec<_>, _>>()?;

            capture::Input::Ports(no_channels(interleaver::Interleaver::new(ports))?)
        }
        CaptureSource::Click => {
            log::info!("Sending a click every second instead of captured audio");
            capture::Input::Click(click::ClickGenerator::new(
                format.sample_rate(),
                format.channels() as usize,
            ))
        }
    };

    let handler = CaptureHandler::new(format, input, sink);
    let names = handler.port_names()?;

    let client = client.activate_async((), handler)?;

    for (i, ours) in names.iter().enumerate() {
        let theirs = format!("{device}:capture_{}", i + 1);
        if let Err(e) = client.as_client().connect_ports_by_name(&theirs, ours) {
            log::warn!("Could not connect {theirs} to {ours}: {e}");
        }
    }

    Ok(client)
}

/// Registers one output port per channel, and starts playing `playout`.
///
/// The ports are connected to `device`'s playback ports when they exist.
pub fn start_playback(
    client: jack::Client,
    format: &Format,
    device: &str,
    playout: castsync_clock::playout::Playout,
) -> Result<jack::AsyncClient<(), PlaybackHandler>> {
    let ports = (1..=format.channels())
        .map(|i| client.register_port(&format!("output_{i}"), jack::AudioOut::default()))
        .collect::<core::result::Result<Vec<_>, _>>()?;

    let interleaver = no_channels(interleaver::Interleaver::new(ports))?;

    let names = interleaver.names()?;
    let handler = PlaybackHandler::new(format, playout, interleaver);

    let client = client.activate_async((), handler)?;

    for (i, ours) in names.iter().enumerate() {
        let theirs = format!("{device}:playback_{}", i + 1);
        if let Err(e) = client.as_client().connect_ports_by_name(ours, &theirs) {
            log::warn!("Could not connect {ours} to {theirs}: {e}");
        }
    }

    Ok(client)
}
