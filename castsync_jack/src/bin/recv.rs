//! Receives a multicast stream and plays it through JACK, in sync with the sender.

use core::time::Duration;
use std::{process::ExitCode, thread};

use castsync_jack::{
    clock::{bridge, playout::Playout, resample::SincResampler, ring},
    cli::{self, RecvArgs},
    network::receiver::{Receiver, ReceiverParts},
};
use clap::Parser;

const SUPERVISE_INTERVAL: Duration = Duration::from_millis(200);

fn run(args: &RecvArgs) -> castsync_jack::Result<()> {
    let format = args.format();
    let interrupted = cli::interrupt_token()?;

    let client = castsync_jack::open_client("castsync-recv", &format)?;

    let (writer, reader) = ring::ring_buffer(&format);
    let (clock_tx, clock_rx) = bridge::audio_clock_bridge(bridge::DEFAULT_CAPACITY);

    let mut receiver = Receiver::new(
        format,
        args.stream.address,
        args.stream.port,
        ReceiverParts {
            writer,
            clock: clock_rx,
        },
        SincResampler::new,
    );
    receiver.start()?;

    let playout = Playout::new(&format, reader, clock_tx);
    let client = castsync_jack::start_playback(client, &format, &args.stream.device, playout)?;

    log::info!(
        "Playing {} channels at {} Hz, {} frames ({} periods) behind the sender",
        format.channels(),
        format.sample_rate(),
        format.target_latency_frames(),
        format.latency_periods(),
    );

    while !interrupted.is_cancelled() {
        if !receiver.is_running() {
            log::error!("Network thread stopped unexpectedly");
            break;
        }
        thread::sleep(SUPERVISE_INTERVAL);
    }

    let deactivated = client.deactivate();
    let stopped = receiver.stop();

    let (_, _, handler) = deactivated?;
    let dropped = handler.playout().dropped_samples();
    if dropped > 0 {
        log::warn!("{dropped} clock samples were dropped, the network thread fell behind");
    }

    stopped?;
    Ok(())
}

fn main() -> ExitCode {
    let args = RecvArgs::parse();

    if let Err(e) = cli::init_logging(args.stream.log_level()) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
