//! Captures audio from JACK, or generates a click, and multicasts it.

use core::{net::SocketAddr, time::Duration};
use std::{process::ExitCode, thread};

use castsync_jack::{
    cli::{self, SendArgs},
    network::{
        socket,
        transmitter::{DEFAULT_POOL_SIZE, Transmitter},
    },
};
use clap::Parser;

const SUPERVISE_INTERVAL: Duration = Duration::from_millis(200);

fn run(args: &SendArgs) -> castsync_jack::Result<()> {
    let format = args.format();
    let interrupted = cli::interrupt_token()?;

    let client = castsync_jack::open_client("castsync-send", &format)?;

    let socket = socket::multicast_sender(args.ttl)?;
    let dest = SocketAddr::from((args.stream.address, args.stream.port));
    let (transmitter, sink) = Transmitter::start(&format, socket, dest, DEFAULT_POOL_SIZE)?;

    let client = match castsync_jack::start_capture(
        client,
        &format,
        &args.stream.device,
        args.source(),
        sink,
    ) {
        Ok(client) => client,
        Err(e) => {
            transmitter.stop();
            return Err(e);
        }
    };

    log::info!(
        "Streaming {} channels at {} Hz, {} frames per packet",
        format.channels(),
        format.sample_rate(),
        format.period_size(),
    );

    while !interrupted.is_cancelled() {
        if !transmitter.is_running() {
            log::error!("Transmitter thread stopped unexpectedly");
            break;
        }
        thread::sleep(SUPERVISE_INTERVAL);
    }

    let deactivated = client.deactivate();
    transmitter.stop();

    deactivated?;
    Ok(())
}

fn main() -> ExitCode {
    let args = SendArgs::parse();

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
