//! Command line arguments of the `castsync-send` and `castsync-recv` binaries.

use core::{net::Ipv4Addr, num::NonZeroU32};

use castsync_network::{DEFAULT_GROUP, DEFAULT_PORT};
use castsync_proto::format::{ChannelCount, Format, Latency, PeriodTime, SampleRate};
use castsync_utils::CancelToken;
use clap::builder::TypedValueParser as _;

use crate::capture::CaptureSource;

/// Largest accepted playback latency, in periods.
pub const MAX_LATENCY_PERIODS: u32 = 10_000;

/// Options shared by both ends of a stream. They must match on both ends.
#[derive(clap::Args, Debug, Clone)]
pub struct StreamArgs {
    /// JACK client whose ports are connected to ours
    #[arg(short, long, default_value = "system")]
    pub device: String,

    /// Sample rate, in Hz
    #[arg(short = 's', long = "samplerate", default_value = "48000")]
    pub sample_rate: NonZeroU32,

    /// Period duration, in microseconds
    #[arg(short = 't', long = "periodtime", default_value = "1000")]
    pub period_time: NonZeroU32,

    /// Number of channels
    #[arg(short, long, default_value = "2")]
    pub channels: NonZeroU32,

    /// Multicast group the stream is sent to
    #[arg(short, long, default_value_t = DEFAULT_GROUP)]
    pub address: Ipv4Addr,

    /// UDP port the stream is sent to
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Log debug messages
    #[arg(short, long)]
    pub verbose: bool,
}

impl StreamArgs {
    #[inline]
    pub fn log_level(&self) -> log::LevelFilter {
        if self.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }

    fn format(&self, latency: Latency) -> Format {
        Format {
            sample_rate: SampleRate(self.sample_rate),
            period_time: PeriodTime(self.period_time),
            channel_count: ChannelCount(self.channels),
            latency,
        }
    }
}

/// Captures audio from JACK and multicasts it
#[derive(clap::Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct SendArgs {
    #[command(flatten)]
    pub stream: StreamArgs,

    /// Generate a click every second instead of capturing audio
    #[arg(short = 'k', long)]
    pub click: bool,

    /// Multicast time to live
    #[arg(long, default_value = "1")]
    pub ttl: u32,
}

impl SendArgs {
    #[inline]
    pub fn format(&self) -> Format {
        self.stream.format(Format::standard().latency)
    }

    #[inline]
    pub fn source(&self) -> CaptureSource {
        if self.click {
            CaptureSource::Click
        } else {
            CaptureSource::Ports
        }
    }
}

/// Receives a multicast stream and plays it through JACK
#[derive(clap::Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct RecvArgs {
    #[command(flatten)]
    pub stream: StreamArgs,

    /// Playback latency, in periods
    #[arg(
        short,
        long,
        default_value = "10",
        value_parser = clap::value_parser!(u32)
            .range(1..=i64::from(MAX_LATENCY_PERIODS))
            .try_map(NonZeroU32::try_from),
    )]
    pub latency: NonZeroU32,
}

impl RecvArgs {
    #[inline]
    pub fn format(&self) -> Format {
        self.stream.format(Latency(self.latency))
    }
}

/// Logs to stderr, at `level` and above.
pub fn init_logging(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .init()
}

/// Returns a token cancelled on the first interrupt. A second interrupt exits
/// right away, with a failure status.
pub fn interrupt_token() -> Result<CancelToken, ctrlc::Error> {
    let token = CancelToken::new();
    let handler_token = token.clone();

    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            std::process::exit(1);
        }
        log::info!("Interrupted, stopping");
        handler_token.cancel();
    })?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_match_the_standard_format() {
        let send = SendArgs::try_parse_from(["castsync-send"]).unwrap();
        assert_eq!(send.format(), Format::standard());
        assert_eq!(send.source(), CaptureSource::Ports);
        assert_eq!(send.stream.device, "system");
        assert_eq!(send.stream.address, DEFAULT_GROUP);
        assert_eq!(send.stream.port, DEFAULT_PORT);
        assert_eq!(send.ttl, 1);

        let recv = RecvArgs::try_parse_from(["castsync-recv"]).unwrap();
        assert_eq!(recv.format(), Format::standard());
        assert_eq!(recv.stream.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn short_options() {
        let recv = RecvArgs::try_parse_from([
            "castsync-recv",
            "-d",
            "hw",
            "-s",
            "44100",
            "-t",
            "2000",
            "-c",
            "1",
            "-a",
            "239.0.0.7",
            "-p",
            "5000",
            "-l",
            "4",
            "-v",
        ])
        .unwrap();

        let format = recv.format();
        assert_eq!(format.sample_rate(), 44_100);
        assert_eq!(format.period_time_us(), 2000);
        assert_eq!(format.channels(), 1);
        assert_eq!(format.latency_periods(), 4);
        assert_eq!(format.period_size(), 89);

        assert_eq!(recv.stream.device, "hw");
        assert_eq!(recv.stream.address, Ipv4Addr::new(239, 0, 0, 7));
        assert_eq!(recv.stream.port, 5000);
        assert_eq!(recv.stream.log_level(), log::LevelFilter::Debug);

        let send = SendArgs::try_parse_from(["castsync-send", "-k"]).unwrap();
        assert_eq!(send.source(), CaptureSource::Click);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(RecvArgs::try_parse_from(["castsync-recv", "-c", "0"]).is_err());
        assert!(RecvArgs::try_parse_from(["castsync-recv", "-l", "0"]).is_err());
        assert!(RecvArgs::try_parse_from(["castsync-recv", "-l", "50000000"]).is_err());
        assert!(SendArgs::try_parse_from(["castsync-send", "-a", "not-an-ip"]).is_err());
        // latency only makes sense on the receiving end
        assert!(SendArgs::try_parse_from(["castsync-send", "-l", "3"]).is_err());
    }

    #[test]
    fn largest_latency_fits_the_jitter_buffer() {
        let max = MAX_LATENCY_PERIODS.to_string();
        let recv = RecvArgs::try_parse_from(["castsync-recv", "-l", &max]).unwrap();
        assert_eq!(recv.format().latency_periods(), MAX_LATENCY_PERIODS);
        assert!(recv.format().checked_capacity_samples().is_some());

        let over = (MAX_LATENCY_PERIODS + 1).to_string();
        assert!(RecvArgs::try_parse_from(["castsync-recv", "-l", &over]).is_err());
    }
}
