extern crate clap;

use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use log::warn;
use netgauge::display::{self, DisplayMode, LiveProgress};
use netgauge::errors::{
    exit_codes, format_error_for_display, ErrorKind, SpeedTestError,
};
use netgauge::http::client::Client;
use netgauge::http::ServiceUrls;
use netgauge::measure::engine::{SpeedTest, SpeedTestConfig};
use netgauge::measure::latency::{ProbeConfig, ProbeMode};
use netgauge::measure::SamplerConfig;
use netgauge::netinfo;
use netgauge::results::MeasurementStatus;
use serde::Serialize;
use std::io::IsTerminal;
use tokio_util::sync::CancellationToken;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (rev ",
    env!("NETGAUGE_BUILD_GIT_HASH"),
    ")"
);

#[derive(Parser)]
#[command(author, version, long_version = LONG_VERSION, about, long_about = None)]
struct Cli {
    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Only measure latency and download
    #[arg(long)]
    skip_upload: bool,

    /// Probe latency endpoints in parallel instead of one by one
    #[arg(long)]
    concurrent_probes: bool,

    /// Run a fixed-size download of this many MiB instead of a full measurement
    #[arg(long, value_name = "MB")]
    load_mb: Option<u64>,

    /// Skip the public IP and geolocation lookup
    #[arg(long)]
    no_network_info: bool,

    /// Concurrent streams per direction
    #[arg(long, default_value_t = SamplerConfig::default().stream_count)]
    streams: usize,

    /// Time budget per direction in milliseconds
    #[arg(long, default_value_t = SamplerConfig::default().test_duration_ms)]
    duration_ms: u64,

    /// Initial span excluded from sampling, in milliseconds
    #[arg(long, default_value_t = SamplerConfig::default().warmup_ms)]
    warmup_ms: u64,

    /// Minimum spacing between samples, in milliseconds
    #[arg(long, default_value_t = SamplerConfig::default().sample_interval_ms)]
    sample_interval_ms: u64,

    /// Bytes requested by each download stream
    #[arg(long, default_value_t = SamplerConfig::default().download_unit_bytes)]
    download_bytes: u64,

    /// Size of each upload POST body in bytes
    #[arg(long, default_value_t = SamplerConfig::default().upload_unit_bytes)]
    upload_bytes: u64,

    /// Percentile of samples reported as the final figure, in (0, 1]
    #[arg(long, default_value_t = SamplerConfig::default().final_percentile)]
    percentile: f64,

    /// Number of recent samples whose median is shown as live progress
    #[arg(long, default_value_t = SamplerConfig::default().progress_window)]
    progress_window: usize,

    /// Upload POSTs faster than this many milliseconds are discarded
    #[arg(long, default_value_t = SamplerConfig::default().min_upload_sample_ms)]
    min_upload_sample_ms: u64,

    /// Latency probes per endpoint
    #[arg(long, default_value_t = ProbeConfig::default().samples_per_endpoint)]
    probe_samples: usize,

    /// Per-probe timeout in milliseconds
    #[arg(long, default_value_t = ProbeConfig::default().probe_timeout_ms)]
    probe_timeout_ms: u64,

    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

impl Cli {
    fn config(&self) -> SpeedTestConfig {
        SpeedTestConfig {
            sampler: SamplerConfig {
                stream_count: self.streams,
                test_duration_ms: self.duration_ms,
                warmup_ms: self.warmup_ms,
                sample_interval_ms: self.sample_interval_ms,
                download_unit_bytes: self.download_bytes,
                upload_unit_bytes: self.upload_bytes,
                final_percentile: self.percentile,
                progress_window: self.progress_window,
                min_upload_sample_ms: self.min_upload_sample_ms,
            },
            probe: ProbeConfig {
                samples_per_endpoint: self.probe_samples,
                probe_timeout_ms: self.probe_timeout_ms,
                mode: if self.concurrent_probes {
                    ProbeMode::ConcurrentEndpoints
                } else {
                    ProbeMode::Sequential
                },
            },
            skip_upload: self.skip_upload,
            ..SpeedTestConfig::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", format_error_for_display(&e));
            e.exit_code()
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32, SpeedTestError> {
    let mode = DisplayMode::detect(cli.json, std::io::stdout().is_terminal());
    let client = Client::new(ServiceUrls::default())?;
    let test = SpeedTest::new(&client, cli.config());
    let progress = LiveProgress::new(mode);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing with partial results");
            interrupt.cancel();
        }
    });

    if let Some(size_mb) = cli.load_mb {
        let result = test.run_load_test(size_mb, &progress, &cancel).await?;
        progress.finish();

        if mode == DisplayMode::Json {
            print_json(&result)?;
        } else {
            display::print_load_test(&result);
        }

        return Ok(if result.success {
            exit_codes::SUCCESS
        } else {
            exit_codes::NETWORK_ERROR
        });
    }

    let result = if cli.no_network_info {
        test.run(&progress, &cancel).await?
    } else {
        test.run_with_network(|| netinfo::lookup(&client), &progress, &cancel)
            .await?
    };
    progress.finish();

    if mode == DisplayMode::Json {
        print_json(&result)?;
    } else {
        display::print_summary(&result);
    }

    Ok(match result.status {
        MeasurementStatus::Completed if result.cancelled => {
            exit_codes::PARTIAL_FAILURE
        }
        MeasurementStatus::Completed => exit_codes::SUCCESS,
        MeasurementStatus::Offline => exit_codes::OFFLINE,
        MeasurementStatus::Error => exit_codes::CONFIG_ERROR,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), SpeedTestError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        SpeedTestError::new(ErrorKind::Unknown, "failed to encode result")
            .with_source(e)
    })?;
    println!("{}", json);
    Ok(())
}
