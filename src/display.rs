//! Terminal output for the CLI.
//!
//! A live status line on stderr while the run progresses, then either a
//! colored summary or the JSON document on stdout.

use std::io::{self, Write};
use std::sync::Mutex;

use colored::Colorize;
use crossterm::{
    cursor::MoveToColumn,
    queue,
    style::Print,
    terminal::{Clear, ClearType},
};

use crate::measurements::calculate_speed_mbps;
use crate::measure::load::LoadTestResult;
use crate::netinfo::NetworkInfo;
use crate::progress::{Direction, ProgressCallback, ProgressEvent, TestPhase};
use crate::results::{MeasurementResult, MeasurementStatus};

/// The display mode for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Live status line while measuring, colored summary at the end
    Live,
    /// No output until final results
    Silent,
    /// Structured output only
    Json,
}

impl DisplayMode {
    /// Determine display mode from CLI flags and environment.
    ///
    /// # Returns
    /// * `Json` when json_flag is true (regardless of is_tty)
    /// * `Live` when json_flag is false AND is_tty is true
    /// * `Silent` when json_flag is false AND is_tty is false
    pub fn detect(json_flag: bool, is_tty: bool) -> Self {
        if json_flag {
            DisplayMode::Json
        } else if is_tty {
            DisplayMode::Live
        } else {
            DisplayMode::Silent
        }
    }
}

/// Human-readable rate, e.g. `85.32 Mbps`.
pub fn format_bps(bps: f64) -> String {
    let mbps = calculate_speed_mbps(bps);
    if mbps >= 1000.0 {
        format!("{:.2} Gbps", mbps / 1000.0)
    } else {
        format!("{:.2} Mbps", mbps)
    }
}

fn phase_label(phase: TestPhase) -> &'static str {
    match phase {
        TestPhase::Connectivity => "Checking connectivity",
        TestPhase::Latency => "Measuring latency",
        TestPhase::Download => "Measuring download",
        TestPhase::Upload => "Measuring upload",
        TestPhase::Complete => "Done",
    }
}

/// Text for the live status line, or `None` when the event doesn't change it.
pub fn status_line(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::PhaseChange(phase) => Some(format!("{}...", phase_label(*phase))),
        ProgressEvent::Throughput { direction, estimate_bps, .. } => {
            let label = match direction {
                Direction::Download => "Download",
                Direction::Upload => "Upload",
            };
            Some(format!("{}: {}", label, format_bps(*estimate_bps)))
        }
        ProgressEvent::Probe { endpoint_id, round_trip_ms, current, total } => {
            let rtt = match round_trip_ms {
                Some(ms) => format!("{:.0} ms", ms),
                None => "lost".to_string(),
            };
            Some(format!("Latency probe {}/{} ({}): {}", current, total, endpoint_id, rtt))
        }
        ProgressEvent::Load { fraction, bits_per_second, .. } => Some(format!(
            "Load test: {:>3.0}% at {}",
            fraction * 100.0,
            format_bps(*bits_per_second)
        )),
        ProgressEvent::PhaseComplete(_) => None,
    }
}

/// Rewrites a single stderr line with the latest progress.
pub struct LiveProgress {
    mode: DisplayMode,
    stderr: Mutex<io::Stderr>,
}

impl LiveProgress {
    pub fn new(mode: DisplayMode) -> Self {
        Self { mode, stderr: Mutex::new(io::stderr()) }
    }

    /// Clear the status line before printing final output.
    pub fn finish(&self) {
        if self.mode != DisplayMode::Live {
            return;
        }
        if let Ok(mut stderr) = self.stderr.lock() {
            let _ = queue!(stderr, MoveToColumn(0), Clear(ClearType::CurrentLine));
            let _ = stderr.flush();
        }
    }
}

impl ProgressCallback for LiveProgress {
    fn on_progress(&self, event: ProgressEvent) {
        if self.mode != DisplayMode::Live {
            return;
        }
        let Some(line) = status_line(&event) else { return };

        // A failed write only loses a progress frame.
        if let Ok(mut stderr) = self.stderr.lock() {
            let _ = queue!(
                stderr,
                MoveToColumn(0),
                Clear(ClearType::CurrentLine),
                Print(line.dimmed())
            );
            let _ = stderr.flush();
        }
    }
}

/// Label/value pairs of the human summary, without styling.
pub fn summary_rows(result: &MeasurementResult) -> Vec<(&'static str, String)> {
    let mut rows = Vec::new();

    if let Some(network) = &result.network {
        rows.extend(network_rows(network));
    }

    rows.push((
        "Server:",
        format!(
            "{} ({})",
            result.best_server.display_name, result.best_server.organization
        ),
    ));
    rows.push(("Ping:", format!("{} ms", result.ping)));
    rows.push(("Jitter:", format!("{:.1} ms", result.jitter)));
    rows.push(("Packet loss:", format!("{:.1}%", result.packet_loss_percent)));
    rows.push(("Download:", format_bps(result.download_bps)));

    if result.upload.is_some() {
        rows.push(("Upload:", format_bps(result.upload_bps)));
    }

    rows
}

fn network_rows(network: &NetworkInfo) -> Vec<(&'static str, String)> {
    vec![
        ("Your IP:", network.ip.clone()),
        ("ISP:", network.isp.clone()),
        (
            "Location:",
            format!("{}, {}, {}", network.city, network.region, network.country),
        ),
    ]
}

/// Print the colored summary to stdout.
pub fn print_summary(result: &MeasurementResult) {
    match result.status {
        MeasurementStatus::Offline => {
            println!("{}", "You appear to be offline.".bold().red());
        }
        MeasurementStatus::Error => {
            println!("{}", "Measurement failed.".bold().red());
        }
        MeasurementStatus::Completed => {}
    }
    if let Some(message) = &result.error_message {
        println!("  {}", message.red());
    }
    if result.is_failure() {
        return;
    }

    for (label, value) in summary_rows(result) {
        println!("{} {}", label.bold().white(), value.bright_blue());
    }

    if result.cancelled {
        println!("{}", "Run was interrupted; figures are partial.".yellow());
    }
}

pub fn print_load_test(result: &LoadTestResult) {
    if !result.success {
        println!(
            "{} {}",
            "Load test failed:".bold().red(),
            result.error.as_deref().unwrap_or("unknown error")
        );
        return;
    }

    println!(
        "{} {:.1} MB",
        "Downloaded:".bold().white(),
        result.bytes_received as f64 / (1024.0 * 1024.0)
    );
    println!("{} {:.2} s", "Time:".bold().white(), result.total_seconds);
    println!(
        "{} {}",
        "Average speed:".bold().white(),
        format_bps(result.average_bps).bright_blue()
    );
}
