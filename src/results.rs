//! The external-facing measurement result.
//!
//! [`ResultAssembler`] merges one latency report and the two direction
//! outcomes into a [`MeasurementResult`] and derives its status. Once built
//! the result is immutable and serializes to the JSON document the CLI
//! prints.

use chrono::Utc;
use serde::Serialize;

use crate::errors::SpeedTestError;
use crate::http::Endpoint;
use crate::measure::latency::LatencyReport;
use crate::measure::DirectionOutcome;
use crate::measurements::calculate_speed_mbps;
use crate::netinfo::NetworkInfo;

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementStatus {
    /// Measurement ran; figures may still be zero
    Completed,
    /// Pre-flight connectivity check failed; nothing was measured
    Offline,
    /// Orchestration failed, e.g. an invalid configuration
    Error,
}

/// Result of a full measurement run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementResult {
    pub download_bps: f64,
    pub upload_bps: f64,
    /// Minimum round trip in whole ms
    pub ping: u64,
    /// Jitter in ms
    pub jitter: f64,
    pub packet_loss_percent: f64,
    pub best_server: Endpoint,
    pub captured_at_epoch_ms: i64,
    pub status: MeasurementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkInfo>,
    /// Diagnostic figures for the download direction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<DirectionOutcome>,
    /// Diagnostic figures for the upload direction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<DirectionOutcome>,
    /// Run was cut short by cancellation; figures are best-effort
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl MeasurementResult {
    pub fn download_mbps(&self) -> f64 {
        calculate_speed_mbps(self.download_bps)
    }

    pub fn upload_mbps(&self) -> f64 {
        calculate_speed_mbps(self.upload_bps)
    }

    /// Whether a UI should show a hard error instead of figures.
    pub fn is_failure(&self) -> bool {
        self.status != MeasurementStatus::Completed
    }
}

/// Collects the pieces of a run and derives the final result.
#[derive(Debug, Default)]
pub struct ResultAssembler {
    offline: Option<String>,
    error: Option<String>,
    latency: Option<LatencyReport>,
    download: Option<DirectionOutcome>,
    upload: Option<DirectionOutcome>,
    network: Option<NetworkInfo>,
    cancelled: bool,
}

impl ResultAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pre-flight connectivity check failed.
    pub fn offline(mut self, error: &SpeedTestError) -> Self {
        self.offline = Some(error.message.clone());
        self
    }

    /// Orchestration failed with an unrecoverable error.
    pub fn failed(mut self, error: &SpeedTestError) -> Self {
        self.error = Some(error.message.clone());
        self
    }

    pub fn latency(mut self, report: LatencyReport) -> Self {
        self.latency = Some(report);
        self
    }

    pub fn download(mut self, outcome: DirectionOutcome) -> Self {
        self.cancelled |= outcome.cancelled;
        self.download = Some(outcome);
        self
    }

    pub fn upload(mut self, outcome: DirectionOutcome) -> Self {
        self.cancelled |= outcome.cancelled;
        self.upload = Some(outcome);
        self
    }

    pub fn network(mut self, info: NetworkInfo) -> Self {
        self.network = Some(info);
        self
    }

    pub fn cancelled(mut self, cancelled: bool) -> Self {
        self.cancelled |= cancelled;
        self
    }

    /// Offline takes precedence over Error, which takes precedence over
    /// Completed. A direction with zero samples is still Completed.
    pub fn build(self) -> MeasurementResult {
        let (status, error_message) = match (self.offline, self.error) {
            (Some(reason), _) => (MeasurementStatus::Offline, Some(reason)),
            (None, Some(reason)) => (MeasurementStatus::Error, Some(reason)),
            (None, None) => (MeasurementStatus::Completed, None),
        };

        let latency = self.latency.unwrap_or_else(|| LatencyReport::unavailable(0));

        MeasurementResult {
            download_bps: self.download.as_ref().map_or(0.0, |d| d.bps),
            upload_bps: self.upload.as_ref().map_or(0.0, |u| u.bps),
            ping: latency.ping_ms,
            jitter: latency.jitter_ms,
            packet_loss_percent: latency.packet_loss_percent,
            best_server: latency.best_server,
            captured_at_epoch_ms: Utc::now().timestamp_millis(),
            status,
            error_message,
            network: self.network,
            download: self.download,
            upload: self.upload,
            cancelled: self.cancelled,
        }
    }
}
