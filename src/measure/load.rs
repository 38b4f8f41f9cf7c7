//! Fixed-size load test: download exactly N bytes on one stream and report
//! the average rate.

use crate::errors::SpeedTestError;
use crate::http::Transport;
use crate::measure::download::cache_bust_token;
use crate::measurements::{calculate_bandwidth_bps, calculate_speed_mbps};
use crate::progress::{ProgressCallback, ProgressEvent};
use futures::StreamExt;
use log::{info, warn};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Outcome of a load test. Failures are reported here, never as `Err`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTestResult {
    pub file_size_bytes: u64,
    pub bytes_received: u64,
    pub average_bps: f64,
    pub total_seconds: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoadTestResult {
    fn failed(file_size_bytes: u64, bytes_received: u64, error: String) -> Self {
        Self {
            file_size_bytes,
            bytes_received,
            average_bps: 0.0,
            total_seconds: 0.0,
            success: false,
            error: Some(error),
        }
    }
}

/// Byte count of a `size_mb` MiB load test.
pub fn load_test_bytes(size_mb: u64) -> Result<u64, SpeedTestError> {
    size_mb.checked_mul(BYTES_PER_MB).ok_or_else(|| {
        SpeedTestError::config(format!(
            "load test size of {} MB does not fit in 64 bits",
            size_mb
        ))
    })
}

/// Download `size_mb` MiB on a single stream, emitting a
/// [`ProgressEvent::Load`] per received chunk.
pub async fn run_load_test<T: Transport>(
    transport: &T,
    size_mb: u64,
    progress: &dyn ProgressCallback,
    cancel: &CancellationToken,
) -> LoadTestResult {
    let total_bytes = match load_test_bytes(size_mb) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Load test rejected: {}", e);
            return LoadTestResult::failed(0, 0, e.message);
        }
    };
    let started = Instant::now();
    let mut received = 0u64;

    info!("Starting {}MB load test", size_mb);

    let transfer = async {
        let mut chunks =
            transport.open_download(total_bytes, &cache_bust_token(0)).await?;

        while let Some(chunk) = chunks.next().await {
            received += chunk? as u64;

            let elapsed = started.elapsed();
            let fraction = if total_bytes > 0 {
                (received as f64 / total_bytes as f64).min(1.0)
            } else {
                1.0
            };
            progress.on_progress(ProgressEvent::Load {
                fraction,
                bits_per_second: calculate_bandwidth_bps(received, elapsed),
                bytes_received: received,
                total_bytes,
                elapsed_seconds: elapsed.as_secs_f64(),
            });

            if received >= total_bytes {
                break;
            }
        }

        Ok::<(), SpeedTestError>(())
    };

    let result = tokio::select! {
        result = transfer => result,
        _ = cancel.cancelled() => Err(SpeedTestError::cancelled("load test cancelled")),
    };

    if let Err(e) = result {
        warn!("Load test failed: {}", e);
        return LoadTestResult::failed(total_bytes, received, e.message);
    }

    let elapsed = started.elapsed();
    let average_bps = calculate_bandwidth_bps(received, elapsed);
    info!(
        "Load test finished: {} bytes in {:.2}s ({:.2} Mbps)",
        received,
        elapsed.as_secs_f64(),
        calculate_speed_mbps(average_bps)
    );

    LoadTestResult {
        file_size_bytes: total_bytes,
        bytes_received: received,
        average_bps,
        total_seconds: elapsed.as_secs_f64(),
        success: true,
        error: None,
    }
}
