//! Progress event types and callback interface.
//!
//! Defines the events emitted while a measurement is running and the
//! callback trait for receiving them. Events for one direction are
//! delivered serially, never concurrently.

use serde::Serialize;
use tokio::sync::mpsc;

/// Direction of a throughput measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}

/// Phases of a full measurement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    /// Pre-flight connectivity check
    Connectivity,
    /// Latency, jitter and loss probing
    Latency,
    Download,
    Upload,
    Complete,
}

/// One instantaneous bandwidth estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedSample {
    /// Bits per second
    pub bits_per_second: f64,
    /// Milliseconds since the direction started (monotonic clock)
    pub captured_at_ms: f64,
    /// Stream or worker whose I/O triggered the sample
    pub stream_id: usize,
}

/// Progress events emitted during a run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Run has moved to a new phase
    PhaseChange(TestPhase),
    /// A throughput sample was recorded
    Throughput {
        direction: Direction,
        /// The sample that triggered this event
        sample: SpeedSample,
        /// Median of the most recent samples; this is what a UI should show
        estimate_bps: f64,
        /// Total bytes moved in this direction so far
        bytes_moved: u64,
    },
    /// A latency probe finished
    Probe {
        endpoint_id: String,
        /// Round trip in ms, `None` when the attempt failed
        round_trip_ms: Option<f64>,
        /// Attempts finished so far (1-indexed)
        current: usize,
        total: usize,
    },
    /// A fixed-size load test received a chunk
    Load {
        /// Fraction complete in [0, 1]
        fraction: f64,
        bits_per_second: f64,
        bytes_received: u64,
        total_bytes: u64,
        elapsed_seconds: f64,
    },
    /// Phase completed
    PhaseComplete(TestPhase),
}

/// Callback interface for progress updates.
///
/// Implementations must be non-blocking to avoid affecting
/// measurement accuracy.
pub trait ProgressCallback: Send + Sync {
    /// Called when a progress event occurs.
    fn on_progress(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Forward events into a channel so a consumer can poll them.
///
/// A closed receiver is ignored; the measurement keeps running.
impl ProgressCallback for mpsc::UnboundedSender<ProgressEvent> {
    fn on_progress(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

impl<F> ProgressCallback for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}
