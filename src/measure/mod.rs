//! Measurement core.
//!
//! [`ThroughputSampler`] turns byte-arrival timing from concurrent transfers
//! into a live estimate and a final robust figure. [`latency::LatencyProber`]
//! derives ping, jitter and loss from repeated probes. [`engine::SpeedTest`]
//! sequences both into a [`crate::results::MeasurementResult`].
//!
//! All workers of one direction are polled from a single task, but the shared
//! accumulator is still an atomic and the sample window sits behind a mutex,
//! so the same code stays sound if workers are ever spawned onto a
//! multi-threaded runtime.

pub mod download;
pub mod engine;
pub mod latency;
pub mod load;
pub mod upload;

use crate::errors::SpeedTestError;
use crate::measurements::{calculate_bandwidth_bps, duration_ms};
use crate::progress::{Direction, ProgressCallback, ProgressEvent, SpeedSample};
use crate::stats::{median, percentile, trimmed_mean};
use log::debug;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const MIB: u64 = 1024 * 1024;

/// Configuration for throughput measurement.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Number of concurrent streams (download) or workers (upload).
    /// Default: 4
    pub stream_count: usize,

    /// Wall-clock budget per direction, measured from direction start.
    /// Default: 10000ms
    pub test_duration_ms: u64,

    /// Initial span excluded from sampling (connection ramp-up).
    /// Default: 1500ms
    pub warmup_ms: u64,

    /// Minimum spacing between sampling ticks and progress events.
    /// Default: 200ms
    pub sample_interval_ms: u64,

    /// Bytes requested by each download stream.
    /// Default: 50MiB
    pub download_unit_bytes: u64,

    /// Size of each upload POST body.
    /// Default: 4MiB
    pub upload_unit_bytes: u64,

    /// Percentile of the sorted samples reported as the final figure.
    /// Default: 0.9 (90th percentile)
    pub final_percentile: f64,

    /// Number of recent samples whose median is reported as progress.
    /// Default: 10
    pub progress_window: usize,

    /// Upload POSTs completing faster than this are discarded as noise.
    /// Default: 50ms
    pub min_upload_sample_ms: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            stream_count: 4,
            test_duration_ms: 10_000,
            warmup_ms: 1_500,
            sample_interval_ms: 200,
            download_unit_bytes: 50 * MIB,
            upload_unit_bytes: 4 * MIB,
            final_percentile: 0.9,
            progress_window: 10,
            min_upload_sample_ms: 50,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), SpeedTestError> {
        if self.stream_count == 0 {
            return Err(SpeedTestError::config("stream_count must be at least 1"));
        }
        if self.test_duration_ms == 0 {
            return Err(SpeedTestError::config(
                "test_duration_ms must be greater than 0",
            ));
        }
        if self.warmup_ms >= self.test_duration_ms {
            return Err(SpeedTestError::config(format!(
                "warmup_ms ({}) must be shorter than test_duration_ms ({})",
                self.warmup_ms, self.test_duration_ms
            )));
        }
        if self.sample_interval_ms == 0 {
            return Err(SpeedTestError::config(
                "sample_interval_ms must be greater than 0",
            ));
        }
        if self.download_unit_bytes == 0 || self.upload_unit_bytes == 0 {
            return Err(SpeedTestError::config(
                "transfer unit sizes must be greater than 0",
            ));
        }
        if !(self.final_percentile > 0.0 && self.final_percentile <= 1.0) {
            return Err(SpeedTestError::config(format!(
                "final_percentile must be in (0, 1], got {}",
                self.final_percentile
            )));
        }
        if self.progress_window == 0 {
            return Err(SpeedTestError::config(
                "progress_window must be at least 1",
            ));
        }

        Ok(())
    }

    pub fn test_duration(&self) -> Duration {
        Duration::from_millis(self.test_duration_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// How one stream or worker finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Transfer ran to completion before the deadline.
    Completed,
    /// Stopped by the direction deadline.
    DeadlineReached,
    /// Stopped by top-level cancellation.
    Cancelled,
    /// Transport error; the worker was abandoned.
    Failed,
}

/// Final figures for one direction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionOutcome {
    pub direction: Direction,
    /// Robust final estimate: the configured percentile of all samples
    pub bps: f64,
    pub median_bps: f64,
    /// Mean after dropping the top and bottom 10% of samples
    pub trimmed_mean_bps: f64,
    pub sample_count: usize,
    pub bytes_moved: u64,
    pub streams: usize,
    pub failed_streams: usize,
    pub deadline_streams: usize,
    pub cancelled: bool,
    pub elapsed_ms: f64,
}

impl DirectionOutcome {
    pub fn has_samples(&self) -> bool {
        self.sample_count > 0
    }
}

struct SampleWindow {
    samples: Vec<f64>,
    last_tick: Instant,
}

/// Accumulator state for one direction's measurement.
///
/// Created when the direction starts and dropped once the final statistic
/// has been derived. `samples` only ever holds values computed after the
/// warmup window.
pub struct TransferState {
    direction: Direction,
    total_bytes: AtomicU64,
    started: Instant,
    warmup: Duration,
    interval: Duration,
    deadline: Instant,
    progress_window: usize,
    active_streams: AtomicUsize,
    window: Mutex<SampleWindow>,
}

impl TransferState {
    pub fn new(direction: Direction, config: &SamplerConfig) -> Self {
        Self::starting_at(direction, config, Instant::now())
    }

    pub(crate) fn starting_at(
        direction: Direction,
        config: &SamplerConfig,
        started: Instant,
    ) -> Self {
        Self {
            direction,
            total_bytes: AtomicU64::new(0),
            started,
            warmup: config.warmup(),
            interval: config.sample_interval(),
            deadline: started + config.test_duration(),
            progress_window: config.progress_window,
            active_streams: AtomicUsize::new(0),
            window: Mutex::new(SampleWindow {
                samples: Vec::new(),
                last_tick: started,
            }),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Acquire)
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::Acquire)
    }

    pub(crate) fn stream_started(&self) {
        self.active_streams.fetch_add(1, Ordering::AcqRel);
    }

    /// Mark a stream as done and return how many are still running.
    pub(crate) fn stream_finished(&self) -> usize {
        self.active_streams.fetch_sub(1, Ordering::AcqRel).saturating_sub(1)
    }

    /// Snapshot of the samples collected so far.
    pub fn samples(&self) -> Vec<f64> {
        match self.window.lock() {
            Ok(window) => window.samples.clone(),
            Err(poisoned) => poisoned.into_inner().samples.clone(),
        }
    }

    /// Record downloaded bytes and run a sampling tick if one is due.
    ///
    /// The rate sampled is cumulative: all bytes moved since direction start
    /// over the time elapsed since direction start.
    pub fn record_download_chunk(
        &self,
        stream_id: usize,
        bytes: usize,
        now: Instant,
        progress: &dyn ProgressCallback,
    ) {
        self.total_bytes.fetch_add(bytes as u64, Ordering::AcqRel);

        let mut window = self.lock_window();
        if now.saturating_duration_since(window.last_tick) < self.interval {
            return;
        }
        window.last_tick = now;

        let elapsed = self.elapsed(now);
        if elapsed < self.warmup || elapsed.is_zero() {
            return;
        }

        let total = self.total_bytes();
        let bps = calculate_bandwidth_bps(total, elapsed);
        self.push_sample(&mut window, stream_id, bps, elapsed, total, progress);
    }

    /// Record one completed upload POST.
    ///
    /// The POST contributes a sample of `bytes * 8 / post_duration` when it
    /// took longer than `min_sample` and completed after warmup. Progress is
    /// published at most once per sampling interval.
    pub fn record_upload(
        &self,
        stream_id: usize,
        bytes: usize,
        post_duration: Duration,
        min_sample: Duration,
        now: Instant,
        progress: &dyn ProgressCallback,
    ) -> bool {
        let total = self.total_bytes.fetch_add(bytes as u64, Ordering::AcqRel)
            + bytes as u64;

        if post_duration <= min_sample {
            debug!(
                "upload worker {}: {:.1}ms POST discarded as noise",
                stream_id,
                duration_ms(post_duration)
            );
            return false;
        }

        let elapsed = self.elapsed(now);
        if elapsed < self.warmup {
            return false;
        }

        let bps = calculate_bandwidth_bps(bytes as u64, post_duration);
        let mut window = self.lock_window();
        window.samples.push(bps);

        if now.saturating_duration_since(window.last_tick) >= self.interval {
            window.last_tick = now;
            let estimate = self.recent_median(&window.samples);
            progress.on_progress(ProgressEvent::Throughput {
                direction: self.direction,
                sample: SpeedSample {
                    bits_per_second: bps,
                    captured_at_ms: duration_ms(elapsed),
                    stream_id,
                },
                estimate_bps: estimate,
                bytes_moved: total,
            });
        }

        true
    }

    fn push_sample(
        &self,
        window: &mut SampleWindow,
        stream_id: usize,
        bps: f64,
        elapsed: Duration,
        total: u64,
        progress: &dyn ProgressCallback,
    ) {
        window.samples.push(bps);
        let estimate = self.recent_median(&window.samples);

        // Still under the lock: events stay serialized.
        progress.on_progress(ProgressEvent::Throughput {
            direction: self.direction,
            sample: SpeedSample {
                bits_per_second: bps,
                captured_at_ms: duration_ms(elapsed),
                stream_id,
            },
            estimate_bps: estimate,
            bytes_moved: total,
        });
    }

    fn recent_median(&self, samples: &[f64]) -> f64 {
        let start = samples.len().saturating_sub(self.progress_window);
        median(&samples[start..])
    }

    fn lock_window(&self) -> std::sync::MutexGuard<'_, SampleWindow> {
        match self.window.lock() {
            Ok(window) => window,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Reduce the collected samples to the final figures.
    pub(crate) fn finish(
        self,
        final_percentile: f64,
        outcomes: &[StreamOutcome],
        cancelled: bool,
    ) -> DirectionOutcome {
        let elapsed = self.elapsed(Instant::now());
        let bytes_moved = self.total_bytes();
        let samples = match self.window.into_inner() {
            Ok(window) => window.samples,
            Err(poisoned) => poisoned.into_inner().samples,
        };

        let count = |wanted: StreamOutcome| {
            outcomes.iter().filter(|o| **o == wanted).count()
        };

        DirectionOutcome {
            direction: self.direction,
            bps: percentile(&samples, final_percentile),
            median_bps: median(&samples),
            trimmed_mean_bps: trimmed_mean(&samples, 0.1),
            sample_count: samples.len(),
            bytes_moved,
            streams: outcomes.len(),
            failed_streams: count(StreamOutcome::Failed),
            deadline_streams: count(StreamOutcome::DeadlineReached),
            cancelled,
            elapsed_ms: duration_ms(elapsed),
        }
    }
}

/// Drives concurrent transfers in one direction at a time.
///
/// See [`download`] and [`upload`] for the two measurement methods.
pub struct ThroughputSampler<T> {
    transport: T,
    config: SamplerConfig,
}

impl<T> ThroughputSampler<T> {
    pub fn new(transport: T, config: SamplerConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }
}
