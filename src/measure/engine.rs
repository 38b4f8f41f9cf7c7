use crate::errors::SpeedTestError;
use crate::http::{Endpoint, Transport};
use crate::measure::latency::{LatencyProber, ProbeConfig};
use crate::measure::load::{load_test_bytes, run_load_test, LoadTestResult};
use crate::measure::{SamplerConfig, ThroughputSampler};
use crate::progress::{ProgressCallback, ProgressEvent, TestPhase};
use crate::netinfo::NetworkInfo;
use crate::results::{MeasurementResult, ResultAssembler};
use log::{debug, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Configuration for a full measurement run.
#[derive(Debug, Clone)]
pub struct SpeedTestConfig {
    pub sampler: SamplerConfig,
    pub probe: ProbeConfig,
    /// Latency probe targets.
    /// Default: Google, Cloudflare, Amazon
    pub endpoints: Vec<Endpoint>,
    /// Skip the upload direction entirely.
    /// Default: false
    pub skip_upload: bool,
}

impl Default for SpeedTestConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            probe: ProbeConfig::default(),
            endpoints: Endpoint::defaults(),
            skip_upload: false,
        }
    }
}

impl SpeedTestConfig {
    pub fn validate(&self) -> Result<(), SpeedTestError> {
        self.sampler.validate()?;
        self.probe.validate()?;
        if self.endpoints.is_empty() {
            return Err(SpeedTestError::config("no latency endpoints configured"));
        }
        Ok(())
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, SpeedTestError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SpeedTestError::busy())?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Orchestrates a full measurement: connectivity check, latency probing,
/// download, then upload.
///
/// Only one run (full measurement or load test) may be in progress per
/// instance; a second concurrent call fails with
/// [`ErrorKind::Busy`](crate::errors::ErrorKind::Busy).
///
/// # Example
/// ```no_run
/// use netgauge::http::client::Client;
/// use netgauge::http::ServiceUrls;
/// use netgauge::measure::engine::{SpeedTest, SpeedTestConfig};
/// use netgauge::progress::NoProgress;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let client = Client::new(ServiceUrls::default()).unwrap();
///     let test = SpeedTest::new(client, SpeedTestConfig::default());
///     let result = test.run(&NoProgress, &CancellationToken::new()).await.unwrap();
///     println!("Download: {:.2} Mbps", result.download_mbps());
/// }
/// ```
pub struct SpeedTest<T> {
    transport: T,
    config: SpeedTestConfig,
    running: AtomicBool,
}

impl<T: Transport> SpeedTest<T> {
    pub fn new(transport: T, config: SpeedTestConfig) -> Self {
        Self { transport, config, running: AtomicBool::new(false) }
    }

    pub fn config(&self) -> &SpeedTestConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run the full sequence and assemble a result.
    ///
    /// Measurement problems are reported through the result's status, so
    /// the only error returned is [`SpeedTestError::busy`].
    pub async fn run(
        &self,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<MeasurementResult, SpeedTestError> {
        self.run_into(ResultAssembler::new(), progress, cancel).await
    }

    /// Like [`SpeedTest::run`], starting from a pre-populated assembler.
    pub async fn run_into(
        &self,
        assembler: ResultAssembler,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<MeasurementResult, SpeedTestError> {
        self.sequence(
            assembler,
            None::<fn() -> std::future::Ready<NetworkInfo>>,
            progress,
            cancel,
        )
        .await
    }

    /// Like [`SpeedTest::run`], attaching network information from `lookup`.
    ///
    /// `lookup` only runs once the connectivity check has passed, and before
    /// any probe or transfer starts.
    pub async fn run_with_network<F, Fut>(
        &self,
        lookup: F,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<MeasurementResult, SpeedTestError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = NetworkInfo>,
    {
        self.sequence(ResultAssembler::new(), Some(lookup), progress, cancel)
            .await
    }

    async fn sequence<F, Fut>(
        &self,
        assembler: ResultAssembler,
        lookup: Option<F>,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<MeasurementResult, SpeedTestError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = NetworkInfo>,
    {
        let _guard = RunGuard::acquire(&self.running)?;
        info!("Starting measurement sequence");

        if let Err(e) = self.config.validate() {
            warn!("Invalid configuration: {}", e.message);
            return Ok(assembler.failed(&e).build());
        }

        // Step 1: pre-flight connectivity check
        progress.on_progress(ProgressEvent::PhaseChange(TestPhase::Connectivity));
        if let Err(e) = self.transport.check_connectivity().await {
            warn!("Connectivity check failed: {}", e.message);
            return Ok(assembler.offline(&e).build());
        }
        progress.on_progress(ProgressEvent::PhaseComplete(TestPhase::Connectivity));

        let assembler = match lookup {
            Some(lookup) => {
                info!("Looking up network information");
                assembler.network(lookup().await)
            }
            None => assembler,
        };

        // Step 2: latency, jitter and loss
        progress.on_progress(ProgressEvent::PhaseChange(TestPhase::Latency));
        let prober = LatencyProber::new(&self.transport, self.config.probe.clone());
        let assembler = match prober.probe(&self.config.endpoints, progress, cancel).await {
            Ok(report) => assembler.latency(report),
            Err(e) => return Ok(assembler.failed(&e).build()),
        };
        progress.on_progress(ProgressEvent::PhaseComplete(TestPhase::Latency));

        // Step 3: download
        let sampler =
            ThroughputSampler::new(&self.transport, self.config.sampler.clone());
        progress.on_progress(ProgressEvent::PhaseChange(TestPhase::Download));
        let download = match sampler.measure_download(progress, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Download measurement failed: {}", e.message);
                return Ok(assembler.failed(&e).build());
            }
        };
        progress.on_progress(ProgressEvent::PhaseComplete(TestPhase::Download));

        // Step 4: upload, only after a usable download
        let run_upload = !self.config.skip_upload
            && download.bps > 0.0
            && !cancel.is_cancelled();
        let mut assembler = assembler.download(download);

        if run_upload {
            progress.on_progress(ProgressEvent::PhaseChange(TestPhase::Upload));
            match sampler.measure_upload(progress, cancel).await {
                Ok(outcome) => assembler = assembler.upload(outcome),
                Err(e) => {
                    warn!("Upload measurement failed: {}", e.message);
                    return Ok(assembler.failed(&e).build());
                }
            }
            progress.on_progress(ProgressEvent::PhaseComplete(TestPhase::Upload));
        } else {
            debug!("Skipping upload");
        }

        let result = assembler.cancelled(cancel.is_cancelled()).build();
        progress.on_progress(ProgressEvent::PhaseChange(TestPhase::Complete));

        info!(
            "Measurement complete: download={:.2} Mbps, upload={:.2} Mbps, ping={}ms",
            result.download_mbps(),
            result.upload_mbps(),
            result.ping
        );

        Ok(result)
    }

    /// Download exactly `size_mb` MiB on one stream.
    ///
    /// A size whose byte count overflows is rejected as a config error
    /// before anything is requested.
    pub async fn run_load_test(
        &self,
        size_mb: u64,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<LoadTestResult, SpeedTestError> {
        load_test_bytes(size_mb)?;
        let _guard = RunGuard::acquire(&self.running)?;

        Ok(run_load_test(&self.transport, size_mb, progress, cancel).await)
    }
}
