//! Latency, jitter and loss probing.
//!
//! Issues `samples_per_endpoint` minimal HEAD requests against every
//! configured endpoint, each bounded by a short timeout, and reduces the
//! outcomes into ping, jitter, packet loss and a best server.
//!
//! # Ordering
//! Jitter is computed over successful round trips in global completion
//! order. In [`ProbeMode::Sequential`] that is simply endpoint order then
//! sample order; with [`ProbeMode::ConcurrentEndpoints`] attempts from
//! different endpoints interleave in the order they finished.

use crate::errors::SpeedTestError;
use crate::http::{Endpoint, Transport};
use crate::measurements::{duration_ms, jitter_ms, round_to};
use crate::progress::{ProgressCallback, ProgressEvent};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

/// Highest loss reported while at least one probe succeeded.
const MAX_PARTIAL_LOSS: f64 = 99.9;

/// How probe attempts are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMode {
    /// One attempt at a time, endpoint by endpoint. Worst case total time is
    /// `endpoints * samples_per_endpoint * probe_timeout`.
    #[default]
    Sequential,
    /// Endpoints are probed in parallel; each endpoint's samples stay
    /// sequential.
    ConcurrentEndpoints,
}

/// Configuration for a probing run.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Attempts issued against each endpoint
    /// Default: 4
    pub samples_per_endpoint: usize,
    /// Per-attempt timeout (in ms); an attempt exceeding it counts as lost
    /// Default: 2000ms
    pub probe_timeout_ms: u64,
    /// Default: Sequential
    pub mode: ProbeMode,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            samples_per_endpoint: 4,
            probe_timeout_ms: 2_000,
            mode: ProbeMode::Sequential,
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<(), SpeedTestError> {
        if self.samples_per_endpoint == 0 {
            return Err(SpeedTestError::config(
                "samples_per_endpoint must be at least 1",
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(SpeedTestError::config(
                "probe_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeAttempt {
    pub endpoint_id: String,
    pub succeeded: bool,
    /// Present only for successful attempts
    pub round_trip_ms: Option<f64>,
}

impl ProbeAttempt {
    pub fn success(endpoint_id: impl Into<String>, round_trip_ms: f64) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            succeeded: true,
            round_trip_ms: Some(round_trip_ms),
        }
    }

    pub fn failure(endpoint_id: impl Into<String>) -> Self {
        Self { endpoint_id: endpoint_id.into(), succeeded: false, round_trip_ms: None }
    }
}

/// Attempts of one probing run, in completion order.
#[derive(Debug, Clone)]
pub struct ProbeSession {
    endpoints: Vec<Endpoint>,
    attempts: Vec<ProbeAttempt>,
}

impl ProbeSession {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints, attempts: Vec::new() }
    }

    pub fn record(&mut self, attempt: ProbeAttempt) {
        self.attempts.push(attempt);
    }

    pub fn attempts(&self) -> &[ProbeAttempt] {
        &self.attempts
    }

    /// Reduce the recorded attempts to a report.
    ///
    /// Loss is computed over recorded attempts. Attempts interrupted by
    /// cancellation are never recorded, so they count neither way.
    pub fn summarize(&self) -> LatencyReport {
        let total = self.attempts.len();
        let latencies: Vec<f64> =
            self.attempts.iter().filter_map(|a| a.round_trip_ms).collect();

        if latencies.is_empty() {
            return LatencyReport::unavailable(total);
        }

        // First endpoint to reach the minimum wins ties.
        let mut fastest: Option<(&str, f64)> = None;
        for attempt in &self.attempts {
            if let Some(rtt) = attempt.round_trip_ms {
                match fastest {
                    Some((_, best)) if rtt >= best => {}
                    _ => fastest = Some((attempt.endpoint_id.as_str(), rtt)),
                }
            }
        }

        let (best_id, min_rtt) = fastest.unwrap_or(("", 0.0));
        let best_server = self
            .endpoints
            .iter()
            .find(|e| e.id == best_id)
            .cloned()
            .unwrap_or_else(Endpoint::unavailable);

        let failed = total - latencies.len();
        // 100% is reserved for runs where nothing answered.
        let loss = round_to(failed as f64 / total as f64 * 100.0, 1)
            .min(MAX_PARTIAL_LOSS);

        LatencyReport {
            ping_ms: min_rtt.round() as u64,
            jitter_ms: round_to(jitter_ms(&latencies), 1),
            packet_loss_percent: loss,
            best_server,
            attempts: total,
            succeeded: latencies.len(),
        }
    }
}

/// Latency figures of one probing run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyReport {
    /// Minimum round trip, rounded to whole ms
    pub ping_ms: u64,
    /// Mean absolute difference between consecutive round trips (in ms)
    pub jitter_ms: f64,
    /// Failed attempts as a percentage of recorded attempts (0 to 100)
    pub packet_loss_percent: f64,
    pub best_server: Endpoint,
    pub attempts: usize,
    pub succeeded: usize,
}

impl LatencyReport {
    /// Report for a run where nothing answered.
    pub fn unavailable(attempts: usize) -> Self {
        Self {
            ping_ms: 0,
            jitter_ms: 0.0,
            packet_loss_percent: 100.0,
            best_server: Endpoint::unavailable(),
            attempts,
            succeeded: 0,
        }
    }
}

/// Runs probing sessions against a [`Transport`].
pub struct LatencyProber<T> {
    transport: T,
    config: ProbeConfig,
}

impl<T: Transport> LatencyProber<T> {
    pub fn new(transport: T, config: ProbeConfig) -> Self {
        Self { transport, config }
    }

    /// Probe every endpoint `samples_per_endpoint` times.
    ///
    /// Individual failures and timeouts are counted as loss and never
    /// returned as errors. Only an invalid configuration or an empty
    /// endpoint list fails the call.
    pub async fn probe(
        &self,
        endpoints: &[Endpoint],
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<LatencyReport, SpeedTestError> {
        self.config.validate()?;
        if endpoints.is_empty() {
            return Err(SpeedTestError::config("no latency endpoints configured"));
        }

        let total = endpoints.len() * self.config.samples_per_endpoint;
        info!(
            "Probing {} endpoints, {} samples each ({:?})",
            endpoints.len(),
            self.config.samples_per_endpoint,
            self.config.mode
        );

        let session = Mutex::new(ProbeSession::new(endpoints.to_vec()));

        match self.config.mode {
            ProbeMode::Sequential => {
                for endpoint in endpoints {
                    self.probe_endpoint(endpoint, &session, total, progress, cancel)
                        .await;
                }
            }
            ProbeMode::ConcurrentEndpoints => {
                join_all(endpoints.iter().map(|endpoint| {
                    self.probe_endpoint(endpoint, &session, total, progress, cancel)
                }))
                .await;
            }
        }

        let session = match session.into_inner() {
            Ok(session) => session,
            Err(poisoned) => poisoned.into_inner(),
        };
        let report = session.summarize();

        if report.succeeded == 0 {
            warn!("No latency probe succeeded ({} attempts)", report.attempts);
        } else {
            info!(
                "Latency: ping {}ms, jitter {}ms, loss {}%, best server {}",
                report.ping_ms,
                report.jitter_ms,
                report.packet_loss_percent,
                report.best_server.display_name
            );
        }

        Ok(report)
    }

    async fn probe_endpoint(
        &self,
        endpoint: &Endpoint,
        session: &Mutex<ProbeSession>,
        total: usize,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) {
        for sample in 0..self.config.samples_per_endpoint {
            let Some(attempt) = self.attempt(endpoint, sample, cancel).await else {
                return;
            };

            let round_trip_ms = attempt.round_trip_ms;
            let current = {
                let mut session = match session.lock() {
                    Ok(session) => session,
                    Err(poisoned) => poisoned.into_inner(),
                };
                session.record(attempt);
                session.attempts().len()
            };

            progress.on_progress(ProgressEvent::Probe {
                endpoint_id: endpoint.id.clone(),
                round_trip_ms,
                current,
                total,
            });
        }
    }

    /// One timed attempt. `None` when cancelled before it finished.
    async fn attempt(
        &self,
        endpoint: &Endpoint,
        sample: usize,
        cancel: &CancellationToken,
    ) -> Option<ProbeAttempt> {
        let started = Instant::now();

        let result = tokio::select! {
            result = timeout(
                self.config.probe_timeout(),
                self.transport.probe(endpoint),
            ) => result,
            _ = cancel.cancelled() => return None,
        };

        match result {
            Ok(Ok(())) => {
                let rtt = duration_ms(started.elapsed());
                debug!("Probe {}#{}: {:.1}ms", endpoint.id, sample, rtt);
                Some(ProbeAttempt::success(&endpoint.id, rtt))
            }
            Ok(Err(e)) => {
                debug!("Probe {}#{} failed: {}", endpoint.id, sample, e);
                Some(ProbeAttempt::failure(&endpoint.id))
            }
            Err(_) => {
                debug!(
                    "Probe {}#{} timed out after {}ms",
                    endpoint.id, sample, self.config.probe_timeout_ms
                );
                Some(ProbeAttempt::failure(&endpoint.id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::{DownloadBehavior, MockTransport, ProbeBehavior};
    use crate::progress::NoProgress;
    use proptest::prelude::*;
    use url::Url;

    fn endpoint(id: &str) -> Endpoint {
        Endpoint::new(
            id,
            Url::parse(&format!("https://{}.example.com", id)).unwrap(),
            id.to_uppercase(),
            "Example",
        )
    }

    fn mock() -> MockTransport {
        MockTransport::new(DownloadBehavior::Refuse)
    }

    #[test]
    fn test_config_default() {
        let config = ProbeConfig::default();
        assert_eq!(config.samples_per_endpoint, 4);
        assert_eq!(config.probe_timeout_ms, 2_000);
        assert_eq!(config.mode, ProbeMode::Sequential);
        assert!(config.validate().is_ok());
        assert!(ProbeConfig { samples_per_endpoint: 0, ..config.clone() }
            .validate()
            .is_err());
        assert!(ProbeConfig { probe_timeout_ms: 0, ..config }.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_fast_endpoint_one_hanging() {
        let transport = mock()
            .with_probe("a", ProbeBehavior::Respond(Duration::from_millis(20)))
            .with_probe("b", ProbeBehavior::Hang);
        let prober = LatencyProber::new(&transport, ProbeConfig::default());

        let report = prober
            .probe(
                &[endpoint("a"), endpoint("b")],
                &NoProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.ping_ms, 20);
        assert_eq!(report.jitter_ms, 0.0);
        assert_eq!(report.packet_loss_percent, 50.0);
        assert_eq!(report.best_server.id, "a");
        assert_eq!(report.attempts, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_worst_case_is_bounded() {
        let transport = mock()
            .with_probe("a", ProbeBehavior::Hang)
            .with_probe("b", ProbeBehavior::Hang);
        let prober = LatencyProber::new(&transport, ProbeConfig::default());

        let start = Instant::now();
        let report = prober
            .probe(
                &[endpoint("a"), endpoint("b")],
                &NoProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(start.elapsed() <= Duration::from_millis(2 * 4 * 2_000 + 50));
        assert_eq!(report.packet_loss_percent, 100.0);
        assert_eq!(report.ping_ms, 0);
        assert_eq!(report.jitter_ms, 0.0);
        assert!(report.best_server.is_unavailable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_probes_count_as_loss() {
        let transport = mock()
            .with_probe("a", ProbeBehavior::Respond(Duration::from_millis(30)))
            .with_probe("b", ProbeBehavior::Refuse)
            .with_probe("c", ProbeBehavior::Respond(Duration::from_millis(10)));
        let config = ProbeConfig { samples_per_endpoint: 2, ..ProbeConfig::default() };
        let prober = LatencyProber::new(&transport, config);

        let report = prober
            .probe(
                &[endpoint("a"), endpoint("b"), endpoint("c")],
                &NoProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // Completion order: 30, 30, 10, 10 -> diffs 0, 20, 0.
        assert_eq!(report.ping_ms, 10);
        assert!((report.jitter_ms - 6.7).abs() < 1e-9);
        assert!((report.packet_loss_percent - 33.3).abs() < 1e-9);
        assert_eq!(report.best_server.id, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_endpoints_finish_in_one_timeout() {
        let transport = mock()
            .with_probe("a", ProbeBehavior::Respond(Duration::from_millis(20)))
            .with_probe("b", ProbeBehavior::Hang);
        let config = ProbeConfig {
            samples_per_endpoint: 1,
            mode: ProbeMode::ConcurrentEndpoints,
            ..ProbeConfig::default()
        };
        let prober = LatencyProber::new(&transport, config);

        let start = Instant::now();
        let report = prober
            .probe(
                &[endpoint("a"), endpoint("b")],
                &NoProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(start.elapsed() <= Duration::from_millis(2_050));
        assert_eq!(report.ping_ms, 20);
        assert_eq!(report.packet_loss_percent, 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reports_each_attempt() {
        let transport =
            mock().with_probe("a", ProbeBehavior::Respond(Duration::from_millis(5)));
        let prober = LatencyProber::new(&transport, ProbeConfig::default());
        let seen = Mutex::new(Vec::new());
        let callback = |event: ProgressEvent| {
            if let ProgressEvent::Probe { current, total, .. } = event {
                seen.lock().unwrap().push((current, total));
            }
        };

        prober
            .probe(&[endpoint("a")], &callback, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(seen.into_inner().unwrap(), vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_attempts_are_not_recorded() {
        let transport = mock().with_probe("a", ProbeBehavior::Hang);
        let prober = LatencyProber::new(&transport, ProbeConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = prober.probe(&[endpoint("a")], &NoProgress, &cancel).await.unwrap();

        assert_eq!(report.attempts, 0);
        assert_eq!(report.packet_loss_percent, 100.0);
    }

    #[tokio::test]
    async fn test_empty_endpoint_list_is_config_error() {
        let transport = mock();
        let prober = LatencyProber::new(&transport, ProbeConfig::default());

        let error = prober
            .probe(&[], &NoProgress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.kind, crate::errors::ErrorKind::Config);
    }

    #[test]
    fn test_best_server_tie_goes_to_first() {
        let mut session = ProbeSession::new(vec![endpoint("a"), endpoint("b")]);
        session.record(ProbeAttempt::success("b", 15.0));
        session.record(ProbeAttempt::success("a", 15.0));

        assert_eq!(session.summarize().best_server.id, "b");
    }

    #[test]
    fn test_single_success_among_thousands_is_not_total_loss() {
        let mut session = ProbeSession::new(vec![endpoint("a")]);
        session.record(ProbeAttempt::success("a", 20.0));
        for _ in 0..2_000 {
            session.record(ProbeAttempt::failure("a"));
        }

        let report = session.summarize();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.packet_loss_percent, 99.9);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: loss is within [0, 100] and equals 100 exactly when no
        /// attempt succeeded.
        #[test]
        fn prop_loss_bounds(
            outcomes in prop::collection::vec(prop::option::of(0.5f64..500.0), 1..40)
        ) {
            let mut session = ProbeSession::new(vec![endpoint("a")]);
            for outcome in &outcomes {
                session.record(match outcome {
                    Some(rtt) => ProbeAttempt::success("a", *rtt),
                    None => ProbeAttempt::failure("a"),
                });
            }

            let report = session.summarize();
            prop_assert!(report.packet_loss_percent >= 0.0);
            prop_assert!(report.packet_loss_percent <= 100.0);
            let none_succeeded = outcomes.iter().all(|o| o.is_none());
            prop_assert_eq!(report.packet_loss_percent == 100.0, none_succeeded);
            prop_assert!(report.jitter_ms >= 0.0);
        }

        /// Property: the 100% sentinel holds for large runs too, where one
        /// success would otherwise round away.
        #[test]
        fn prop_loss_sentinel_with_many_attempts(
            successes in 0usize..3,
            failures in 1usize..5_000
        ) {
            let mut session = ProbeSession::new(vec![endpoint("a")]);
            for _ in 0..successes {
                session.record(ProbeAttempt::success("a", 12.0));
            }
            for _ in 0..failures {
                session.record(ProbeAttempt::failure("a"));
            }

            let loss = session.summarize().packet_loss_percent;
            prop_assert_eq!(loss == 100.0, successes == 0);
            prop_assert!(loss <= 100.0);
        }

        /// Property: ping is the rounded minimum of the successful round trips.
        #[test]
        fn prop_ping_is_min(
            rtts in prop::collection::vec(0.5f64..500.0, 1..20)
        ) {
            let mut session = ProbeSession::new(vec![endpoint("a")]);
            for rtt in &rtts {
                session.record(ProbeAttempt::success("a", *rtt));
            }

            let min = rtts.iter().cloned().fold(f64::INFINITY, f64::min);
            prop_assert_eq!(session.summarize().ping_ms, min.round() as u64);
        }
    }
}
