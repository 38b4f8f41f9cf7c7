use crate::errors::SpeedTestError;
use crate::http::Transport;
use crate::measure::{
    DirectionOutcome, StreamOutcome, ThroughputSampler, TransferState,
};
use crate::measurements::calculate_speed_mbps;
use crate::progress::{Direction, ProgressCallback};
use futures::future::join_all;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Query token that makes every download URL unique.
///
/// Combines wall-clock milliseconds, the stream id and a random suffix so
/// no two streams, in this run or a previous one, share a cached response.
pub(crate) fn cache_bust_token(stream_id: usize) -> String {
    format!(
        "{}-{}-{:08x}",
        chrono::Utc::now().timestamp_millis(),
        stream_id,
        rand::random::<u32>()
    )
}

impl<T: Transport> ThroughputSampler<T> {
    /// Measure download bandwidth with `stream_count` concurrent streamed GETs.
    ///
    /// Every stream keeps re-requesting bodies until the shared direction
    /// deadline or cancellation. Stream failures are logged and do not fail the
    /// direction: if no sample was ever taken the result is 0 bps.
    pub async fn measure_download(
        &self,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<DirectionOutcome, SpeedTestError> {
        self.config.validate()?;

        info!(
            "Starting download: {} streams, {}ms budget, {}ms warmup",
            self.config.stream_count,
            self.config.test_duration_ms,
            self.config.warmup_ms
        );

        let state = TransferState::new(Direction::Download, &self.config);
        let streams = (0..self.config.stream_count)
            .map(|stream_id| self.download_stream(stream_id, &state, progress, cancel));
        let outcomes = join_all(streams).await;

        let outcome = state.finish(
            self.config.final_percentile,
            &outcomes,
            cancel.is_cancelled(),
        );

        if outcome.failed_streams == outcome.streams {
            warn!("All {} download streams failed", outcome.streams);
        }
        info!(
            "Download finished: {:.2} Mbps from {} samples, {} bytes",
            calculate_speed_mbps(outcome.bps),
            outcome.sample_count,
            outcome.bytes_moved
        );

        Ok(outcome)
    }

    async fn download_stream(
        &self,
        stream_id: usize,
        state: &TransferState,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        state.stream_started();

        // A body that ends before the deadline is followed by a fresh GET.
        let transfer = async {
            let mut requests = 0usize;
            while Instant::now() < state.deadline() {
                let token = cache_bust_token(stream_id);
                let mut chunks = self
                    .transport
                    .open_download(self.config.download_unit_bytes, &token)
                    .await?;
                requests += 1;

                let mut received = 0usize;
                while let Some(chunk) = chunks.next().await {
                    let bytes = chunk?;
                    received += bytes;
                    state.record_download_chunk(
                        stream_id,
                        bytes,
                        Instant::now(),
                        progress,
                    );
                }

                if received == 0 {
                    debug!("Download stream {} got an empty body", stream_id);
                    break;
                }
            }

            debug!("Download stream {} issued {} requests", stream_id, requests);
            Ok::<(), SpeedTestError>(())
        };

        let outcome = tokio::select! {
            result = transfer => match result {
                Ok(()) => {
                    debug!("Download stream {} completed", stream_id);
                    StreamOutcome::Completed
                }
                Err(e) => {
                    warn!("Download stream {} failed: {}", stream_id, e);
                    StreamOutcome::Failed
                }
            },
            _ = sleep_until(state.deadline()) => {
                debug!("Download stream {} reached the deadline", stream_id);
                StreamOutcome::DeadlineReached
            }
            _ = cancel.cancelled() => {
                debug!("Download stream {} cancelled", stream_id);
                StreamOutcome::Cancelled
            }
        };

        let remaining = state.stream_finished();
        debug!("Download stream {} done, {} still active", stream_id, remaining);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::{DownloadBehavior, MockTransport};
    use crate::measure::SamplerConfig;
    use crate::progress::{NoProgress, ProgressEvent};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    fn chunks(
        chunk_bytes: usize,
        interval_ms: u64,
        count: Option<usize>,
    ) -> DownloadBehavior {
        DownloadBehavior::Chunks {
            chunk_bytes,
            interval: Duration::from_millis(interval_ms),
            count,
        }
    }

    fn config(streams: usize, duration_ms: u64, warmup_ms: u64) -> SamplerConfig {
        SamplerConfig {
            stream_count: streams,
            test_duration_ms: duration_ms,
            warmup_ms,
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn test_cache_bust_tokens_differ() {
        let tokens: HashSet<String> = (0..50).map(|_| cache_bust_token(0)).collect();
        assert!(tokens.len() > 45);
        assert!(cache_bust_token(3).contains("-3-"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_stream_ten_megabytes_in_one_second() {
        // 100 chunks of 100kB, one every 10ms: 10MB over exactly 1s.
        let transport = MockTransport::new(chunks(100_000, 10, Some(100)));
        let sampler = ThroughputSampler::new(&transport, config(1, 1_000, 0));

        let outcome = sampler
            .measure_download(&NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.bytes_moved >= 9_900_000);
        assert!(outcome.bytes_moved <= 10_000_000);
        assert!(outcome.has_samples());
        let error = (outcome.bps - 80_000_000.0).abs() / 80_000_000.0;
        assert!(error < 0.02, "got {} bps", outcome.bps);
        assert_eq!(outcome.failed_streams, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warmup_samples_are_excluded() {
        let transport = MockTransport::new(chunks(10_000, 10, None));
        let sampler = ThroughputSampler::new(&transport, config(2, 2_000, 800));
        let seen = Mutex::new(Vec::new());
        let callback = |event: ProgressEvent| {
            if let ProgressEvent::Throughput { sample, .. } = event {
                seen.lock().unwrap().push(sample.captured_at_ms);
            }
        };

        let outcome = sampler
            .measure_download(&callback, &CancellationToken::new())
            .await
            .unwrap();

        let seen = seen.into_inner().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|ms| *ms >= 800.0));
        assert_eq!(outcome.sample_count, seen.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_endless_streams() {
        let transport = MockTransport::new(chunks(1_000, 5, None));
        let sampler = ThroughputSampler::new(&transport, config(4, 500, 0));

        let start = Instant::now();
        let outcome = sampler
            .measure_download(&NoProgress, &CancellationToken::new())
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed <= Duration::from_millis(520), "took {:?}", elapsed);
        assert_eq!(outcome.deadline_streams, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_streams_refused_is_zero_not_error() {
        let transport = MockTransport::new(DownloadBehavior::Refuse);
        let sampler = ThroughputSampler::new(&transport, config(4, 1_000, 0));

        let outcome = sampler
            .measure_download(&NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.bps, 0.0);
        assert_eq!(outcome.failed_streams, 4);
        assert_eq!(outcome.sample_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_streams_keep_their_samples() {
        let transport = MockTransport::new(DownloadBehavior::Break {
            chunk_bytes: 50_000,
            interval: Duration::from_millis(10),
            ok_chunks: 60,
        });
        let sampler = ThroughputSampler::new(&transport, config(2, 2_000, 0));

        let outcome = sampler
            .measure_download(&NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.failed_streams, 2);
        assert_eq!(outcome.bytes_moved, 2 * 60 * 50_000);
        assert!(outcome.bps > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_use_distinct_cache_busts() {
        let transport = MockTransport::new(chunks(1_000, 10, Some(5)));
        let sampler = ThroughputSampler::new(&transport, config(4, 1_000, 0));

        sampler
            .measure_download(&NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        // Each 5-chunk body ends after 50ms and is re-requested.
        let tokens = transport.cache_busts.lock().unwrap().clone();
        let unique: HashSet<&String> = tokens.iter().collect();
        assert!(tokens.len() >= 4 * 10, "only {} requests", tokens.len());
        assert_eq!(unique.len(), tokens.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bodies_drained_before_warmup_are_re_requested() {
        // Four 1MB bodies that all finish at 1.0s, ahead of a 1.5s warmup.
        let transport = MockTransport::new(chunks(100_000, 100, Some(10)));
        let sampler = ThroughputSampler::new(&transport, config(4, 3_000, 1_500));

        let outcome = sampler
            .measure_download(&NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.has_samples());
        assert!(outcome.bps > 0.0);
        assert!(outcome.bytes_moved > 4 * 1_000_000);
        // 4 streams x 1MB/s = 32 Mbps.
        let error = (outcome.bps - 32_000_000.0).abs() / 32_000_000.0;
        assert!(error < 0.05, "got {} bps", outcome.bps);
        assert!(transport.cache_busts.lock().unwrap().len() >= 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_rate_limited_and_monotonic() {
        let transport = MockTransport::new(chunks(4_000, 3, None));
        let sampler = ThroughputSampler::new(&transport, config(4, 3_000, 0));
        let events = Mutex::new(Vec::new());
        let callback = |event: ProgressEvent| {
            if let ProgressEvent::Throughput { sample, bytes_moved, .. } = event {
                events.lock().unwrap().push((sample.captured_at_ms, bytes_moved));
            }
        };

        sampler
            .measure_download(&callback, &CancellationToken::new())
            .await
            .unwrap();

        let events = events.into_inner().unwrap();
        assert!(events.len() >= 10);
        for pair in events.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= 200.0 - 1e-6);
            assert!(pair[1].1 >= pair[0].1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_keeps_partial_estimate() {
        let transport = MockTransport::new(chunks(10_000, 10, None));
        let sampler = ThroughputSampler::new(&transport, config(2, 10_000, 0));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = sampler.measure_download(&NoProgress, &cancel).await.unwrap();

        assert!(outcome.cancelled);
        assert!(outcome.bps > 0.0);
        assert!(start.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let transport = MockTransport::new(DownloadBehavior::Refuse);
        let sampler = ThroughputSampler::new(&transport, config(0, 1_000, 0));

        let error = sampler
            .measure_download(&NoProgress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.kind, crate::errors::ErrorKind::Config);
        assert!(transport.cache_busts.lock().unwrap().is_empty());
    }
}
