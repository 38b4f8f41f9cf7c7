use crate::errors::SpeedTestError;
use crate::http::requests::upload::random_payload;
use crate::http::Transport;
use crate::measure::{
    DirectionOutcome, StreamOutcome, ThroughputSampler, TransferState,
};
use crate::measurements::calculate_speed_mbps;
use crate::progress::{Direction, ProgressCallback};
use futures::future::join_all;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

impl<T: Transport> ThroughputSampler<T> {
    /// Measure upload bandwidth with `stream_count` workers looping POSTs.
    ///
    /// Body progress is not observable mid-flight, so each POST round trip is
    /// one sample of `payload * 8 / duration`. A POST still in flight at the
    /// deadline is dropped without contributing.
    pub async fn measure_upload(
        &self,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<DirectionOutcome, SpeedTestError> {
        self.config.validate()?;

        info!(
            "Starting upload: {} workers, {} byte payloads, {}ms budget",
            self.config.stream_count,
            self.config.upload_unit_bytes,
            self.config.test_duration_ms
        );

        let state = TransferState::new(Direction::Upload, &self.config);
        let workers = (0..self.config.stream_count)
            .map(|worker_id| self.upload_worker(worker_id, &state, progress, cancel));
        let outcomes = join_all(workers).await;

        let outcome = state.finish(
            self.config.final_percentile,
            &outcomes,
            cancel.is_cancelled(),
        );

        info!(
            "Upload finished: {:.2} Mbps from {} samples, {} bytes",
            calculate_speed_mbps(outcome.bps),
            outcome.sample_count,
            outcome.bytes_moved
        );

        Ok(outcome)
    }

    async fn upload_worker(
        &self,
        worker_id: usize,
        state: &TransferState,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        state.stream_started();

        let payload_size = self.config.upload_unit_bytes as usize;
        let min_sample = Duration::from_millis(self.config.min_upload_sample_ms);

        let work = async {
            let mut posts = 0usize;

            while Instant::now() < state.deadline() {
                let payload = random_payload(payload_size);
                let started = Instant::now();
                self.transport.upload(payload).await?;
                let finished = Instant::now();

                state.record_upload(
                    worker_id,
                    payload_size,
                    finished.saturating_duration_since(started),
                    min_sample,
                    finished,
                    progress,
                );
                posts += 1;
            }

            Ok::<usize, SpeedTestError>(posts)
        };

        let outcome = tokio::select! {
            result = work => match result {
                Ok(posts) => {
                    debug!("Upload worker {} finished after {} POSTs", worker_id, posts);
                    StreamOutcome::DeadlineReached
                }
                Err(e) => {
                    warn!("Upload worker {} failed: {}", worker_id, e);
                    StreamOutcome::Failed
                }
            },
            _ = sleep_until(state.deadline()) => {
                debug!("Upload worker {} reached the deadline mid-POST", worker_id);
                StreamOutcome::DeadlineReached
            }
            _ = cancel.cancelled() => {
                debug!("Upload worker {} cancelled", worker_id);
                StreamOutcome::Cancelled
            }
        };

        let remaining = state.stream_finished();
        debug!("Upload worker {} done, {} still active", worker_id, remaining);
        outcome
    }
}
