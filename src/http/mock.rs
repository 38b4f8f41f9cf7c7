//! Deterministic transport for tests. Timing comes from `tokio::time`, so
//! tests running with a paused clock see exact durations.

use crate::errors::SpeedTestError;
use crate::http::{ChunkStream, Endpoint, Transport};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) enum DownloadBehavior {
    /// Deliver `chunk_bytes` every `interval`; `count: None` never ends.
    Chunks { chunk_bytes: usize, interval: Duration, count: Option<usize> },
    /// Fail before the body starts.
    Refuse,
    /// Deliver `ok_chunks` chunks, then fail mid-body.
    Break { chunk_bytes: usize, interval: Duration, ok_chunks: usize },
}

#[derive(Debug, Clone)]
pub(crate) enum UploadBehavior {
    /// Every POST completes after this long.
    Takes(Duration),
    Refuse,
}

#[derive(Debug, Clone)]
pub(crate) enum ProbeBehavior {
    Respond(Duration),
    /// Never answers; only a timeout ends the attempt.
    Hang,
    Refuse,
}

pub(crate) struct MockTransport {
    pub download: DownloadBehavior,
    pub upload: UploadBehavior,
    pub probes: HashMap<String, ProbeBehavior>,
    pub online: bool,
    pub cache_busts: Mutex<Vec<String>>,
    pub payloads: Mutex<Vec<Vec<u8>>>,
}

impl MockTransport {
    pub fn new(download: DownloadBehavior) -> Self {
        Self {
            download,
            upload: UploadBehavior::Refuse,
            probes: HashMap::new(),
            online: true,
            cache_busts: Mutex::new(Vec::new()),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_upload(mut self, upload: UploadBehavior) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_probe(mut self, id: &str, behavior: ProbeBehavior) -> Self {
        self.probes.insert(id.to_string(), behavior);
        self
    }

    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }
}

fn chunk_stream(
    chunk_bytes: usize,
    interval: Duration,
    count: Option<usize>,
    fail_after: bool,
) -> ChunkStream {
    futures::stream::unfold(0usize, move |sent| async move {
        if let Some(count) = count {
            if sent >= count {
                if fail_after && sent == count {
                    return Some((
                        Err(SpeedTestError::network("connection reset")),
                        sent + 1,
                    ));
                }
                return None;
            }
        }
        tokio::time::sleep(interval).await;
        Some((Ok(chunk_bytes), sent + 1))
    })
    .boxed()
}

impl Transport for MockTransport {
    async fn open_download(
        &self,
        _bytes: u64,
        cache_bust: &str,
    ) -> Result<ChunkStream, SpeedTestError> {
        self.cache_busts.lock().unwrap().push(cache_bust.to_string());

        match self.download.clone() {
            DownloadBehavior::Chunks { chunk_bytes, interval, count } => {
                Ok(chunk_stream(chunk_bytes, interval, count, false))
            }
            DownloadBehavior::Refuse => {
                Err(SpeedTestError::network("connection refused"))
            }
            DownloadBehavior::Break { chunk_bytes, interval, ok_chunks } => {
                Ok(chunk_stream(chunk_bytes, interval, Some(ok_chunks), true))
            }
        }
    }

    async fn upload(&self, payload: Vec<u8>) -> Result<(), SpeedTestError> {
        match self.upload {
            UploadBehavior::Takes(duration) => {
                self.payloads.lock().unwrap().push(payload);
                tokio::time::sleep(duration).await;
                Ok(())
            }
            UploadBehavior::Refuse => {
                Err(SpeedTestError::network("connection refused"))
            }
        }
    }

    async fn probe(&self, endpoint: &Endpoint) -> Result<(), SpeedTestError> {
        match self.probes.get(&endpoint.id).cloned() {
            Some(ProbeBehavior::Respond(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            Some(ProbeBehavior::Hang) => std::future::pending().await,
            Some(ProbeBehavior::Refuse) | None => {
                Err(SpeedTestError::network("connection refused"))
            }
        }
    }

    async fn check_connectivity(&self) -> Result<(), SpeedTestError> {
        if self.online {
            Ok(())
        } else {
            Err(SpeedTestError::network("no route to host"))
        }
    }
}
