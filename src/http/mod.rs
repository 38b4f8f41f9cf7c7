//! HTTP transport seam.
//!
//! The measurement core only talks to the network through [`Transport`], so
//! it can be driven by the reqwest-backed [`client::Client`] in production and
//! by a deterministic mock in tests.

pub mod client;
#[cfg(test)]
pub(crate) mod mock;
pub mod requests;

use crate::errors::SpeedTestError;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use url::Url;

pub(crate) static DEFAULT_DOWNLOAD_URL: &str =
    "https://speed.cloudflare.com/__down";
pub(crate) static DEFAULT_UPLOAD_URL: &str = "https://speed.cloudflare.com/__up";
pub(crate) static DEFAULT_CONNECTIVITY_URL: &str = "https://www.google.com";
pub(crate) static DEFAULT_PUBLIC_IP_URL: &str =
    "https://api.ipify.org?format=json";
pub(crate) static DEFAULT_GEO_URL: &str = "https://ipwho.is/";

/// Body chunks of a streamed download, reported as their byte lengths.
pub type ChunkStream = BoxStream<'static, Result<usize, SpeedTestError>>;

/// Network operations the measurement core needs.
///
/// Implementations report failures as errors and never retry; the callers
/// own deadlines and decide how a failure counts.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Start `GET <download>?bytes=<bytes>&t=<cache_bust>` and return the
    /// body as a chunk stream. Non-success statuses are errors.
    async fn open_download(
        &self,
        bytes: u64,
        cache_bust: &str,
    ) -> Result<ChunkStream, SpeedTestError>;

    /// POST `payload` to the upload endpoint. Only completion matters, the
    /// response body is discarded.
    async fn upload(&self, payload: Vec<u8>) -> Result<(), SpeedTestError>;

    /// Issue one minimal request against `endpoint`.
    async fn probe(&self, endpoint: &Endpoint) -> Result<(), SpeedTestError>;

    /// Single lightweight request to a known-reachable host.
    async fn check_connectivity(&self) -> Result<(), SpeedTestError>;
}

impl<T: Transport> Transport for &T {
    async fn open_download(
        &self,
        bytes: u64,
        cache_bust: &str,
    ) -> Result<ChunkStream, SpeedTestError> {
        (**self).open_download(bytes, cache_bust).await
    }

    async fn upload(&self, payload: Vec<u8>) -> Result<(), SpeedTestError> {
        (**self).upload(payload).await
    }

    async fn probe(&self, endpoint: &Endpoint) -> Result<(), SpeedTestError> {
        (**self).probe(endpoint).await
    }

    async fn check_connectivity(&self) -> Result<(), SpeedTestError> {
        (**self).check_connectivity().await
    }
}

/// A latency probe target. Static configuration, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub id: String,
    pub url: Url,
    pub display_name: String,
    pub organization: String,
}

impl Endpoint {
    pub fn new(
        id: impl Into<String>,
        url: Url,
        display_name: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            url,
            display_name: display_name.into(),
            organization: organization.into(),
        }
    }

    /// Sentinel reported as best server when no probe succeeded.
    pub fn unavailable() -> Self {
        Self {
            id: "unavailable".to_string(),
            url: Url::parse("about:blank").expect("static URL is valid"),
            display_name: "Unavailable".to_string(),
            organization: "Unavailable".to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.id == "unavailable"
    }

    /// Well-known high-availability hosts probed by default.
    pub fn defaults() -> Vec<Endpoint> {
        [
            ("google", "https://www.google.com", "Google", "Google LLC"),
            (
                "cloudflare",
                "https://www.cloudflare.com",
                "Cloudflare",
                "Cloudflare, Inc.",
            ),
            ("amazon", "https://www.amazon.com", "Amazon", "Amazon.com, Inc."),
        ]
        .into_iter()
        .map(|(id, url, name, org)| {
            Endpoint::new(
                id,
                Url::parse(url).expect("static URL is valid"),
                name,
                org,
            )
        })
        .collect()
    }
}

/// Remote services the transport talks to.
#[derive(Debug, Clone)]
pub struct ServiceUrls {
    /// Byte-serving endpoint, queried with `?bytes=<N>&t=<token>`
    pub download: Url,
    /// Endpoint accepting arbitrary octet-stream POST bodies
    pub upload: Url,
    /// Host used for the pre-flight connectivity check
    pub connectivity: Url,
    /// Returns `{ "ip": "..." }`
    pub public_ip: Url,
    /// Geolocation lookup; the IP address is appended as the last segment
    pub geo: Url,
}

impl Default for ServiceUrls {
    fn default() -> Self {
        let parse = |s: &str| Url::parse(s).expect("static URL is valid");
        Self {
            download: parse(DEFAULT_DOWNLOAD_URL),
            upload: parse(DEFAULT_UPLOAD_URL),
            connectivity: parse(DEFAULT_CONNECTIVITY_URL),
            public_ip: parse(DEFAULT_PUBLIC_IP_URL),
            geo: parse(DEFAULT_GEO_URL),
        }
    }
}
