pub mod download;
pub mod lookup;
pub mod probe;
pub mod upload;

use http::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Method;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) fn user_agent() -> HeaderValue {
    HeaderValue::from_str(&format!("{}/{}", NAME, VERSION))
        .unwrap_or_else(|_| HeaderValue::from_static("netgauge"))
}

/// Body attached to an outgoing request.
pub enum RequestBody {
    None,
    Bytes(Vec<u8>),
}

pub trait Request {
    type Response: for<'de> Deserialize<'de>;

    const METHOD: Method = Method::GET;

    /// Whether a non-success status should be treated as a failure.
    const CHECK_STATUS: bool = true;

    fn url(&self) -> Url;

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert(USER_AGENT, user_agent());

        headers
    }

    /// Per-request timeout enforced by the HTTP client.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn into_body(self) -> RequestBody
    where
        Self: Sized,
    {
        RequestBody::None
    }
}
