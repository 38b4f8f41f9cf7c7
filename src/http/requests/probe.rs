use crate::http::requests::{user_agent, Request};
use http::header::{HeaderMap, HeaderValue, CACHE_CONTROL, USER_AGENT};
use reqwest::Method;
use url::Url;

/// HEAD request used for latency probes and the connectivity check.
///
/// Any response counts as a completed round trip, whatever its status.
pub(crate) struct Probe<'a> {
    pub url: &'a Url,
}

impl Request for Probe<'_> {
    type Response = ();

    const METHOD: Method = Method::HEAD;

    const CHECK_STATUS: bool = false;

    fn url(&self) -> Url {
        self.url.clone()
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert(USER_AGENT, user_agent());

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

        headers
    }
}
