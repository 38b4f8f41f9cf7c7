use crate::http::requests::{user_agent, Request};
use http::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA, USER_AGENT};
use url::Url;

/// `GET <base>?bytes=<N>&t=<token>` against a byte-serving endpoint.
pub(crate) struct Download<'a> {
    pub base: &'a Url,
    pub bytes: u64,
    /// Distinct per stream so no two streams share a cached response
    pub cache_bust: &'a str,
}

impl Request for Download<'_> {
    type Response = ();

    fn url(&self) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("bytes", &self.bytes.to_string())
            .append_pair("t", self.cache_bust);
        url
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert(USER_AGENT, user_agent());

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_url_carries_bytes_and_token() {
        let base = Url::parse("https://speed.example.com/__down").unwrap();
        let request = Download { base: &base, bytes: 52_428_800, cache_bust: "17-3" };

        assert_eq!(
            request.url().as_str(),
            "https://speed.example.com/__down?bytes=52428800&t=17-3"
        );
    }

    #[test]
    fn test_download_headers_disable_caching() {
        let base = Url::parse("https://speed.example.com/__down").unwrap();
        let request = Download { base: &base, bytes: 1, cache_bust: "x" };
        let headers = request.headers();

        assert_eq!(headers.get(CACHE_CONTROL).unwrap(), "no-cache");
        assert!(headers.contains_key(USER_AGENT));
    }
}
