use crate::http::requests::{user_agent, Request, RequestBody};
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use rand::RngCore;
use reqwest::Method;
use url::Url;

/// POST of an opaque octet-stream payload. Only the wall-clock duration of
/// the round trip is used, so the response status is not inspected.
pub(crate) struct Upload<'a> {
    pub url: &'a Url,
    pub payload: Vec<u8>,
}

impl Request for Upload<'_> {
    type Response = ();

    const METHOD: Method = Method::POST;

    const CHECK_STATUS: bool = false;

    fn url(&self) -> Url {
        self.url.clone()
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert(USER_AGENT, user_agent());

        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );

        headers
    }

    fn into_body(self) -> RequestBody {
        RequestBody::Bytes(self.payload)
    }
}

/// Pseudo-random payload of `size` bytes.
///
/// Random bytes keep intermediaries from compressing the body, which would
/// otherwise inflate the measured rate.
pub fn random_payload(size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut data);
    data
}
