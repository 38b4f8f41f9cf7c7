use crate::errors::SpeedTestError;
use crate::http::requests::download::Download;
use crate::http::requests::probe::Probe;
use crate::http::requests::upload::Upload;
use crate::http::requests::{Request, RequestBody};
use crate::http::{ChunkStream, Endpoint, ServiceUrls, Transport};
use futures::StreamExt;
use log::debug;
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// reqwest-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct Client {
    client: ReqwestClient,
    urls: ServiceUrls,
}

impl Client {
    pub fn new(urls: ServiceUrls) -> Result<Self, SpeedTestError> {
        let client = ReqwestClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Client { client, urls })
    }

    pub fn urls(&self) -> &ServiceUrls {
        &self.urls
    }

    /// Send a request and hand back the raw response.
    pub async fn execute<R: Request>(
        &self,
        request: R,
    ) -> Result<Response, SpeedTestError> {
        let url = request.url();
        debug!("{} {}", R::METHOD, url);

        let response = self
            .client
            .request(R::METHOD, url.clone())
            .headers(request.headers())
            .speed_timeout(request.timeout())
            .speed_body(request.into_body())
            .send()
            .await?;

        if R::CHECK_STATUS && !response.status().is_success() {
            return Err(SpeedTestError::http_status(
                response.status().as_u16(),
                url.as_str(),
            ));
        }

        Ok(response)
    }

    /// Send a request and deserialize its JSON body.
    pub async fn send<R: Request>(
        &self,
        request: R,
    ) -> Result<R::Response, SpeedTestError> {
        let response = self.execute(request).await?;

        Ok(response.json::<R::Response>().await?)
    }
}

impl Transport for Client {
    async fn open_download(
        &self,
        bytes: u64,
        cache_bust: &str,
    ) -> Result<ChunkStream, SpeedTestError> {
        let request =
            Download { base: &self.urls.download, bytes, cache_bust };
        let response = self.execute(request).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk.map(|bytes| bytes.len()).map_err(SpeedTestError::from)
            })
            .boxed())
    }

    async fn upload(&self, payload: Vec<u8>) -> Result<(), SpeedTestError> {
        let response =
            self.execute(Upload { url: &self.urls.upload, payload }).await?;

        // Drain so the round trip includes the full response.
        response.bytes().await?;

        Ok(())
    }

    async fn probe(&self, endpoint: &Endpoint) -> Result<(), SpeedTestError> {
        self.execute(Probe { url: &endpoint.url }).await?;

        Ok(())
    }

    async fn check_connectivity(&self) -> Result<(), SpeedTestError> {
        self.execute(Probe { url: &self.urls.connectivity }).await?;

        Ok(())
    }
}

trait RequestBuilderExt: Sized {
    fn speed_body(self, body: RequestBody) -> Self;

    fn speed_timeout(self, timeout: Option<Duration>) -> Self;
}

impl RequestBuilderExt for RequestBuilder {
    fn speed_body(self, body: RequestBody) -> Self {
        match body {
            RequestBody::None => self,
            RequestBody::Bytes(bytes) => self.body(bytes),
        }
    }

    fn speed_timeout(self, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(timeout) => self.timeout(timeout),
            None => self,
        }
    }
}
