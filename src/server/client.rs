use crate::errors::{to_speed_test_error, SpeedTestError};
use crate::server::requests::{
    DownloadRequest, InfoRequest, JsonRequest, PingRequest, Request,
    ServerInfo, UploadReceipt, UploadRequest,
};
use crate::server::{ByteStream, PingTransport, SpeedTransport};
use crate::session::TestSize;
use futures::StreamExt;
use log::{debug, warn};
use reqwest::{Body, Client as ReqwestClient, RequestBuilder, Response};
use std::time::Duration;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Map a reqwest failure onto the engine's error kinds.
fn transport_error(error: reqwest::Error, context: &str) -> SpeedTestError {
    if error.is_timeout() {
        return SpeedTestError::timeout(format!("{}: {}", context, error))
            .with_source(error);
    }

    if error.is_connect() || error.is_request() || error.is_body() {
        return SpeedTestError::network(format!("{}: {}", context, error))
            .with_source(error);
    }

    to_speed_test_error(Box::new(error), context)
}

/// reqwest-backed access to the speed test server.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: Url) -> Result<Self, SpeedTestError> {
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(SpeedTestError::config(format!(
                "unsupported server URL scheme: {}",
                base_url.scheme()
            )));
        }

        let client = ReqwestClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| to_speed_test_error(Box::new(e), "HTTP client"))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for<R: Request>(&self, request: &R) -> Result<Url, SpeedTestError> {
        let endpoint = request.endpoint();
        let endpoint = endpoint.trim_matches('/');
        let base = self.base_url.as_str().trim_end_matches('/');

        Url::parse(&format!("{}/{}", base, endpoint)).map_err(|e| {
            SpeedTestError::config(format!("invalid endpoint URL: {}", e))
                .with_source(e)
        })
    }

    fn build<R: Request>(
        &self,
        request: &R,
    ) -> Result<RequestBuilder, SpeedTestError> {
        let url = self.url_for(request)?;
        debug!("{} {}", R::METHOD, url);

        Ok(self.client.request(R::METHOD, url).headers(request.headers()))
    }

    async fn execute(
        builder: RequestBuilder,
        context: &str,
    ) -> Result<Response, SpeedTestError> {
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(e, context))?;

        if !response.status().is_success() {
            return Err(SpeedTestError::http_status(response.status()));
        }

        Ok(response)
    }

    /// Send a request and decode its JSON reply.
    pub async fn send<R: JsonRequest>(
        &self,
        request: R,
    ) -> Result<R::Response, SpeedTestError> {
        let response = Self::execute(self.build(&request)?, "request").await?;

        response
            .json::<R::Response>()
            .await
            .map_err(|e| transport_error(e, "decoding reply"))
    }

    /// Fetch host details published by the server.
    pub async fn server_info(&self) -> Result<ServerInfo, SpeedTestError> {
        self.send(InfoRequest).await
    }
}

impl SpeedTransport for HttpTransport {
    async fn download(
        &self,
        size: TestSize,
    ) -> Result<ByteStream, SpeedTestError> {
        let request = DownloadRequest { size };
        let response =
            Self::execute(self.build(&request)?, "download request").await?;

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| transport_error(e, "download stream"))
        });

        Ok(stream.boxed())
    }

    async fn upload(
        &self,
        size: TestSize,
        body: ByteStream,
    ) -> Result<UploadReceipt, SpeedTestError> {
        let request = UploadRequest { size };
        let builder = self.build(&request)?.body(Body::wrap_stream(body));
        let response = Self::execute(builder, "upload request").await?;

        let text = response
            .text()
            .await
            .map_err(|e| transport_error(e, "upload reply"))?;

        match serde_json::from_str::<UploadReceipt>(&text) {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                warn!("Upload reply was not a receipt ({}), using local timing", e);
                Ok(UploadReceipt::default())
            }
        }
    }
}

impl PingTransport for HttpTransport {
    async fn ping(&self, timeout: Duration) -> Result<(), SpeedTestError> {
        let builder = self.build(&PingRequest)?.timeout(timeout);
        let response = Self::execute(builder, "ping").await?;

        // Drain the body so the round trip includes the full reply.
        response
            .bytes()
            .await
            .map_err(|e| transport_error(e, "ping reply"))?;

        Ok(())
    }
}
