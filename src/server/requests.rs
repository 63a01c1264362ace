extern crate serde;

use reqwest::header::{
    HeaderMap, HeaderValue, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE,
    PRAGMA, USER_AGENT,
};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::session::TestSize;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) fn user_agent() -> String {
    format!("{}/{}", NAME, VERSION)
}

pub trait Request {
    const METHOD: Method = Method::GET;

    fn endpoint(&self) -> Cow<'_, str>;

    fn headers(&self) -> HeaderMap {
        base_headers()
    }
}

/// A request whose reply is a JSON document.
pub trait JsonRequest: Request {
    type Response: for<'de> Deserialize<'de>;
}

fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Ok(ua) = HeaderValue::from_str(&user_agent()) {
        headers.insert(USER_AGENT, ua);
    }

    headers
}

fn uncached_headers(mut headers: HeaderMap) -> HeaderMap {
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

/// Ask the server to stream `size` megabytes of arbitrary bytes.
#[derive(Debug, Copy, Clone)]
pub(crate) struct DownloadRequest {
    pub size: TestSize,
}

impl Request for DownloadRequest {
    const METHOD: Method = Method::POST;

    fn endpoint(&self) -> Cow<'_, str> {
        format!("/test/download/{}", self.size.megabytes()).into()
    }

    fn headers(&self) -> HeaderMap {
        uncached_headers(base_headers())
    }
}

/// Post a payload of `size` megabytes to the upload sink.
#[derive(Debug, Copy, Clone)]
pub(crate) struct UploadRequest {
    pub size: TestSize,
}

impl Request for UploadRequest {
    const METHOD: Method = Method::POST;

    fn endpoint(&self) -> Cow<'_, str> {
        format!("/test/upload/{}", self.size.megabytes()).into()
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = base_headers();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        headers.insert(CONTENT_LENGTH, HeaderValue::from(self.size.bytes()));
        uncached_headers(headers)
    }
}

/// Reply of the upload sink. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub bytes_received: Option<u64>,
    #[serde(default)]
    pub elapsed_time: Option<f64>,
    #[serde(default)]
    pub speed_mbps: Option<f64>,
}

/// Lightweight request used to time a single round trip.
#[derive(Debug, Copy, Clone)]
pub(crate) struct PingRequest;

impl Request for PingRequest {
    fn endpoint(&self) -> Cow<'_, str> {
        "/test/ping".into()
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct InfoRequest;

impl Request for InfoRequest {
    fn endpoint(&self) -> Cow<'_, str> {
        "/info".into()
    }
}

impl JsonRequest for InfoRequest {
    type Response = ServerInfo;
}

/// Host details published by the speed test server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub hostname: String,
    #[serde(default)]
    pub local_ips: Vec<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub access_urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_endpoint_and_method() {
        let request = DownloadRequest { size: TestSize::new(25).unwrap() };
        assert_eq!(request.endpoint(), "/test/download/25");
        assert_eq!(DownloadRequest::METHOD, Method::POST);
        assert!(request.headers().contains_key(CACHE_CONTROL));
    }

    #[test]
    fn test_upload_headers() {
        let request = UploadRequest { size: TestSize::new(10).unwrap() };
        assert_eq!(request.endpoint(), "/test/upload/10");
        let headers = request.headers();
        assert_eq!(
            headers.get(CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );
        assert_eq!(headers.get(CONTENT_LENGTH).unwrap(), "10485760");
        assert!(headers.get(USER_AGENT).is_some());
    }

    #[test]
    fn test_ping_is_get() {
        assert_eq!(PingRequest::METHOD, Method::GET);
        assert_eq!(PingRequest.endpoint(), "/test/ping");
    }

    #[test]
    fn test_upload_receipt_parses_server_reply() {
        let json = r#"{"bytes_received": 1048576, "elapsed_time": 0.5,
                       "speed_mbps": 16.78, "status": "completed"}"#;
        let receipt: UploadReceipt = serde_json::from_str(json).unwrap();
        assert_eq!(receipt.bytes_received, Some(1_048_576));
        assert_eq!(receipt.speed_mbps, Some(16.78));
    }

    #[test]
    fn test_upload_receipt_tolerates_missing_fields() {
        let receipt: UploadReceipt = serde_json::from_str("{}").unwrap();
        assert_eq!(receipt, UploadReceipt::default());
    }

    #[test]
    fn test_server_info_parses() {
        let json = r#"{"hostname": "lab", "local_ips": ["192.168.1.4"],
                       "port": 8000, "access_urls": ["http://192.168.1.4:8000"]}"#;
        let info: ServerInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.hostname, "lab");
        assert_eq!(info.port, Some(8000));
        assert_eq!(info.access_urls.len(), 1);
    }
}
