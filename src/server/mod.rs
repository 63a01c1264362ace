//! Access to the speed test server's HTTP endpoints.
//!
//! The engine only depends on the [`SpeedTransport`] and [`PingTransport`]
//! traits; [`client::HttpTransport`] is the reqwest-backed implementation
//! the binary uses.

pub mod client;
pub mod requests;

use std::future::Future;
use std::time::Duration;

use futures::stream::BoxStream;

use crate::errors::SpeedTestError;
use crate::session::TestSize;

pub use client::HttpTransport;
pub use requests::{ServerInfo, UploadReceipt};

/// Address of a speed test server running on the local machine.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// A body delivered chunk by chunk: the download response, or the upload
/// payload handed to the transport.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, SpeedTestError>>;

/// Byte-streaming request/response primitive used by the throughput phases.
pub trait SpeedTransport: Send + Sync {
    /// Request `size` megabytes of arbitrary payload and return the body as
    /// a stream. Resolves once response headers arrived with a success
    /// status.
    fn download(
        &self,
        size: TestSize,
    ) -> impl Future<Output = Result<ByteStream, SpeedTestError>> + Send;

    /// Stream `body` (exactly `size` megabytes) as one request body and
    /// return the server's reply.
    fn upload(
        &self,
        size: TestSize,
        body: ByteStream,
    ) -> impl Future<Output = Result<UploadReceipt, SpeedTestError>> + Send;
}

/// A single lightweight round trip, used by the latency counterpart.
pub trait PingTransport: Send + Sync {
    fn ping(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), SpeedTestError>> + Send;
}
