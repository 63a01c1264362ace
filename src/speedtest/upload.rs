use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{debug, info};
use rand::Rng;
use tokio::time::Instant;

use crate::errors::SpeedTestError;
use crate::measurements::ThroughputResult;
use crate::report::{PhaseProgress, ProgressReporter};
use crate::server::{ByteStream, SpeedTransport};
use crate::session::{Phase, TestSize};

/// Size of one payload chunk.
pub const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// A chunk of `len` random bytes.
pub fn random_chunk(len: usize) -> Vec<u8> {
    let mut chunk = vec![0u8; len];
    rand::thread_rng().fill(&mut chunk[..]);
    chunk
}

/// Stream `total` bytes by repeating slices of `chunk`.
///
/// Pieces are produced on demand, so at most one chunk is held beyond
/// `chunk` itself regardless of `total`.
pub fn payload_stream(chunk: Arc<Vec<u8>>, total: u64) -> ByteStream {
    let step = chunk.len().max(1) as u64;
    let pieces = (0..total.div_ceil(step)).map(move |i| {
        let len = (total - i * step).min(step) as usize;
        Ok(chunk[..len].to_vec())
    });
    stream::iter(pieces).boxed()
}

/// Send `size` megabytes of random payload to the server and time the
/// transfer.
///
/// The random chunk is generated before the clock starts. No intermediate
/// progress is reported; the phase emits a single closing event. A
/// positive speed reported by the server replaces the locally computed
/// one.
pub async fn measure_upload<T: SpeedTransport>(
    transport: &T,
    size: TestSize,
    reporter: &dyn ProgressReporter,
) -> Result<ThroughputResult, SpeedTestError> {
    info!("Starting upload test ({})", size);
    let expected = size.bytes();
    let chunk = Arc::new(random_chunk(UPLOAD_CHUNK_SIZE));
    let mut progress = PhaseProgress::new(Phase::Upload, reporter);

    let start = Instant::now();
    let receipt = transport
        .upload(size, payload_stream(chunk, expected))
        .await
        .map_err(|e| e.with_phase(Phase::Upload))?;
    let elapsed = start.elapsed();

    if let Some(received) = receipt.bytes_received {
        if received != expected {
            debug!("Server acknowledged {} of {} bytes", received, expected);
        }
    }

    let result = ThroughputResult::from_transfer(expected, elapsed)
        .with_reported_speed(receipt.speed_mbps);
    progress.finish(Some(result.speed_mbps));

    info!(
        "Upload: {:.2} Mbps ({} bytes in {:.3} s)",
        result.speed_mbps, result.bytes_transferred, result.duration_seconds
    );

    Ok(result)
}
