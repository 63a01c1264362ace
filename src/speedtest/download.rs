use futures::StreamExt;
use log::{debug, info};
use tokio::time::Instant;

use crate::errors::SpeedTestError;
use crate::measurements::{
    calculate_speed_mbps, progress_percent, ThroughputResult,
};
use crate::report::{PhaseProgress, ProgressReporter};
use crate::server::SpeedTransport;
use crate::session::{Phase, TestSize};

/// Stream `size` megabytes from the server and time the transfer.
///
/// The clock starts before the request is issued. Progress is reported for
/// every chunk from the cumulative byte count.
pub async fn measure_download<T: SpeedTransport>(
    transport: &T,
    size: TestSize,
    reporter: &dyn ProgressReporter,
) -> Result<ThroughputResult, SpeedTestError> {
    info!("Starting download test ({})", size);
    let expected = size.bytes();
    let mut progress = PhaseProgress::new(Phase::Download, reporter);

    let start = Instant::now();
    let mut body = transport
        .download(size)
        .await
        .map_err(|e| e.with_phase(Phase::Download))?;

    let mut received: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| e.with_phase(Phase::Download))?;
        received = received.saturating_add(chunk.len() as u64);

        let speed = calculate_speed_mbps(received, start.elapsed());
        progress.report(progress_percent(received, expected), Some(speed));
    }

    let result = ThroughputResult::from_transfer(received, start.elapsed());
    progress.finish(Some(result.speed_mbps));

    if received != expected {
        debug!("Download delivered {} of {} expected bytes", received, expected);
    }
    info!(
        "Download: {:.2} Mbps ({} bytes in {:.3} s)",
        result.speed_mbps, result.bytes_transferred, result.duration_seconds
    );

    Ok(result)
}
