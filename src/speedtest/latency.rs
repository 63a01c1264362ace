use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::{timeout_at, Instant};

use crate::channel::{ClientMessage, RealtimeChannel, ServerMessage};
use crate::errors::SpeedTestError;
use crate::measurements::LatencyResult;
use crate::report::{PhaseProgress, ProgressReporter};
use crate::session::Phase;

/// Default upper bound on how long a latency probe may take overall.
pub const DEFAULT_LATENCY_TIMEOUT: Duration = Duration::from_secs(60);

/// Ask the channel peer to run a latency probe and wait for its summary.
///
/// Fails with `NotConnected` straight away when the channel is down, and
/// with `Timeout` when no summary arrives before `limit` elapses. Progress
/// frames for other phases are ignored.
pub async fn probe_latency(
    channel: &RealtimeChannel,
    reporter: &dyn ProgressReporter,
    limit: Duration,
) -> Result<LatencyResult, SpeedTestError> {
    if !channel.is_connected() {
        return Err(SpeedTestError::not_connected().with_phase(Phase::Latency));
    }

    let stale = channel.drain_pending().await;
    if stale > 0 {
        debug!("Dropped {} stale channel messages", stale);
    }

    info!("Starting latency test");
    channel
        .send(&ClientMessage::StartTest { test_type: Phase::Latency })
        .map_err(|e| e.with_phase(Phase::Latency))?;

    let deadline = Instant::now() + limit;
    let mut progress = PhaseProgress::new(Phase::Latency, reporter);

    loop {
        let message = match timeout_at(deadline, channel.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                return Err(SpeedTestError::not_connected()
                    .with_phase(Phase::Latency));
            }
            Err(_) => {
                warn!("Latency test timed out after {:?}", limit);
                return Err(SpeedTestError::timeout(format!(
                    "no latency result within {} s",
                    limit.as_secs_f64()
                ))
                .with_phase(Phase::Latency));
            }
        };

        match message {
            ServerMessage::Progress(update) if update.phase == Phase::Latency => {
                if let Some(error) = &update.error {
                    debug!("Latency sample failed: {}", error);
                }
                progress.report(update.progress_percent, update.metric);
            }
            ServerMessage::Progress(update) => {
                debug!("Ignoring {} progress during latency test", update.phase);
            }
            ServerMessage::LatencyComplete(result) => {
                progress.finish(Some(result.avg_ms));
                info!(
                    "Latency: {:.2} ms avg, {:.2} ms jitter, {:.1}% loss",
                    result.avg_ms, result.jitter_ms, result.packet_loss_percent
                );
                return Ok(result);
            }
        }
    }
}
