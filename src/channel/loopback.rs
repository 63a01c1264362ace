//! In-process counterpart for the real-time channel.
//!
//! Answers `start_test` latency requests by pinging the speed test server
//! over HTTP and streaming progress and completion frames back, exactly as
//! a remote channel peer would.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep, Instant};

use super::{ChannelProgress, ClientMessage, Connection, Connector, ServerMessage};
use crate::errors::SpeedTestError;
use crate::measurements::LatencySamples;
use crate::server::PingTransport;
use crate::session::Phase;

/// Default number of pings per probe.
pub const DEFAULT_PING_SAMPLES: usize = 10;

/// Default per-ping timeout.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between consecutive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(100);

/// Shape of one latency probe sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub samples: usize,
    pub ping_timeout: Duration,
    pub interval: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            samples: DEFAULT_PING_SAMPLES,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            interval: DEFAULT_PING_INTERVAL,
        }
    }
}

/// [`Connector`] whose peer runs in a local task.
#[derive(Debug)]
pub struct LoopbackConnector<P> {
    pinger: Arc<P>,
    config: ProbeConfig,
}

impl<P> LoopbackConnector<P> {
    pub fn new(pinger: Arc<P>, config: ProbeConfig) -> Self {
        Self { pinger, config }
    }
}

impl<P: PingTransport + 'static> Connector for LoopbackConnector<P> {
    async fn connect(
        &self,
        session_id: &str,
    ) -> Result<Connection, SpeedTestError> {
        let (client_tx, client_rx) = unbounded_channel();
        let (server_tx, server_rx) = unbounded_channel();

        debug!("Loopback peer accepted {}", session_id);
        tokio::spawn(respond(
            self.pinger.clone(),
            self.config.clone(),
            client_rx,
            server_tx,
        ));

        Ok(Connection { outbound: client_tx, inbound: server_rx })
    }
}

async fn respond<P: PingTransport>(
    pinger: Arc<P>,
    config: ProbeConfig,
    mut requests: UnboundedReceiver<String>,
    replies: UnboundedSender<String>,
) {
    while let Some(frame) = requests.recv().await {
        match ClientMessage::from_json(&frame) {
            Ok(ClientMessage::StartTest { test_type: Phase::Latency }) => {
                if let Err(e) = run_probe(&*pinger, &config, &replies).await {
                    debug!("Loopback peer stopping: {}", e);
                    return;
                }
            }
            Ok(ClientMessage::StartTest { test_type }) => {
                debug!("Loopback peer ignores {} requests", test_type);
            }
            Err(e) => warn!("{}", e),
        }
    }
}

fn push(
    replies: &UnboundedSender<String>,
    message: ServerMessage,
) -> Result<(), SpeedTestError> {
    let frame = message.to_json()?;
    replies.send(frame).map_err(|_| SpeedTestError::not_connected())
}

/// Ping `config.samples` times, reporting after each sample, then send the
/// summary.
async fn run_probe<P: PingTransport>(
    pinger: &P,
    config: &ProbeConfig,
    replies: &UnboundedSender<String>,
) -> Result<(), SpeedTestError> {
    info!("Running latency probe with {} samples", config.samples);
    let mut samples = LatencySamples::new(config.samples);

    for i in 0..config.samples {
        let start = Instant::now();
        let error = match pinger.ping(config.ping_timeout).await {
            Ok(()) => {
                let ms = samples.record_success(start.elapsed());
                debug!("Ping {}/{}: {:.2} ms", i + 1, config.samples, ms);
                None
            }
            Err(e) => {
                warn!("Ping {}/{} failed: {}", i + 1, config.samples, e);
                samples.record_failure();
                Some(e.message)
            }
        };

        let progress = ChannelProgress {
            phase: Phase::Latency,
            progress_percent: samples.progress_percent(),
            metric: if error.is_none() { samples.latest_ms() } else { None },
            sample: Some(i + 1),
            total_samples: Some(config.samples),
            error,
        };
        push(replies, ServerMessage::Progress(progress))?;

        if i + 1 < config.samples {
            sleep(config.interval).await;
        }
    }

    push(replies, ServerMessage::LatencyComplete(samples.summarize()))
}
