//! Keeps the real-time channel connected.

use std::sync::Arc;

use log::{debug, info, trace, warn};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::{Connection, Connector, RealtimeChannel, ServerMessage};
use crate::retry::RetryConfig;

/// Background task owning the connect/reconnect loop. Aborted on drop.
#[derive(Debug)]
pub struct Supervisor {
    handle: JoinHandle<()>,
}

impl Supervisor {
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn the supervisor loop for `channel`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_supervisor<C: Connector>(
    connector: C,
    channel: Arc<RealtimeChannel>,
    retry: RetryConfig,
) -> Supervisor {
    let handle = tokio::spawn(supervise(connector, channel, retry));
    Supervisor { handle }
}

async fn supervise<C: Connector>(
    connector: C,
    channel: Arc<RealtimeChannel>,
    retry: RetryConfig,
) {
    let mut backoff = retry.backoff();

    loop {
        match connector.connect(channel.session_id()).await {
            Ok(connection) => {
                backoff.reset();
                info!("Real-time channel connected as {}", channel.session_id());
                pump(connection, &channel).await;
                channel.detach();
                warn!("Real-time channel disconnected");
            }
            Err(e) => {
                warn!(
                    "Real-time channel connect failed (attempt {}): {}",
                    backoff.attempts() + 1,
                    e
                );
            }
        }

        let delay = backoff.next_delay();
        debug!("Reconnecting in {:?}", delay);
        sleep(delay).await;
    }
}

/// Forward decoded frames to `channel` until the connection closes.
async fn pump(connection: Connection, channel: &RealtimeChannel) {
    let Connection { outbound, mut inbound } = connection;
    channel.attach(outbound);

    while let Some(frame) = inbound.recv().await {
        match ServerMessage::from_json(&frame) {
            Ok(Some(message)) => channel.deliver(message),
            Ok(None) => trace!("Ignoring frame: {}", frame),
            Err(e) => warn!("{}", e),
        }
    }
}
