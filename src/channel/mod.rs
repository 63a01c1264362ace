//! Persistent bidirectional message channel used by the latency phase.
//!
//! [`RealtimeChannel`] is the engine-facing handle. It outlives individual
//! connections: a [`supervisor`] task keeps (re)connecting through a
//! [`Connector`] and attaches each live [`Connection`] to the handle.
//! Inbound messages are queued on the handle itself, so a probe waiting on
//! the channel keeps its state across reconnects.

pub mod loopback;
pub mod messages;
pub mod supervisor;

use std::future::Future;
use std::sync::Mutex;

use log::{debug, trace};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc::{
    self, error::TryRecvError, UnboundedReceiver, UnboundedSender,
};
use tokio::sync::Notify;

use crate::errors::SpeedTestError;

pub use messages::{ChannelProgress, ClientMessage, ServerMessage};

const SESSION_ID_PREFIX: &str = "client_";
const SESSION_ID_SUFFIX_LEN: usize = 9;

/// Generate a client session identifier such as `client_k3m9x0q2a`.
pub fn generate_session_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();

    format!("{}{}", SESSION_ID_PREFIX, suffix)
}

/// One live connection, as raw JSON text frames in both directions.
#[derive(Debug)]
pub struct Connection {
    pub outbound: UnboundedSender<String>,
    pub inbound: UnboundedReceiver<String>,
}

/// Establishes connections on behalf of the supervisor.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Connection, SpeedTestError>> + Send;
}

/// Engine-facing handle to the real-time channel.
#[derive(Debug)]
pub struct RealtimeChannel {
    session_id: String,
    outbound: Mutex<Option<UnboundedSender<String>>>,
    inbound_tx: UnboundedSender<ServerMessage>,
    inbound_rx: tokio::sync::Mutex<UnboundedReceiver<ServerMessage>>,
    attached: Notify,
}

impl RealtimeChannel {
    pub fn new(session_id: impl Into<String>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Self {
            session_id: session_id.into(),
            outbound: Mutex::new(None),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            attached: Notify::new(),
        }
    }

    /// A handle with a freshly generated session id.
    pub fn with_generated_id() -> Self {
        Self::new(generate_session_id())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether a connection is currently attached and still open.
    pub fn is_connected(&self) -> bool {
        match self.outbound.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|tx| !tx.is_closed()),
            Err(_) => false,
        }
    }

    /// Make `outbound` the live connection, replacing any previous one.
    pub fn attach(&self, outbound: UnboundedSender<String>) {
        if let Ok(mut guard) = self.outbound.lock() {
            *guard = Some(outbound);
        }
        self.attached.notify_waiters();
    }

    /// Resolve once a live connection is attached.
    pub async fn wait_connected(&self) {
        loop {
            let notified = self.attached.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_connected() {
                return;
            }
            notified.await;
        }
    }

    pub fn detach(&self) {
        if let Ok(mut guard) = self.outbound.lock() {
            *guard = None;
        }
    }

    /// Queue a decoded inbound message for the engine.
    pub fn deliver(&self, message: ServerMessage) {
        trace!("channel <- {:?}", message);
        // The receiver lives as long as `self`.
        let _ = self.inbound_tx.send(message);
    }

    /// Send a message over the live connection.
    pub fn send(&self, message: &ClientMessage) -> Result<(), SpeedTestError> {
        let frame = message.to_json()?;

        let guard = self.outbound.lock().map_err(|_| {
            SpeedTestError::unknown("channel state lock poisoned")
        })?;
        let tx = guard.as_ref().ok_or_else(SpeedTestError::not_connected)?;

        debug!("channel -> {}", frame);
        tx.send(frame).map_err(|_| SpeedTestError::not_connected())
    }

    /// Wait for the next inbound message.
    pub async fn recv(&self) -> Option<ServerMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Discard messages left over from an earlier probe. Returns how many
    /// were dropped.
    pub async fn drain_pending(&self) -> usize {
        let mut rx = self.inbound_rx.lock().await;
        let mut dropped = 0;

        loop {
            match rx.try_recv() {
                Ok(_) => dropped += 1,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    break
                }
            }
        }

        dropped
    }
}
