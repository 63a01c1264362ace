//! JSON frames exchanged over the real-time channel.
//!
//! Outbound frames look like `{"type":"start_test","test_type":"latency"}`.
//! Inbound frames are either progress envelopes
//! (`{"type":"progress","data":{...}}`) or a completion record
//! (`{"test_type":"latency","status":"completed","results":{...}}`).

use serde::{Deserialize, Serialize};

use crate::errors::SpeedTestError;
use crate::measurements::LatencyResult;
use crate::session::Phase;

/// A frame sent from the engine to the server side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StartTest { test_type: Phase },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, SpeedTestError> {
        serde_json::to_string(self).map_err(|e| {
            SpeedTestError::unknown(format!("encoding client frame: {}", e))
                .with_source(e)
        })
    }

    pub fn from_json(frame: &str) -> Result<Self, SpeedTestError> {
        serde_json::from_str(frame).map_err(|e| {
            SpeedTestError::unknown(format!("malformed client frame: {}", e))
                .with_source(e)
        })
    }
}

/// Incremental progress pushed by the server side.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelProgress {
    pub phase: Phase,
    pub progress_percent: f64,
    /// Speed in Mbps for throughput phases, latest ping in ms for latency.
    pub metric: Option<f64>,
    pub sample: Option<usize>,
    pub total_samples: Option<usize>,
    pub error: Option<String>,
}

/// A decoded frame received from the server side.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Progress(ChannelProgress),
    LatencyComplete(LatencyResult),
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<WireProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test_type: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    results: Option<WireLatencyResults>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireProgress {
    test_type: Phase,
    #[serde(default)]
    progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    speed_mbps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_ping: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sample: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_samples: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct WireLatencyResults {
    min_latency_ms: f64,
    max_latency_ms: f64,
    avg_latency_ms: f64,
    jitter_ms: f64,
    packet_loss_percent: f64,
    successful_pings: usize,
    failed_pings: usize,
    total_samples: usize,
    all_latencies: Vec<f64>,
}

impl From<WireProgress> for ChannelProgress {
    fn from(wire: WireProgress) -> Self {
        let metric = match wire.test_type {
            Phase::Latency => wire.current_ping,
            Phase::Download | Phase::Upload => wire.speed_mbps,
        };

        Self {
            phase: wire.test_type,
            progress_percent: wire.progress,
            metric,
            sample: wire.sample,
            total_samples: wire.total_samples,
            error: wire.error,
        }
    }
}

impl From<&ChannelProgress> for WireProgress {
    fn from(progress: &ChannelProgress) -> Self {
        let (speed_mbps, current_ping) = match progress.phase {
            Phase::Latency => (None, progress.metric),
            Phase::Download | Phase::Upload => (progress.metric, None),
        };

        Self {
            test_type: progress.phase,
            progress: progress.progress_percent,
            speed_mbps,
            current_ping,
            sample: progress.sample,
            total_samples: progress.total_samples,
            error: progress.error.clone(),
        }
    }
}

impl From<WireLatencyResults> for LatencyResult {
    fn from(wire: WireLatencyResults) -> Self {
        Self {
            avg_ms: wire.avg_latency_ms,
            min_ms: wire.min_latency_ms,
            max_ms: wire.max_latency_ms,
            jitter_ms: wire.jitter_ms,
            packet_loss_percent: wire.packet_loss_percent,
            successful_pings: wire.successful_pings,
            failed_pings: wire.failed_pings,
            total_samples: wire.total_samples,
            samples: wire.all_latencies,
        }
    }
}

impl From<&LatencyResult> for WireLatencyResults {
    fn from(result: &LatencyResult) -> Self {
        Self {
            min_latency_ms: result.min_ms,
            max_latency_ms: result.max_ms,
            avg_latency_ms: result.avg_ms,
            jitter_ms: result.jitter_ms,
            packet_loss_percent: result.packet_loss_percent,
            successful_pings: result.successful_pings,
            failed_pings: result.failed_pings,
            total_samples: result.total_samples,
            all_latencies: result.samples.clone(),
        }
    }
}

impl ServerMessage {
    /// Decode one inbound frame.
    ///
    /// Returns `Ok(None)` for well-formed frames the engine has no use for,
    /// such as completion records of other phases.
    pub fn from_json(frame: &str) -> Result<Option<Self>, SpeedTestError> {
        let wire: WireFrame = serde_json::from_str(frame).map_err(|e| {
            SpeedTestError::unknown(format!("malformed server frame: {}", e))
                .with_source(e)
        })?;

        if wire.kind.as_deref() == Some("progress") {
            return Ok(wire.data.map(|d| ServerMessage::Progress(d.into())));
        }

        let completed = wire.status.as_deref() == Some("completed");
        match (wire.test_type, completed, wire.results) {
            (Some(Phase::Latency), true, Some(results)) => {
                Ok(Some(ServerMessage::LatencyComplete(results.into())))
            }
            _ => Ok(None),
        }
    }

    pub fn to_json(&self) -> Result<String, SpeedTestError> {
        let wire = match self {
            ServerMessage::Progress(progress) => WireFrame {
                kind: Some("progress".to_string()),
                data: Some(progress.into()),
                test_type: None,
                status: None,
                results: None,
            },
            ServerMessage::LatencyComplete(result) => WireFrame {
                kind: None,
                data: None,
                test_type: Some(Phase::Latency),
                status: Some("completed".to_string()),
                results: Some(result.into()),
            },
        };

        serde_json::to_string(&wire).map_err(|e| {
            SpeedTestError::unknown(format!("encoding server frame: {}", e))
                .with_source(e)
        })
    }
}
