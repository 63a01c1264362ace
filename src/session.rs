//! Session state for a single speed test run.
//!
//! A `Session` records the selected test size, the status of each of the
//! three phases and whatever results they produced. It is owned by the
//! orchestrator for the lifetime of a run; observers only ever see clones.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::SpeedTestError;
use crate::measurements::{LatencyResult, ThroughputResult};

/// Default test size in megabytes.
pub const DEFAULT_TEST_SIZE_MB: u64 = 100;

/// One of the three ordered measurement stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Download,
    Upload,
    Latency,
}

impl Phase {
    /// Phases in the order a run executes them.
    pub const ORDERED: [Phase; 3] = [Phase::Download, Phase::Upload, Phase::Latency];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Download => "download",
            Phase::Upload => "upload",
            Phase::Latency => "latency",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    #[default]
    Ready,
    Testing,
    Completed,
    Error,
}

impl PhaseStatus {
    /// Whether the phase has resolved, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Error)
    }

    pub fn label(&self) -> &'static str {
        match self {
            PhaseStatus::Ready => "Ready",
            PhaseStatus::Testing => "Testing...",
            PhaseStatus::Completed => "Completed",
            PhaseStatus::Error => "Error",
        }
    }
}

/// Payload size of a run in megabytes. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TestSize(u64);

impl TestSize {
    pub fn new(megabytes: u64) -> Result<Self, SpeedTestError> {
        if megabytes == 0 {
            return Err(SpeedTestError::config("test size must be at least 1 MB")
                .with_suggestion("Pass a positive value to --size."));
        }

        Ok(Self(megabytes))
    }

    pub fn megabytes(&self) -> u64 {
        self.0
    }

    /// Size in bytes (`MB * 1024 * 1024`).
    pub fn bytes(&self) -> u64 {
        self.0.saturating_mul(1024 * 1024)
    }
}

impl Default for TestSize {
    fn default() -> Self {
        Self(DEFAULT_TEST_SIZE_MB)
    }
}

impl fmt::Display for TestSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} MB", self.0)
    }
}

/// The record of one run: configuration, phase statuses and results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub size: TestSize,
    pub download_status: PhaseStatus,
    pub upload_status: PhaseStatus,
    pub latency_status: PhaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<ThroughputResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<ThroughputResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyResult>,
}

impl Session {
    pub fn new(size: TestSize) -> Self {
        Self {
            size,
            download_status: PhaseStatus::Ready,
            upload_status: PhaseStatus::Ready,
            latency_status: PhaseStatus::Ready,
            download: None,
            upload: None,
            latency: None,
        }
    }

    /// Put every phase back to `Ready` and drop all results.
    pub fn reset(&mut self, size: TestSize) {
        *self = Self::new(size);
    }

    pub fn status(&self, phase: Phase) -> PhaseStatus {
        match phase {
            Phase::Download => self.download_status,
            Phase::Upload => self.upload_status,
            Phase::Latency => self.latency_status,
        }
    }

    fn status_mut(&mut self, phase: Phase) -> &mut PhaseStatus {
        match phase {
            Phase::Download => &mut self.download_status,
            Phase::Upload => &mut self.upload_status,
            Phase::Latency => &mut self.latency_status,
        }
    }

    pub fn begin(&mut self, phase: Phase) {
        *self.status_mut(phase) = PhaseStatus::Testing;
    }

    /// Mark a phase failed. Any result it may have held is discarded.
    pub fn fail(&mut self, phase: Phase) {
        *self.status_mut(phase) = PhaseStatus::Error;
        match phase {
            Phase::Download => self.download = None,
            Phase::Upload => self.upload = None,
            Phase::Latency => self.latency = None,
        }
    }

    pub fn complete_download(&mut self, result: ThroughputResult) {
        self.download = Some(result);
        self.download_status = PhaseStatus::Completed;
    }

    pub fn complete_upload(&mut self, result: ThroughputResult) {
        self.upload = Some(result);
        self.upload_status = PhaseStatus::Completed;
    }

    pub fn complete_latency(&mut self, result: LatencyResult) {
        self.latency = Some(result);
        self.latency_status = PhaseStatus::Completed;
    }

    /// True once all three phases are `Completed` or `Error`.
    pub fn is_complete(&self) -> bool {
        Phase::ORDERED.iter().all(|phase| self.status(*phase).is_terminal())
    }

    /// True while no phase has left `Ready`.
    pub fn is_pristine(&self) -> bool {
        Phase::ORDERED
            .iter()
            .all(|phase| self.status(*phase) == PhaseStatus::Ready)
            && self.download.is_none()
            && self.upload.is_none()
            && self.latency.is_none()
    }

    /// Phases that ended in `Error`.
    pub fn failed_phases(&self) -> Vec<Phase> {
        Phase::ORDERED
            .into_iter()
            .filter(|phase| self.status(*phase) == PhaseStatus::Error)
            .collect()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(TestSize::default())
    }
}
