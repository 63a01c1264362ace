//! The measurement phases and the orchestrator that sequences them.

pub mod download;
pub mod engine;
pub mod latency;
pub mod upload;

pub use download::measure_download;
pub use engine::{EngineConfig, Orchestrator, RunSummary, StartOutcome};
pub use latency::{probe_latency, DEFAULT_LATENCY_TIMEOUT};
pub use upload::{measure_upload, UPLOAD_CHUNK_SIZE};
