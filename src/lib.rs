//! Client-side speed test engine.
//!
//! Measures download throughput, upload throughput and latency against a
//! self-hosted speed test server, strictly one phase after the other, and
//! rates the connection from whatever succeeded.
//!
//! * [`speedtest::Orchestrator`] sequences the phases and owns the
//!   [`session::Session`].
//! * [`server::HttpTransport`] talks to the server's HTTP endpoints.
//! * [`channel::RealtimeChannel`] carries the latency probe, kept connected
//!   by [`channel::supervisor`].
//! * [`scoring::rate`] turns results into a [`scoring::Rating`].

pub mod channel;
pub mod errors;
pub mod measurements;
pub mod report;
pub mod retry;
pub mod scoring;
pub mod server;
pub mod session;
pub mod speedtest;
pub mod stats;
