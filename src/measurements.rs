use std::time::Duration;

use serde::Serialize;

use crate::stats::{max, mean, min, round2, std_dev};

/// Shortest duration a finished transfer is credited with. Keeps the speed
/// formula finite when a transfer completes within the clock's resolution.
pub const MIN_TRANSFER_DURATION: Duration = Duration::from_micros(1);

/// Calculate speed in Mbps from a byte count and the time it took.
///
/// Returns 0.0 when no time has elapsed.
pub fn calculate_speed_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return 0.0;
    }

    (bytes as f64 * 8.0) / (seconds * 1_000_000.0)
}

/// Percentage of `expected` that `received` represents, clamped to 100.
pub fn progress_percent(received: u64, expected: u64) -> f64 {
    if expected == 0 {
        return 100.0;
    }

    (received as f64 / expected as f64 * 100.0).min(100.0)
}

/// Outcome of one download or upload phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputResult {
    pub speed_mbps: f64,
    pub bytes_transferred: u64,
    pub duration_seconds: f64,
}

impl ThroughputResult {
    /// Build a result from the bytes moved and the wall-clock time taken.
    pub fn from_transfer(bytes: u64, elapsed: Duration) -> Self {
        let elapsed = elapsed.max(MIN_TRANSFER_DURATION);

        Self {
            speed_mbps: calculate_speed_mbps(bytes, elapsed),
            bytes_transferred: bytes,
            duration_seconds: elapsed.as_secs_f64(),
        }
    }

    /// Replace the computed speed with one reported by the server.
    pub fn with_reported_speed(mut self, speed_mbps: Option<f64>) -> Self {
        if let Some(speed) = speed_mbps.filter(|s| s.is_finite() && *s > 0.0) {
            self.speed_mbps = speed;
        }
        self
    }
}

/// Aggregate statistics of a latency probe sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyResult {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub jitter_ms: f64,
    pub packet_loss_percent: f64,
    pub successful_pings: usize,
    pub failed_pings: usize,
    pub total_samples: usize,
    pub samples: Vec<f64>,
}

/// Accumulates round-trip samples for one latency probe sequence.
#[derive(Debug, Clone, Default)]
pub struct LatencySamples {
    total: usize,
    rtts_ms: Vec<f64>,
    failed: usize,
}

impl LatencySamples {
    pub fn new(total: usize) -> Self {
        Self { total, rtts_ms: Vec::with_capacity(total), failed: 0 }
    }

    pub fn record_success(&mut self, rtt: Duration) -> f64 {
        let ms = rtt.as_secs_f64() * 1000.0;
        self.rtts_ms.push(ms);
        ms
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Number of samples taken so far, successful or not.
    pub fn taken(&self) -> usize {
        self.rtts_ms.len() + self.failed
    }

    /// Latest successful round-trip time in milliseconds.
    pub fn latest_ms(&self) -> Option<f64> {
        self.rtts_ms.last().copied()
    }

    pub fn progress_percent(&self) -> f64 {
        progress_percent(self.taken() as u64, self.total as u64)
    }

    /// Reduce the samples to min/max/avg, jitter (population standard
    /// deviation) and loss. Every figure is zero when no ping succeeded.
    pub fn summarize(&self) -> LatencyResult {
        let packet_loss_percent = if self.total > 0 {
            (self.failed as f64 / self.total as f64 * 100.0).min(100.0)
        } else {
            0.0
        };

        LatencyResult {
            avg_ms: mean(&self.rtts_ms).map(round2).unwrap_or(0.0),
            min_ms: min(&self.rtts_ms).map(round2).unwrap_or(0.0),
            max_ms: max(&self.rtts_ms).map(round2).unwrap_or(0.0),
            jitter_ms: std_dev(&self.rtts_ms).map(round2).unwrap_or(0.0),
            packet_loss_percent,
            successful_pings: self.rtts_ms.len(),
            failed_pings: self.failed,
            total_samples: self.total,
            samples: self.rtts_ms.iter().copied().map(round2).collect(),
        }
    }
}

/// Format a byte count as B/KB/MB/GB with one decimal.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.1} {}", value, UNITS[unit])
}
