//! Bounded exponential backoff.
//!
//! Used by the real-time channel supervisor to space out reconnect attempts.

use std::time::Duration;

/// Default base delay between reconnect attempts (in milliseconds).
pub const DEFAULT_BASE_DELAY_MS: u64 = 3000;

/// Maximum delay cap for exponential backoff (in milliseconds).
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self { base_delay_ms, max_delay_ms }
    }

    /// Calculate the delay for a given attempt number using exponential
    /// backoff.
    ///
    /// The delay is calculated as: base_delay * 2^attempt, capped at
    /// max_delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms =
            self.base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
        let capped_delay_ms = delay_ms.min(self.max_delay_ms);
        Duration::from_millis(capped_delay_ms)
    }

    /// Start a fresh backoff sequence.
    pub fn backoff(&self) -> Backoff {
        Backoff { config: self.clone(), attempt: 0 }
    }
}

/// Stateful walk through a [`RetryConfig`]'s delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
}

impl Backoff {
    /// Delay to wait before the next attempt. Advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Go back to the base delay, e.g. after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
