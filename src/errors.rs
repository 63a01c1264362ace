//! Custom error types for the speed test engine.
//!
//! This module provides user-friendly error types that wrap underlying
//! errors with clear, actionable messages. Phase-level failures carry the
//! phase they happened in so the orchestrator can record them against the
//! right slot of the session.

use std::error::Error;
use std::fmt;

use http::StatusCode;

use crate::session::Phase;

/// Exit codes for the application.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// Network error (connection failed, timeout, etc.).
    pub const NETWORK_ERROR: i32 = 1;
    /// The speed test server answered with a non-success status.
    pub const API_ERROR: i32 = 2;
    /// Configuration error (invalid arguments, missing config).
    pub const CONFIG_ERROR: i32 = 3;
    /// Partial failure (some phases failed but the run completed).
    pub const PARTIAL_FAILURE: i32 = 4;
    /// Unknown/unexpected error.
    pub const UNKNOWN_ERROR: i32 = 99;
    /// The run was interrupted with Ctrl-C.
    pub const INTERRUPTED: i32 = 130;
}

/// Categories of errors that can occur during speed testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport failure while a request or transfer was in flight.
    Network,
    /// The server returned a non-success HTTP status.
    HttpStatus,
    /// The real-time channel was not connected when it was needed.
    NotConnected,
    /// A bounded wait expired.
    Timeout,
    /// Invalid configuration or arguments.
    Config,
    /// Unknown or unexpected errors.
    Unknown,
}

impl ErrorKind {
    /// Get the exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Network => exit_codes::NETWORK_ERROR,
            ErrorKind::NotConnected => exit_codes::NETWORK_ERROR,
            ErrorKind::Timeout => exit_codes::NETWORK_ERROR,
            ErrorKind::HttpStatus => exit_codes::API_ERROR,
            ErrorKind::Config => exit_codes::CONFIG_ERROR,
            ErrorKind::Unknown => exit_codes::UNKNOWN_ERROR,
        }
    }

    /// Get a user-friendly description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Network error",
            ErrorKind::HttpStatus => "Server error",
            ErrorKind::NotConnected => "Real-time channel not connected",
            ErrorKind::Timeout => "Timed out",
            ErrorKind::Config => "Configuration error",
            ErrorKind::Unknown => "Unknown error",
        }
    }
}

/// A user-friendly error type for speed test operations.
#[derive(Debug)]
pub struct SpeedTestError {
    /// The kind of error.
    pub kind: ErrorKind,
    /// The phase this error was raised in, if any.
    pub phase: Option<Phase>,
    /// User-friendly error message.
    pub message: String,
    /// Optional suggestion for how to resolve the error.
    pub suggestion: Option<String>,
    /// The underlying error, if any.
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl SpeedTestError {
    /// Create a new SpeedTestError.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            phase: None,
            message: message.into(),
            suggestion: None,
            source: None,
        }
    }

    /// Add a suggestion for how to resolve the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add the underlying error source.
    pub fn with_source(
        mut self,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attribute the error to a phase.
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Get the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
            .with_suggestion("Check your network connection and try again.")
    }

    /// Create an HTTP status error.
    pub fn http_status(status: StatusCode) -> Self {
        Self::new(ErrorKind::HttpStatus, format!("HTTP error! status: {}", status))
            .with_suggestion(
                "The speed test server rejected the request. Check the server logs.",
            )
    }

    /// Create a not-connected error for the real-time channel.
    pub fn not_connected() -> Self {
        Self::new(ErrorKind::NotConnected, "real-time channel not connected")
            .with_suggestion(
                "The channel reconnects in the background. Start a new run shortly.",
            )
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message).with_suggestion(
            "The server may be slow or unreachable. Try again later.",
        )
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Create an error for a fault that escaped normal handling.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }
}

impl fmt::Display for SpeedTestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(phase) = self.phase {
            write!(f, "[{}] ", phase)?;
        }

        write!(f, "{}: {}", self.kind.description(), self.message)?;

        if let Some(ref suggestion) = self.suggestion {
            write!(f, "\n  Suggestion: {}", suggestion)?;
        }

        Ok(())
    }
}

impl Error for SpeedTestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

/// Classify an error into an ErrorKind based on its message.
pub fn classify_error(error: &dyn Error) -> ErrorKind {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("timeout")
        || error_str.contains("timed out")
        || error_str.contains("deadline")
    {
        return ErrorKind::Timeout;
    }

    if error_str.contains("status: 4")
        || error_str.contains("status: 5")
        || error_str.contains("http status")
    {
        return ErrorKind::HttpStatus;
    }

    if error_str.contains("connection refused")
        || error_str.contains("connection reset")
        || error_str.contains("connection closed")
        || error_str.contains("network unreachable")
        || error_str.contains("host unreachable")
        || error_str.contains("no route")
        || error_str.contains("broken pipe")
        || error_str.contains("dns")
        || error_str.contains("error sending request")
        || error_str.contains("error decoding response body")
    {
        return ErrorKind::Network;
    }

    ErrorKind::Unknown
}

/// Convert a generic error into a SpeedTestError with appropriate
/// classification.
pub fn to_speed_test_error(
    error: Box<dyn Error + Send + Sync>,
    context: &str,
) -> SpeedTestError {
    let kind = classify_error(error.as_ref());
    let message = format!("{}: {}", context, error);

    let mut speed_error = SpeedTestError::new(kind, message);
    speed_error.source = Some(error);

    match kind {
        ErrorKind::Network => speed_error
            .with_suggestion("Check your network connection and try again."),
        ErrorKind::Timeout => speed_error.with_suggestion(
            "The server may be slow or unreachable. Try again later.",
        ),
        _ => speed_error,
    }
}

/// Format an error for user display.
pub fn format_error_for_display(error: &SpeedTestError) -> String {
    let mut output = format!("Error: {}", error.message);

    if let Some(ref suggestion) = error.suggestion {
        output.push_str(&format!("\n\nSuggestion: {}", suggestion));
    }

    output
}
