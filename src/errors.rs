//! Error types for measurement runs.
//!
//! Worker-level failures (one stream, one probe) never surface through these
//! types; they are logged and folded into the statistics. A `SpeedTestError`
//! only reaches the caller when orchestration itself cannot proceed.

use std::error::Error;
use std::fmt;

/// Exit codes for the binary.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// Network error (connection failed, timeout, etc.).
    pub const NETWORK_ERROR: i32 = 1;
    /// The remote endpoint answered with an error status.
    pub const HTTP_ERROR: i32 = 2;
    /// Configuration error (invalid arguments).
    pub const CONFIG_ERROR: i32 = 3;
    /// The run was interrupted or only partially completed.
    pub const PARTIAL_FAILURE: i32 = 4;
    /// The pre-flight connectivity check failed.
    pub const OFFLINE: i32 = 5;
    /// Unknown/unexpected error.
    pub const UNKNOWN_ERROR: i32 = 99;
}

/// Categories of errors that can occur during a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network connectivity issues.
    Network,
    /// DNS resolution failures.
    Dns,
    /// A request exceeded its deadline.
    Timeout,
    /// TLS/SSL handshake failures.
    Tls,
    /// The server replied with a non-success status.
    Http,
    /// Invalid configuration.
    Config,
    /// The run was cancelled by the caller.
    Cancelled,
    /// A measurement is already in progress.
    Busy,
    /// Unknown or unexpected errors.
    Unknown,
}

impl ErrorKind {
    /// Get the exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Network
            | ErrorKind::Dns
            | ErrorKind::Timeout
            | ErrorKind::Tls => exit_codes::NETWORK_ERROR,
            ErrorKind::Http => exit_codes::HTTP_ERROR,
            ErrorKind::Config => exit_codes::CONFIG_ERROR,
            ErrorKind::Cancelled | ErrorKind::Busy => {
                exit_codes::PARTIAL_FAILURE
            }
            ErrorKind::Unknown => exit_codes::UNKNOWN_ERROR,
        }
    }

    /// Get a user-friendly description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Network error",
            ErrorKind::Dns => "DNS resolution error",
            ErrorKind::Timeout => "Request timed out",
            ErrorKind::Tls => "TLS/SSL error",
            ErrorKind::Http => "HTTP error",
            ErrorKind::Config => "Configuration error",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Busy => "Measurement in progress",
            ErrorKind::Unknown => "Unknown error",
        }
    }
}

/// The error type shared by the transport and measurement layers.
#[derive(Debug)]
pub struct SpeedTestError {
    /// The kind of error.
    pub kind: ErrorKind,
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
        Self { kind, message: message.into(), suggestion: None, source: None }
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

    /// Get the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
            .with_suggestion("Check your internet connection and try again.")
    }

    /// Create an error for a non-success HTTP status.
    pub fn http_status(status: u16, url: &str) -> Self {
        Self::new(ErrorKind::Http, format!("{} returned status {}", url, status))
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn busy() -> Self {
        Self::new(ErrorKind::Busy, "a measurement is already running")
            .with_suggestion("Wait for the current run to finish.")
    }
}

impl fmt::Display for SpeedTestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
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

impl From<reqwest::Error> for SpeedTestError {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            ErrorKind::Timeout
        } else if error.is_status() {
            ErrorKind::Http
        } else if error.is_connect() {
            match classify_error(&error) {
                ErrorKind::Unknown => ErrorKind::Network,
                kind => kind,
            }
        } else {
            classify_error(&error)
        };

        let message = match error.url() {
            Some(url) => format!("request to {} failed: {}", url, error),
            None => format!("request failed: {}", error),
        };

        SpeedTestError::new(kind, message).with_source(error)
    }
}

/// Classify an error into an ErrorKind based on its message.
pub fn classify_error(error: &dyn Error) -> ErrorKind {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("dns")
        || error_str.contains("resolve")
        || error_str.contains("no such host")
    {
        return ErrorKind::Dns;
    }

    if error_str.contains("timeout")
        || error_str.contains("timed out")
        || error_str.contains("deadline")
    {
        return ErrorKind::Timeout;
    }

    if error_str.contains("tls")
        || error_str.contains("ssl")
        || error_str.contains("certificate")
        || error_str.contains("handshake")
    {
        return ErrorKind::Tls;
    }

    if error_str.contains("connection refused")
        || error_str.contains("connection reset")
        || error_str.contains("network unreachable")
        || error_str.contains("host unreachable")
        || error_str.contains("no route")
        || error_str.contains("broken pipe")
    {
        return ErrorKind::Network;
    }

    if error_str.contains("status: 4") || error_str.contains("status: 5") {
        return ErrorKind::Http;
    }

    ErrorKind::Unknown
}

/// Format an error for user display.
pub fn format_error_for_display(error: &SpeedTestError) -> String {
    let mut output = format!("Error: {}", error.message);

    if let Some(ref suggestion) = error.suggestion {
        output.push_str(&format!("\n\nSuggestion: {}", suggestion));
    }

    output
}
