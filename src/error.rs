//! Error types for the invoice registry and settlement consumer.

use std::fmt;

/// Result type for invoice operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for invoice-kit.
///
/// Issuance failures surface synchronously to whoever asked for an invoice.
/// Everything that happens on the settlement feed side has no caller to
/// report to and is only visible through logging.
#[derive(Debug, Clone)]
pub enum Error {
    /// The external issuer could not produce an invoice.
    ///
    /// Common causes:
    /// - Node unreachable or returned a non-success status
    /// - Response body could not be decoded
    /// - Issuer returned a zero validity window or a reference that is
    ///   already live
    ///
    /// **Recovery:** Nothing is cached on failure, so the caller may retry.
    Issuance(String),

    /// A single settlement feed record could not be parsed.
    ///
    /// Logged and skipped. Never terminates the stream.
    MalformedEvent(String),

    /// The feed reported an error for a record (non-null `error` field).
    ///
    /// Logged and skipped.
    UpstreamEvent(String),

    /// The feed connection could not be opened or failed at the transport
    /// level.
    ///
    /// Ends the consumer loop. The consumer does not reconnect; restarting it
    /// is left to the operator or an outer supervisor.
    StreamTermination(String),

    /// Delivering a settlement notification failed.
    ///
    /// Logged, not retried. The invoice stays consumed.
    Notification(String),

    /// An issuance or dispatch call exceeded its configured timeout.
    Timeout(String),

    /// Invalid or missing configuration.
    ///
    /// **Recovery:** Fix configuration and restart.
    ConfigError(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Issuance(msg) => write!(f, "Issuance error: {}", msg),
            Error::MalformedEvent(msg) => write!(f, "Malformed event: {}", msg),
            Error::UpstreamEvent(msg) => write!(f, "Upstream event error: {}", msg),
            Error::StreamTermination(msg) => write!(f, "Stream terminated: {}", msg),
            Error::Notification(msg) => write!(f, "Notification error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Whether this error ends the settlement consumer loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::StreamTermination(_))
    }
}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::StreamTermination(e.to_string())
        } else {
            Error::MalformedEvent(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::StreamTermination(e.to_string())
    }
}
