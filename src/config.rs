//! Runtime configuration for the registry and settlement consumer.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default bound on a single issuance call.
pub const DEFAULT_ISSUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a single notification dispatch.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default cap on a single settlement feed record, newline included.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 64 * 1024;

/// Timeouts applied to the blocking collaborator calls, plus the feed record
/// size limit.
///
/// # Example
///
/// ```
/// use invoice_kit::InvoiceConfig;
/// use std::time::Duration;
///
/// let config = InvoiceConfig::default()
///     .with_issue_timeout(Duration::from_secs(2))
///     .with_notify_timeout(Duration::from_secs(10));
/// assert_eq!(config.issue_timeout, Duration::from_secs(2));
/// ```
#[derive(Clone, Debug)]
pub struct InvoiceConfig {
    /// Upper bound for `InvoiceIssuer::issue`. Exceeding it fails the
    /// `get_or_create` call with `Error::Timeout` and caches nothing.
    pub issue_timeout: Duration,

    /// Upper bound for `NotificationDispatcher::notify`. Exceeding it is
    /// logged like any other notification failure.
    pub notify_timeout: Duration,

    /// Longest feed record the consumer buffers. A longer record is counted
    /// as malformed and skipped up to its terminating newline.
    pub max_record_bytes: usize,
}

impl Default for InvoiceConfig {
    fn default() -> Self {
        InvoiceConfig {
            issue_timeout: DEFAULT_ISSUE_TIMEOUT,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

impl InvoiceConfig {
    pub fn with_issue_timeout(mut self, timeout: Duration) -> Self {
        self.issue_timeout = timeout;
        self
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub fn with_max_record_bytes(mut self, max: usize) -> Self {
        self.max_record_bytes = max;
        self
    }

    /// Build from `INVOICE_ISSUE_TIMEOUT_SECS` and
    /// `INVOICE_NOTIFY_TIMEOUT_SECS`, falling back to the defaults.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if a variable is set but is not a
    /// positive integer.
    pub fn from_env() -> Result<Self> {
        let mut config = InvoiceConfig::default();
        if let Some(secs) = env_secs("INVOICE_ISSUE_TIMEOUT_SECS")? {
            config.issue_timeout = secs;
        }
        if let Some(secs) = env_secs("INVOICE_NOTIFY_TIMEOUT_SECS")? {
            config.notify_timeout = secs;
        }
        Ok(config)
    }
}

/// Read a whole number of seconds from the environment.
pub(crate) fn env_secs(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => parse_secs(name, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_secs(name: &str, raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(Error::ConfigError(format!(
            "{} must be a positive number of seconds, got '{}'",
            name, raw
        ))),
        Ok(secs) => Ok(Duration::from_secs(secs)),
    }
}
