//! HTTP notification dispatcher for SMS gateways.

use super::NotificationDispatcher;
use crate::config::env_secs;
use crate::error::{Error, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// Configuration for [`HttpDispatcher`].
#[derive(Clone, Debug)]
pub struct HttpDispatcherConfig {
    /// Full URL the message is `POST`ed to.
    pub endpoint: String,
    /// Recipient number passed through to the gateway.
    pub number: String,
    pub timeout: Duration,
}

impl HttpDispatcherConfig {
    pub fn new(endpoint: impl Into<String>, number: impl Into<String>) -> Self {
        HttpDispatcherConfig {
            endpoint: endpoint.into(),
            number: number.into(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Build from `SMS_SERVER`, `SMS_NUMBER` and optionally
    /// `SMS_TIMEOUT_SECS`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if a required variable is missing.
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("SMS_SERVER")
            .map_err(|_| Error::ConfigError("SMS_SERVER environment variable is required".to_string()))?;
        let number = std::env::var("SMS_NUMBER")
            .map_err(|_| Error::ConfigError("SMS_NUMBER environment variable is required".to_string()))?;

        let mut config = HttpDispatcherConfig::new(endpoint, number);
        if let Some(timeout) = env_secs("SMS_TIMEOUT_SECS")? {
            config.timeout = timeout;
        }
        Ok(config)
    }
}

#[derive(Serialize)]
struct SmsRequest<'a> {
    number: &'a str,
    content: &'a str,
}

/// Posts `{"number": ..., "content": ...}` JSON to an SMS gateway.
#[derive(Clone)]
pub struct HttpDispatcher {
    config: HttpDispatcherConfig,
    client: Client,
}

impl HttpDispatcher {
    /// # Errors
    /// Returns `Error::ConfigError` if the HTTP client cannot be built.
    pub fn new(config: HttpDispatcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(HttpDispatcher { config, client })
    }
}

impl NotificationDispatcher for HttpDispatcher {
    async fn notify(&self, message: &str) -> Result<()> {
        let body = SmsRequest {
            number: &self.config.number,
            content: message,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("SMS gateway unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Notification(format!(
                "SMS gateway returned {}",
                response.status()
            )));
        }

        debug!("✓ SMS sent to {}", self.config.number);
        Ok(())
    }
}
