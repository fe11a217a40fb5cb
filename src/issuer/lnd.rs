//! LND REST invoice issuer.

use super::InvoiceIssuer;
use crate::config::env_secs;
use crate::error::{Error, Result};
use crate::fingerprint::RequestFingerprint;
use crate::record::IssuedInvoice;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const INVOICES_PATH: &str = "/v1/invoices";

/// Invoice expiry LND is asked for unless configured otherwise.
const DEFAULT_EXPIRY: Duration = Duration::from_secs(300);

/// Connection settings for an LND node's REST API.
///
/// Shared by [`LndIssuer`] and the settlement feed's `LndFeedConnector`.
#[derive(Clone, Debug)]
pub struct LndConfig {
    /// `host:port` of the REST listener.
    pub address: String,
    pub macaroon_hex: String,
    /// Validity requested for every invoice.
    pub expiry: Duration,
    /// Bound on each issuance request, and on connecting to the feed.
    pub timeout: Duration,
    /// LND ships a self-signed certificate by default.
    pub accept_invalid_certs: bool,
    /// `false` talks plain HTTP, for a TLS-terminating proxy in front of the
    /// node.
    pub tls: bool,
}

impl LndConfig {
    pub fn new(address: impl Into<String>, macaroon_hex: impl Into<String>) -> Self {
        LndConfig {
            address: address.into(),
            macaroon_hex: macaroon_hex.into(),
            expiry: DEFAULT_EXPIRY,
            timeout: Duration::from_secs(5),
            accept_invalid_certs: true,
            tls: true,
        }
    }

    /// Build from `LND_ADDRESS`, `LND_MACAROON_PATH`, and optionally
    /// `LND_INVOICE_EXPIRY_SECS` and `LND_TIMEOUT_SECS`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if a variable is missing or the macaroon
    /// file cannot be read.
    pub fn from_env() -> Result<Self> {
        let address = std::env::var("LND_ADDRESS")
            .map_err(|_| Error::ConfigError("LND_ADDRESS environment variable is required".to_string()))?;
        let path = std::env::var("LND_MACAROON_PATH").map_err(|_| {
            Error::ConfigError("LND_MACAROON_PATH environment variable is required".to_string())
        })?;
        let macaroon = std::fs::read(&path).map_err(|e| {
            Error::ConfigError(format!("Failed to read macaroon file {}: {}", path, e))
        })?;

        let mut config = LndConfig::new(address, hex::encode(macaroon));
        if let Some(expiry) = env_secs("LND_INVOICE_EXPIRY_SECS")? {
            config.expiry = expiry;
        }
        if let Some(timeout) = env_secs("LND_TIMEOUT_SECS")? {
            config.timeout = timeout;
        }
        Ok(config)
    }

    pub(crate) fn url(&self, path: &str) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}{}", scheme, self.address, path)
    }

    /// Client builder carrying the macaroon header and certificate policy.
    ///
    /// No overall request timeout is set: the feed response never ends.
    pub(crate) fn client_builder(&self) -> Result<ClientBuilder> {
        let mut headers = HeaderMap::with_capacity(1);
        let macaroon = HeaderValue::from_str(&self.macaroon_hex)
            .map_err(|e| Error::ConfigError(format!("Invalid macaroon: {}", e)))?;
        headers.insert("Grpc-Metadata-macaroon", macaroon);

        Ok(Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(self.accept_invalid_certs))
    }
}

#[derive(Serialize)]
struct AddInvoiceRequest<'a> {
    value: u64,
    expiry: u64,
    memo: &'a str,
}

#[derive(Deserialize)]
struct AddInvoiceResponse {
    payment_request: String,
}

/// Issues Lightning invoices through LND's REST API.
///
/// The BOLT11 `payment_request` is the external reference, which is also what
/// LND's invoice subscription reports back on settlement.
#[derive(Clone)]
pub struct LndIssuer {
    config: LndConfig,
    client: Client,
}

impl LndIssuer {
    /// # Errors
    /// Returns `Error::ConfigError` if the macaroon is not a valid header
    /// value or the HTTP client cannot be built.
    pub fn new(config: LndConfig) -> Result<Self> {
        let client = config
            .client_builder()?
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build LND client: {}", e)))?;

        info!("✓ LND issuer initialized: {}", config.address);
        Ok(LndIssuer { config, client })
    }
}

impl InvoiceIssuer for LndIssuer {
    async fn issue(&self, fingerprint: &RequestFingerprint, amount: u64) -> Result<IssuedInvoice> {
        let memo = fingerprint.message();
        let body = AddInvoiceRequest {
            value: amount,
            expiry: self.config.expiry.as_secs(),
            memo: &memo,
        };

        let response = self
            .client
            .post(self.config.url(INVOICES_PATH))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Issuance(format!("LND request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Issuance(format!("LND returned {}: {}", status, message)));
        }

        let invoice: AddInvoiceResponse = response
            .json()
            .await
            .map_err(|e| Error::Issuance(format!("Invalid LND response: {}", e)))?;

        debug!("LND issued {} sats for {}", amount, fingerprint);
        Ok(IssuedInvoice::new(invoice.payment_request, self.config.expiry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoices_url() {
        let mut config = LndConfig::new("node.local:8080", "0201");
        assert_eq!(config.url(INVOICES_PATH), "https://node.local:8080/v1/invoices");
        assert_eq!(config.expiry, Duration::from_secs(300));

        config.tls = false;
        assert_eq!(config.url(INVOICES_PATH), "http://node.local:8080/v1/invoices");
    }

    #[test]
    fn test_request_body() {
        let body = AddInvoiceRequest {
            value: 1_500,
            expiry: 300,
            memo: "A1 XY123 2",
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"value": 1500, "expiry": 300, "memo": "A1 XY123 2"})
        );
    }

    #[test]
    fn test_invalid_macaroon_rejected() {
        let result = LndIssuer::new(LndConfig::new("node.local:8080", "bad\nvalue"));
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }
}
