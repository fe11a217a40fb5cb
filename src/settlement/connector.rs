//! Opening the settlement feed.

use crate::error::{Error, Result};
use std::future::Future;
use tokio::io::AsyncBufRead;

#[cfg(feature = "lnd")]
pub use self::lnd::{FeedBody, LndFeedConnector, LND_SUBSCRIBE_PATH};

/// Produces the byte stream the consumer reads events from.
///
/// Called once per consumer run; the consumer never reconnects.
pub trait FeedConnector: Send {
    type Stream: AsyncBufRead + Unpin + Send;

    /// Open the feed.
    ///
    /// # Errors
    /// Returns `Error::StreamTermination` if the feed cannot be opened.
    fn connect(&mut self) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// Hands out a reader that is already open. A second `connect` fails.
///
/// Useful for tests, replaying captured feeds, or reading from stdin.
pub struct ReaderConnector<R> {
    reader: Option<R>,
}

impl<R> ReaderConnector<R> {
    pub fn new(reader: R) -> Self {
        ReaderConnector {
            reader: Some(reader),
        }
    }
}

impl<R: AsyncBufRead + Unpin + Send> FeedConnector for ReaderConnector<R> {
    type Stream = R;

    async fn connect(&mut self) -> Result<R> {
        self.reader
            .take()
            .ok_or_else(|| Error::StreamTermination("feed reader already consumed".to_string()))
    }
}

#[cfg(feature = "lnd")]
mod lnd {
    use super::FeedConnector;
    use crate::error::{Error, Result};
    use crate::issuer::LndConfig;
    use futures::TryStreamExt;
    use reqwest::header::ACCEPT;
    use reqwest::Client;
    use std::io;
    use std::pin::Pin;
    use tokio::io::AsyncBufRead;
    use tokio_util::io::StreamReader;

    /// Path LND streams invoice updates on.
    pub const LND_SUBSCRIBE_PATH: &str = "/v1/invoices/subscribe";

    /// Body of an open subscription, read line by line by the consumer.
    pub type FeedBody = Pin<Box<dyn AsyncBufRead + Send>>;

    /// Subscribes to LND's invoice stream over its REST API.
    ///
    /// Uses the same node settings as [`LndIssuer`](crate::issuer::LndIssuer):
    /// macaroon header, self-signed certificate policy, TLS. Only connecting
    /// is bounded by `LndConfig::timeout`; the open stream has no deadline.
    pub struct LndFeedConnector {
        config: LndConfig,
        client: Client,
    }

    impl LndFeedConnector {
        /// # Errors
        /// Returns `Error::ConfigError` if the macaroon is not a valid header
        /// value or the HTTP client cannot be built.
        pub fn new(config: LndConfig) -> Result<Self> {
            let client = config
                .client_builder()?
                .connect_timeout(config.timeout)
                .build()
                .map_err(|e| Error::ConfigError(format!("Failed to build LND feed client: {}", e)))?;
            Ok(LndFeedConnector { config, client })
        }
    }

    impl FeedConnector for LndFeedConnector {
        type Stream = FeedBody;

        async fn connect(&mut self) -> Result<FeedBody> {
            let url = self.config.url(LND_SUBSCRIBE_PATH);
            let response = self
                .client
                .get(&url)
                .header(ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| Error::StreamTermination(format!("subscribing to {}: {}", url, e)))?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(Error::StreamTermination(format!(
                    "feed refused subscription: {} {}",
                    status,
                    message.trim()
                )));
            }

            info!("✓ Settlement feed connected: {}", url);
            let body = response.bytes_stream().map_err(io::Error::other);
            Ok(Box::pin(StreamReader::new(body)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_connector_single_use() {
        let mut connector = ReaderConnector::new(&b"{}\n"[..]);
        assert!(connector.connect().await.is_ok());
        assert!(matches!(
            connector.connect().await,
            Err(Error::StreamTermination(_))
        ));
    }
}
