//! Settlement notification dispatchers.

use crate::error::Result;
use std::future::Future;
use std::sync::Arc;

#[cfg(feature = "http-notify")]
pub mod http;

#[cfg(feature = "http-notify")]
pub use http::{HttpDispatcher, HttpDispatcherConfig};

/// Trait for delivering the one-time message sent when an invoice settles.
///
/// Delivery is at-most-once: the consumer calls `notify` once per settled
/// invoice, bounds it with `InvoiceConfig::notify_timeout`, logs failures and
/// never retries.
pub trait NotificationDispatcher: Send + Sync + 'static {
    /// Deliver `message`.
    ///
    /// # Errors
    /// Returns `Error::Notification` on transport failure.
    fn notify(&self, message: &str) -> impl Future<Output = Result<()>> + Send;
}

impl<T: NotificationDispatcher> NotificationDispatcher for Arc<T> {
    fn notify(&self, message: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).notify(message)
    }
}

/// Dispatcher that only writes the message to the log.
///
/// Useful in development and when the outbound transport lives elsewhere.
#[derive(Clone, Debug, Default)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    async fn notify(&self, message: &str) -> Result<()> {
        info!("✉ Settlement notification: {}", message);
        Ok(())
    }
}
