//! Observability hooks for invoice lifecycle events.
//!
//! Implement [`InvoiceMetrics`] to forward registry and consumer events to a
//! monitoring system. Every method has a default body that logs through the
//! `log` crate, so an empty impl block already gives useful output:
//!
//! ```ignore
//! use invoice_kit::observability::InvoiceMetrics;
//!
//! struct PrometheusMetrics;
//!
//! impl InvoiceMetrics for PrometheusMetrics {
//!     fn record_issued(&self, reference: &str, duration: std::time::Duration) {
//!         // counter!("invoices_issued").inc();
//!         // histogram!("issue_latency").record(duration);
//!     }
//! }
//!
//! let registry = InvoiceRegistry::with_metrics(config, Arc::new(PrometheusMetrics));
//! ```
//!
//! Registries and consumers start with [`LogMetrics`]. Use [`NoOpMetrics`]
//! to silence them entirely.

use crate::fingerprint::RequestFingerprint;
use std::time::Duration;

/// Trait for invoice lifecycle metrics collection.
pub trait InvoiceMetrics: Send + Sync {
    /// A live invoice was returned without issuing a new one.
    fn record_hit(&self, fingerprint: &RequestFingerprint) {
        debug!("Invoice HIT: {}", fingerprint);
    }

    /// A new invoice was issued and cached.
    fn record_issued(&self, reference: &str, duration: Duration) {
        debug!("Invoice ISSUED: {} took {:?}", reference, duration);
    }

    /// The issuer failed or timed out.
    fn record_issue_error(&self, fingerprint: &RequestFingerprint, error: &str) {
        warn!("Invoice ISSUE ERROR for {}: {}", fingerprint, error);
    }

    /// A settlement event consumed a live invoice.
    fn record_settled(&self, reference: &str) {
        debug!("Invoice SETTLED: {}", reference);
    }

    /// The reaper removed an invoice whose validity window closed.
    fn record_expired(&self, reference: &str) {
        debug!("Invoice EXPIRED: {}", reference);
    }

    /// A settlement notification could not be delivered.
    fn record_notify_error(&self, reference: &str, error: &str) {
        warn!("Invoice NOTIFY ERROR for {}: {}", reference, error);
    }
}

/// Default metrics implementation, logging only.
#[derive(Clone, Default)]
pub struct LogMetrics;

impl InvoiceMetrics for LogMetrics {}

/// Metrics implementation that discards everything.
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl InvoiceMetrics for NoOpMetrics {
    fn record_hit(&self, _fingerprint: &RequestFingerprint) {}
    fn record_issued(&self, _reference: &str, _duration: Duration) {}
    fn record_issue_error(&self, _fingerprint: &RequestFingerprint, _error: &str) {}
    fn record_settled(&self, _reference: &str) {}
    fn record_expired(&self, _reference: &str) {}
    fn record_notify_error(&self, _reference: &str, _error: &str) {}
}
