//! In-memory invoice registry with single-flight issuance and TTL expiry.
//!
//! The registry guarantees at most one live invoice per
//! [`RequestFingerprint`]. Both indexes sit behind one `std::sync::Mutex` that
//! is only ever held for map reads and writes. Issuance runs outside it,
//! serialized per fingerprint by a `tokio::sync::Mutex` kept in a `DashMap`,
//! so callers for different fingerprints never wait on each other.

mod index;
mod reaper;

use crate::config::InvoiceConfig;
use crate::error::{Error, Result};
use crate::fingerprint::RequestFingerprint;
use crate::observability::{InvoiceMetrics, LogMetrics};
use crate::record::{InvoiceRecord, IssuedInvoice};
use dashmap::DashMap;
use index::{DualIndex, Insert};
use reaper::Reaper;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

type FlightLock = Arc<tokio::sync::Mutex<()>>;

/// Index plus the metrics sink; shared with the reaper task.
pub(crate) struct Store {
    index: Mutex<DualIndex>,
    metrics: Arc<dyn InvoiceMetrics>,
}

impl Store {
    fn lock(&self) -> MutexGuard<'_, DualIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reaper entry point. Returns whether anything was removed.
    pub(crate) fn evict(&self, reference: &str) -> bool {
        let removed = self.lock().remove_reference(reference);
        match removed {
            Some((fingerprint, _)) => {
                info!("⏱ Invoice {} for {} expired unpaid", reference, fingerprint);
                self.metrics.record_expired(reference);
                true
            }
            None => false,
        }
    }
}

struct Inner {
    store: Arc<Store>,
    in_flight: DashMap<RequestFingerprint, FlightLock>,
    reaper: Reaper,
    config: InvoiceConfig,
}

/// Process-wide registry of live invoices.
///
/// Cheap to clone; clones share state. Construct once at startup and hand it
/// to the HTTP layer (through [`InvoiceService`](crate::InvoiceService)) and
/// to the [`SettlementConsumer`](crate::SettlementConsumer).
///
/// Must be created from within a Tokio runtime: construction spawns the
/// reaper task.
///
/// # Example
///
/// ```no_run
/// use invoice_kit::{InvoiceConfig, InvoiceRegistry, IssuedInvoice, RequestFingerprint};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> invoice_kit::Result<()> {
///     let registry = InvoiceRegistry::new(InvoiceConfig::default());
///     let fp = RequestFingerprint::new("A1", "XY123", 2);
///
///     let record = registry
///         .get_or_create(&fp, |_| async {
///             Ok(IssuedInvoice::new("lnbc1...", Duration::from_secs(300)))
///         })
///         .await?;
///
///     assert!(registry.is_live(record.external_reference()));
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InvoiceRegistry {
    inner: Arc<Inner>,
}

impl InvoiceRegistry {
    /// Create a registry that reports through [`LogMetrics`].
    pub fn new(config: InvoiceConfig) -> Self {
        Self::with_metrics(config, Arc::new(LogMetrics))
    }

    /// Create a registry with a custom metrics sink.
    pub fn with_metrics(config: InvoiceConfig, metrics: Arc<dyn InvoiceMetrics>) -> Self {
        let store = Arc::new(Store {
            index: Mutex::new(DualIndex::default()),
            metrics,
        });
        let reaper = Reaper::spawn(Arc::clone(&store));

        InvoiceRegistry {
            inner: Arc::new(Inner {
                store,
                in_flight: DashMap::new(),
                reaper,
                config,
            }),
        }
    }

    pub fn config(&self) -> &InvoiceConfig {
        &self.inner.config
    }

    pub(crate) fn metrics(&self) -> &Arc<dyn InvoiceMetrics> {
        &self.inner.store.metrics
    }

    /// Return the live invoice for `fingerprint`, issuing one if needed.
    ///
    /// A live record is returned as is, without calling `issue`. Otherwise
    /// `issue` runs once, bounded by `issue_timeout`, while every other caller
    /// for the same fingerprint waits and then receives the same record.
    ///
    /// # Errors
    ///
    /// - Whatever `issue` returns (typically `Error::Issuance`)
    /// - `Error::Timeout`: `issue` exceeded `issue_timeout`
    /// - `Error::Issuance`: zero validity, empty or already live reference
    ///
    /// Nothing is stored when an error is returned.
    pub async fn get_or_create<F, Fut>(
        &self,
        fingerprint: &RequestFingerprint,
        issue: F,
    ) -> Result<InvoiceRecord>
    where
        F: FnOnce(RequestFingerprint) -> Fut,
        Fut: Future<Output = Result<IssuedInvoice>>,
    {
        if let Some(record) = self.live_record(fingerprint) {
            return Ok(record);
        }

        let _flight = self.enter_flight(fingerprint).await;

        // Whoever held the flight before us may have issued already.
        if let Some(record) = self.live_record(fingerprint) {
            return Ok(record);
        }

        self.issue_and_store(fingerprint, issue).await
    }

    /// Atomically remove the entry for `reference` and return its fingerprint.
    ///
    /// Returns `None` when the reference is unknown, already settled or
    /// already reaped. An entry whose validity window has closed is removed
    /// too but also reported as `None`: an expired invoice is not settled.
    pub fn resolve_and_remove(&self, reference: &str) -> Option<RequestFingerprint> {
        let removed = self.inner.store.lock().remove_reference(reference);
        let (fingerprint, record) = removed?;

        if record.is_expired() {
            debug!("Settlement for {} arrived after expiry", reference);
            self.metrics().record_expired(reference);
            return None;
        }

        self.metrics().record_settled(reference);
        Some(fingerprint)
    }

    /// Whether `reference` is still pending: issued, not settled, not expired.
    ///
    /// Unknown, settled and expired references all read as `false`.
    pub fn is_live(&self, reference: &str) -> bool {
        self.inner.store.lock().is_live(reference)
    }

    /// Number of stored records, including expired ones the reaper has not
    /// reached yet.
    pub fn len(&self) -> usize {
        self.inner.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        let index = self.inner.store.lock();
        let expired_pending = index.expired_count();
        RegistryStats {
            live: index.len() - expired_pending,
            expired_pending,
            issuing: self.inner.in_flight.len(),
        }
    }

    /// Print registry statistics to debug log.
    pub fn log_stats(&self) {
        let stats = self.stats();
        debug!(
            "Registry Stats: {} live, {} expired pending, {} issuing",
            stats.live, stats.expired_pending, stats.issuing
        );
    }

    /// Stop the reaper task.
    ///
    /// Records stay readable and expired ones still read as not live, but
    /// nothing removes them any more.
    pub fn shutdown(&self) {
        info!("Invoice registry shutting down");
        self.inner.reaper.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.reaper.is_stopped()
    }

    fn live_record(&self, fingerprint: &RequestFingerprint) -> Option<InvoiceRecord> {
        let record = self.inner.store.lock().live_record(fingerprint).cloned();
        if record.is_some() {
            debug!("✓ Invoice for {} -> HIT", fingerprint);
            self.metrics().record_hit(fingerprint);
        }
        record
    }

    async fn enter_flight(&self, fingerprint: &RequestFingerprint) -> FlightGuard<'_> {
        let lock = {
            let entry = self.inner.in_flight.entry(fingerprint.clone()).or_default();
            Arc::clone(entry.value())
        };

        FlightGuard {
            in_flight: &self.inner.in_flight,
            fingerprint: fingerprint.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn issue_and_store<F, Fut>(
        &self,
        fingerprint: &RequestFingerprint,
        issue: F,
    ) -> Result<InvoiceRecord>
    where
        F: FnOnce(RequestFingerprint) -> Fut,
        Fut: Future<Output = Result<IssuedInvoice>>,
    {
        debug!("✗ Invoice for {} -> MISS, issuing", fingerprint);
        let timer = Instant::now();
        let timeout = self.inner.config.issue_timeout;

        let issued = match tokio::time::timeout(timeout, issue(fingerprint.clone())).await {
            Ok(Ok(issued)) => issued,
            Ok(Err(e)) => return Err(self.issue_failed(fingerprint, e)),
            Err(_) => {
                let e = Error::Timeout(format!(
                    "issuing invoice for {} exceeded {:?}",
                    fingerprint, timeout
                ));
                return Err(self.issue_failed(fingerprint, e));
            }
        };

        if issued.external_reference.is_empty() {
            let e = Error::Issuance("issuer returned an empty reference".to_string());
            return Err(self.issue_failed(fingerprint, e));
        }
        if issued.validity.is_zero() {
            let e = Error::Issuance(format!(
                "issuer returned zero validity for {}",
                issued.external_reference
            ));
            return Err(self.issue_failed(fingerprint, e));
        }

        let record = InvoiceRecord::from_issued(issued);
        let inserted = self
            .inner
            .store
            .lock()
            .insert(fingerprint.clone(), record.clone());

        match inserted {
            Insert::Stored(displaced) => {
                if let Some(stale) = displaced {
                    debug!("Replaced expired invoice {} for {}", stale, fingerprint);
                    self.metrics().record_expired(&stale);
                }
            }
            Insert::DuplicateReference => {
                let e = Error::Issuance(format!(
                    "reference {} is already live",
                    record.external_reference()
                ));
                return Err(self.issue_failed(fingerprint, e));
            }
        }

        self.inner
            .reaper
            .schedule(record.external_reference().to_string(), record.expires_at());

        info!(
            "✓ Issued invoice {} for {} (valid {:?})",
            record.external_reference(),
            fingerprint,
            record.remaining()
        );
        self.metrics()
            .record_issued(record.external_reference(), timer.elapsed());

        Ok(record)
    }

    fn issue_failed(&self, fingerprint: &RequestFingerprint, error: Error) -> Error {
        self.metrics()
            .record_issue_error(fingerprint, &error.to_string());
        error
    }

    #[cfg(test)]
    fn is_mirrored(&self) -> bool {
        self.inner.store.lock().is_mirrored()
    }
}

/// Registry statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryStats {
    pub live: usize,
    pub expired_pending: usize,
    pub issuing: usize,
}

/// Holds the per-fingerprint issuance lock; drops its map entry once no other
/// caller is waiting on it.
struct FlightGuard<'a> {
    in_flight: &'a DashMap<RequestFingerprint, FlightLock>,
    fingerprint: RequestFingerprint,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.in_flight
            .remove_if(&self.fingerprint, |_, lock| Arc::strong_count(lock) == 1);
    }
}
