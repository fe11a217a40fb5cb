//! High-level invoice service for web applications.
//!
//! Binds an [`InvoiceRegistry`] to an [`InvoiceIssuer`] so request handlers
//! only deal with fingerprints and amounts.

use crate::error::Result;
use crate::fingerprint::RequestFingerprint;
use crate::issuer::InvoiceIssuer;
use crate::record::InvoiceRecord;
use crate::registry::InvoiceRegistry;
use std::sync::Arc;

/// High-level invoice service for web applications.
///
/// Cheap to clone (two `Arc` increments), so it can sit directly in the
/// router state of whatever HTTP framework is in use.
///
/// # Example
///
/// ```ignore
/// use invoice_kit::{InvoiceConfig, InvoiceRegistry, InvoiceService, RequestFingerprint};
///
/// let registry = InvoiceRegistry::new(InvoiceConfig::from_env()?);
/// let service = InvoiceService::new(registry.clone(), LndIssuer::new(LndConfig::from_env()?)?);
///
/// // POST /pay
/// let fp = RequestFingerprint::new(zone, plate, hours);
/// let invoice = service.request_invoice(&fp, sats).await?;
///
/// // GET /check?invoice=...
/// let outstanding = service.is_live(&reference);
/// ```
pub struct InvoiceService<I: InvoiceIssuer> {
    registry: InvoiceRegistry,
    issuer: Arc<I>,
}

impl<I: InvoiceIssuer> Clone for InvoiceService<I> {
    fn clone(&self) -> Self {
        InvoiceService {
            registry: self.registry.clone(),
            issuer: Arc::clone(&self.issuer),
        }
    }
}

impl<I: InvoiceIssuer> InvoiceService<I> {
    pub fn new(registry: InvoiceRegistry, issuer: I) -> Self {
        InvoiceService {
            registry,
            issuer: Arc::new(issuer),
        }
    }

    /// Return the live invoice for `fingerprint`, asking the issuer for one
    /// worth `amount` only when none is live.
    ///
    /// `amount` is ignored when a live invoice already exists.
    ///
    /// # Errors
    ///
    /// Returns `Err` in these cases:
    /// - `Error::Issuance`: The issuer failed or returned an unusable invoice
    /// - `Error::Timeout`: The issuer exceeded `issue_timeout`
    pub async fn request_invoice(
        &self,
        fingerprint: &RequestFingerprint,
        amount: u64,
    ) -> Result<InvoiceRecord> {
        let issuer = &*self.issuer;
        self.registry
            .get_or_create(fingerprint, |fingerprint| async move {
                issuer.issue(&fingerprint, amount).await
            })
            .await
    }

    /// Whether `reference` is still outstanding.
    pub fn is_live(&self, reference: &str) -> bool {
        self.registry.is_live(reference)
    }

    pub fn registry(&self) -> &InvoiceRegistry {
        &self.registry
    }

    pub fn issuer(&self) -> &I {
        &self.issuer
    }
}
