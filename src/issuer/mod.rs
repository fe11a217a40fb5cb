//! Invoice issuer collaborators.

use crate::error::Result;
use crate::fingerprint::RequestFingerprint;
use crate::record::IssuedInvoice;
use std::future::Future;

#[cfg(feature = "lnd")]
pub mod lnd;

#[cfg(feature = "lnd")]
pub use lnd::{LndConfig, LndIssuer};

/// Trait for services that mint payment requests.
///
/// Implementations: LND REST (feature `lnd`), test stubs, etc.
///
/// **IMPORTANT:** `issue` may block on network I/O. The registry bounds it
/// with `InvoiceConfig::issue_timeout` and never calls it while holding its
/// map lock.
pub trait InvoiceIssuer: Send + Sync {
    /// Mint a new payment request for `fingerprint` worth `amount` (in the
    /// issuer's base unit, satoshis for Lightning).
    ///
    /// # Errors
    /// Returns `Error::Issuance` on network or remote-service failure.
    fn issue(
        &self,
        fingerprint: &RequestFingerprint,
        amount: u64,
    ) -> impl Future<Output = Result<IssuedInvoice>> + Send;
}

impl<T: InvoiceIssuer> InvoiceIssuer for std::sync::Arc<T> {
    fn issue(
        &self,
        fingerprint: &RequestFingerprint,
        amount: u64,
    ) -> impl Future<Output = Result<IssuedInvoice>> + Send {
        (**self).issue(fingerprint, amount)
    }
}
