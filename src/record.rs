//! Issued invoice records.

use std::time::Duration;
use tokio::time::Instant;

/// What an issuer hands back for a new invoice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedInvoice {
    /// Opaque string the payer redeems. Unique per issuance.
    pub external_reference: String,
    /// How long the invoice can be paid for.
    pub validity: Duration,
}

impl IssuedInvoice {
    pub fn new(external_reference: impl Into<String>, validity: Duration) -> Self {
        IssuedInvoice {
            external_reference: external_reference.into(),
            validity,
        }
    }
}

/// A live invoice held by the registry.
///
/// Created once per issuance and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvoiceRecord {
    external_reference: String,
    issued_at: Instant,
    expires_at: Instant,
}

impl InvoiceRecord {
    pub(crate) fn from_issued(issued: IssuedInvoice) -> Self {
        let issued_at = Instant::now();
        InvoiceRecord {
            external_reference: issued.external_reference,
            issued_at,
            expires_at: issued_at + issued.validity,
        }
    }

    pub fn external_reference(&self) -> &str {
        &self.external_reference
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// An invoice is expired from the instant its validity window closes.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time left until expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_record_expiry() {
        let record = InvoiceRecord::from_issued(IssuedInvoice::new("inv-1", Duration::from_secs(300)));
        assert_eq!(record.external_reference(), "inv-1");
        assert!(!record.is_expired());
        assert_eq!(record.remaining(), Duration::from_secs(300));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!record.is_expired());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(record.is_expired());
        assert_eq!(record.remaining(), Duration::ZERO);
    }
}
