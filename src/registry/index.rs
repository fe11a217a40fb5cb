//! Forward and reverse invoice indexes kept as mirror images.

use crate::fingerprint::RequestFingerprint;
use crate::record::InvoiceRecord;
use std::collections::HashMap;

/// Outcome of storing a freshly issued record.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Insert {
    /// Stored. Carries the reference of an expired record it displaced, if any.
    Stored(Option<String>),
    /// Another live or pending record already owns this reference.
    DuplicateReference,
}

/// `fingerprint -> record` and `reference -> fingerprint`.
///
/// Invariant: `forward[f].external_reference == r` iff `reverse[r] == f`.
/// Only the methods below touch the maps, and each leaves them mirrored.
#[derive(Default)]
pub(crate) struct DualIndex {
    forward: HashMap<RequestFingerprint, InvoiceRecord>,
    reverse: HashMap<String, RequestFingerprint>,
}

impl DualIndex {
    /// Record for `fingerprint` if it has not expired yet.
    pub(crate) fn live_record(&self, fingerprint: &RequestFingerprint) -> Option<&InvoiceRecord> {
        self.forward
            .get(fingerprint)
            .filter(|record| !record.is_expired())
    }

    pub(crate) fn is_live(&self, reference: &str) -> bool {
        self.reverse
            .get(reference)
            .and_then(|fingerprint| self.forward.get(fingerprint))
            .is_some_and(|record| record.external_reference() == reference && !record.is_expired())
    }

    pub(crate) fn insert(&mut self, fingerprint: RequestFingerprint, record: InvoiceRecord) -> Insert {
        if self.reverse.contains_key(record.external_reference()) {
            return Insert::DuplicateReference;
        }

        let reference = record.external_reference().to_string();
        let displaced = self
            .forward
            .insert(fingerprint.clone(), record)
            .map(|stale| {
                self.reverse.remove(stale.external_reference());
                stale.external_reference().to_string()
            });
        self.reverse.insert(reference, fingerprint);

        Insert::Stored(displaced)
    }

    /// Remove the entry owning `reference`, whatever its expiry.
    ///
    /// The forward entry is only dropped when it still carries `reference`,
    /// so a stale reference can never take out a newer issuance.
    pub(crate) fn remove_reference(
        &mut self,
        reference: &str,
    ) -> Option<(RequestFingerprint, InvoiceRecord)> {
        let fingerprint = self.reverse.remove(reference)?;

        let owned = self
            .forward
            .get(&fingerprint)
            .is_some_and(|record| record.external_reference() == reference);

        if !owned {
            warn!(
                "⚠ Reverse index held {} for {} without a matching record",
                reference, fingerprint
            );
            return None;
        }

        self.forward
            .remove(&fingerprint)
            .map(|record| (fingerprint, record))
    }

    pub(crate) fn len(&self) -> usize {
        self.forward.len()
    }

    pub(crate) fn expired_count(&self) -> usize {
        self.forward.values().filter(|r| r.is_expired()).count()
    }

    #[cfg(test)]
    pub(crate) fn is_mirrored(&self) -> bool {
        self.forward.len() == self.reverse.len()
            && self.forward.iter().all(|(fingerprint, record)| {
                self.reverse.get(record.external_reference()) == Some(fingerprint)
            })
    }
}
