//! Composite keys identifying a billable request.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite key identifying a billable request.
///
/// Two requests with identical fields are the same billable request and must
/// never have two invoices live at once. For parking this is zone, plate and
/// hours.
///
/// # Example
///
/// ```
/// use invoice_kit::RequestFingerprint;
///
/// let fp = RequestFingerprint::new("A1", "XY123", 2);
/// assert_eq!(fp.to_string(), "A1:XY123:2");
/// assert_eq!(fp.message(), "A1 XY123 2");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestFingerprint {
    category: String,
    subject: String,
    quantity: i64,
}

impl RequestFingerprint {
    pub fn new(category: impl Into<String>, subject: impl Into<String>, quantity: i64) -> Self {
        RequestFingerprint {
            category: category.into(),
            subject: subject.into(),
            quantity,
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    /// Human-readable notification text sent once the invoice settles.
    pub fn message(&self) -> String {
        format!("{} {} {}", self.category, self.subject, self.quantity)
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.category, self.subject, self.quantity)
    }
}
