//! Settlement feed records.
//!
//! The feed is newline-delimited JSON. Two shapes are accepted:
//!
//! ```text
//! {"result": {"payment_request": "lnbc1...", "state": "SETTLED"}, "error": null}
//! {"externalReference": "inv-1", "state": "settled"}
//! ```
//!
//! The first is what LND's `/v1/invoices/subscribe` streams. A record with a
//! non-null `error` is an upstream error regardless of shape.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;

/// One invoice state change observed on the feed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SettlementEvent {
    #[serde(alias = "externalReference", alias = "payment_request")]
    pub external_reference: String,
    pub state: String,
}

impl SettlementEvent {
    pub fn new(external_reference: impl Into<String>, state: impl Into<String>) -> Self {
        SettlementEvent {
            external_reference: external_reference.into(),
            state: state.into(),
        }
    }

    /// `SETTLED` from LND, `settled` elsewhere.
    pub fn is_settled(&self) -> bool {
        self.state.eq_ignore_ascii_case("settled")
    }
}

/// Parse one feed record.
///
/// Returns `Ok(None)` for a blank line.
///
/// # Errors
///
/// - `Error::MalformedEvent`: not JSON, not an object, or missing fields
/// - `Error::UpstreamEvent`: the record carries a non-null `error`
pub fn parse_line(line: &[u8]) -> Result<Option<SettlementEvent>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let value: Value = serde_json::from_slice(line)?;
    let mut fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(Error::MalformedEvent(format!(
                "expected a JSON object, got {}",
                other
            )))
        }
    };

    match fields.remove("error") {
        None | Some(Value::Null) => {}
        Some(upstream) => return Err(Error::UpstreamEvent(upstream.to_string())),
    }

    let event = match fields.remove("result") {
        Some(result) => SettlementEvent::deserialize(result)?,
        None => SettlementEvent::deserialize(Value::Object(fields))?,
    };

    Ok(Some(event))
}
