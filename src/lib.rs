//! # invoice-kit
//!
//! Deduplicating invoice registry with TTL expiry and an at-most-once
//! settlement stream consumer.
//!
//! ## Features
//!
//! - **Deduplicated issuance:** At most one live invoice per request
//!   fingerprint, and at most one issuance in flight per fingerprint
//! - **TTL expiry:** One reaper task per registry, fire-once per invoice
//! - **At-most-once notification:** Settlement and expiry race through one
//!   atomic remove, so each settled invoice notifies exactly once
//! - **Collaborator agnostic:** Bring your own issuer and dispatcher, or
//!   use the `lnd` (default) and `http-notify` features
//!
//! ## Quick Start
//!
//! ```ignore
//! use invoice_kit::{
//!     InvoiceConfig, InvoiceRegistry, InvoiceService, RequestFingerprint, SettlementConsumer,
//!     issuer::{LndConfig, LndIssuer},
//!     notify::LogDispatcher,
//!     settlement::LndFeedConnector,
//! };
//!
//! // 1. One registry per process, created at startup
//! let registry = InvoiceRegistry::new(InvoiceConfig::from_env()?);
//!
//! // 2. Issuing side, shared with request handlers
//! let lnd = LndConfig::from_env()?;
//! let service = InvoiceService::new(registry.clone(), LndIssuer::new(lnd.clone())?);
//!
//! // 3. Settlement side, one long-lived task
//! let consumer = SettlementConsumer::new(registry.clone(), LogDispatcher);
//! let feed = consumer.spawn(LndFeedConnector::new(lnd)?);
//!
//! // 4. In a handler
//! let fp = RequestFingerprint::new("A1", "XY123", 2);
//! let invoice = service.request_invoice(&fp, 1_500).await?;
//! let outstanding = service.is_live(invoice.external_reference());
//! ```

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod issuer;
pub mod notify;
pub mod observability;
pub mod record;
pub mod registry;
pub mod service;
pub mod settlement;

// Re-exports for convenience
pub use config::InvoiceConfig;
pub use error::{Error, Result};
pub use fingerprint::RequestFingerprint;
pub use issuer::InvoiceIssuer;
pub use notify::NotificationDispatcher;
pub use record::{InvoiceRecord, IssuedInvoice};
pub use registry::{InvoiceRegistry, RegistryStats};
pub use service::InvoiceService;
pub use settlement::{ConsumerReport, ConsumerState, SettlementConsumer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
