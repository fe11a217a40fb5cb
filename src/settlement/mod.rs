//! Settlement stream consumer.
//!
//! Reads one long-lived feed of invoice state changes, resolves settled
//! references through the [`InvoiceRegistry`] and sends exactly one
//! notification per settled invoice.
//!
//! ```text
//! Connecting ──connect ok──▶ Streaming ──EOF / stop / transport error──▶ Closed
//!      │                                                                ▲
//!      └──────────────────────────connect failed────────────────────────┘
//! ```
//!
//! Malformed records and upstream error records are logged and skipped.
//! A transport failure ends the loop with `Error::StreamTermination`; the
//! consumer does not reconnect.

pub mod connector;
pub mod event;

pub use connector::{FeedConnector, ReaderConnector};

#[cfg(feature = "lnd")]
pub use connector::{FeedBody, LndFeedConnector, LND_SUBSCRIBE_PATH};
pub use event::SettlementEvent;

use crate::error::{Error, Result};
use crate::notify::NotificationDispatcher;
use crate::registry::InvoiceRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Where the consumer is in its single-connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerState {
    Connecting,
    Streaming,
    Closed,
}

/// Counters for one consumer run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Well-formed events read, settled or not.
    pub events: u64,
    /// Settled events that resolved a live invoice.
    pub settled: u64,
    pub notified: u64,
    pub notify_failures: u64,
    pub malformed: u64,
    pub upstream_errors: u64,
}

type Dispatch = (String, Result<()>);

/// Consumes a settlement feed on behalf of one registry.
///
/// # Example
///
/// ```ignore
/// use invoice_kit::issuer::LndConfig;
/// use invoice_kit::notify::LogDispatcher;
/// use invoice_kit::settlement::LndFeedConnector;
/// use invoice_kit::{InvoiceConfig, InvoiceRegistry, SettlementConsumer};
///
/// #[tokio::main]
/// async fn main() -> invoice_kit::Result<()> {
///     let registry = InvoiceRegistry::new(InvoiceConfig::default());
///     let consumer = SettlementConsumer::new(registry.clone(), LogDispatcher);
///     let stop = consumer.stop_token();
///
///     let connector = LndFeedConnector::new(LndConfig::from_env()?)?;
///     let handle = consumer.spawn(connector);
///
///     // ... on shutdown
///     stop.cancel();
///     let report = handle.await.expect("consumer task panicked")?;
///     println!("{:?}", report);
///     Ok(())
/// }
/// ```
pub struct SettlementConsumer<D: NotificationDispatcher> {
    registry: InvoiceRegistry,
    dispatcher: Arc<D>,
    notify_timeout: Duration,
    max_record_bytes: usize,
    shutdown: CancellationToken,
    state: watch::Sender<ConsumerState>,
}

impl<D: NotificationDispatcher> SettlementConsumer<D> {
    /// Notifications are bounded by the registry's `notify_timeout` and feed
    /// records by its `max_record_bytes`.
    pub fn new(registry: InvoiceRegistry, dispatcher: D) -> Self {
        let notify_timeout = registry.config().notify_timeout;
        let max_record_bytes = registry.config().max_record_bytes;
        let (state, _) = watch::channel(ConsumerState::Connecting);

        SettlementConsumer {
            registry,
            dispatcher: Arc::new(dispatcher),
            notify_timeout,
            max_record_bytes,
            shutdown: CancellationToken::new(),
            state,
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Watch state transitions from another task.
    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Token that stops the consumer at the next read boundary when
    /// cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Connect and consume until the feed ends, fails or is stopped.
    ///
    /// # Errors
    /// Returns `Error::StreamTermination` if connecting fails or the feed
    /// fails at the transport level.
    pub async fn run<C: FeedConnector>(&self, connector: &mut C) -> Result<ConsumerReport> {
        self.set_state(ConsumerState::Connecting);

        let reader = match connector.connect().await {
            Ok(reader) => reader,
            Err(e) => {
                error!("✗ Settlement feed connection failed: {}", e);
                self.set_state(ConsumerState::Closed);
                return Err(match e {
                    Error::StreamTermination(_) => e,
                    other => Error::StreamTermination(other.to_string()),
                });
            }
        };

        self.consume(reader).await
    }

    /// Consume an already open feed.
    ///
    /// Outstanding notifications are awaited before returning.
    ///
    /// # Errors
    /// Returns `Error::StreamTermination` on a transport-level read failure.
    pub async fn consume<R: AsyncBufRead + Unpin>(&self, mut reader: R) -> Result<ConsumerReport> {
        self.set_state(ConsumerState::Streaming);
        info!("Settlement consumer streaming");

        let mut report = ConsumerReport::default();
        let mut dispatches: JoinSet<Dispatch> = JoinSet::new();
        let mut line = Vec::new();
        let limit = self.max_record_bytes.saturating_add(1) as u64;
        // Set while skipping the tail of an oversized record.
        let mut discarding = false;

        let outcome = loop {
            line.clear();
            let mut limited = (&mut reader).take(limit);

            let read = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Settlement consumer stop requested");
                    break Ok(());
                }
                read = limited.read_until(b'\n', &mut line) => read,
            };
            let terminated = line.last() == Some(&b'\n');

            match read {
                Ok(0) => {
                    info!("Settlement feed closed by upstream");
                    break Ok(());
                }
                Ok(_) if discarding => discarding = !terminated,
                Ok(_) if !terminated && line.len() > self.max_record_bytes => {
                    report.malformed += 1;
                    warn!(
                        "⚠ Skipping feed record longer than {} bytes",
                        self.max_record_bytes
                    );
                    discarding = true;
                }
                Ok(_) => self.handle_record(&line, &mut report, &mut dispatches),
                Err(e) => {
                    let e = Error::StreamTermination(e.to_string());
                    error!("✗ Settlement feed failed: {}", e);
                    break Err(e);
                }
            }

            while let Some(finished) = dispatches.try_join_next() {
                self.tally(finished, &mut report);
            }
        };

        while let Some(finished) = dispatches.join_next().await {
            self.tally(finished, &mut report);
        }

        self.set_state(ConsumerState::Closed);
        info!("Settlement consumer closed: {:?}", report);

        outcome.map(|()| report)
    }

    /// Run on its own task.
    pub fn spawn<C>(self, connector: C) -> JoinHandle<Result<ConsumerReport>>
    where
        C: FeedConnector + 'static,
    {
        tokio::spawn(async move {
            let mut connector = connector;
            self.run(&mut connector).await
        })
    }

    fn handle_record(
        &self,
        line: &[u8],
        report: &mut ConsumerReport,
        dispatches: &mut JoinSet<Dispatch>,
    ) {
        let event = match event::parse_line(line) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(Error::UpstreamEvent(msg)) => {
                report.upstream_errors += 1;
                warn!("⚠ Settlement feed reported an error: {}", msg);
                return;
            }
            Err(e) => {
                report.malformed += 1;
                warn!("⚠ Skipping feed record: {}", e);
                return;
            }
        };

        report.events += 1;
        if !event.is_settled() {
            debug!(
                "Invoice {} moved to {}, ignoring",
                event.external_reference, event.state
            );
            return;
        }

        match self.registry.resolve_and_remove(&event.external_reference) {
            Some(fingerprint) => {
                report.settled += 1;
                info!(
                    "✓ Invoice {} settled for {}",
                    event.external_reference, fingerprint
                );
                self.dispatch(event.external_reference, fingerprint.message(), dispatches);
            }
            None => debug!(
                "Settlement for {} matched no live invoice",
                event.external_reference
            ),
        }
    }

    fn dispatch(&self, reference: String, message: String, dispatches: &mut JoinSet<Dispatch>) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let timeout = self.notify_timeout;

        dispatches.spawn(async move {
            let outcome = match tokio::time::timeout(timeout, dispatcher.notify(&message)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "notification exceeded {:?}",
                    timeout
                ))),
            };
            (reference, outcome)
        });
    }

    fn tally(&self, finished: std::result::Result<Dispatch, JoinError>, report: &mut ConsumerReport) {
        match finished {
            Ok((reference, Ok(()))) => {
                report.notified += 1;
                debug!("✓ Notification sent for {}", reference);
            }
            Ok((reference, Err(e))) => {
                report.notify_failures += 1;
                warn!("⚠ Notification for {} failed: {}", reference, e);
                self.registry
                    .metrics()
                    .record_notify_error(&reference, &e.to_string());
            }
            Err(e) => {
                report.notify_failures += 1;
                error!("✗ Notification task failed: {}", e);
            }
        }
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InvoiceConfig;
    use crate::fingerprint::RequestFingerprint;
    use crate::record::IssuedInvoice;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadBuf};

    #[derive(Default)]
    struct RecordingDispatcher {
        messages: Mutex<Vec<String>>,
    }

    impl NotificationDispatcher for RecordingDispatcher {
        async fn notify(&self, message: &str) -> Result<()> {
            self.messages.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    struct FailingDispatcher;

    impl NotificationDispatcher for FailingDispatcher {
        async fn notify(&self, _message: &str) -> Result<()> {
            Err(Error::Notification("gateway down".to_string()))
        }
    }

    struct BrokenPipe;

    impl AsyncRead for BrokenPipe {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        }
    }

    async fn registry_with(reference: &str) -> InvoiceRegistry {
        let registry = InvoiceRegistry::new(InvoiceConfig::default());
        let reference = reference.to_string();
        registry
            .get_or_create(&RequestFingerprint::new("A1", "XY123", 2), |_| async move {
                Ok(IssuedInvoice::new(reference, Duration::from_secs(300)))
            })
            .await
            .expect("Failed to get invoice");
        registry
    }

    #[tokio::test]
    async fn test_settled_event_notifies_once() {
        let registry = registry_with("inv-1").await;
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let consumer = SettlementConsumer::new(registry.clone(), Arc::clone(&dispatcher));

        let feed = b"{\"externalReference\":\"inv-1\",\"state\":\"settled\"}\n\
                     {\"externalReference\":\"inv-1\",\"state\":\"settled\"}\n";
        let report = consumer.consume(&feed[..]).await.expect("consume");

        assert_eq!(report.events, 2);
        assert_eq!(report.settled, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(*dispatcher.messages.lock().unwrap(), vec!["A1 XY123 2"]);
        assert!(!registry.is_live("inv-1"));
        assert_eq!(consumer.state(), ConsumerState::Closed);
    }

    #[tokio::test]
    async fn test_skips_malformed_and_upstream_errors() {
        let registry = registry_with("inv-1").await;
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let consumer = SettlementConsumer::new(registry.clone(), Arc::clone(&dispatcher));

        let feed = b"garbage\n\
                     {\"error\":{\"message\":\"temporary\"}}\n\
                     \n\
                     {\"result\":{\"payment_request\":\"inv-1\",\"state\":\"OPEN\"}}\n\
                     {\"result\":{\"payment_request\":\"inv-1\",\"state\":\"SETTLED\"}}";
        let report = consumer.consume(&feed[..]).await.expect("consume");

        assert_eq!(report.malformed, 1);
        assert_eq!(report.upstream_errors, 1);
        assert_eq!(report.events, 2);
        assert_eq!(report.notified, 1);
        assert!(!registry.is_live("inv-1"));
    }

    #[tokio::test]
    async fn test_oversized_record_is_skipped() {
        let registry = InvoiceRegistry::new(InvoiceConfig::default().with_max_record_bytes(64));
        let reference = "inv-1".to_string();
        registry
            .get_or_create(&RequestFingerprint::new("A1", "XY123", 2), |_| async move {
                Ok(IssuedInvoice::new(reference, Duration::from_secs(300)))
            })
            .await
            .expect("Failed to get invoice");
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let consumer = SettlementConsumer::new(registry.clone(), Arc::clone(&dispatcher));

        let mut feed = format!(
            "{{\"externalReference\":\"{}\",\"state\":\"settled\"}}\n",
            "x".repeat(500)
        )
        .into_bytes();
        feed.extend_from_slice(b"{\"externalReference\":\"inv-1\",\"state\":\"settled\"}\n");
        let report = consumer.consume(&feed[..]).await.expect("consume");

        assert_eq!(report.malformed, 1);
        assert_eq!(report.events, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(*dispatcher.messages.lock().unwrap(), vec!["A1 XY123 2"]);
    }

    #[tokio::test]
    async fn test_unterminated_oversized_tail_is_dropped() {
        let registry = InvoiceRegistry::new(InvoiceConfig::default().with_max_record_bytes(16));
        let consumer = SettlementConsumer::new(registry, RecordingDispatcher::default());

        let feed = vec![b'{'; 100];
        let report = consumer.consume(&feed[..]).await.expect("consume");

        assert_eq!(report.malformed, 1);
        assert_eq!(report.events, 0);
    }

    #[tokio::test]
    async fn test_unknown_reference_is_ignored() {
        let registry = registry_with("inv-1").await;
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let consumer = SettlementConsumer::new(registry.clone(), Arc::clone(&dispatcher));

        let feed = b"{\"externalReference\":\"someone-else\",\"state\":\"settled\"}\n";
        let report = consumer.consume(&feed[..]).await.expect("consume");

        assert_eq!(report.settled, 0);
        assert!(dispatcher.messages.lock().unwrap().is_empty());
        assert!(registry.is_live("inv-1"));
    }

    #[tokio::test]
    async fn test_notification_failure_still_consumes_invoice() {
        let registry = registry_with("inv-1").await;
        let consumer = SettlementConsumer::new(registry.clone(), FailingDispatcher);

        let feed = b"{\"externalReference\":\"inv-1\",\"state\":\"settled\"}\n";
        let report = consumer.consume(&feed[..]).await.expect("consume");

        assert_eq!(report.settled, 1);
        assert_eq!(report.notified, 0);
        assert_eq!(report.notify_failures, 1);
        assert!(!registry.is_live("inv-1"));
    }

    #[tokio::test]
    async fn test_transport_error_is_fatal() {
        let registry = registry_with("inv-1").await;
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let consumer = SettlementConsumer::new(registry.clone(), Arc::clone(&dispatcher));

        let feed = &b"{\"externalReference\":\"inv-1\",\"state\":\"settled\"}\n"[..];
        let reader = BufReader::new(feed.chain(BrokenPipe));
        let result = consumer.consume(reader).await;

        assert!(matches!(result, Err(Error::StreamTermination(_))));
        // The record before the failure was still handled.
        assert_eq!(*dispatcher.messages.lock().unwrap(), vec!["A1 XY123 2"]);
        assert_eq!(consumer.state(), ConsumerState::Closed);
    }

    #[tokio::test]
    async fn test_stop_signal_closes_consumer() {
        let registry = InvoiceRegistry::new(InvoiceConfig::default());
        let consumer = SettlementConsumer::new(registry, RecordingDispatcher::default());
        let mut states = consumer.subscribe_state();

        // The write half stays open so the read never completes on its own.
        let (_writer, reader) = tokio::io::duplex(64);
        let stop = consumer.stop_token();
        let handle = consumer.spawn(ReaderConnector::new(BufReader::new(reader)));

        states
            .wait_for(|state| *state == ConsumerState::Streaming)
            .await
            .expect("streaming");
        stop.cancel();

        let report = handle.await.expect("task").expect("clean stop");
        assert_eq!(report, ConsumerReport::default());
        assert_eq!(*states.borrow(), ConsumerState::Closed);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let registry = InvoiceRegistry::new(InvoiceConfig::default());
        let consumer = SettlementConsumer::new(registry, RecordingDispatcher::default());

        let mut connector = ReaderConnector::new(&b""[..]);
        connector.connect().await.expect("first connect");

        let result = consumer.run(&mut connector).await;
        assert!(matches!(result, Err(Error::StreamTermination(_))));
        assert_eq!(consumer.state(), ConsumerState::Closed);
    }
}
