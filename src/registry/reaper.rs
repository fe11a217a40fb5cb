//! TTL reaper: one task per registry holding every pending expiry.
//!
//! Each scheduled entry carries the exact external reference it was created
//! for. Eviction goes through the reverse index, so a reaper entry left over
//! from a replaced issuance is a no-op.

use super::Store;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;

struct Scheduled {
    reference: String,
    deadline: Instant,
}

/// Handle to the background reaper task.
pub(crate) struct Reaper {
    tx: mpsc::UnboundedSender<Scheduled>,
    shutdown: CancellationToken,
}

impl Reaper {
    /// Spawn the reaper onto the current Tokio runtime.
    pub(crate) fn spawn(store: Arc<Store>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(run(store, rx, shutdown.clone()));
        Reaper { tx, shutdown }
    }

    /// Fire once for `reference` at `deadline`.
    pub(crate) fn schedule(&self, reference: String, deadline: Instant) {
        if self.tx.send(Scheduled { reference, deadline }).is_err() {
            debug!("Reaper already stopped, expiry left to lazy checks");
        }
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled() || self.tx.is_closed()
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run(
    store: Arc<Store>,
    mut rx: mpsc::UnboundedReceiver<Scheduled>,
    shutdown: CancellationToken,
) {
    let mut queue: DelayQueue<String> = DelayQueue::new();
    debug!("Reaper started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            command = rx.recv() => match command {
                Some(Scheduled { reference, deadline }) => {
                    queue.insert_at(reference, deadline);
                }
                None => break,
            },
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let reference = expired.into_inner();
                if !store.evict(&reference) {
                    debug!("Reaper for {} found nothing left to remove", reference);
                }
            }
        }
    }

    debug!("Reaper stopped with {} expiries pending", queue.len());
}
