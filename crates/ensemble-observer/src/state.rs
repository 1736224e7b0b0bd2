//! Shared application state for the Observer API server.
//!
//! [`AppState`] holds the ingest handle used for writes and the receiving
//! side of a [`watch`] channel carrying the latest consolidated state.
//! [`WatchPublisher`] is the consolidator subscriber that feeds it.

use std::sync::Arc;

use ensemble_core::{IngestHandle, SnapshotSubscriber, SubscriberError};
use ensemble_types::ConsolidatedSnapshots;
use tokio::sync::watch;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Sending side of the ingest queue.
    pub ingest: IngestHandle,
    tx: watch::Sender<ConsolidatedSnapshots>,
}

impl AppState {
    /// Create application state around an ingest handle, starting from an
    /// empty consolidated state.
    pub fn new(ingest: IngestHandle) -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        Self { ingest, tx }
    }

    /// A subscriber to register on the consolidator so this state tracks it.
    pub fn publisher(&self) -> WatchPublisher {
        WatchPublisher {
            tx: self.tx.clone(),
        }
    }

    /// Receive every future change to the consolidated state.
    pub fn subscribe(&self) -> watch::Receiver<ConsolidatedSnapshots> {
        self.tx.subscribe()
    }

    /// The most recently published consolidated state.
    pub fn latest(&self) -> ConsolidatedSnapshots {
        self.tx.borrow().clone()
    }
}

/// Consolidator subscriber that publishes into the observer's watch channel.
#[derive(Debug, Clone)]
pub struct WatchPublisher {
    tx: watch::Sender<ConsolidatedSnapshots>,
}

impl SnapshotSubscriber for WatchPublisher {
    fn on_snapshot(&mut self, snapshots: &ConsolidatedSnapshots) -> Result<(), SubscriberError> {
        // Succeeds with or without connected receivers.
        self.tx.send_replace(Arc::clone(snapshots));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ensemble_types::IterationSnapshot;

    use super::*;

    #[test]
    fn publisher_updates_latest() {
        let (handle, _receiver) = ensemble_core::ingest::channel(1);
        let state = AppState::new(handle);
        let mut rx = state.subscribe();
        assert!(state.latest().is_empty());

        let mut publisher = state.publisher();
        let snapshots = Arc::new(vec![IterationSnapshot::empty(0)]);
        publisher.on_snapshot(&snapshots).unwrap();

        assert_eq!(state.latest().len(), 1);
        assert!(rx.has_changed().unwrap());
    }
}
