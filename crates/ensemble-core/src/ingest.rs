//! Single-consumer ingestion queue.
//!
//! Event sources (a push endpoint, a polling fallback, the experiment
//! selector) never touch the [`Consolidator`] directly. They hold a cloned
//! [`IngestHandle`] and send [`IngestCommand`]s into one bounded
//! [`tokio::sync::mpsc`] channel. [`run_ingest_loop`] is the only consumer
//! and applies commands strictly in arrival order, so the append/merge
//! invariant holds no matter how many sources are active.
//!
//! Sources that fetch events for a specific experiment tag them with it
//! (`*_for` helpers). A tagged event is only applied while that experiment
//! is still selected, so a fetch that was in flight across a switch cannot
//! leak old events into the new experiment's store.

use ensemble_types::{ConsolidatedSnapshots, ExperimentId, SnapshotEvent};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::consolidator::{Consolidator, IngestOutcome};
use crate::error::ConsolidateError;

/// Reply channel for an ingest result.
type IngestReply = oneshot::Sender<Result<IngestOutcome, ConsolidateError>>;

/// Errors surfaced to callers of [`IngestHandle`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// The ingest loop has stopped.
    #[error("ingest queue closed")]
    Closed,

    /// The consolidator rejected the event.
    #[error(transparent)]
    Rejected(#[from] ConsolidateError),
}

impl<T> From<mpsc::error::SendError<T>> for IngestError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Self::Closed
    }
}

impl From<oneshot::error::RecvError> for IngestError {
    fn from(_: oneshot::error::RecvError) -> Self {
        Self::Closed
    }
}

/// A command processed by the ingest loop.
#[derive(Debug)]
pub enum IngestCommand {
    /// Apply a decoded event.
    Event {
        /// The event to apply.
        event: Box<SnapshotEvent>,
        /// Experiment the event was fetched for. `None` applies it to
        /// whatever is currently selected.
        experiment: Option<ExperimentId>,
        /// Where to send the result, if the sender wants it.
        reply: Option<IngestReply>,
    },
    /// Decode and apply a raw JSON event.
    RawEvent {
        /// The undecoded event.
        value: serde_json::Value,
        /// Experiment the event was fetched for. `None` applies it to
        /// whatever is currently selected.
        experiment: Option<ExperimentId>,
        /// Where to send the result, if the sender wants it.
        reply: Option<IngestReply>,
    },
    /// Reset the store and observe another experiment.
    SwitchExperiment {
        /// The experiment to observe.
        experiment: ExperimentId,
        /// Signalled once the store has been reset.
        reply: Option<oneshot::Sender<()>>,
    },
    /// Discard every consolidated iteration, keeping the experiment.
    Reset {
        /// Signalled once the store has been cleared.
        reply: Option<oneshot::Sender<()>>,
    },
    /// Read the current consolidated state.
    Snapshot {
        /// Receives the point-in-time state.
        reply: oneshot::Sender<ConsolidatedSnapshots>,
    },
    /// Read the experiment being observed.
    Experiment {
        /// Receives the selected experiment.
        reply: oneshot::Sender<Option<ExperimentId>>,
    },
    /// Stop the loop.
    Shutdown,
}

/// Cloneable sending side of the ingest queue.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<IngestCommand>,
}

/// Receiving side of the ingest queue, consumed by [`run_ingest_loop`].
#[derive(Debug)]
pub struct IngestReceiver {
    rx: mpsc::Receiver<IngestCommand>,
}

/// Create a bounded ingest queue. A capacity of zero is treated as one.
pub fn channel(capacity: usize) -> (IngestHandle, IngestReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (IngestHandle { tx }, IngestReceiver { rx })
}

impl IngestHandle {
    /// Apply an event and wait for the result.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Rejected`] if the consolidator refused the
    /// event, or [`IngestError::Closed`] if the loop has stopped.
    pub async fn ingest(&self, event: SnapshotEvent) -> Result<IngestOutcome, IngestError> {
        self.send_event(event, None).await
    }

    /// Apply an event fetched for `experiment` and wait for the result.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Rejected`] with
    /// [`ConsolidateError::StaleExperiment`] if `experiment` is no longer
    /// selected when the event reaches the loop, any other rejection, or
    /// [`IngestError::Closed`].
    pub async fn ingest_for(
        &self,
        experiment: ExperimentId,
        event: SnapshotEvent,
    ) -> Result<IngestOutcome, IngestError> {
        self.send_event(event, Some(experiment)).await
    }

    async fn send_event(
        &self,
        event: SnapshotEvent,
        experiment: Option<ExperimentId>,
    ) -> Result<IngestOutcome, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IngestCommand::Event {
                event: Box::new(event),
                experiment,
                reply: Some(reply),
            })
            .await?;
        Ok(rx.await??)
    }

    /// Decode and apply a raw JSON event, waiting for the result.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Rejected`] with
    /// [`ConsolidateError::MalformedEvent`] for undecodable input, any
    /// other rejection, or [`IngestError::Closed`].
    pub async fn ingest_json(
        &self,
        value: serde_json::Value,
    ) -> Result<IngestOutcome, IngestError> {
        self.send_raw(value, None).await
    }

    /// Decode and apply a raw JSON event fetched for `experiment`.
    ///
    /// # Errors
    ///
    /// As [`IngestHandle::ingest_json`], plus
    /// [`ConsolidateError::StaleExperiment`] if `experiment` has been
    /// switched away from.
    pub async fn ingest_json_for(
        &self,
        experiment: ExperimentId,
        value: serde_json::Value,
    ) -> Result<IngestOutcome, IngestError> {
        self.send_raw(value, Some(experiment)).await
    }

    async fn send_raw(
        &self,
        value: serde_json::Value,
        experiment: Option<ExperimentId>,
    ) -> Result<IngestOutcome, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IngestCommand::RawEvent {
                value,
                experiment,
                reply: Some(reply),
            })
            .await?;
        Ok(rx.await??)
    }

    /// Queue an event without waiting for it to be applied.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Closed`] if the loop has stopped.
    pub async fn submit(&self, event: SnapshotEvent) -> Result<(), IngestError> {
        self.tx
            .send(IngestCommand::Event {
                event: Box::new(event),
                experiment: None,
                reply: None,
            })
            .await?;
        Ok(())
    }

    /// Switch the observed experiment and wait for the store reset.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Closed`] if the loop has stopped.
    pub async fn switch_experiment(&self, experiment: ExperimentId) -> Result<(), IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IngestCommand::SwitchExperiment {
                experiment,
                reply: Some(reply),
            })
            .await?;
        rx.await?;
        Ok(())
    }

    /// Clear the store without changing experiment, waiting for the reset.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Closed`] if the loop has stopped.
    pub async fn reset(&self) -> Result<(), IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IngestCommand::Reset { reply: Some(reply) })
            .await?;
        rx.await?;
        Ok(())
    }

    /// Fetch the current consolidated state.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Closed`] if the loop has stopped.
    pub async fn current_state(&self) -> Result<ConsolidatedSnapshots, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(IngestCommand::Snapshot { reply }).await?;
        Ok(rx.await?)
    }

    /// Fetch the experiment currently observed.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Closed`] if the loop has stopped.
    pub async fn experiment(&self) -> Result<Option<ExperimentId>, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(IngestCommand::Experiment { reply }).await?;
        Ok(rx.await?)
    }

    /// Ask the loop to stop after the commands already queued.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Closed`] if the loop has already stopped.
    pub async fn shutdown(&self) -> Result<(), IngestError> {
        self.tx.send(IngestCommand::Shutdown).await?;
        Ok(())
    }
}

/// Drive the consolidator from the queue until shutdown.
///
/// Returns the consolidator when every [`IngestHandle`] has been dropped
/// or [`IngestCommand::Shutdown`] is received. Rejected events are
/// reported to their sender (if it asked) and never stop the loop.
pub async fn run_ingest_loop(
    mut consolidator: Consolidator,
    mut receiver: IngestReceiver,
) -> Consolidator {
    info!("Ingest loop started");

    while let Some(command) = receiver.rx.recv().await {
        match command {
            IngestCommand::Event {
                event,
                experiment,
                reply,
            } => {
                let result = still_selected(&consolidator, experiment)
                    .and_then(|()| consolidator.ingest(*event));
                send_reply(reply, result);
            }
            IngestCommand::RawEvent {
                value,
                experiment,
                reply,
            } => {
                let result = still_selected(&consolidator, experiment)
                    .and_then(|()| consolidator.ingest_json(value));
                send_reply(reply, result);
            }
            IngestCommand::SwitchExperiment { experiment, reply } => {
                consolidator.switch_experiment(experiment);
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            IngestCommand::Reset { reply } => {
                consolidator.reset();
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            IngestCommand::Snapshot { reply } => {
                let _ = reply.send(consolidator.current_state());
            }
            IngestCommand::Experiment { reply } => {
                let _ = reply.send(consolidator.experiment().copied());
            }
            IngestCommand::Shutdown => {
                debug!("Ingest loop received shutdown");
                break;
            }
        }
    }

    info!(iterations = consolidator.len(), "Ingest loop stopped");
    consolidator
}

fn still_selected(
    consolidator: &Consolidator,
    experiment: Option<ExperimentId>,
) -> Result<(), ConsolidateError> {
    match experiment {
        Some(source) if consolidator.experiment() != Some(&source) => {
            warn!(
                experiment = %source,
                selected = ?consolidator.experiment(),
                "Dropped event for an experiment that is no longer selected"
            );
            Err(ConsolidateError::StaleExperiment { experiment: source })
        }
        _ => Ok(()),
    }
}

fn send_reply(
    reply: Option<IngestReply>,
    result: Result<IngestOutcome, ConsolidateError>,
) {
    // The sender may have given up waiting; that is not an error here.
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use ensemble_types::SnapshotUpdateEvent;

    use super::*;
    use crate::error::SubscriberError;

    fn update(iteration: u32) -> SnapshotEvent {
        SnapshotEvent::Update(SnapshotUpdateEvent {
            iteration,
            ..SnapshotUpdateEvent::default()
        })
    }

    #[tokio::test]
    async fn applies_commands_in_order() {
        let (handle, receiver) = channel(8);
        let task = tokio::spawn(run_ingest_loop(Consolidator::new(), receiver));

        for iteration in 0..3 {
            handle.submit(update(iteration)).await.unwrap();
        }
        let outcome = handle.ingest(update(1)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Merged { iteration: 1 });
        assert_eq!(handle.current_state().await.unwrap().len(), 3);

        handle.shutdown().await.unwrap();
        let consolidator = task.await.unwrap();
        assert_eq!(consolidator.len(), 3);
    }

    #[tokio::test]
    async fn rejections_reach_the_sender() {
        let (handle, receiver) = channel(8);
        tokio::spawn(run_ingest_loop(Consolidator::new(), receiver));

        let err = handle.ingest(update(4)).await.unwrap_err();
        assert_eq!(
            err,
            IngestError::Rejected(ConsolidateError::OutOfOrderIteration {
                iteration: 4,
                expected: 0
            })
        );

        let err = handle
            .ingest_json(serde_json::json!({"event_type": "Nope", "iteration": 0}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Rejected(ConsolidateError::MalformedEvent { .. })
        ));

        assert!(handle.current_state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_sources_are_serialized() {
        let (handle, receiver) = channel(4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut consolidator = Consolidator::new();
        let sink = Arc::clone(&seen);
        consolidator.subscribe(
            move |state: &ConsolidatedSnapshots| -> Result<(), SubscriberError> {
                sink.lock().unwrap().push(state.len());
                Ok(())
            },
        );
        let task = tokio::spawn(run_ingest_loop(consolidator, receiver));

        handle.ingest(update(0)).await.unwrap();
        let mut sources = Vec::new();
        for _ in 0..4 {
            let source = handle.clone();
            sources.push(tokio::spawn(async move {
                for _ in 0..10 {
                    source.ingest(update(0)).await.unwrap();
                }
            }));
        }
        for source in sources {
            source.await.unwrap();
        }
        drop(handle);

        let consolidator = task.await.unwrap();
        assert_eq!(consolidator.len(), 1);
        assert_eq!(seen.lock().unwrap().len(), 41);
    }

    #[tokio::test]
    async fn switch_experiment_resets_before_next_event() {
        let (handle, receiver) = channel(8);
        tokio::spawn(run_ingest_loop(Consolidator::new(), receiver));

        for iteration in 0..3 {
            handle.submit(update(iteration)).await.unwrap();
        }
        let experiment = ExperimentId::new();
        handle.switch_experiment(experiment).await.unwrap();

        assert!(handle.current_state().await.unwrap().is_empty());
        assert_eq!(handle.experiment().await.unwrap(), Some(experiment));
        assert_eq!(
            handle.ingest(update(0)).await.unwrap(),
            IngestOutcome::Appended { iteration: 0 }
        );
    }

    #[tokio::test]
    async fn events_for_a_deselected_experiment_are_dropped() {
        let (handle, receiver) = channel(8);
        tokio::spawn(run_ingest_loop(Consolidator::new(), receiver));

        let old = ExperimentId::new();
        let new = ExperimentId::new();
        handle.switch_experiment(old).await.unwrap();
        handle.ingest_for(old, update(0)).await.unwrap();

        handle.switch_experiment(new).await.unwrap();
        let err = handle
            .ingest_json_for(
                old,
                serde_json::json!({
                    "event_type": "SnapshotUpdateEvent",
                    "iteration": 0,
                    "snapshot": {"reals": {"from-old": {"status": "Running"}}}
                }),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            IngestError::Rejected(ConsolidateError::StaleExperiment { experiment: old })
        );
        assert_eq!(
            handle.ingest_for(old, update(0)).await.unwrap_err(),
            IngestError::Rejected(ConsolidateError::StaleExperiment { experiment: old })
        );
        assert!(handle.current_state().await.unwrap().is_empty());

        assert_eq!(
            handle.ingest_for(new, update(0)).await.unwrap(),
            IngestOutcome::Appended { iteration: 0 }
        );
    }

    #[tokio::test]
    async fn reset_keeps_the_experiment() {
        let (handle, receiver) = channel(8);
        tokio::spawn(run_ingest_loop(Consolidator::new(), receiver));

        let experiment = ExperimentId::new();
        handle.switch_experiment(experiment).await.unwrap();
        handle.submit(update(0)).await.unwrap();
        handle.submit(update(1)).await.unwrap();
        handle.reset().await.unwrap();

        assert!(handle.current_state().await.unwrap().is_empty());
        assert_eq!(handle.experiment().await.unwrap(), Some(experiment));
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (handle, receiver) = channel(1);
        drop(receiver);
        assert_eq!(handle.submit(update(0)).await, Err(IngestError::Closed));
    }
}
