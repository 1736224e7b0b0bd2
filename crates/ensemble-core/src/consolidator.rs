//! The snapshot consolidator.
//!
//! [`Consolidator`] owns an ordered, gap-free store of
//! [`IterationSnapshot`]s: entry `i` is the cumulative merge of every event
//! seen for iteration `i`. Each accepted event either appends the next
//! iteration or merges into an existing one, after which every subscriber
//! is notified with the full store.
//!
//! # Ownership
//!
//! The store lives behind an [`Arc`] and is mutated copy-on-write via
//! [`Arc::make_mut`]. Callers of [`Consolidator::current_state`] and
//! subscribers receive a clone of the `Arc`, so a value handed out is never
//! changed by later ingests.

use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use ensemble_types::{ConsolidatedSnapshots, ExperimentId, IterationSnapshot, SnapshotEvent};
use tracing::{debug, info, warn};

use crate::error::{ConsolidateError, SubscriberError};
use crate::merge::Merge;

/// What an accepted event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// The event opened a new iteration.
    Appended {
        /// The iteration that was appended.
        iteration: u32,
    },
    /// The event was merged into an existing iteration.
    Merged {
        /// The iteration that was updated.
        iteration: u32,
    },
}

impl IngestOutcome {
    /// The iteration touched by the event.
    pub const fn iteration(self) -> u32 {
        match self {
            Self::Appended { iteration } | Self::Merged { iteration } => iteration,
        }
    }
}

/// Callback invoked after every successful change to the store.
///
/// Subscribers run synchronously, in registration order, on the thread
/// that applied the change. They receive an immutable view and must not
/// block for long; hand heavy work off to a channel.
pub trait SnapshotSubscriber: Send {
    /// Called with the full consolidated store after a change.
    fn on_snapshot(&mut self, snapshots: &ConsolidatedSnapshots) -> Result<(), SubscriberError>;
}

impl<F> SnapshotSubscriber for F
where
    F: FnMut(&ConsolidatedSnapshots) -> Result<(), SubscriberError> + Send,
{
    fn on_snapshot(&mut self, snapshots: &ConsolidatedSnapshots) -> Result<(), SubscriberError> {
        self(snapshots)
    }
}

/// Handle returned by [`Consolidator::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl core::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscription {
    id: SubscriptionId,
    subscriber: Box<dyn SnapshotSubscriber>,
}

/// Merges snapshot events into one authoritative state per iteration.
pub struct Consolidator {
    store: ConsolidatedSnapshots,
    subscribers: Vec<Subscription>,
    next_subscription: u64,
    experiment: Option<ExperimentId>,
}

impl Consolidator {
    /// Create an empty consolidator with no subscribers.
    pub fn new() -> Self {
        Self {
            store: Arc::new(Vec::new()),
            subscribers: Vec::new(),
            next_subscription: 0,
            experiment: None,
        }
    }

    /// Apply one event to the store.
    ///
    /// An event for iteration `len()` appends a new entry; an event for an
    /// existing iteration is deep-merged into it. On success every
    /// subscriber is notified with the full store.
    ///
    /// # Errors
    ///
    /// Returns [`ConsolidateError::OutOfOrderIteration`] if the event's
    /// iteration is beyond the next expected one. The store is unchanged
    /// and no subscriber is notified.
    pub fn ingest(&mut self, event: SnapshotEvent) -> Result<IngestOutcome, ConsolidateError> {
        let iteration = event.iteration();
        let kind = event.kind();
        let expected = self.store.len();
        // Anything that does not fit in usize is necessarily past the end.
        let index = usize::try_from(iteration).unwrap_or(usize::MAX);

        let outcome = match index.cmp(&expected) {
            Ordering::Greater => {
                warn!(iteration, expected, kind, "Rejected out-of-order snapshot event");
                return Err(ConsolidateError::OutOfOrderIteration {
                    iteration,
                    expected,
                });
            }
            Ordering::Equal => {
                let mut entry = IterationSnapshot::empty(iteration);
                entry.merge(event.into_update());
                Arc::make_mut(&mut self.store).push(entry);
                IngestOutcome::Appended { iteration }
            }
            Ordering::Less => {
                if let Some(entry) = Arc::make_mut(&mut self.store).get_mut(index) {
                    entry.merge(event.into_update());
                }
                IngestOutcome::Merged { iteration }
            }
        };

        debug!(
            iteration,
            kind,
            outcome = ?outcome,
            iterations = self.store.len(),
            "Applied snapshot event"
        );
        self.notify();
        Ok(outcome)
    }

    /// Decode a JSON event and apply it.
    ///
    /// # Errors
    ///
    /// Returns [`ConsolidateError::MalformedEvent`] if the value is not a
    /// valid snapshot event (including a missing or negative iteration),
    /// or any error from [`Consolidator::ingest`].
    pub fn ingest_json(
        &mut self,
        value: serde_json::Value,
    ) -> Result<IngestOutcome, ConsolidateError> {
        let event = serde_json::from_value::<SnapshotEvent>(value).map_err(|e| {
            warn!(error = %e, "Rejected malformed snapshot event");
            ConsolidateError::MalformedEvent {
                reason: e.to_string(),
            }
        })?;
        self.ingest(event)
    }

    /// Register a subscriber. It is called after every later change.
    pub fn subscribe<S>(&mut self, subscriber: S) -> SubscriptionId
    where
        S: SnapshotSubscriber + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription = self.next_subscription.saturating_add(1);
        self.subscribers.push(Subscription {
            id,
            subscriber: Box::new(subscriber),
        });
        debug!(subscription = %id, "Subscriber registered");
        id
    }

    /// Remove a subscriber.
    ///
    /// Returns `false` if it was already removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|sub| sub.id != id);
        self.subscribers.len() != before
    }

    /// Point-in-time copy of every consolidated iteration.
    pub fn current_state(&self) -> ConsolidatedSnapshots {
        Arc::clone(&self.store)
    }

    /// Consolidated state of a single iteration.
    pub fn iteration(&self, iteration: usize) -> Option<&IterationSnapshot> {
        self.store.get(iteration)
    }

    /// Number of consolidated iterations.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether no iteration has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// The experiment currently being observed, if one was selected.
    pub const fn experiment(&self) -> Option<&ExperimentId> {
        self.experiment.as_ref()
    }

    /// Switch to observing a different experiment.
    ///
    /// Discards every consolidated iteration so the next event for
    /// iteration 0 is an append. Subscribers are notified with the empty
    /// store.
    pub fn switch_experiment(&mut self, experiment: ExperimentId) {
        info!(
            experiment = %experiment,
            previous = ?self.experiment,
            discarded = self.store.len(),
            "Switching observed experiment"
        );
        self.experiment = Some(experiment);
        self.clear();
    }

    /// Discard every consolidated iteration, keeping the selected experiment.
    pub fn reset(&mut self) {
        debug!(discarded = self.store.len(), "Resetting consolidated store");
        self.clear();
    }

    fn clear(&mut self) {
        // Replace rather than clear in place: earlier copies stay intact.
        self.store = Arc::new(Vec::new());
        self.notify();
    }

    fn notify(&mut self) {
        let snapshots = Arc::clone(&self.store);
        for sub in &mut self.subscribers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                sub.subscriber.on_snapshot(&snapshots)
            }));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(subscription = %sub.id, error = %e, "Subscriber failed");
                }
                Err(_) => {
                    warn!(subscription = %sub.id, "Subscriber panicked");
                }
            }
        }
    }
}

impl Default for Consolidator {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Consolidator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Consolidator")
            .field("iterations", &self.store.len())
            .field("subscribers", &self.subscribers.len())
            .field("experiment", &self.experiment)
            .finish_non_exhaustive()
    }
}
