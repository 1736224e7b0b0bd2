//! Error types for snapshot consolidation.
//!
//! Every failure here is local to a single call and non-fatal: the store
//! is left exactly as it was and the caller may keep feeding events.

use ensemble_types::ExperimentId;

/// Reasons an event is rejected by the consolidator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsolidateError {
    /// The event skips ahead of the next expected iteration.
    #[error("out-of-order iteration {iteration}: expected at most {expected}")]
    OutOfOrderIteration {
        /// Iteration carried by the rejected event.
        iteration: u32,
        /// The next iteration the store would accept as an append.
        expected: usize,
    },

    /// The event was fetched for an experiment that is no longer selected.
    #[error("event for experiment {experiment} arrived after it was deselected")]
    StaleExperiment {
        /// Experiment the event was fetched for.
        experiment: ExperimentId,
    },

    /// The event could not be decoded into a snapshot event.
    #[error("malformed event: {reason}")]
    MalformedEvent {
        /// Decoder message describing what is wrong.
        reason: String,
    },
}

/// Failure reported by a subscriber while handling a notification.
///
/// Logged and isolated by the consolidator; it never affects the store or
/// other subscribers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriberError {
    /// The subscriber's downstream consumer has gone away.
    #[error("subscriber closed")]
    Closed,

    /// Any other subscriber-side failure.
    #[error("subscriber failed: {0}")]
    Failed(String),
}
