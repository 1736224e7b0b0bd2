//! Snapshot consolidation engine for the ensemble monitor.
//!
//! The consolidator ingests a stream of full and partial snapshot events,
//! each tagged with an iteration, and keeps one merged
//! [`IterationSnapshot`](ensemble_types::IterationSnapshot) per iteration.
//!
//! # Modules
//!
//! - [`merge`] -- Schema-aware recursive merge of sparse updates
//! - [`consolidator`] -- The per-iteration store, ingest, and subscribers
//! - [`ingest`] -- Single-consumer queue serializing every writer
//! - [`config`] -- YAML configuration for the monitor process
//! - [`error`] -- Ingest and subscriber error types

pub mod config;
pub mod consolidator;
pub mod error;
pub mod ingest;
pub mod merge;

pub use consolidator::{Consolidator, IngestOutcome, SnapshotSubscriber, SubscriptionId};
pub use error::{ConsolidateError, SubscriberError};
pub use ingest::{IngestCommand, IngestError, IngestHandle, IngestReceiver, run_ingest_loop};
pub use merge::Merge;
