//! Shared type definitions for the ensemble monitor.
//!
//! This crate is the single source of truth for the snapshot data model
//! exchanged between the event source, the consolidator and the renderer.
//! Types flow downstream to `TypeScript` via `ts-rs` for the dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrapper for experiment identifiers
//! - [`enums`] -- Realization status enumeration
//! - [`snapshot`] -- Full snapshot bodies (realizations, forward models, metadata)
//! - [`update`] -- Sparse counterparts carried by update events
//! - [`events`] -- The tagged snapshot event envelope and consolidated iteration

pub mod enums;
pub mod events;
pub mod ids;
pub mod snapshot;
pub mod update;

// Re-export all public types at crate root for convenience.
pub use enums::RealizationStatus;
pub use events::{
    ConsolidatedSnapshots, Experiment, FullSnapshotEvent, IterationSnapshot, SnapshotEvent,
    SnapshotUpdateEvent,
};
pub use ids::ExperimentId;
pub use snapshot::{ForwardModelState, RealizationState, Snapshot, SnapshotMetadata};
pub use update::{ForwardModelUpdate, MetadataUpdate, RealizationUpdate, SnapshotUpdate};
