//! Snapshot event envelope and the consolidated per-iteration record.
//!
//! Events arrive as JSON objects internally tagged by `event_type`. A
//! [`FullSnapshotEvent`] describes an iteration completely; a
//! [`SnapshotUpdateEvent`] carries only what changed. Both are folded into
//! an [`IterationSnapshot`], one per iteration, by the consolidator.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::ExperimentId;
use crate::snapshot::Snapshot;
use crate::update::SnapshotUpdate;

/// Immutable view of every consolidated iteration, ordered by iteration.
///
/// Shared by reference count so subscribers and query callers can hold a
/// point-in-time copy without blocking further ingestion.
pub type ConsolidatedSnapshots = Arc<Vec<IterationSnapshot>>;

/// Complete state of one iteration at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct FullSnapshotEvent {
    /// Zero-based iteration index.
    pub iteration: u32,
    /// Human-readable iteration label.
    pub iteration_label: String,
    /// Iteration currently being run by the experiment.
    pub current_iteration: u32,
    /// Total number of iterations planned.
    pub total_iterations: u32,
    /// Overall progress ratio in `[0, 1]`.
    pub progress: f64,
    /// Number of realizations in the iteration.
    pub realization_count: u32,
    /// Realization counts keyed by status name.
    #[serde(default)]
    pub status_count: BTreeMap<String, u32>,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// The snapshot body.
    pub snapshot: Snapshot,
}

/// Sparse change to one iteration.
///
/// Only `iteration` is required; every other field is `None` when
/// unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SnapshotUpdateEvent {
    /// Zero-based iteration index.
    pub iteration: u32,
    /// New iteration label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub iteration_label: Option<String>,
    /// New current-iteration counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub current_iteration: Option<u32>,
    /// New total-iteration counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub total_iterations: Option<u32>,
    /// New progress ratio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub progress: Option<f64>,
    /// New realization count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub realization_count: Option<u32>,
    /// Changed status counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub status_count: Option<BTreeMap<String, u32>>,
    /// When the event was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Changed parts of the snapshot body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub snapshot: Option<SnapshotUpdate>,
}

/// An event describing the state of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "event_type")]
#[ts(export, export_to = "bindings/")]
pub enum SnapshotEvent {
    /// Complete state for the iteration.
    #[serde(rename = "FullSnapshotEvent")]
    Full(FullSnapshotEvent),
    /// Sparse delta for the iteration.
    #[serde(rename = "SnapshotUpdateEvent")]
    Update(SnapshotUpdateEvent),
}

impl SnapshotEvent {
    /// The iteration this event applies to.
    pub const fn iteration(&self) -> u32 {
        match self {
            Self::Full(event) => event.iteration,
            Self::Update(event) => event.iteration,
        }
    }

    /// Wire name of the event kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Full(_) => "FullSnapshotEvent",
            Self::Update(_) => "SnapshotUpdateEvent",
        }
    }

    /// Express this event as a sparse update.
    ///
    /// A full snapshot becomes an update with every field present, so
    /// applying it overwrites all scalars while still merging maps.
    pub fn into_update(self) -> SnapshotUpdateEvent {
        match self {
            Self::Full(event) => event.into(),
            Self::Update(event) => event,
        }
    }
}

impl From<FullSnapshotEvent> for SnapshotUpdateEvent {
    fn from(event: FullSnapshotEvent) -> Self {
        Self {
            iteration: event.iteration,
            iteration_label: Some(event.iteration_label),
            current_iteration: Some(event.current_iteration),
            total_iterations: Some(event.total_iterations),
            progress: Some(event.progress),
            realization_count: Some(event.realization_count),
            status_count: Some(event.status_count),
            timestamp: Some(event.timestamp),
            snapshot: Some(event.snapshot.into()),
        }
    }
}

/// Consolidated state of one iteration: the merged envelope fields and the
/// merged snapshot body of every event seen for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct IterationSnapshot {
    /// Zero-based iteration index.
    pub iteration: u32,
    /// Human-readable iteration label.
    pub iteration_label: String,
    /// Iteration currently being run by the experiment.
    pub current_iteration: u32,
    /// Total number of iterations planned.
    pub total_iterations: u32,
    /// Overall progress ratio.
    pub progress: f64,
    /// Number of realizations in the iteration.
    pub realization_count: u32,
    /// Realization counts keyed by status name.
    pub status_count: BTreeMap<String, u32>,
    /// Timestamp of the most recent event that carried one.
    pub timestamp: Option<DateTime<Utc>>,
    /// The merged snapshot body.
    pub snapshot: Snapshot,
}

impl IterationSnapshot {
    /// An empty record for the given iteration, every field at its zero value.
    pub fn empty(iteration: u32) -> Self {
        Self {
            iteration,
            ..Self::default()
        }
    }
}

/// An experiment advertised by the storage server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Experiment {
    /// Experiment identifier.
    pub id: ExperimentId,
    /// Experiment kind (e.g. `ensemble_experiment`).
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::enums::RealizationStatus;

    #[test]
    fn decodes_full_snapshot_event() {
        let json = r##"{
            "event_type": "FullSnapshotEvent",
            "iteration": 0,
            "iteration_label": "Starting...",
            "current_iteration": 0,
            "total_iterations": 1,
            "progress": 0.25,
            "realization_count": 2,
            "status_count": {"Waiting": 2},
            "timestamp": "2024-05-01T12:00:00Z",
            "snapshot": {
                "metadata": {
                    "aggr_job_status_colors": {"Running": "#ffd700"},
                    "real_status_colors": {"Waiting": "#c8c8c8"},
                    "sorted_real_ids": ["0", "1"],
                    "sorted_forward_model_ids": {"0": ["0", "1"]}
                },
                "status": "Unknown",
                "reals": {
                    "0": {"status": "Waiting", "active": true},
                    "1": {"status": "Waiting", "active": true}
                }
            }
        }"##;

        let event: SnapshotEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), "FullSnapshotEvent");
        assert_eq!(event.iteration(), 0);
        let SnapshotEvent::Full(full) = event else {
            panic!("expected full snapshot");
        };
        assert_eq!(full.snapshot.reals.len(), 2);
        assert_eq!(
            full.snapshot.realization("1").map(|r| r.status),
            Some(RealizationStatus::Waiting)
        );
    }

    #[test]
    fn decodes_minimal_update_event() {
        let json = r#"{
            "event_type": "SnapshotUpdateEvent",
            "iteration": 3,
            "snapshot": {"reals": {"7": {"status": "Running"}}}
        }"#;

        let event: SnapshotEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), "SnapshotUpdateEvent");
        let update = event.into_update();
        assert_eq!(update.iteration, 3);
        assert!(update.progress.is_none());
        assert_eq!(update.snapshot.map(|s| s.touched_realizations()), Some(1));
    }

    #[test]
    fn rejects_negative_iteration() {
        let json = r#"{"event_type": "SnapshotUpdateEvent", "iteration": -1}"#;
        assert!(serde_json::from_str::<SnapshotEvent>(json).is_err());
    }

    #[test]
    fn rejects_missing_iteration() {
        let json = r#"{"event_type": "SnapshotUpdateEvent"}"#;
        assert!(serde_json::from_str::<SnapshotEvent>(json).is_err());
    }

    #[test]
    fn sparse_fields_are_optional_in_bindings() {
        let decl = SnapshotUpdateEvent::decl();
        assert!(decl.contains("iteration: number"));
        assert!(decl.contains("iteration_label?: string"));
        assert!(!decl.contains("| null"));
    }

    #[test]
    fn decodes_experiment_listing() {
        let json = r#"[{"id": "0190b3a0-7d2c-7c4e-9a51-3f1f0c2d9e11", "type": "es_mda"}]"#;
        let experiments: Vec<Experiment> = serde_json::from_str(json).unwrap();
        assert_eq!(experiments.len(), 1);
        assert_eq!(experiments.first().map(|e| e.kind.as_str()), Some("es_mda"));
    }
}
