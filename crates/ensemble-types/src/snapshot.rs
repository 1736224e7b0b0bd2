//! Full snapshot bodies.
//!
//! A [`Snapshot`] is the complete description of one iteration: display
//! metadata plus the state of every realization and of every forward model
//! inside each realization. Maps are [`BTreeMap`]s so serialized output is
//! deterministic and realizations render in a stable order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::RealizationStatus;

/// State of one forward-model step inside a realization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ForwardModelState {
    /// Free-form status reported by the job runner (`Pending`, `Running`, ...).
    #[serde(default)]
    pub status: String,
    /// Position of the step within the realization's forward-model list.
    #[serde(default)]
    pub index: String,
    /// Display name of the step.
    #[serde(default)]
    pub name: String,
    /// When the step started.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// When the step ended.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Path of the captured stdout file.
    #[serde(default)]
    pub stdout: Option<String>,
    /// Path of the captured stderr file.
    #[serde(default)]
    pub stderr: Option<String>,
    /// Most recent resident memory sample, in bytes.
    #[serde(default)]
    pub current_memory_usage: Option<u64>,
    /// Peak resident memory observed, in bytes.
    #[serde(default)]
    pub max_memory_usage: Option<u64>,
    /// Error text if the step failed.
    #[serde(default)]
    pub error: Option<String>,
}

/// State of one realization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RealizationState {
    /// Current lifecycle status.
    #[serde(default)]
    pub status: RealizationStatus,
    /// Whether the realization takes part in this iteration.
    #[serde(default)]
    pub active: bool,
    /// When the realization started running.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// When the realization reached a terminal state.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Forward-model steps keyed by forward-model id.
    #[serde(default)]
    pub forward_models: BTreeMap<String, ForwardModelState>,
}

/// Rendering hints shipped alongside a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SnapshotMetadata {
    /// Colors for aggregated forward-model statuses, keyed by status name.
    #[serde(default)]
    pub aggr_job_status_colors: BTreeMap<String, String>,
    /// Colors for realization statuses, keyed by status name.
    #[serde(default)]
    pub real_status_colors: BTreeMap<String, String>,
    /// Canonical display order of realization ids.
    #[serde(default)]
    pub sorted_real_ids: Vec<String>,
    /// Canonical forward-model order, keyed by realization id.
    #[serde(default)]
    pub sorted_forward_model_ids: BTreeMap<String, Vec<String>>,
}

/// Complete state of one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Snapshot {
    /// Rendering metadata.
    #[serde(default)]
    pub metadata: SnapshotMetadata,
    /// Aggregate status of the iteration.
    #[serde(default)]
    pub status: String,
    /// Realizations keyed by realization id.
    #[serde(default)]
    pub reals: BTreeMap<String, RealizationState>,
}

impl Snapshot {
    /// Look up a realization by id.
    pub fn realization(&self, real_id: &str) -> Option<&RealizationState> {
        self.reals.get(real_id)
    }

    /// Count realizations per status.
    pub fn status_counts(&self) -> BTreeMap<RealizationStatus, usize> {
        let mut counts = BTreeMap::new();
        for real in self.reals.values() {
            let entry = counts.entry(real.status).or_insert(0_usize);
            *entry = entry.saturating_add(1);
        }
        counts
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decodes_sparse_realization_with_defaults() {
        let real: RealizationState =
            serde_json::from_str(r#"{"status": "Pending"}"#).unwrap();
        assert_eq!(real.status, RealizationStatus::Pending);
        assert!(!real.active);
        assert!(real.forward_models.is_empty());
    }

    #[test]
    fn counts_statuses() {
        let mut snapshot = Snapshot::default();
        for (id, status) in [
            ("0", RealizationStatus::Running),
            ("1", RealizationStatus::Running),
            ("2", RealizationStatus::Failed),
        ] {
            snapshot.reals.insert(
                id.to_owned(),
                RealizationState {
                    status,
                    ..RealizationState::default()
                },
            );
        }

        let counts = snapshot.status_counts();
        assert_eq!(counts.get(&RealizationStatus::Running), Some(&2));
        assert_eq!(counts.get(&RealizationStatus::Failed), Some(&1));
        assert_eq!(counts.get(&RealizationStatus::Pending), None);
    }
}
