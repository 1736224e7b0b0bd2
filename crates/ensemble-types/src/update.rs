//! Sparse counterparts of the snapshot types, carried by update events.
//!
//! Every field is optional: `None` means "unchanged". Maps only contain the
//! keys that changed, so an update for one realization never mentions the
//! others. Full snapshot types convert losslessly into these, which lets a
//! single merge routine handle both event kinds.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::RealizationStatus;
use crate::snapshot::{ForwardModelState, RealizationState, Snapshot, SnapshotMetadata};

/// Changed fields of one forward-model step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ForwardModelUpdate {
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub status: Option<String>,
    /// New position index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub index: Option<String>,
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub name: Option<String>,
    /// New start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub start_time: Option<DateTime<Utc>>,
    /// New end time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub end_time: Option<DateTime<Utc>>,
    /// New stdout path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub stdout: Option<String>,
    /// New stderr path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub stderr: Option<String>,
    /// New memory sample, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub current_memory_usage: Option<u64>,
    /// New peak memory, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub max_memory_usage: Option<u64>,
    /// New error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<String>,
}

/// Changed fields of one realization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RealizationUpdate {
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub status: Option<RealizationStatus>,
    /// New active flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub active: Option<bool>,
    /// New start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub start_time: Option<DateTime<Utc>>,
    /// New end time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub end_time: Option<DateTime<Utc>>,
    /// Changed forward models, keyed by forward-model id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub forward_models: Option<BTreeMap<String, ForwardModelUpdate>>,
}

/// Changed metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MetadataUpdate {
    /// Changed aggregate status colors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub aggr_job_status_colors: Option<BTreeMap<String, String>>,
    /// Changed realization status colors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub real_status_colors: Option<BTreeMap<String, String>>,
    /// Replacement realization ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub sorted_real_ids: Option<Vec<String>>,
    /// Changed forward-model orderings, keyed by realization id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub sorted_forward_model_ids: Option<BTreeMap<String, Vec<String>>>,
}

/// Changed parts of a snapshot body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SnapshotUpdate {
    /// Changed metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub metadata: Option<MetadataUpdate>,
    /// New aggregate status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub status: Option<String>,
    /// Changed realizations. Absent when no realization changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub reals: Option<BTreeMap<String, RealizationUpdate>>,
}

impl From<ForwardModelState> for ForwardModelUpdate {
    fn from(state: ForwardModelState) -> Self {
        Self {
            status: Some(state.status),
            index: Some(state.index),
            name: Some(state.name),
            start_time: state.start_time,
            end_time: state.end_time,
            stdout: state.stdout,
            stderr: state.stderr,
            current_memory_usage: state.current_memory_usage,
            max_memory_usage: state.max_memory_usage,
            error: state.error,
        }
    }
}

impl From<RealizationState> for RealizationUpdate {
    fn from(state: RealizationState) -> Self {
        Self {
            status: Some(state.status),
            active: Some(state.active),
            start_time: state.start_time,
            end_time: state.end_time,
            forward_models: Some(
                state
                    .forward_models
                    .into_iter()
                    .map(|(id, fm)| (id, fm.into()))
                    .collect(),
            ),
        }
    }
}

impl From<SnapshotMetadata> for MetadataUpdate {
    fn from(metadata: SnapshotMetadata) -> Self {
        Self {
            aggr_job_status_colors: Some(metadata.aggr_job_status_colors),
            real_status_colors: Some(metadata.real_status_colors),
            sorted_real_ids: Some(metadata.sorted_real_ids),
            sorted_forward_model_ids: Some(metadata.sorted_forward_model_ids),
        }
    }
}

impl From<Snapshot> for SnapshotUpdate {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            metadata: Some(snapshot.metadata.into()),
            status: Some(snapshot.status),
            reals: Some(
                snapshot
                    .reals
                    .into_iter()
                    .map(|(id, real)| (id, real.into()))
                    .collect(),
            ),
        }
    }
}

impl SnapshotUpdate {
    /// Number of realizations touched by this update.
    pub fn touched_realizations(&self) -> usize {
        self.reals.as_ref().map_or(0, BTreeMap::len)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_reals_means_no_changes() {
        let update: SnapshotUpdate = serde_json::from_str(r#"{"status": "Running"}"#).unwrap();
        assert_eq!(update.status.as_deref(), Some("Running"));
        assert!(update.reals.is_none());
        assert_eq!(update.touched_realizations(), 0);
    }

    #[test]
    fn full_realization_converts_with_every_field_present() {
        let mut state = RealizationState {
            status: RealizationStatus::Running,
            active: true,
            ..RealizationState::default()
        };
        state
            .forward_models
            .insert("0".to_owned(), ForwardModelState::default());

        let update = RealizationUpdate::from(state);
        assert_eq!(update.status, Some(RealizationStatus::Running));
        assert_eq!(update.active, Some(true));
        assert_eq!(update.forward_models.map(|fms| fms.len()), Some(1));
    }

    #[test]
    fn rejects_mapping_in_place_of_scalar() {
        let result: Result<RealizationUpdate, _> =
            serde_json::from_str(r#"{"status": {"nested": true}}"#);
        assert!(result.is_err());
    }
}
