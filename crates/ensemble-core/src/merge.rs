//! Schema-aware recursive merge of sparse updates into consolidated state.
//!
//! Rules, applied field by field:
//!
//! - Scalars are overwritten only when the incoming field is present.
//! - Maps merge key-wise: untouched keys survive, incoming keys recurse into
//!   structured values or replace scalar ones. A key seen for the first time
//!   starts from the type's zero value.
//! - Ordered sequences are replaced wholesale.
//!
//! The patch types mirror the state types one-to-one, so a shape mismatch
//! (a mapping where a scalar belongs) is already rejected when the event is
//! decoded rather than silently producing an inconsistent record.

use std::collections::BTreeMap;

use ensemble_types::{
    ForwardModelState, ForwardModelUpdate, IterationSnapshot, MetadataUpdate, RealizationState,
    RealizationUpdate, Snapshot, SnapshotMetadata, SnapshotUpdate, SnapshotUpdateEvent,
};

/// Apply a sparse patch of type `P` onto `self` in place.
pub trait Merge<P> {
    /// Merge `patch` into `self`.
    fn merge(&mut self, patch: P);
}

/// Overwrite `slot` if `incoming` is present.
fn overwrite<T>(slot: &mut T, incoming: Option<T>) {
    if let Some(value) = incoming {
        *slot = value;
    }
}

/// Overwrite an optional `slot` if `incoming` is present.
fn overwrite_opt<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

/// Merge a map of structured values key-wise, recursing into each value.
fn merge_records<V, P>(map: &mut BTreeMap<String, V>, incoming: Option<BTreeMap<String, P>>)
where
    V: Default + Merge<P>,
{
    for (key, patch) in incoming.into_iter().flatten() {
        map.entry(key).or_default().merge(patch);
    }
}

/// Merge a map of plain values key-wise; incoming values replace.
fn merge_values<V>(map: &mut BTreeMap<String, V>, incoming: Option<BTreeMap<String, V>>) {
    if let Some(incoming) = incoming {
        map.extend(incoming);
    }
}

impl Merge<ForwardModelUpdate> for ForwardModelState {
    fn merge(&mut self, patch: ForwardModelUpdate) {
        overwrite(&mut self.status, patch.status);
        overwrite(&mut self.index, patch.index);
        overwrite(&mut self.name, patch.name);
        overwrite_opt(&mut self.start_time, patch.start_time);
        overwrite_opt(&mut self.end_time, patch.end_time);
        overwrite_opt(&mut self.stdout, patch.stdout);
        overwrite_opt(&mut self.stderr, patch.stderr);
        overwrite_opt(&mut self.current_memory_usage, patch.current_memory_usage);
        overwrite_opt(&mut self.max_memory_usage, patch.max_memory_usage);
        overwrite_opt(&mut self.error, patch.error);
    }
}

impl Merge<RealizationUpdate> for RealizationState {
    fn merge(&mut self, patch: RealizationUpdate) {
        overwrite(&mut self.status, patch.status);
        overwrite(&mut self.active, patch.active);
        overwrite_opt(&mut self.start_time, patch.start_time);
        overwrite_opt(&mut self.end_time, patch.end_time);
        merge_records(&mut self.forward_models, patch.forward_models);
    }
}

impl Merge<MetadataUpdate> for SnapshotMetadata {
    fn merge(&mut self, patch: MetadataUpdate) {
        merge_values(&mut self.aggr_job_status_colors, patch.aggr_job_status_colors);
        merge_values(&mut self.real_status_colors, patch.real_status_colors);
        overwrite(&mut self.sorted_real_ids, patch.sorted_real_ids);
        // Keyed by realization; each ordering is a sequence and replaces.
        merge_values(
            &mut self.sorted_forward_model_ids,
            patch.sorted_forward_model_ids,
        );
    }
}

impl Merge<SnapshotUpdate> for Snapshot {
    fn merge(&mut self, patch: SnapshotUpdate) {
        if let Some(metadata) = patch.metadata {
            self.metadata.merge(metadata);
        }
        overwrite(&mut self.status, patch.status);
        merge_records(&mut self.reals, patch.reals);
    }
}

impl Merge<SnapshotUpdateEvent> for IterationSnapshot {
    fn merge(&mut self, patch: SnapshotUpdateEvent) {
        overwrite(&mut self.iteration_label, patch.iteration_label);
        overwrite(&mut self.current_iteration, patch.current_iteration);
        overwrite(&mut self.total_iterations, patch.total_iterations);
        overwrite(&mut self.progress, patch.progress);
        overwrite(&mut self.realization_count, patch.realization_count);
        merge_values(&mut self.status_count, patch.status_count);
        overwrite_opt(&mut self.timestamp, patch.timestamp);
        if let Some(snapshot) = patch.snapshot {
            self.snapshot.merge(snapshot);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ensemble_types::RealizationStatus;

    fn real(status: RealizationStatus) -> RealizationState {
        RealizationState {
            status,
            active: true,
            ..RealizationState::default()
        }
    }

    fn status_patch(status: RealizationStatus) -> RealizationUpdate {
        RealizationUpdate {
            status: Some(status),
            ..RealizationUpdate::default()
        }
    }

    #[test]
    fn absent_fields_leave_existing_values() {
        let mut state = real(RealizationStatus::Pending);
        state.merge(RealizationUpdate::default());
        assert_eq!(state, real(RealizationStatus::Pending));
    }

    #[test]
    fn present_scalar_overwrites() {
        let mut state = real(RealizationStatus::Pending);
        state.merge(status_patch(RealizationStatus::Running));
        assert_eq!(state.status, RealizationStatus::Running);
        assert!(state.active);
    }

    #[test]
    fn untouched_realizations_survive() {
        let mut snapshot = Snapshot::default();
        snapshot
            .reals
            .insert("A".to_owned(), real(RealizationStatus::Pending));
        snapshot
            .reals
            .insert("B".to_owned(), real(RealizationStatus::Waiting));

        snapshot.merge(SnapshotUpdate {
            reals: Some(BTreeMap::from([(
                "A".to_owned(),
                status_patch(RealizationStatus::Running),
            )])),
            ..SnapshotUpdate::default()
        });

        assert_eq!(snapshot.reals.len(), 2);
        assert_eq!(
            snapshot.reals.get("A").map(|r| r.status),
            Some(RealizationStatus::Running)
        );
        assert_eq!(
            snapshot.reals.get("B"),
            Some(&real(RealizationStatus::Waiting))
        );
    }

    #[test]
    fn forward_models_merge_per_key_and_per_field() {
        let mut state = real(RealizationStatus::Running);
        state.forward_models.insert(
            "0".to_owned(),
            ForwardModelState {
                status: "Running".to_owned(),
                name: "eclipse".to_owned(),
                stdout: Some("eclipse.stdout.0".to_owned()),
                ..ForwardModelState::default()
            },
        );
        state.forward_models.insert(
            "1".to_owned(),
            ForwardModelState {
                status: "Pending".to_owned(),
                name: "rms".to_owned(),
                ..ForwardModelState::default()
            },
        );

        state.merge(RealizationUpdate {
            forward_models: Some(BTreeMap::from([(
                "0".to_owned(),
                ForwardModelUpdate {
                    status: Some("Finished".to_owned()),
                    max_memory_usage: Some(4096),
                    ..ForwardModelUpdate::default()
                },
            )])),
            ..RealizationUpdate::default()
        });

        let first = state.forward_models.get("0").unwrap();
        assert_eq!(first.status, "Finished");
        assert_eq!(first.name, "eclipse");
        assert_eq!(first.stdout.as_deref(), Some("eclipse.stdout.0"));
        assert_eq!(first.max_memory_usage, Some(4096));
        assert_eq!(state.forward_models.get("1").unwrap().status, "Pending");
    }

    #[test]
    fn new_key_starts_from_zero_value() {
        let mut snapshot = Snapshot::default();
        snapshot.merge(SnapshotUpdate {
            reals: Some(BTreeMap::from([(
                "9".to_owned(),
                RealizationUpdate {
                    active: Some(true),
                    ..RealizationUpdate::default()
                },
            )])),
            ..SnapshotUpdate::default()
        });

        let created = snapshot.reals.get("9").unwrap();
        assert!(created.active);
        assert_eq!(created.status, RealizationStatus::Unknown);
    }

    #[test]
    fn sequences_replace_wholesale() {
        let mut metadata = SnapshotMetadata {
            sorted_real_ids: vec!["0".to_owned(), "1".to_owned(), "2".to_owned()],
            sorted_forward_model_ids: BTreeMap::from([
                ("0".to_owned(), vec!["a".to_owned(), "b".to_owned()]),
                ("1".to_owned(), vec!["a".to_owned()]),
            ]),
            ..SnapshotMetadata::default()
        };

        metadata.merge(MetadataUpdate {
            sorted_real_ids: Some(vec!["2".to_owned()]),
            sorted_forward_model_ids: Some(BTreeMap::from([(
                "0".to_owned(),
                vec!["c".to_owned()],
            )])),
            ..MetadataUpdate::default()
        });

        assert_eq!(metadata.sorted_real_ids, vec!["2".to_owned()]);
        assert_eq!(
            metadata.sorted_forward_model_ids.get("0"),
            Some(&vec!["c".to_owned()])
        );
        assert_eq!(
            metadata.sorted_forward_model_ids.get("1"),
            Some(&vec!["a".to_owned()])
        );
    }

    #[test]
    fn color_tables_merge_key_wise() {
        let mut metadata = SnapshotMetadata {
            real_status_colors: BTreeMap::from([
                ("Waiting".to_owned(), "#c8c8c8".to_owned()),
                ("Failed".to_owned(), "#ff0000".to_owned()),
            ]),
            ..SnapshotMetadata::default()
        };

        metadata.merge(MetadataUpdate {
            real_status_colors: Some(BTreeMap::from([(
                "Failed".to_owned(),
                "#aa0000".to_owned(),
            )])),
            ..MetadataUpdate::default()
        });

        assert_eq!(
            metadata.real_status_colors.get("Waiting").map(String::as_str),
            Some("#c8c8c8")
        );
        assert_eq!(
            metadata.real_status_colors.get("Failed").map(String::as_str),
            Some("#aa0000")
        );
    }

    #[test]
    fn envelope_scalars_and_counts() {
        let mut iteration = IterationSnapshot::empty(1);
        iteration.status_count.insert("Pending".to_owned(), 3);

        iteration.merge(SnapshotUpdateEvent {
            iteration: 1,
            progress: Some(0.5),
            status_count: Some(BTreeMap::from([("Running".to_owned(), 2)])),
            ..SnapshotUpdateEvent::default()
        });

        assert_eq!(iteration.iteration, 1);
        assert!((iteration.progress - 0.5).abs() < f64::EPSILON);
        assert_eq!(iteration.status_count.get("Pending"), Some(&3));
        assert_eq!(iteration.status_count.get("Running"), Some(&2));
        assert!(iteration.iteration_label.is_empty());
    }
}
