//! Enumeration types for the snapshot data model.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Lifecycle status of a single realization.
///
/// Serialized with the exact capitalized names the event source emits
/// (`"Waiting"`, `"Pending"`, ...). [`RealizationStatus::Unknown`] is the
/// zero value used when an update event creates a realization without
/// stating its status.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub enum RealizationStatus {
    /// Waiting for resources before being submitted.
    Waiting,
    /// Submitted to the queue, not yet started.
    Pending,
    /// Forward models are executing.
    Running,
    /// All forward models completed successfully.
    Finished,
    /// At least one forward model failed.
    Failed,
    /// No status has been reported yet.
    #[default]
    Unknown,
}

impl RealizationStatus {
    /// Whether the realization has reached a terminal state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// The wire name of this status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "Waiting",
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Finished => "Finished",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl core::fmt::Display for RealizationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_wire_names() {
        let json = serde_json::to_string(&RealizationStatus::Running).unwrap();
        assert_eq!(json, "\"Running\"");
    }

    #[test]
    fn terminal_states() {
        assert!(RealizationStatus::Finished.is_terminal());
        assert!(RealizationStatus::Failed.is_terminal());
        assert!(!RealizationStatus::Pending.is_terminal());
        assert_eq!(RealizationStatus::default(), RealizationStatus::Unknown);
    }
}
