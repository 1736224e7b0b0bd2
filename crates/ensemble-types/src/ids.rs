//! Type-safe identifier wrapper around [`Uuid`].
//!
//! Experiments are identified by UUIDs assigned by the storage server.
//! The wrapper keeps experiment ids from being confused with realization
//! or forward-model ids, which are plain strings in the snapshot model.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Unique identifier for an experiment observed by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ExperimentId(pub Uuid);

impl ExperimentId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for ExperimentId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl core::str::FromStr for ExperimentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for ExperimentId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<ExperimentId> for Uuid {
    fn from(id: ExperimentId) -> Self {
        id.0
    }
}
