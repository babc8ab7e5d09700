use serde::{Deserialize, Serialize};
use std::fmt;

use super::snapshot::FeatureSnapshot;

/// Content hash of a feature snapshot (BLAKE3 hex digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotHash(pub String);

impl SnapshotHash {
    /// Hash the canonical JSON serialization of a snapshot.
    ///
    /// Indicator values live in a `BTreeMap`, so key order is stable and two
    /// equal snapshots always hash identically.
    pub fn of(snapshot: &FeatureSnapshot) -> Self {
        let bytes = serde_json::to_vec(snapshot).unwrap_or_default();
        Self(blake3::hash(&bytes).to_hex().to_string())
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for SnapshotHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic signal identifier, unique within one processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub u64);

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig-{}", self.0)
    }
}
