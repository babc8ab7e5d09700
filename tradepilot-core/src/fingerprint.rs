//! Run fingerprinting — deterministic identification of what a run consumed.
//!
//! - `Fingerprint`: BLAKE3 hex digest.
//! - `config_fingerprint`: bot configuration (every parameter value).
//! - `rules_fingerprint`: rules document.
//! - `dataset_fingerprint`: ordered snapshot stream.
//! - `RunFingerprint`: the record written into a run summary.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::BotConfig;
use crate::domain::FeatureSnapshot;
use crate::rules::RulesDocument;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash the canonical JSON of the configuration.
///
/// Struct fields serialize in declaration order and maps are `BTreeMap`s, so
/// equal configs always hash identically.
pub fn config_fingerprint(config: &BotConfig) -> Fingerprint {
    let json = serde_json::to_vec(config).unwrap_or_default();
    Fingerprint::from_bytes(&json)
}

pub fn rules_fingerprint(document: &RulesDocument) -> Fingerprint {
    let json = serde_json::to_vec(document).unwrap_or_default();
    Fingerprint::from_bytes(&json)
}

/// Order-sensitive hash over each snapshot's content hash.
pub fn dataset_fingerprint(snapshots: &[FeatureSnapshot]) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    for snapshot in snapshots {
        hasher.update(snapshot.content_hash().0.as_bytes());
    }
    Fingerprint(hasher.finalize().to_hex().to_string())
}

/// Complete identification of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFingerprint {
    pub config: Fingerprint,
    pub rules: Option<Fingerprint>,
    pub dataset: Fingerprint,
    pub bars: usize,
    /// Component names, e.g. `regime=threshold scorer=weighted ...`.
    pub pipeline: String,
}

impl RunFingerprint {
    pub fn new(
        config: &BotConfig,
        rules: Option<&RulesDocument>,
        snapshots: &[FeatureSnapshot],
        pipeline: impl Into<String>,
    ) -> Self {
        Self {
            config: config_fingerprint(config),
            rules: rules.map(rules_fingerprint),
            dataset: dataset_fingerprint(snapshots),
            bars: snapshots.len(),
            pipeline: pipeline.into(),
        }
    }
}
