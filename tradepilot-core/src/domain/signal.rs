//! Entry signals.
//!
//! A signal is owned by the processor while it is a candidate. On confirmation
//! it is converted into an order intent and then a position; on expiry it is
//! dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::SignalId;
use super::position::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Candidate,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub side: Side,
    /// Entry score in [0, 1].
    pub score: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    /// Stop distance as a percentage of the entry price.
    pub stop_pct: f64,
    pub strategy: String,
    pub reasons: Vec<String>,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
    pub bar_index: usize,
}

impl Signal {
    pub fn is_candidate(&self) -> bool {
        self.status == SignalStatus::Candidate
    }

    /// Wall-clock age of the signal at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}
