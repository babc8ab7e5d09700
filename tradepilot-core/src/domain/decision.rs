//! Decision records and order intents — the two things the core emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::SnapshotHash;
use super::position::Side;
use super::regime::{RegimeType, VolatilityLevel};

/// What the bot decided on a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    NoTrade,
    Enter,
    Hold,
    Exit,
    AdjustStop,
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionAction::NoTrade => "no_trade",
            DecisionAction::Enter => "enter",
            DecisionAction::Hold => "hold",
            DecisionAction::Exit => "exit",
            DecisionAction::AdjustStop => "adjust_stop",
        };
        f.write_str(s)
    }
}

/// Who produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    RuleBased,
    Llm,
    Manual,
}

/// One decision per processed bar. Never mutated once logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub bar_index: usize,
    pub timestamp: DateTime<Utc>,
    pub action: DecisionAction,
    pub side: Option<Side>,
    pub confidence: f64,
    pub snapshot_hash: SnapshotHash,
    pub regime: RegimeType,
    pub volatility: VolatilityLevel,
    pub strategy: Option<String>,
    pub stop_before: Option<f64>,
    pub stop_after: Option<f64>,
    pub reasons: Vec<String>,
    pub source: DecisionSource,
}

/// Instruction pushed to the order-execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderIntent {
    Open {
        side: Side,
        quantity: f64,
        reference_price: f64,
        stop: f64,
    },
    Close {
        side: Side,
        quantity: f64,
        reason: String,
        urgency: u8,
    },
    UpdateStop {
        side: Side,
        stop: f64,
    },
}

impl OrderIntent {
    pub fn is_open(&self) -> bool {
        matches!(self, OrderIntent::Open { .. })
    }
}
