use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::position::{Position, Side};

/// Record of a completed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub side: Side,
    pub strategy: String,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub initial_stop: f64,
    pub final_stop: f64,
    pub stop_updates: u32,
    pub bars_held: u32,
    pub exit_reason: String,
}

impl ClosedTrade {
    pub fn from_position(
        position: &Position,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        exit_reason: impl Into<String>,
    ) -> Self {
        let pnl = (exit_price - position.entry_price) * position.side.sign() * position.quantity
            + position.realized_pnl;
        Self {
            side: position.side,
            strategy: position.strategy.clone(),
            entry_time: position.entry_time,
            entry_price: position.entry_price,
            exit_time,
            exit_price,
            quantity: position.quantity,
            pnl,
            initial_stop: position.trailing.initial_stop(),
            final_stop: position.stop(),
            stop_updates: position.trailing.update_count(),
            bars_held: position.bars_held,
            exit_reason: exit_reason.into(),
        }
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}
