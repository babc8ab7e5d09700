//! Position and trailing-stop state.
//!
//! `TrailingState` carries the ratchet invariant: a long stop may only rise and
//! a short stop may only fall over the whole lifetime of a position. Any attempt
//! to loosen is rejected with [`TrailingError::Loosening`] and leaves the state
//! untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Maximum number of stop changes retained per position.
pub const STOP_HISTORY_LIMIT: usize = 50;

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for long, -1.0 for short.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// True if `candidate` is a tighter stop than `current` for this side.
    pub fn is_tighter(self, candidate: f64, current: f64) -> bool {
        match self {
            Side::Long => candidate > current,
            Side::Short => candidate < current,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("long"),
            Side::Short => f.write_str("short"),
        }
    }
}

/// Trailing algorithm in use for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingMode {
    Percentage,
    Atr,
    Structure,
}

impl fmt::Display for TrailingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrailingMode::Percentage => f.write_str("percentage"),
            TrailingMode::Atr => f.write_str("atr"),
            TrailingMode::Structure => f.write_str("structure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrailingError {
    #[error("stop {proposed} would loosen {side} stop at {current}")]
    Loosening { side: Side, current: f64, proposed: f64 },

    #[error("stop price must be finite and positive, got {0}")]
    InvalidPrice(f64),
}

/// One recorded stop movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopChange {
    pub timestamp: DateTime<Utc>,
    pub from: f64,
    pub to: f64,
    pub reason: String,
}

/// Stop-management state embedded in a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingState {
    side: Side,
    current_stop: f64,
    initial_stop: f64,
    pub highest_since_entry: f64,
    pub lowest_since_entry: f64,
    pub mode: TrailingMode,
    /// Set once the return-on-risk activation threshold has been reached.
    pub activated: bool,
    update_count: u32,
    history: VecDeque<StopChange>,
}

impl TrailingState {
    pub fn new(side: Side, entry_price: f64, initial_stop: f64, mode: TrailingMode) -> Self {
        Self {
            side,
            current_stop: initial_stop,
            initial_stop,
            highest_since_entry: entry_price,
            lowest_since_entry: entry_price,
            mode,
            activated: false,
            update_count: 0,
            history: VecDeque::new(),
        }
    }

    pub fn current_stop(&self) -> f64 {
        self.current_stop
    }

    pub fn initial_stop(&self) -> f64 {
        self.initial_stop
    }

    pub fn update_count(&self) -> u32 {
        self.update_count
    }

    pub fn history(&self) -> impl Iterator<Item = &StopChange> {
        self.history.iter()
    }

    /// Track the price extremes seen since entry.
    pub fn observe(&mut self, high: f64, low: f64) {
        if high.is_finite() && high > self.highest_since_entry {
            self.highest_since_entry = high;
        }
        if low.is_finite() && low < self.lowest_since_entry {
            self.lowest_since_entry = low;
        }
    }

    /// Move the stop to `proposed` if and only if it tightens.
    ///
    /// An equal price is accepted as a no-op; anything looser is rejected.
    pub fn tighten(
        &mut self,
        proposed: f64,
        timestamp: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<(), TrailingError> {
        if !proposed.is_finite() || proposed <= 0.0 {
            return Err(TrailingError::InvalidPrice(proposed));
        }
        if proposed == self.current_stop {
            return Ok(());
        }
        if !self.side.is_tighter(proposed, self.current_stop) {
            return Err(TrailingError::Loosening {
                side: self.side,
                current: self.current_stop,
                proposed,
            });
        }

        if self.history.len() == STOP_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(StopChange {
            timestamp,
            from: self.current_stop,
            to: proposed,
            reason: reason.into(),
        });
        self.current_stop = proposed;
        self.update_count += 1;
        Ok(())
    }
}

/// An open position. Created on fill, destroyed on exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub quantity: f64,
    pub current_price: f64,
    pub trailing: TrailingState,
    pub realized_pnl: f64,
    pub bars_held: u32,
    pub strategy: String,
}

impl Position {
    pub fn open(
        side: Side,
        entry_time: DateTime<Utc>,
        entry_price: f64,
        quantity: f64,
        stop: f64,
        mode: TrailingMode,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            side,
            entry_time,
            entry_price,
            quantity,
            current_price: entry_price,
            trailing: TrailingState::new(side, entry_price, stop, mode),
            realized_pnl: 0.0,
            bars_held: 0,
            strategy: strategy.into(),
        }
    }

    pub fn stop(&self) -> f64 {
        self.trailing.current_stop()
    }

    /// Mark to the bar's close and extend the since-entry extremes.
    pub fn update_mark(&mut self, close: f64, high: f64, low: f64) {
        self.current_price = close;
        self.trailing.observe(high, low);
    }

    /// Advance the bars-held counter by one bar.
    pub fn tick_bar(&mut self) {
        self.bars_held += 1;
    }

    /// Unrealized profit per unit at the current mark.
    pub fn pnl_per_unit(&self) -> f64 {
        (self.current_price - self.entry_price) * self.side.sign()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.pnl_per_unit() * self.quantity
    }

    /// Unrealized P&L as a percentage of the entry price.
    pub fn unrealized_pct(&self) -> f64 {
        if self.entry_price > 0.0 {
            self.pnl_per_unit() / self.entry_price * 100.0
        } else {
            0.0
        }
    }

    /// Distance between entry and the initial stop.
    pub fn initial_risk_per_unit(&self) -> f64 {
        (self.entry_price - self.trailing.initial_stop()).abs()
    }

    /// Unrealized P&L per unit over initial risk per unit, in percent.
    ///
    /// Zero when the initial risk is zero.
    pub fn return_on_risk_pct(&self) -> f64 {
        let risk = self.initial_risk_per_unit();
        if risk > 0.0 {
            self.pnl_per_unit() / risk * 100.0
        } else {
            0.0
        }
    }

    /// True if the bar's range touched the stop (wick breach counts).
    pub fn is_stop_breached(&self, high: f64, low: f64) -> bool {
        match self.side {
            Side::Long => low <= self.stop(),
            Side::Short => high >= self.stop(),
        }
    }

    pub fn is_in_profit(&self) -> bool {
        self.pnl_per_unit() > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn long_position() -> Position {
        Position::open(Side::Long, ts(), 100.0, 10.0, 98.0, TrailingMode::Percentage, "test")
    }

    #[test]
    fn long_tightening_allowed() {
        let mut state = TrailingState::new(Side::Long, 100.0, 95.0, TrailingMode::Atr);
        state.tighten(100.0, ts(), "trail").unwrap();
        assert_eq!(state.current_stop(), 100.0);
        assert_eq!(state.update_count(), 1);
    }

    #[test]
    fn long_loosening_blocked() {
        let mut state = TrailingState::new(Side::Long, 100.0, 95.0, TrailingMode::Atr);
        let err = state.tighten(90.0, ts(), "trail").unwrap_err();
        assert!(matches!(err, TrailingError::Loosening { .. }));
        assert_eq!(state.current_stop(), 95.0);
        assert_eq!(state.update_count(), 0);
    }

    #[test]
    fn short_tightening_and_loosening() {
        let mut state = TrailingState::new(Side::Short, 100.0, 105.0, TrailingMode::Atr);
        state.tighten(103.0, ts(), "trail").unwrap();
        assert!(state.tighten(104.0, ts(), "trail").is_err());
        assert_eq!(state.current_stop(), 103.0);
    }

    #[test]
    fn equal_stop_is_noop() {
        let mut state = TrailingState::new(Side::Long, 100.0, 95.0, TrailingMode::Atr);
        state.tighten(95.0, ts(), "noop").unwrap();
        assert_eq!(state.update_count(), 0);
        assert_eq!(state.history().count(), 0);
    }

    #[test]
    fn rejects_non_finite() {
        let mut state = TrailingState::new(Side::Long, 100.0, 95.0, TrailingMode::Atr);
        assert!(matches!(
            state.tighten(f64::NAN, ts(), "bad"),
            Err(TrailingError::InvalidPrice(_))
        ));
        assert!(state.tighten(f64::INFINITY, ts(), "bad").is_err());
        assert_eq!(state.current_stop(), 95.0);
    }

    #[test]
    fn history_is_bounded() {
        let mut state = TrailingState::new(Side::Long, 100.0, 1.0, TrailingMode::Atr);
        for i in 0..(STOP_HISTORY_LIMIT + 10) {
            state.tighten(2.0 + i as f64, ts(), "step").unwrap();
        }
        assert_eq!(state.history().count(), STOP_HISTORY_LIMIT);
        assert_eq!(state.update_count() as usize, STOP_HISTORY_LIMIT + 10);
    }

    #[test]
    fn return_on_risk() {
        let mut pos = long_position();
        pos.update_mark(100.5, 100.5, 100.0);
        // 0.5 profit over 2.0 risk
        assert!((pos.return_on_risk_pct() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn wick_breach_detected_even_if_close_recovers() {
        let pos = long_position();
        assert!(pos.is_stop_breached(101.0, 97.5));
        assert!(!pos.is_stop_breached(101.0, 98.5));
    }

    #[test]
    fn short_pnl_sign() {
        let mut pos = Position::open(Side::Short, ts(), 100.0, 2.0, 102.0, TrailingMode::Atr, "t");
        pos.update_mark(95.0, 96.0, 94.0);
        assert_eq!(pos.unrealized_pnl(), 10.0);
        assert_eq!(pos.trailing.lowest_since_entry, 94.0);
        assert!(pos.is_in_profit());
    }
}
