//! Trailing stop calculators — monotonically tightening stops for open positions.
//!
//! Every calculator shares the same two gates:
//! - **Activation**: nothing moves until return on risk reaches `activation_pct`
//!   (once reached, the position stays activated).
//! - **Acceptance**: a candidate is returned only if it tightens the current stop
//!   by at least `min_step_pct` percent. Long stops only rise, short stops only fall.
//!
//! ## Concrete implementations
//!
//! - [`PercentTrailing`] — fixed percentage from the current price
//! - [`AtrTrailing`] — ATR distance from the extreme since entry, fixed or regime-adaptive
//! - [`StructureTrailing`] — Bollinger band plus an ATR buffer

pub mod atr;
pub mod percentage;
pub mod structure;

pub use atr::{AtrMultiplier, AtrTrailing};
pub use percentage::PercentTrailing;
pub use structure::StructureTrailing;

use crate::domain::{FeatureSnapshot, Position, Side, TrailingMode};

/// Trait for trailing stop calculators.
///
/// # Invariant
/// A returned stop always tightens the position's current stop. Returning a
/// looser stop is a defect; the bar processor rejects it and logs an error.
pub trait TrailingStopCalculator: Send + Sync {
    /// Human-readable name (e.g., "atr_trailing").
    fn name(&self) -> &str;

    fn mode(&self) -> TrailingMode;

    /// Proposed new stop for this bar, or `None` to keep the current stop.
    fn compute(&self, snapshot: &FeatureSnapshot, position: &Position) -> Option<f64>;
}

/// Activation and hysteresis gates shared by all modes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingGate {
    /// Return-on-risk percentage that switches trailing on.
    pub activation_pct: f64,
    /// Minimum move as a percentage of the current stop.
    pub min_step_pct: f64,
}

impl TrailingGate {
    pub fn new(activation_pct: f64, min_step_pct: f64) -> Self {
        Self {
            activation_pct,
            min_step_pct,
        }
    }

    /// True once the position has earned the right to trail.
    pub fn is_active(&self, position: &Position) -> bool {
        position.trailing.activated || position.return_on_risk_pct() >= self.activation_pct
    }

    /// Accept `candidate` only if it is a real tightening of at least the minimum step.
    pub fn accept(&self, side: Side, current: f64, candidate: f64) -> Option<f64> {
        if !candidate.is_finite() || candidate <= 0.0 {
            return None;
        }
        if !side.is_tighter(candidate, current) {
            return None;
        }
        let step_pct = if current > 0.0 {
            (candidate - current).abs() / current * 100.0
        } else {
            f64::INFINITY
        };
        if step_pct < self.min_step_pct {
            return None;
        }
        Some(candidate)
    }
}

impl Default for TrailingGate {
    fn default() -> Self {
        Self::new(10.0, 0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn position(stop: f64) -> Position {
        Position::open(
            Side::Long,
            Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap(),
            100.0,
            1.0,
            stop,
            TrailingMode::Percentage,
            "t",
        )
    }

    #[test]
    fn gate_requires_return_on_risk() {
        let gate = TrailingGate::new(10.0, 0.1);
        let mut pos = position(98.0);
        pos.update_mark(100.1, 100.1, 100.0); // 5% of risk
        assert!(!gate.is_active(&pos));
        pos.update_mark(100.5, 100.5, 100.0); // 25% of risk
        assert!(gate.is_active(&pos));
    }

    #[test]
    fn gate_stays_active_once_activated() {
        let gate = TrailingGate::new(10.0, 0.1);
        let mut pos = position(98.0);
        pos.trailing.activated = true;
        pos.update_mark(99.0, 99.0, 99.0);
        assert!(gate.is_active(&pos));
    }

    #[test]
    fn accept_rejects_loosening_and_tiny_steps() {
        let gate = TrailingGate::new(10.0, 0.1);
        assert_eq!(gate.accept(Side::Long, 98.0, 97.0), None);
        assert_eq!(gate.accept(Side::Long, 98.0, 98.05), None); // 0.05%
        assert_eq!(gate.accept(Side::Long, 98.0, 98.2), Some(98.2));
        assert_eq!(gate.accept(Side::Short, 102.0, 103.0), None);
        assert_eq!(gate.accept(Side::Short, 102.0, 101.0), Some(101.0));
        assert_eq!(gate.accept(Side::Short, 102.0, f64::NAN), None);
    }
}
