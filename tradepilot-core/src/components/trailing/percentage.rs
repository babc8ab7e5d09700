//! Percentage trailing stop — trail a fixed percentage from the current price.
//!
//! For longs: candidate = close * (1 - pct/100).
//! For shorts: candidate = close * (1 + pct/100).

use crate::domain::{FeatureSnapshot, Position, Side, TrailingMode};

use super::{TrailingGate, TrailingStopCalculator};

#[derive(Debug, Clone)]
pub struct PercentTrailing {
    /// Distance from the current price, in percent (e.g., 1.0 for 1%).
    pub distance_pct: f64,
    pub gate: TrailingGate,
}

impl PercentTrailing {
    pub fn new(distance_pct: f64, gate: TrailingGate) -> Self {
        assert!(distance_pct > 0.0, "distance_pct must be positive");
        assert!(distance_pct < 100.0, "distance_pct must be < 100");
        Self { distance_pct, gate }
    }
}

impl TrailingStopCalculator for PercentTrailing {
    fn name(&self) -> &str {
        "percent_trailing"
    }

    fn mode(&self) -> TrailingMode {
        TrailingMode::Percentage
    }

    fn compute(&self, snapshot: &FeatureSnapshot, position: &Position) -> Option<f64> {
        if !self.gate.is_active(position) {
            return None;
        }
        let price = snapshot.close;
        let candidate = match position.side {
            Side::Long => price * (1.0 - self.distance_pct / 100.0),
            Side::Short => price * (1.0 + self.distance_pct / 100.0),
        };
        self.gate.accept(position.side, position.stop(), candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snap(close: f64) -> FeatureSnapshot {
        FeatureSnapshot::new(
            Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap(),
            close,
            close,
            close,
            close,
            0.0,
        )
    }

    fn open(side: Side, stop: f64) -> Position {
        Position::open(side, snap(100.0).timestamp, 100.0, 1.0, stop, TrailingMode::Percentage, "t")
    }

    #[test]
    fn activates_and_trails_long() {
        // entry 100, stop 98, activation 10%: at 100.5 return on risk is 25%
        let calc = PercentTrailing::new(1.0, TrailingGate::new(10.0, 0.1));
        let mut pos = open(Side::Long, 98.0);
        pos.update_mark(100.5, 100.5, 100.5);
        let stop = calc.compute(&snap(100.5), &pos).unwrap();
        assert!((stop - 99.495).abs() < 1e-9);
        assert!(stop >= 98.0);
    }

    #[test]
    fn below_activation_keeps_initial_stop() {
        let calc = PercentTrailing::new(1.0, TrailingGate::new(50.0, 0.1));
        let mut pos = open(Side::Long, 98.0);
        pos.update_mark(100.5, 100.5, 100.5); // 25% < 50%
        assert_eq!(calc.compute(&snap(100.5), &pos), None);
    }

    #[test]
    fn short_moves_down_only() {
        let calc = PercentTrailing::new(1.0, TrailingGate::new(10.0, 0.1));
        let mut pos = open(Side::Short, 102.0);
        pos.update_mark(99.0, 99.0, 99.0);
        let stop = calc.compute(&snap(99.0), &pos).unwrap();
        assert!((stop - 99.99).abs() < 1e-9);

        // price bounces up: candidate 101.0 vs stop 99.99 would loosen
        pos.trailing.tighten(stop, snap(99.0).timestamp, "trail").unwrap();
        pos.update_mark(100.0, 100.0, 100.0);
        assert_eq!(calc.compute(&snap(100.0), &pos), None);
    }
}
