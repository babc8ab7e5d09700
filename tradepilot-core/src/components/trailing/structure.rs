//! Structure trailing stop — park the stop just beyond the Bollinger band.
//!
//! Long: lower band minus `buffer_atr` × ATR. Short: upper band plus the buffer.
//! Without ATR the band itself is used.

use crate::domain::{keys, FeatureSnapshot, Position, Side, TrailingMode};

use super::{TrailingGate, TrailingStopCalculator};

#[derive(Debug, Clone)]
pub struct StructureTrailing {
    pub buffer_atr: f64,
    pub gate: TrailingGate,
}

impl StructureTrailing {
    pub fn new(buffer_atr: f64, gate: TrailingGate) -> Self {
        Self { buffer_atr, gate }
    }
}

impl TrailingStopCalculator for StructureTrailing {
    fn name(&self) -> &str {
        "structure_trailing"
    }

    fn mode(&self) -> TrailingMode {
        TrailingMode::Structure
    }

    fn compute(&self, snapshot: &FeatureSnapshot, position: &Position) -> Option<f64> {
        if !self.gate.is_active(position) {
            return None;
        }
        let buffer = snapshot.get(keys::ATR).unwrap_or(0.0) * self.buffer_atr;
        let candidate = match position.side {
            Side::Long => snapshot.get(keys::BB_LOWER)? - buffer,
            Side::Short => snapshot.get(keys::BB_UPPER)? + buffer,
        };
        self.gate.accept(position.side, position.stop(), candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn long_uses_lower_band_minus_buffer() {
        let ts = Utc.with_ymd_and_hms(2024, 7, 1, 13, 0, 0).unwrap();
        let calc = StructureTrailing::new(0.5, TrailingGate::new(10.0, 0.1));
        let mut pos = Position::open(Side::Long, ts, 100.0, 1.0, 96.0, TrailingMode::Structure, "t");
        pos.update_mark(103.0, 103.5, 102.0);
        let snap = FeatureSnapshot::new(ts, 103.0, 103.5, 102.0, 103.0, 0.0)
            .with(keys::BB_LOWER, 99.0)
            .with(keys::BB_UPPER, 106.0)
            .with(keys::ATR, 1.0);
        let stop = calc.compute(&snap, &pos).unwrap();
        assert!((stop - 98.5).abs() < 1e-12);
    }

    #[test]
    fn band_below_current_stop_is_ignored() {
        let ts = Utc.with_ymd_and_hms(2024, 7, 1, 13, 0, 0).unwrap();
        let calc = StructureTrailing::new(0.5, TrailingGate::new(10.0, 0.1));
        let mut pos = Position::open(Side::Long, ts, 100.0, 1.0, 98.0, TrailingMode::Structure, "t");
        pos.update_mark(101.0, 101.0, 100.0);
        let snap = FeatureSnapshot::new(ts, 101.0, 101.0, 100.0, 101.0, 0.0)
            .with(keys::BB_LOWER, 97.0);
        assert_eq!(calc.compute(&snap, &pos), None);
    }

    #[test]
    fn missing_band_keeps_stop() {
        let ts = Utc.with_ymd_and_hms(2024, 7, 1, 13, 0, 0).unwrap();
        let calc = StructureTrailing::new(0.5, TrailingGate::new(0.0, 0.1));
        let pos = Position::open(Side::Short, ts, 100.0, 1.0, 104.0, TrailingMode::Structure, "t");
        let snap = FeatureSnapshot::new(ts, 100.0, 100.0, 100.0, 100.0, 0.0);
        assert_eq!(calc.compute(&snap, &pos), None);
    }
}
