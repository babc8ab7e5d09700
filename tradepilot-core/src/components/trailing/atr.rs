//! ATR trailing stop with an optional regime-adaptive multiplier.
//!
//! Stop distance = ATR × multiplier, measured from the most favorable price
//! since entry (highest high for longs, lowest low for shorts). The adaptive
//! multiplier widens in trends and narrows in ranges, so strong moves get room
//! to breathe while choppy markets trail tight.

use crate::config::TrailingConfig;
use crate::domain::{keys, FeatureSnapshot, Position, Side, TrailingMode};

use super::{TrailingGate, TrailingStopCalculator};

/// ADX at and above which the trending multiplier applies in full.
pub const ADX_TRENDING: f64 = 25.0;
/// ADX below which the ranging multiplier applies in full.
pub const ADX_RANGING: f64 = 20.0;

/// How the ATR multiplier is chosen each bar.
#[derive(Debug, Clone, PartialEq)]
pub enum AtrMultiplier {
    Fixed(f64),
    Adaptive {
        ranging: f64,
        trending: f64,
        /// Added when ATR% of price exceeds `bonus_above_pct`.
        volatility_bonus: f64,
        bonus_above_pct: f64,
    },
}

impl AtrMultiplier {
    pub fn from_config(config: &TrailingConfig) -> Self {
        if config.adaptive {
            AtrMultiplier::Adaptive {
                ranging: config.ranging_multiplier,
                trending: config.trending_multiplier,
                volatility_bonus: config.volatility_bonus,
                bonus_above_pct: config.volatility_bonus_above_pct,
            }
        } else {
            AtrMultiplier::Fixed(config.atr_multiplier)
        }
    }

    /// Effective multiplier for this bar.
    ///
    /// Without ADX the adaptive form uses the midpoint of its two multipliers.
    pub fn resolve(&self, adx: Option<f64>, atr_pct: Option<f64>) -> f64 {
        match *self {
            AtrMultiplier::Fixed(m) => m,
            AtrMultiplier::Adaptive {
                ranging,
                trending,
                volatility_bonus,
                bonus_above_pct,
            } => {
                let base = match adx {
                    Some(adx) if adx > ADX_TRENDING => trending,
                    Some(adx) if adx < ADX_RANGING => ranging,
                    Some(adx) => {
                        let t = (adx - ADX_RANGING) / (ADX_TRENDING - ADX_RANGING);
                        ranging + t * (trending - ranging)
                    }
                    None => (ranging + trending) / 2.0,
                };
                match atr_pct {
                    Some(pct) if pct > bonus_above_pct => base + volatility_bonus,
                    _ => base,
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AtrTrailing {
    pub multiplier: AtrMultiplier,
    pub gate: TrailingGate,
}

impl AtrTrailing {
    pub fn new(multiplier: AtrMultiplier, gate: TrailingGate) -> Self {
        Self { multiplier, gate }
    }
}

impl TrailingStopCalculator for AtrTrailing {
    fn name(&self) -> &str {
        "atr_trailing"
    }

    fn mode(&self) -> TrailingMode {
        TrailingMode::Atr
    }

    fn compute(&self, snapshot: &FeatureSnapshot, position: &Position) -> Option<f64> {
        if !self.gate.is_active(position) {
            return None;
        }
        let atr = snapshot.get(keys::ATR).filter(|a| *a > 0.0)?;
        let mult = self
            .multiplier
            .resolve(snapshot.get(keys::ADX), snapshot.atr_pct());
        let distance = atr * mult;
        let candidate = match position.side {
            Side::Long => position.trailing.highest_since_entry - distance,
            Side::Short => position.trailing.lowest_since_entry + distance,
        };
        self.gate.accept(position.side, position.stop(), candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn adaptive() -> AtrMultiplier {
        AtrMultiplier::from_config(&TrailingConfig::default())
    }

    #[test]
    fn adaptive_multiplier_interpolates() {
        let m = adaptive();
        assert_eq!(m.resolve(Some(30.0), None), 2.5);
        assert_eq!(m.resolve(Some(15.0), None), 1.5);
        assert!((m.resolve(Some(22.5), None) - 2.0).abs() < 1e-12);
        assert_eq!(m.resolve(None, None), 2.0);
    }

    #[test]
    fn volatility_bonus_above_two_percent() {
        let m = adaptive();
        assert_eq!(m.resolve(Some(30.0), Some(2.5)), 3.0);
        assert_eq!(m.resolve(Some(30.0), Some(2.0)), 2.5);
    }

    #[test]
    fn fixed_ignores_regime() {
        let m = AtrMultiplier::Fixed(3.0);
        assert_eq!(m.resolve(Some(40.0), Some(5.0)), 3.0);
    }

    #[test]
    fn trails_from_highest_high() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 16, 0, 0).unwrap();
        let calc = AtrTrailing::new(AtrMultiplier::Fixed(2.0), TrailingGate::new(10.0, 0.1));
        let mut pos = Position::open(Side::Long, ts, 100.0, 1.0, 95.0, TrailingMode::Atr, "t");
        pos.update_mark(104.0, 106.0, 103.0);
        let snap = FeatureSnapshot::new(ts, 104.0, 106.0, 103.0, 104.0, 0.0).with(keys::ATR, 1.5);
        let stop = calc.compute(&snap, &pos).unwrap();
        assert!((stop - 103.0).abs() < 1e-12);
    }

    #[test]
    fn missing_atr_keeps_stop() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 16, 0, 0).unwrap();
        let calc = AtrTrailing::new(adaptive(), TrailingGate::new(0.0, 0.1));
        let mut pos = Position::open(Side::Short, ts, 100.0, 1.0, 105.0, TrailingMode::Atr, "t");
        pos.update_mark(90.0, 91.0, 89.0);
        let snap = FeatureSnapshot::new(ts, 90.0, 91.0, 89.0, 90.0, 0.0);
        assert_eq!(calc.compute(&snap, &pos), None);
    }

    #[test]
    fn short_trails_from_lowest_low() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 16, 0, 0).unwrap();
        let calc = AtrTrailing::new(AtrMultiplier::Fixed(2.0), TrailingGate::new(10.0, 0.1));
        let mut pos = Position::open(Side::Short, ts, 100.0, 1.0, 105.0, TrailingMode::Atr, "t");
        pos.update_mark(95.0, 96.0, 94.0);
        let snap = FeatureSnapshot::new(ts, 95.0, 96.0, 94.0, 95.0, 0.0).with(keys::ATR, 1.0);
        let stop = calc.compute(&snap, &pos).unwrap();
        assert!((stop - 96.0).abs() < 1e-12);
    }
}
