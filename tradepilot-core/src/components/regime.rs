//! Regime classification — trend direction and volatility level per bar.
//!
//! [`ThresholdClassifier`] is the hardcoded path: ADX gates trend vs. range,
//! +DI/-DI (or price vs. the slow moving average) picks the direction, and ATR
//! as a percentage of price buckets volatility. The declarative path lives in
//! [`crate::rules::RuleRegimeClassifier`] and falls back to this one.

use std::collections::BTreeMap;

use crate::config::RegimeConfig;
use crate::domain::{keys, FeatureSnapshot, RegimeSource, RegimeState, RegimeType, VolatilityLevel};

/// Trait for regime classifiers.
///
/// Classifiers are pure with respect to the snapshot: the same input always
/// yields the same state, and a state is never mutated after construction.
pub trait RegimeClassifier: Send + Sync {
    /// Human-readable name (e.g., "threshold", "rules").
    fn name(&self) -> &str;

    fn classify(&self, snapshot: &FeatureSnapshot) -> RegimeState;
}

/// Rule-of-thumb classifier driven by ADX, directional indices, and ATR%.
#[derive(Debug, Clone, Default)]
pub struct ThresholdClassifier {
    pub config: RegimeConfig,
}

impl ThresholdClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    /// Volatility bucket and its confidence from ATR% of price.
    ///
    /// Missing ATR reads as `Normal` with zero confidence.
    pub fn classify_volatility(&self, atr_pct: Option<f64>) -> (VolatilityLevel, f64) {
        let Some(pct) = atr_pct else {
            return (VolatilityLevel::Normal, 0.0);
        };
        let c = &self.config;
        let level = if pct > c.vol_extreme_pct {
            VolatilityLevel::Extreme
        } else if pct > c.vol_high_pct {
            VolatilityLevel::High
        } else if pct < c.vol_low_pct {
            VolatilityLevel::Low
        } else {
            VolatilityLevel::Normal
        };
        let nearest_boundary = [c.vol_low_pct, c.vol_high_pct, c.vol_extreme_pct]
            .iter()
            .map(|b| (pct - b).abs())
            .fold(f64::INFINITY, f64::min);
        (level, (0.5 + nearest_boundary).min(1.0))
    }

    fn classify_trend(&self, snapshot: &FeatureSnapshot) -> (RegimeType, f64) {
        let threshold = self.config.adx_trend_threshold;
        let Some(adx) = snapshot.get(keys::ADX) else {
            return (RegimeType::Unknown, 0.0);
        };

        if adx <= threshold {
            let confidence = (0.5 + (threshold - adx) / (2.0 * threshold)).clamp(0.5, 1.0);
            return (RegimeType::Range, confidence);
        }

        let strength = (0.5 + (adx - threshold) / (2.0 * threshold)).clamp(0.5, 1.0);
        match (snapshot.get(keys::PLUS_DI), snapshot.get(keys::MINUS_DI)) {
            (Some(plus), Some(minus)) if plus != minus => {
                let regime = if plus > minus {
                    RegimeType::TrendUp
                } else {
                    RegimeType::TrendDown
                };
                (regime, strength)
            }
            _ => match snapshot.slow_ma() {
                // Price vs. moving average is a weaker directional read.
                Some(ma) if snapshot.close > ma => (RegimeType::TrendUp, strength * 0.8),
                Some(ma) if snapshot.close < ma => (RegimeType::TrendDown, strength * 0.8),
                _ => (RegimeType::Unknown, 0.0),
            },
        }
    }
}

impl RegimeClassifier for ThresholdClassifier {
    fn name(&self) -> &str {
        "threshold"
    }

    fn classify(&self, snapshot: &FeatureSnapshot) -> RegimeState {
        let (regime, regime_confidence) = self.classify_trend(snapshot);
        let atr_pct = snapshot.atr_pct();
        let (volatility, volatility_confidence) = self.classify_volatility(atr_pct);

        let mut metrics = BTreeMap::new();
        for key in [keys::ADX, keys::PLUS_DI, keys::MINUS_DI, keys::ATR] {
            if let Some(v) = snapshot.get(key) {
                metrics.insert(key.to_string(), v);
            }
        }
        if let Some(pct) = atr_pct {
            metrics.insert("atr_pct".to_string(), pct);
        }

        RegimeState {
            timestamp: snapshot.timestamp,
            regime,
            volatility,
            regime_confidence,
            volatility_confidence,
            metrics,
            source: RegimeSource::Threshold,
            rule_regime_id: None,
            active_rule_ids: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snap(close: f64) -> FeatureSnapshot {
        FeatureSnapshot::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            close,
            close + 1.0,
            close - 1.0,
            close,
            1_000.0,
        )
    }

    #[test]
    fn strong_adx_with_di_is_trend_up() {
        let c = ThresholdClassifier::default();
        let s = snap(100.0)
            .with(keys::ADX, 32.0)
            .with(keys::PLUS_DI, 28.0)
            .with(keys::MINUS_DI, 12.0);
        let state = c.classify(&s);
        assert_eq!(state.regime, RegimeType::TrendUp);
        assert!(state.regime_confidence > 0.5);
        assert_eq!(state.source, RegimeSource::Threshold);
    }

    #[test]
    fn strong_adx_falls_back_to_ma_direction() {
        let c = ThresholdClassifier::default();
        let s = snap(100.0).with(keys::ADX, 30.0).with(keys::SMA_SLOW, 105.0);
        assert_eq!(c.classify(&s).regime, RegimeType::TrendDown);
    }

    #[test]
    fn weak_adx_is_range() {
        let c = ThresholdClassifier::default();
        let s = snap(100.0).with(keys::ADX, 15.0);
        let state = c.classify(&s);
        assert_eq!(state.regime, RegimeType::Range);
        assert!((state.regime_confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn missing_adx_is_unknown() {
        let c = ThresholdClassifier::default();
        let state = c.classify(&snap(100.0));
        assert_eq!(state.regime, RegimeType::Unknown);
        assert_eq!(state.regime_confidence, 0.0);
    }

    #[test]
    fn volatility_buckets() {
        let c = ThresholdClassifier::default();
        assert_eq!(c.classify_volatility(Some(3.5)).0, VolatilityLevel::Extreme);
        assert_eq!(c.classify_volatility(Some(2.5)).0, VolatilityLevel::High);
        assert_eq!(c.classify_volatility(Some(1.0)).0, VolatilityLevel::Normal);
        assert_eq!(c.classify_volatility(Some(0.3)).0, VolatilityLevel::Low);
        assert_eq!(c.classify_volatility(None), (VolatilityLevel::Normal, 0.0));
    }

    #[test]
    fn boundary_values_are_not_promoted() {
        let c = ThresholdClassifier::default();
        // exactly 3% is high, not extreme; exactly 2% is normal, not high
        assert_eq!(c.classify_volatility(Some(3.0)).0, VolatilityLevel::High);
        assert_eq!(c.classify_volatility(Some(2.0)).0, VolatilityLevel::Normal);
        assert_eq!(c.classify_volatility(Some(0.5)).0, VolatilityLevel::Normal);
    }

    #[test]
    fn metrics_are_recorded() {
        let c = ThresholdClassifier::default();
        let s = snap(100.0).with(keys::ADX, 20.0).with(keys::ATR, 1.5);
        let state = c.classify(&s);
        assert_eq!(state.metric(keys::ADX), Some(20.0));
        assert!((state.metric("atr_pct").unwrap() - 1.5).abs() < 1e-12);
    }
}
