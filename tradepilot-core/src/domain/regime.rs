//! RegimeState — the classified market condition for one bar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::position::Side;

/// Trend regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeType {
    TrendUp,
    TrendDown,
    Range,
    Unknown,
}

impl RegimeType {
    /// True if this regime opposes a position on `side`.
    pub fn is_against(self, side: Side) -> bool {
        matches!(
            (self, side),
            (RegimeType::TrendDown, Side::Long) | (RegimeType::TrendUp, Side::Short)
        )
    }

    /// True if this regime agrees with a position on `side`.
    pub fn favors(self, side: Side) -> bool {
        matches!(
            (self, side),
            (RegimeType::TrendUp, Side::Long) | (RegimeType::TrendDown, Side::Short)
        )
    }
}

impl fmt::Display for RegimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegimeType::TrendUp => "trend_up",
            RegimeType::TrendDown => "trend_down",
            RegimeType::Range => "range",
            RegimeType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Volatility level derived from ATR as a percentage of price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityLevel {
    Low,
    Normal,
    High,
    Extreme,
}

impl fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolatilityLevel::Low => "low",
            VolatilityLevel::Normal => "normal",
            VolatilityLevel::High => "high",
            VolatilityLevel::Extreme => "extreme",
        };
        f.write_str(s)
    }
}

/// Which classifier produced a regime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeSource {
    Threshold,
    Rules,
}

/// Classified regime for one bar. Built fresh every bar, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub timestamp: DateTime<Utc>,
    pub regime: RegimeType,
    pub volatility: VolatilityLevel,
    /// Confidence in the trend classification, in [0, 1].
    pub regime_confidence: f64,
    /// Confidence in the volatility classification, in [0, 1].
    pub volatility_confidence: f64,
    /// Raw metrics the classification was derived from (adx, atr_pct, ...).
    pub metrics: BTreeMap<String, f64>,
    pub source: RegimeSource,
    /// Winning rule regime id (rules path only).
    pub rule_regime_id: Option<String>,
    /// Every matched rule regime id, highest priority first (rules path only).
    pub active_rule_ids: Vec<String>,
}

impl RegimeState {
    /// Placeholder state used before any bar has been classified.
    pub fn unknown(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            regime: RegimeType::Unknown,
            volatility: VolatilityLevel::Normal,
            regime_confidence: 0.0,
            volatility_confidence: 0.0,
            metrics: BTreeMap::new(),
            source: RegimeSource::Threshold,
            rule_regime_id: None,
            active_rule_ids: Vec::new(),
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Short label for logs and decision records, e.g. `trend_up/high`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.regime, self.volatility)
    }
}
