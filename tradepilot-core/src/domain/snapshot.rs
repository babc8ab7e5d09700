//! FeatureSnapshot — the per-bar unit of market data consumed by the core.
//!
//! Snapshots are produced by an external feature producer once per bar and are
//! never mutated afterwards. Indicator values are addressed by name; a NaN value
//! is treated exactly like a missing one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::SnapshotHash;

/// Canonical indicator names emitted by the feature producer.
pub mod keys {
    pub const SMA_FAST: &str = "sma_20";
    pub const SMA_SLOW: &str = "sma_50";
    pub const EMA_FAST: &str = "ema_20";
    pub const EMA_SLOW: &str = "ema_50";
    pub const RSI: &str = "rsi_14";
    pub const MACD: &str = "macd";
    pub const MACD_SIGNAL: &str = "macd_signal";
    pub const MACD_HIST: &str = "macd_hist";
    pub const MACD_HIST_PREV: &str = "macd_hist_prev";
    /// +1 bullish cross on this bar, -1 bearish cross, 0 none.
    pub const MACD_CROSS: &str = "macd_cross";
    pub const ADX: &str = "adx_14";
    pub const PLUS_DI: &str = "plus_di";
    pub const MINUS_DI: &str = "minus_di";
    pub const ATR: &str = "atr_14";
    pub const BB_UPPER: &str = "bb_upper";
    pub const BB_MIDDLE: &str = "bb_middle";
    pub const BB_LOWER: &str = "bb_lower";
    pub const BB_WIDTH: &str = "bb_width";
    pub const STOCH_K: &str = "stoch_k";
    pub const STOCH_D: &str = "stoch_d";
    pub const VOLUME_SMA: &str = "volume_sma_20";
    pub const OBV: &str = "obv";
}

/// Immutable OHLCV + indicator values for a single bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Named indicator values. `BTreeMap` keeps hashing deterministic.
    pub indicators: BTreeMap<String, f64>,
}

impl FeatureSnapshot {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            indicators: BTreeMap::new(),
        }
    }

    /// Builder-style helper for attaching an indicator value.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.indicators.insert(name.into(), value);
        self
    }

    /// Indicator value by name. NaN and infinite values read as missing.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied().filter(|v| v.is_finite())
    }

    /// True if every named indicator is present.
    pub fn has_all(&self, names: &[&str]) -> bool {
        names.iter().all(|n| self.get(n).is_some())
    }

    /// ATR as a percentage of close, if both are usable.
    pub fn atr_pct(&self) -> Option<f64> {
        let atr = self.get(keys::ATR)?;
        if self.close > 0.0 {
            Some(atr / self.close * 100.0)
        } else {
            None
        }
    }

    /// Slow moving average, preferring the EMA over the SMA.
    pub fn slow_ma(&self) -> Option<f64> {
        self.get(keys::EMA_SLOW).or_else(|| self.get(keys::SMA_SLOW))
    }

    /// Fast moving average, preferring the EMA over the SMA.
    pub fn fast_ma(&self) -> Option<f64> {
        self.get(keys::EMA_FAST).or_else(|| self.get(keys::SMA_FAST))
    }

    /// Returns true if any OHLC field is NaN (void bar).
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLC sanity check: high >= low, high/low bracket open and close.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.close > 0.0
    }

    /// Deterministic content hash, recorded on every decision as an audit trail.
    pub fn content_hash(&self) -> SnapshotHash {
        SnapshotHash::of(self)
    }
}
