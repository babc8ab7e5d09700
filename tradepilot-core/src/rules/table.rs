//! Indicator table — `{indicator_id: {field: value}}` built from a snapshot.
//!
//! Each catalog entry is mapped by its type to snapshot keys. Period-style
//! params pick the key suffix (`rsi` with period 7 reads `rsi_7`), so a
//! strategy-set override of `period` switches which series a condition sees.
//!
//! | type     | fields                                           | snapshot keys                       |
//! |----------|--------------------------------------------------|-------------------------------------|
//! | rsi      | value                                            | rsi_{period=14}                     |
//! | sma/ema  | value                                            | sma_{period=20} / ema_{period=20}   |
//! | macd     | value, signal, histogram, histogram_prev, cross  | macd, macd_signal, macd_hist, ...   |
//! | adx      | value, plus_di, minus_di                         | adx_{period=14}, plus_di, minus_di  |
//! | atr      | value, pct                                       | atr_{period=14}                     |
//! | bb       | upper, middle, lower, width, value (= middle)    | bb_upper, bb_middle, ...            |
//! | stoch    | k, d, value (= k)                                | stoch_k, stoch_d                    |
//! | volume   | value, sma, ratio                                | volume, volume_sma_{period=20}      |
//! | obv      | value                                            | obv                                 |
//! | price    | open, high, low, close, volume, value (= close)  | OHLCV                               |
//!
//! Unknown types read the snapshot key equal to the indicator id as `value`.

use std::collections::BTreeMap;

use crate::domain::{keys, FeatureSnapshot};

use super::document::IndicatorDef;

const KNOWN_TYPES: [&str; 11] = [
    "rsi", "sma", "ema", "macd", "adx", "atr", "bb", "stoch", "volume", "obv", "price",
];

pub fn known_indicator_type(kind: &str) -> bool {
    KNOWN_TYPES.contains(&kind.to_ascii_lowercase().as_str())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorTable {
    values: BTreeMap<String, BTreeMap<String, f64>>,
}

impl IndicatorTable {
    pub fn build(catalog: &[IndicatorDef], snapshot: &FeatureSnapshot) -> Self {
        let mut values = BTreeMap::new();
        for def in catalog {
            values.insert(def.id.clone(), fields_for(def, snapshot));
        }
        Self { values }
    }

    pub fn get(&self, indicator_id: &str, field: &str) -> Option<f64> {
        self.values.get(indicator_id)?.get(field).copied()
    }

    pub fn contains_indicator(&self, indicator_id: &str) -> bool {
        self.values.contains_key(indicator_id)
    }

    pub fn fields(&self, indicator_id: &str) -> Option<&BTreeMap<String, f64>> {
        self.values.get(indicator_id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn period(def: &IndicatorDef, default: u32) -> u32 {
    def.params
        .get("period")
        .copied()
        .filter(|p| p.is_finite() && *p >= 1.0)
        .map(|p| p.round() as u32)
        .unwrap_or(default)
}

fn fields_for(def: &IndicatorDef, s: &FeatureSnapshot) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    let mut put = |field: &str, value: Option<f64>| {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            out.insert(field.to_string(), v);
        }
    };

    match def.kind.to_ascii_lowercase().as_str() {
        "rsi" => put("value", s.get(&format!("rsi_{}", period(def, 14)))),
        "sma" => put("value", s.get(&format!("sma_{}", period(def, 20)))),
        "ema" => put("value", s.get(&format!("ema_{}", period(def, 20)))),
        "macd" => {
            put("value", s.get(keys::MACD));
            put("signal", s.get(keys::MACD_SIGNAL));
            put("histogram", s.get(keys::MACD_HIST));
            put("histogram_prev", s.get(keys::MACD_HIST_PREV));
            put("cross", s.get(keys::MACD_CROSS));
        }
        "adx" => {
            put("value", s.get(&format!("adx_{}", period(def, 14))));
            put("plus_di", s.get(keys::PLUS_DI));
            put("minus_di", s.get(keys::MINUS_DI));
        }
        "atr" => {
            let atr = s.get(&format!("atr_{}", period(def, 14)));
            put("value", atr);
            put("pct", atr.filter(|_| s.close > 0.0).map(|a| a / s.close * 100.0));
        }
        "bb" => {
            put("upper", s.get(keys::BB_UPPER));
            put("middle", s.get(keys::BB_MIDDLE));
            put("lower", s.get(keys::BB_LOWER));
            put("width", s.get(keys::BB_WIDTH));
            put("value", s.get(keys::BB_MIDDLE));
        }
        "stoch" => {
            put("k", s.get(keys::STOCH_K));
            put("d", s.get(keys::STOCH_D));
            put("value", s.get(keys::STOCH_K));
        }
        "volume" => {
            let sma = s.get(&format!("volume_sma_{}", period(def, 20)));
            put("value", Some(s.volume));
            put("sma", sma);
            put("ratio", sma.filter(|v| *v > 0.0).map(|v| s.volume / v));
        }
        "obv" => put("value", s.get(keys::OBV)),
        "price" => {
            put("open", Some(s.open));
            put("high", Some(s.high));
            put("low", Some(s.low));
            put("close", Some(s.close));
            put("volume", Some(s.volume));
            put("value", Some(s.close));
        }
        _ => put("value", s.get(&def.id)),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn def(id: &str, kind: &str, params: &[(&str, f64)]) -> IndicatorDef {
        IndicatorDef {
            id: id.into(),
            kind: kind.into(),
            params: params.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    fn snap() -> FeatureSnapshot {
        FeatureSnapshot::new(Utc.with_ymd_and_hms(2024, 9, 2, 14, 0, 0).unwrap(), 99.0, 101.0, 98.0, 100.0, 2_000.0)
            .with(keys::RSI, 42.0)
            .with("rsi_7", 38.0)
            .with(keys::ADX, 15.0)
            .with(keys::PLUS_DI, 18.0)
            .with(keys::ATR, 2.0)
            .with(keys::VOLUME_SMA, 1_000.0)
            .with("vwap", 99.5)
    }

    #[test]
    fn maps_by_type_and_period() {
        let catalog = vec![
            def("rsi14", "rsi", &[]),
            def("rsi_fast", "rsi", &[("period", 7.0)]),
            def("trend", "adx", &[("period", 14.0)]),
            def("vol", "atr", &[]),
            def("volume", "volume", &[]),
            def("px", "price", &[]),
        ];
        let t = IndicatorTable::build(&catalog, &snap());
        assert_eq!(t.get("rsi14", "value"), Some(42.0));
        assert_eq!(t.get("rsi_fast", "value"), Some(38.0));
        assert_eq!(t.get("trend", "value"), Some(15.0));
        assert_eq!(t.get("trend", "plus_di"), Some(18.0));
        assert_eq!(t.get("trend", "minus_di"), None);
        assert_eq!(t.get("vol", "pct"), Some(2.0));
        assert_eq!(t.get("volume", "ratio"), Some(2.0));
        assert_eq!(t.get("px", "high"), Some(101.0));
    }

    #[test]
    fn unknown_type_reads_raw_key() {
        let t = IndicatorTable::build(&[def("vwap", "custom", &[])], &snap());
        assert_eq!(t.get("vwap", "value"), Some(99.5));
        assert!(!known_indicator_type("custom"));
        assert!(known_indicator_type("RSI"));
    }

    #[test]
    fn missing_series_leaves_field_absent() {
        let t = IndicatorTable::build(&[def("slow", "sma", &[("period", 200.0)])], &snap());
        assert!(t.contains_indicator("slow"));
        assert_eq!(t.get("slow", "value"), None);
    }
}
