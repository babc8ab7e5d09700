//! Rules document — declarative indicators, regimes, strategies, strategy sets
//! and routing, loaded from JSON.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::domain::{RegimeType, Side};

use super::table::known_indicator_type;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("failed to read rules document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid rules document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no rules document path to reload from")]
    NoSource,
}

// ─── Document ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesDocument {
    pub indicators: Vec<IndicatorDef>,
    pub regimes: Vec<RegimeDef>,
    pub strategies: Vec<StrategyDef>,
    pub strategy_sets: Vec<StrategySetDef>,
    pub routing: Vec<RoutingRule>,
}

/// Catalog entry: an indicator id bound to a type and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorDef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeDef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub conditions: Condition,
    #[serde(default)]
    pub priority: i32,
    /// Trend kind this regime maps to. Inferred from id/name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regime_type: Option<RegimeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Restrict the strategy to one side. Both sides when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<Condition>,
    #[serde(default)]
    pub risk: RiskBlock,
    /// Free-form numeric parameters that strategy-set overrides may change.
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

impl StrategyDef {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn allows(&self, side: Side) -> bool {
        self.side.map_or(true, |s| s == side)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskBlock {
    /// Multiplier on the configured entry quantity.
    pub position_size: f64,
    /// Stop-loss distance in percent of entry.
    pub stop_loss: Option<f64>,
    /// Take-profit distance in percent of entry.
    pub take_profit: Option<f64>,
}

impl Default for RiskBlock {
    fn default() -> Self {
        Self {
            position_size: 1.0,
            stop_loss: None,
            take_profit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySetDef {
    pub id: String,
    pub strategies: Vec<StrategyRef>,
    /// `{indicator_id: {param: value}}`
    #[serde(default)]
    pub indicator_overrides: BTreeMap<String, BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRef {
    pub strategy_id: String,
    /// Risk fields (`position_size`, `stop_loss`, `take_profit`) or strategy params.
    #[serde(default)]
    pub overrides: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub strategy_set_id: String,
    #[serde(rename = "match", default)]
    pub matcher: RouteMatch,
}

/// Regime ids a route requires. An empty matcher always matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteMatch {
    pub all_of: Vec<String>,
    pub any_of: Vec<String>,
}

impl RouteMatch {
    pub fn matches(&self, active: &[String]) -> bool {
        let all = self.all_of.iter().all(|id| active.contains(id));
        let any = self.any_of.is_empty() || self.any_of.iter().any(|id| active.contains(id));
        all && any
    }

    fn regime_ids(&self) -> impl Iterator<Item = &String> {
        self.all_of.iter().chain(self.any_of.iter())
    }
}

// ─── Conditions ─────────────────────────────────────────────────────

/// Boolean condition tree: AND/OR groups over leaf comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    All { all: Vec<Condition> },
    Any { any: Vec<Condition> },
    Compare(Comparison),
}

impl Condition {
    /// Every indicator reference in the tree, left and right operands.
    pub fn indicator_refs(&self) -> Vec<&IndicatorRef> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a IndicatorRef>) {
        match self {
            Condition::All { all } => all.iter().for_each(|c| c.collect_refs(out)),
            Condition::Any { any } => any.iter().for_each(|c| c.collect_refs(out)),
            Condition::Compare(cmp) => {
                out.push(&cmp.left);
                if let Operand::Indicator(r) = &cmp.right {
                    out.push(r);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub left: IndicatorRef,
    pub op: CompareOp,
    pub right: Operand,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndicatorRef {
    pub indicator_id: String,
    #[serde(default = "default_field")]
    pub field: String,
}

fn default_field() -> String {
    "value".to_string()
}

impl IndicatorRef {
    pub fn new(indicator_id: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            indicator_id: indicator_id.into(),
            field: field.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Between,
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Value { value: f64 },
    Range { min: f64, max: f64 },
    Indicator(IndicatorRef),
}

// ─── Loading & validation ───────────────────────────────────────────

/// Non-fatal problems found in a document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationWarning {
    #[error("{context} references unknown indicator `{indicator_id}`")]
    UnknownIndicator { context: String, indicator_id: String },
    #[error("indicator `{indicator_id}` has unknown type `{kind}`; raw snapshot lookup by id")]
    UnknownIndicatorType { indicator_id: String, kind: String },
    #[error("strategy set `{set_id}` references unknown strategy `{strategy_id}`")]
    UnknownStrategy { set_id: String, strategy_id: String },
    #[error("routing references unknown strategy set `{set_id}`")]
    UnknownStrategySet { set_id: String },
    #[error("routing to `{set_id}` references unknown regime `{regime_id}`")]
    UnknownRegime { set_id: String, regime_id: String },
    #[error("duplicate {kind} id `{id}`")]
    DuplicateId { kind: &'static str, id: String },
    #[error("{context} has a between range with min {min} > max {max}")]
    InvertedRange { context: String, min: f64, max: f64 },
}

impl RulesDocument {
    pub fn from_json(text: &str) -> Result<Self, RulesError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, RulesError> {
        let text = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn indicator(&self, id: &str) -> Option<&IndicatorDef> {
        self.indicators.iter().find(|i| i.id == id)
    }

    pub fn regime(&self, id: &str) -> Option<&RegimeDef> {
        self.regimes.iter().find(|r| r.id == id)
    }

    pub fn strategy(&self, id: &str) -> Option<&StrategyDef> {
        self.strategies.iter().find(|s| s.id == id)
    }

    /// Strategy by id or by display name.
    pub fn strategy_named(&self, name: &str) -> Option<&StrategyDef> {
        self.strategies
            .iter()
            .find(|s| s.id == name || s.display_name() == name)
    }

    pub fn strategy_set(&self, id: &str) -> Option<&StrategySetDef> {
        self.strategy_sets.iter().find(|s| s.id == id)
    }

    /// Check cross references. Problems are reported, never fatal.
    pub fn validate(&self) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        check_duplicates("indicator", self.indicators.iter().map(|i| &i.id), &mut warnings);
        check_duplicates("regime", self.regimes.iter().map(|r| &r.id), &mut warnings);
        check_duplicates("strategy", self.strategies.iter().map(|s| &s.id), &mut warnings);
        check_duplicates("strategy set", self.strategy_sets.iter().map(|s| &s.id), &mut warnings);

        for ind in &self.indicators {
            if !known_indicator_type(&ind.kind) {
                warnings.push(ValidationWarning::UnknownIndicatorType {
                    indicator_id: ind.id.clone(),
                    kind: ind.kind.clone(),
                });
            }
        }

        for regime in &self.regimes {
            self.check_condition(&format!("regime `{}`", regime.id), &regime.conditions, &mut warnings);
        }
        for strategy in &self.strategies {
            if let Some(entry) = &strategy.entry {
                self.check_condition(&format!("strategy `{}` entry", strategy.id), entry, &mut warnings);
            }
            if let Some(exit) = &strategy.exit {
                self.check_condition(&format!("strategy `{}` exit", strategy.id), exit, &mut warnings);
            }
        }

        for set in &self.strategy_sets {
            for r in &set.strategies {
                if self.strategy(&r.strategy_id).is_none() {
                    warnings.push(ValidationWarning::UnknownStrategy {
                        set_id: set.id.clone(),
                        strategy_id: r.strategy_id.clone(),
                    });
                }
            }
            for indicator_id in set.indicator_overrides.keys() {
                if self.indicator(indicator_id).is_none() {
                    warnings.push(ValidationWarning::UnknownIndicator {
                        context: format!("strategy set `{}` overrides", set.id),
                        indicator_id: indicator_id.clone(),
                    });
                }
            }
        }

        for route in &self.routing {
            if self.strategy_set(&route.strategy_set_id).is_none() {
                warnings.push(ValidationWarning::UnknownStrategySet {
                    set_id: route.strategy_set_id.clone(),
                });
            }
            for regime_id in route.matcher.regime_ids() {
                if self.regime(regime_id).is_none() {
                    warnings.push(ValidationWarning::UnknownRegime {
                        set_id: route.strategy_set_id.clone(),
                        regime_id: regime_id.clone(),
                    });
                }
            }
        }

        warnings
    }

    fn check_condition(&self, context: &str, condition: &Condition, out: &mut Vec<ValidationWarning>) {
        let mut seen = HashSet::new();
        for r in condition.indicator_refs() {
            if self.indicator(&r.indicator_id).is_none() && seen.insert(&r.indicator_id) {
                out.push(ValidationWarning::UnknownIndicator {
                    context: context.to_string(),
                    indicator_id: r.indicator_id.clone(),
                });
            }
        }
        check_ranges(context, condition, out);
    }
}

fn check_ranges(context: &str, condition: &Condition, out: &mut Vec<ValidationWarning>) {
    match condition {
        Condition::All { all } => all.iter().for_each(|c| check_ranges(context, c, out)),
        Condition::Any { any } => any.iter().for_each(|c| check_ranges(context, c, out)),
        Condition::Compare(cmp) => {
            if let Operand::Range { min, max } = cmp.right {
                if min > max {
                    out.push(ValidationWarning::InvertedRange {
                        context: context.to_string(),
                        min,
                        max,
                    });
                }
            }
        }
    }
}

fn check_duplicates<'a>(
    kind: &'static str,
    ids: impl Iterator<Item = &'a String>,
    out: &mut Vec<ValidationWarning>,
) {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            out.push(ValidationWarning::DuplicateId { kind, id: id.clone() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "indicators": [
            {"id": "adx", "type": "adx", "params": {"period": 14}},
            {"id": "rsi", "type": "rsi"}
        ],
        "regimes": [
            {"id": "ranging", "name": "Ranging", "priority": 1,
             "conditions": {"all": [{"left": {"indicator_id": "adx"}, "op": "lt", "right": {"value": 20}}]}}
        ],
        "strategies": [
            {"id": "mean_revert", "entry": {"any": [
                {"left": {"indicator_id": "rsi", "field": "value"}, "op": "between", "right": {"min": 20, "max": 35}}
            ]}, "risk": {"position_size": 0.5, "stop_loss": 1.5, "take_profit": 3.0}}
        ],
        "strategy_sets": [
            {"id": "range_set", "strategies": [{"strategy_id": "mean_revert", "overrides": {"stop_loss": 1.0}}],
             "indicator_overrides": {"rsi": {"period": 7}}}
        ],
        "routing": [{"strategy_set_id": "range_set", "match": {"all_of": ["ranging"]}}]
    }"#;

    #[test]
    fn parses_full_document() {
        let doc = RulesDocument::from_json(DOC).unwrap();
        assert_eq!(doc.indicators.len(), 2);
        assert_eq!(doc.indicator("rsi").unwrap().params.len(), 0);
        let regime = doc.regime("ranging").unwrap();
        assert_eq!(regime.priority, 1);
        match &regime.conditions {
            Condition::All { all } => assert!(matches!(&all[0], Condition::Compare(c) if c.op == CompareOp::Lt)),
            other => panic!("unexpected {other:?}"),
        }
        let strat = doc.strategy("mean_revert").unwrap();
        assert_eq!(strat.risk.stop_loss, Some(1.5));
        assert_eq!(strat.display_name(), "mean_revert");
        assert!(doc.validate().is_empty());
    }

    #[test]
    fn right_operand_forms() {
        let v: Operand = serde_json::from_str(r#"{"value": 3}"#).unwrap();
        assert_eq!(v, Operand::Value { value: 3.0 });
        let r: Operand = serde_json::from_str(r#"{"min": 1, "max": 2}"#).unwrap();
        assert_eq!(r, Operand::Range { min: 1.0, max: 2.0 });
        let i: Operand = serde_json::from_str(r#"{"indicator_id": "ema", "field": "value"}"#).unwrap();
        assert_eq!(i, Operand::Indicator(IndicatorRef::new("ema", "value")));
    }

    #[test]
    fn validation_reports_dangling_references() {
        let doc = RulesDocument::from_json(
            r#"{
            "regimes": [{"id": "up", "conditions": {"left": {"indicator_id": "ghost"}, "op": "gt", "right": {"value": 1}}}],
            "strategy_sets": [{"id": "s", "strategies": [{"strategy_id": "missing"}]}],
            "routing": [{"strategy_set_id": "nope", "match": {"all_of": ["down"]}}]
        }"#,
        )
        .unwrap();
        let warnings = doc.validate();
        assert!(warnings.contains(&ValidationWarning::UnknownIndicator {
            context: "regime `up`".into(),
            indicator_id: "ghost".into(),
        }));
        assert!(warnings.iter().any(|w| matches!(w, ValidationWarning::UnknownStrategy { .. })));
        assert!(warnings.iter().any(|w| matches!(w, ValidationWarning::UnknownStrategySet { .. })));
        assert!(warnings.iter().any(|w| matches!(w, ValidationWarning::UnknownRegime { .. })));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(RulesDocument::from_json("{"), Err(RulesError::Parse(_))));
    }

    #[test]
    fn route_matching() {
        let m = RouteMatch {
            all_of: vec!["a".into()],
            any_of: vec!["b".into(), "c".into()],
        };
        assert!(m.matches(&["a".into(), "c".into()]));
        assert!(!m.matches(&["a".into()]));
        assert!(RouteMatch::default().matches(&[]));
    }
}
