//! Strategy-set overrides as an overlay on an immutable base document.
//!
//! [`ExecutionContext::prepare`] captures the base's parameter values, then
//! deep-copies the base and applies the sets' overrides to the copy. The base
//! is shared through an `Arc` and never written. [`ExecutionContext::restore`]
//! consumes the context, so a context can be restored at most once, and
//! dropping it without restoring leaks nothing into the base.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::document::{RiskBlock, RulesDocument, StrategySetDef};

/// Parameter values of every indicator and strategy at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub indicators: BTreeMap<String, BTreeMap<String, f64>>,
    pub strategies: BTreeMap<String, StrategyParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub risk: RiskBlock,
    pub params: BTreeMap<String, f64>,
}

impl ParameterSnapshot {
    pub fn capture(doc: &RulesDocument) -> Self {
        Self {
            indicators: doc
                .indicators
                .iter()
                .map(|i| (i.id.clone(), i.params.clone()))
                .collect(),
            strategies: doc
                .strategies
                .iter()
                .map(|s| {
                    (
                        s.id.clone(),
                        StrategyParams {
                            risk: s.risk.clone(),
                            params: s.params.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// True if every value matches `other` bit for bit.
    pub fn bit_identical(&self, other: &ParameterSnapshot) -> bool {
        fn same_map(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> bool {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && va.to_bits() == vb.to_bits())
        }
        fn same_opt(a: Option<f64>, b: Option<f64>) -> bool {
            a.map(f64::to_bits) == b.map(f64::to_bits)
        }

        self.indicators.len() == other.indicators.len()
            && self.strategies.len() == other.strategies.len()
            && self
                .indicators
                .iter()
                .zip(other.indicators.iter())
                .all(|((ka, a), (kb, b))| ka == kb && same_map(a, b))
            && self
                .strategies
                .iter()
                .zip(other.strategies.iter())
                .all(|((ka, a), (kb, b))| {
                    ka == kb
                        && a.risk.position_size.to_bits() == b.risk.position_size.to_bits()
                        && same_opt(a.risk.stop_loss, b.risk.stop_loss)
                        && same_opt(a.risk.take_profit, b.risk.take_profit)
                        && same_map(&a.params, &b.params)
                })
    }
}

/// One override cycle: the pre-override snapshot plus the effective document.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    set_ids: Vec<String>,
    before: ParameterSnapshot,
    base: Arc<RulesDocument>,
    effective: RulesDocument,
}

impl ExecutionContext {
    /// Apply the overrides of `sets`, in order, to a deep copy of `base`.
    pub fn prepare(base: &Arc<RulesDocument>, sets: &[&StrategySetDef]) -> Self {
        let before = ParameterSnapshot::capture(base);
        let mut effective = RulesDocument::clone(base);

        for set in sets {
            for (indicator_id, params) in &set.indicator_overrides {
                match effective.indicators.iter_mut().find(|i| &i.id == indicator_id) {
                    Some(ind) => {
                        for (k, v) in params {
                            ind.params.insert(k.clone(), *v);
                        }
                    }
                    None => warn!(set = %set.id, indicator = %indicator_id, "override for unknown indicator ignored"),
                }
            }
            for r in &set.strategies {
                if r.overrides.is_empty() {
                    continue;
                }
                match effective.strategies.iter_mut().find(|s| s.id == r.strategy_id) {
                    Some(strategy) => {
                        for (k, v) in &r.overrides {
                            match k.as_str() {
                                "position_size" => strategy.risk.position_size = *v,
                                "stop_loss" => strategy.risk.stop_loss = Some(*v),
                                "take_profit" => strategy.risk.take_profit = Some(*v),
                                _ => {
                                    strategy.params.insert(k.clone(), *v);
                                }
                            }
                        }
                    }
                    None => warn!(set = %set.id, strategy = %r.strategy_id, "override for unknown strategy ignored"),
                }
            }
        }

        let set_ids: Vec<String> = sets.iter().map(|s| s.id.clone()).collect();
        debug!(sets = ?set_ids, "strategy-set overrides prepared");
        Self {
            set_ids,
            before,
            base: Arc::clone(base),
            effective,
        }
    }

    pub fn set_ids(&self) -> &[String] {
        &self.set_ids
    }

    /// Document with overrides applied.
    pub fn effective(&self) -> &RulesDocument {
        &self.effective
    }

    pub fn before(&self) -> &ParameterSnapshot {
        &self.before
    }

    /// End the cycle and return the pre-override snapshot.
    pub fn restore(self) -> ParameterSnapshot {
        debug_assert!(ParameterSnapshot::capture(&self.base).bit_identical(&self.before));
        debug!(sets = ?self.set_ids, "strategy-set overrides restored");
        self.before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Arc<RulesDocument> {
        Arc::new(
            RulesDocument::from_json(
                r#"{
                "indicators": [{"id": "rsi", "type": "rsi", "params": {"period": 14}}],
                "strategies": [{"id": "s1", "risk": {"position_size": 1.0, "stop_loss": 2.0}, "params": {"lookback": 10}}],
                "strategy_sets": [{"id": "set", "strategies": [
                    {"strategy_id": "s1", "overrides": {"stop_loss": 0.75, "lookback": 5, "take_profit": 4.0}}
                ], "indicator_overrides": {"rsi": {"period": 7}}}]
            }"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn overrides_apply_to_copy_only() {
        let base = base();
        let set = base.strategy_set("set").unwrap().clone();
        let ctx = ExecutionContext::prepare(&base, &[&set]);
        let eff = ctx.effective();
        assert_eq!(eff.indicator("rsi").unwrap().params["period"], 7.0);
        let s1 = eff.strategy("s1").unwrap();
        assert_eq!(s1.risk.stop_loss, Some(0.75));
        assert_eq!(s1.risk.take_profit, Some(4.0));
        assert_eq!(s1.params["lookback"], 5.0);

        assert_eq!(base.indicator("rsi").unwrap().params["period"], 14.0);
        assert_eq!(base.strategy("s1").unwrap().risk.stop_loss, Some(2.0));
    }

    #[test]
    fn restore_round_trip_is_bit_identical() {
        let base = base();
        let before = ParameterSnapshot::capture(&base);
        let set = base.strategy_set("set").unwrap().clone();
        let ctx = ExecutionContext::prepare(&base, &[&set]);
        let restored = ctx.restore();
        assert!(restored.bit_identical(&before));
        assert!(ParameterSnapshot::capture(&base).bit_identical(&before));
    }

    #[test]
    fn later_sets_win() {
        let base = base();
        let mut a = base.strategy_set("set").unwrap().clone();
        a.indicator_overrides.clear();
        let mut b = a.clone();
        b.id = "second".into();
        b.strategies[0].overrides = [("stop_loss".to_string(), 3.0)].into_iter().collect();
        let ctx = ExecutionContext::prepare(&base, &[&a, &b]);
        assert_eq!(ctx.effective().strategy("s1").unwrap().risk.stop_loss, Some(3.0));
        assert_eq!(ctx.set_ids(), ["set".to_string(), "second".to_string()]);
    }
}
