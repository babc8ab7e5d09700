//! Rules engine — regime detection, routing, overlays and hot reload.
//!
//! Detection and routing are pure functions of an [`IndicatorTable`] and the
//! document. The engine keeps the base document behind an `Arc`, the active
//! [`ExecutionContext`] (overrides of the currently routed strategy sets), and
//! the path it was loaded from so it can be reloaded between bars.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::components::exit::{ExitReason, ExitSignal};
use crate::components::regime::RegimeClassifier;
use crate::domain::{FeatureSnapshot, Position, RegimeSource, RegimeState, RegimeType, Side};

use super::condition::{evaluate, ConditionError};
use super::document::{RegimeDef, RulesDocument, RulesError, StrategyDef, StrategySetDef, ValidationWarning};
use super::overlay::ExecutionContext;
use super::table::IndicatorTable;

/// A declared regime whose conditions hold on the current bar.
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeMatch {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub kind: RegimeType,
    pub confidence: f64,
}

impl RegimeMatch {
    fn from_def(def: &RegimeDef) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            priority: def.priority,
            kind: def.regime_type.unwrap_or_else(|| infer_kind(&def.id, &def.name)),
            confidence: def.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
        }
    }
}

/// Trend kind from the words of a regime's id or name.
///
/// Words split on anything that is not a letter or digit, so `setup_squeeze`
/// carries no "up" word.
pub fn infer_kind(id: &str, name: &str) -> RegimeType {
    let text = format!("{id} {name}").to_ascii_lowercase();
    let words: Vec<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let any = |exact: &[&str], prefixes: &[&str]| {
        words
            .iter()
            .any(|w| exact.contains(w) || prefixes.iter().any(|p| w.starts_with(p)))
    };
    if any(&["up", "uptrend", "upward", "upswing"], &["bull"]) {
        RegimeType::TrendUp
    } else if any(&["down", "downtrend", "downward", "downswing"], &["bear"]) {
        RegimeType::TrendDown
    } else if any(&["flat", "sideways"], &["rang", "chop", "consol"]) {
        RegimeType::Range
    } else {
        RegimeType::Unknown
    }
}

/// Every declared regime that matches, highest priority first.
///
/// Ties keep declaration order. Any evaluation error aborts detection.
pub fn detect_regimes(doc: &RulesDocument, table: &IndicatorTable) -> Result<Vec<RegimeMatch>, ConditionError> {
    let mut matches = Vec::new();
    for def in &doc.regimes {
        if evaluate(&def.conditions, table)? {
            matches.push(RegimeMatch::from_def(def));
        }
    }
    matches.sort_by(|a, b| b.priority.cmp(&a.priority));
    Ok(matches)
}

/// Strategy sets whose route matches `active`, in routing declaration order.
pub fn route<'a>(doc: &'a RulesDocument, active: &[String]) -> Vec<&'a StrategySetDef> {
    let mut out: Vec<&StrategySetDef> = Vec::new();
    for rule in &doc.routing {
        if !rule.matcher.matches(active) {
            continue;
        }
        if let Some(set) = doc.strategy_set(&rule.strategy_set_id) {
            if !out.iter().any(|s| s.id == set.id) {
                out.push(set);
            }
        }
    }
    out
}

pub struct RulesEngine {
    base: Arc<RulesDocument>,
    source: Option<PathBuf>,
    warnings: Vec<ValidationWarning>,
    overlay: Option<ExecutionContext>,
    overlay_key: Option<Vec<String>>,
}

impl RulesEngine {
    pub fn new(document: RulesDocument) -> Self {
        let warnings = document.validate();
        log_warnings(&warnings);
        Self {
            base: Arc::new(document),
            source: None,
            warnings,
            overlay: None,
            overlay_key: None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, RulesError> {
        let document = RulesDocument::load(path)?;
        info!(path = %path.display(), regimes = document.regimes.len(), strategies = document.strategies.len(), "rules document loaded");
        let mut engine = Self::new(document);
        engine.source = Some(path.to_path_buf());
        Ok(engine)
    }

    /// The base document, never modified by overrides.
    pub fn document(&self) -> &RulesDocument {
        &self.base
    }

    pub fn base(&self) -> &Arc<RulesDocument> {
        &self.base
    }

    /// The document with the active overlay applied.
    pub fn effective(&self) -> &RulesDocument {
        match &self.overlay {
            Some(ctx) => ctx.effective(),
            None => &self.base,
        }
    }

    pub fn warnings(&self) -> &[ValidationWarning] {
        &self.warnings
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn active_overlay(&self) -> Option<&ExecutionContext> {
        self.overlay.as_ref()
    }

    /// Re-read the document from its source path.
    ///
    /// On failure the previous document stays in effect and the error is returned.
    pub fn reload(&mut self) -> Result<(), RulesError> {
        let path = self.source.clone().ok_or(RulesError::NoSource)?;
        match RulesDocument::load(&path) {
            Ok(document) => {
                info!(path = %path.display(), "rules document reloaded");
                self.replace(document);
                Ok(())
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "rules reload failed; keeping previous document");
                Err(e)
            }
        }
    }

    /// Swap in a new document, dropping any active overlay.
    pub fn replace(&mut self, document: RulesDocument) {
        self.warnings = document.validate();
        log_warnings(&self.warnings);
        if let Some(ctx) = self.overlay.take() {
            ctx.restore();
        }
        self.overlay_key = None;
        self.base = Arc::new(document);
    }

    /// Regime detection on the base document's catalog.
    pub fn detect(&self, snapshot: &FeatureSnapshot) -> Result<Vec<RegimeMatch>, ConditionError> {
        let table = IndicatorTable::build(&self.base.indicators, snapshot);
        detect_regimes(&self.base, &table)
    }

    /// Keep the overlay in line with the active regime ids.
    ///
    /// A change of regime set restores the old overlay and prepares one for the
    /// newly routed sets; the overlay then persists until the next change.
    pub fn sync_overlay(&mut self, active: &[String]) {
        if self.overlay_key.as_deref() == Some(active) {
            return;
        }
        if let Some(ctx) = self.overlay.take() {
            ctx.restore();
        }
        let sets = route(&self.base, active);
        let has_overrides = sets
            .iter()
            .any(|s| !s.indicator_overrides.is_empty() || s.strategies.iter().any(|r| !r.overrides.is_empty()));
        self.overlay = has_overrides.then(|| ExecutionContext::prepare(&self.base, &sets));
        debug!(regimes = ?active, sets = sets.len(), overlay = has_overrides, "regime routing changed");
        self.overlay_key = Some(active.to_vec());
    }

    /// Strategies routed for `active`, resolved against the effective document.
    pub fn routed_strategies(&self, active: &[String]) -> Vec<&StrategyDef> {
        let doc = self.effective();
        let mut out: Vec<&StrategyDef> = Vec::new();
        for set in route(doc, active) {
            for r in &set.strategies {
                if let Some(strategy) = doc.strategy(&r.strategy_id) {
                    if !out.iter().any(|s| s.id == strategy.id) {
                        out.push(strategy);
                    }
                }
            }
        }
        out
    }

    pub fn effective_table(&self, snapshot: &FeatureSnapshot) -> IndicatorTable {
        IndicatorTable::build(&self.effective().indicators, snapshot)
    }
}

impl std::fmt::Debug for RulesEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RulesEngine")
            .field("source", &self.source)
            .field("regimes", &self.base.regimes.len())
            .field("warnings", &self.warnings.len())
            .field("overlay", &self.overlay.as_ref().map(|c| c.set_ids().to_vec()))
            .finish()
    }
}

fn log_warnings(warnings: &[ValidationWarning]) {
    for w in warnings {
        warn!("rules document: {w}");
    }
}

// ─── Regime classifier ──────────────────────────────────────────────

/// Declared-regime classifier with a hardcoded fallback.
///
/// Volatility always comes from the fallback. Trend comes from the winning
/// declared regime; no match or any evaluation error uses the fallback as is.
pub struct RuleRegimeClassifier<'a> {
    engine: &'a RulesEngine,
    fallback: &'a dyn RegimeClassifier,
}

impl<'a> RuleRegimeClassifier<'a> {
    pub fn new(engine: &'a RulesEngine, fallback: &'a dyn RegimeClassifier) -> Self {
        Self { engine, fallback }
    }
}

impl RegimeClassifier for RuleRegimeClassifier<'_> {
    fn name(&self) -> &str {
        "rules"
    }

    fn classify(&self, snapshot: &FeatureSnapshot) -> RegimeState {
        let mut state = self.fallback.classify(snapshot);
        if self.engine.document().regimes.is_empty() {
            return state;
        }
        match self.engine.detect(snapshot) {
            Ok(matches) => {
                let Some(winner) = matches.first() else {
                    debug!("no declared regime matched; using {}", self.fallback.name());
                    return state;
                };
                state.regime = winner.kind;
                state.regime_confidence = winner.confidence;
                state.source = RegimeSource::Rules;
                state.rule_regime_id = Some(winner.id.clone());
                state.active_rule_ids = matches.iter().map(|m| m.id.clone()).collect();
                state
            }
            Err(e) => {
                warn!(error = %e, "rule regime detection failed; falling back to {}", self.fallback.name());
                state
            }
        }
    }
}

// ─── Entry gate ─────────────────────────────────────────────────────

/// Outcome of gating an entry through routed strategies.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryVerdict {
    /// No strategy routed for this regime: the built-in path decides alone.
    Unrouted,
    /// A routed strategy's entry tree holds.
    Allowed {
        strategy: String,
        stop_pct: Option<f64>,
        size_multiplier: f64,
    },
    /// Strategies are routed but none of them allows this side now.
    Blocked { checked: Vec<String> },
}

/// Gates entries and adds strategy exits using the routed rule strategies.
pub struct RuleEntryGate<'a> {
    engine: &'a RulesEngine,
}

impl<'a> RuleEntryGate<'a> {
    pub fn new(engine: &'a RulesEngine) -> Self {
        Self { engine }
    }

    pub fn check_entry(&self, snapshot: &FeatureSnapshot, side: Side, regime: &RegimeState) -> EntryVerdict {
        let strategies = self.engine.routed_strategies(&regime.active_rule_ids);
        if strategies.is_empty() {
            return EntryVerdict::Unrouted;
        }
        let table = self.engine.effective_table(snapshot);
        let mut checked = Vec::new();
        for strategy in strategies.into_iter().filter(|s| s.allows(side)) {
            checked.push(strategy.id.clone());
            let holds = match &strategy.entry {
                None => true,
                Some(cond) => match evaluate(cond, &table) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(strategy = %strategy.id, error = %e, "entry condition not evaluable");
                        false
                    }
                },
            };
            if holds {
                return EntryVerdict::Allowed {
                    strategy: strategy.display_name().to_string(),
                    stop_pct: strategy.risk.stop_loss,
                    size_multiplier: strategy.risk.position_size,
                };
            }
        }
        EntryVerdict::Blocked { checked }
    }

    /// Exit tree or take-profit of the strategy that opened `position`.
    pub fn check_exit(&self, snapshot: &FeatureSnapshot, position: &Position) -> Option<ExitSignal> {
        let strategy = self.engine.effective().strategy_named(&position.strategy)?;
        if let Some(cond) = &strategy.exit {
            let table = self.engine.effective_table(snapshot);
            match evaluate(cond, &table) {
                Ok(true) => {
                    return Some(ExitSignal::new(
                        ExitReason::StrategyExit,
                        2,
                        format!("{} exit condition", strategy.id),
                    ))
                }
                Ok(false) => {}
                Err(e) => warn!(strategy = %strategy.id, error = %e, "exit condition not evaluable"),
            }
        }
        let tp = strategy.risk.take_profit?;
        (position.unrealized_pct() >= tp).then(|| {
            ExitSignal::new(
                ExitReason::StrategyExit,
                1,
                format!("{} take profit {tp:.2}%", strategy.id),
            )
        })
    }
}
