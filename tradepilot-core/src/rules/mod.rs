//! Config/rules bridge — declarative regimes, strategies and routing.
//!
//! A JSON [`RulesDocument`] declares an indicator catalog, regimes (condition
//! trees plus priority), strategies (entry/exit trees plus a risk block),
//! strategy sets (strategy refs plus overrides) and routing (regime ids to a
//! strategy set). The [`RulesEngine`] evaluates it against an
//! [`IndicatorTable`] built from each snapshot.

pub mod condition;
pub mod document;
pub mod engine;
pub mod overlay;
pub mod table;

pub use condition::{evaluate, ConditionError};
pub use document::{
    CompareOp, Comparison, Condition, IndicatorDef, IndicatorRef, Operand, RegimeDef, RiskBlock,
    RouteMatch, RoutingRule, RulesDocument, RulesError, StrategyDef, StrategyRef, StrategySetDef,
    ValidationWarning,
};
pub use engine::{
    detect_regimes, route, EntryVerdict, RegimeMatch, RuleEntryGate, RuleRegimeClassifier,
    RulesEngine,
};
pub use overlay::{ExecutionContext, ParameterSnapshot};
pub use table::IndicatorTable;
