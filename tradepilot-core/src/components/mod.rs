//! Component traits — one trait per decision concern.
//!
//! - Regime classifier: trend direction and volatility level per bar
//! - Entry scorer: weighted [0, 1] score per side
//! - Trailing stop calculator: tightening-only stop updates
//! - Exit checker: prioritized exit conditions
//!
//! Plus the signal factory, the trading guards, and the factory/pipeline that
//! assemble the four traits into a [`DecisionPipeline`].

pub mod exit;
pub mod factory;
pub mod guards;
pub mod pipeline;
pub mod regime;
pub mod scoring;
pub mod signal;
pub mod trailing;

pub use exit::{ExitChecker, ExitReason, ExitSignal, MacdCross, RuleExitChecker};
pub use factory::FactoryError;
pub use guards::{BlockReason, GuardStatus, TradingGuard};
pub use pipeline::DecisionPipeline;
pub use regime::{RegimeClassifier, ThresholdClassifier};
pub use scoring::{EntryScorer, ScoreBreakdown, WeightedScorer};
pub use signal::{ExpiryReason, SignalFactory, SignalReview};
pub use trailing::{TrailingGate, TrailingStopCalculator};
