//! Decision pipeline — the four per-bar decision components, assembled once
//! and injected into the bar processor.
//!
//! Each concern is its own trait object so any one of them can be swapped
//! (a different scorer, a rules-driven classifier, a custom exit checker)
//! without touching the others.

use crate::config::BotConfig;

use super::exit::ExitChecker;
use super::factory::{create_exit, create_regime, create_scorer, create_trailing, FactoryError};
use super::regime::RegimeClassifier;
use super::scoring::EntryScorer;
use super::trailing::TrailingStopCalculator;

pub struct DecisionPipeline {
    pub regime: Box<dyn RegimeClassifier>,
    pub scorer: Box<dyn EntryScorer>,
    pub trailing: Box<dyn TrailingStopCalculator>,
    pub exit: Box<dyn ExitChecker>,
}

impl DecisionPipeline {
    pub fn new(
        regime: Box<dyn RegimeClassifier>,
        scorer: Box<dyn EntryScorer>,
        trailing: Box<dyn TrailingStopCalculator>,
        exit: Box<dyn ExitChecker>,
    ) -> Self {
        Self {
            regime,
            scorer,
            trailing,
            exit,
        }
    }

    /// Build every component from its config section.
    pub fn from_config(config: &BotConfig) -> Result<Self, FactoryError> {
        Ok(Self {
            regime: create_regime(&config.regime)?,
            scorer: create_scorer(&config.scoring)?,
            trailing: create_trailing(&config.trailing)?,
            exit: create_exit(&config.exit)?,
        })
    }

    pub fn with_regime(mut self, regime: Box<dyn RegimeClassifier>) -> Self {
        self.regime = regime;
        self
    }

    pub fn with_scorer(mut self, scorer: Box<dyn EntryScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_trailing(mut self, trailing: Box<dyn TrailingStopCalculator>) -> Self {
        self.trailing = trailing;
        self
    }

    pub fn with_exit(mut self, exit: Box<dyn ExitChecker>) -> Self {
        self.exit = exit;
        self
    }

    /// Component names, e.g. for run summaries.
    pub fn describe(&self) -> String {
        format!(
            "regime={} scorer={} trailing={} exit={}",
            self.regime.name(),
            self.scorer.name(),
            self.trailing.name(),
            self.exit.name()
        )
    }
}

impl std::fmt::Debug for DecisionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::trailing::{PercentTrailing, TrailingGate};

    #[test]
    fn from_default_config() {
        let p = DecisionPipeline::from_config(&BotConfig::default()).unwrap();
        assert_eq!(
            p.describe(),
            "regime=threshold scorer=weighted trailing=atr_trailing exit=rule_exit"
        );
    }

    #[test]
    fn swap_one_component() {
        let p = DecisionPipeline::from_config(&BotConfig::default())
            .unwrap()
            .with_trailing(Box::new(PercentTrailing::new(1.0, TrailingGate::default())));
        assert_eq!(p.trailing.name(), "percent_trailing");
        assert_eq!(p.exit.name(), "rule_exit");
    }
}
