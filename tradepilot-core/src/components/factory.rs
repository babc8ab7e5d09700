//! Factory system — converts `BotConfig` sections into runtime trait objects.
//!
//! Four factory functions (`create_regime`, `create_scorer`, `create_trailing`,
//! `create_exit`) validate their section and return a boxed component.
//! [`super::pipeline::DecisionPipeline::from_config`] calls all four.

use crate::config::{ExitConfig, RegimeConfig, ScoringWeights, TrailingConfig};
use crate::domain::TrailingMode;

use super::exit::{ExitChecker, RuleExitChecker};
use super::regime::{RegimeClassifier, ThresholdClassifier};
use super::scoring::{EntryScorer, WeightedScorer};
use super::trailing::{
    AtrMultiplier, AtrTrailing, PercentTrailing, StructureTrailing, TrailingGate,
    TrailingStopCalculator,
};

// ─── Error type ──────────────────────────────────────────────────────

/// Errors that can occur during component construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FactoryError {
    #[error("invalid {component} parameter `{param}`: {value} ({expected})")]
    InvalidParam {
        component: &'static str,
        param: &'static str,
        value: f64,
        expected: &'static str,
    },
    #[error("scoring weights must be non-negative and sum to a positive total, got {0}")]
    InvalidWeights(f64),
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn require(
    ok: bool,
    component: &'static str,
    param: &'static str,
    value: f64,
    expected: &'static str,
) -> Result<(), FactoryError> {
    if ok && value.is_finite() {
        Ok(())
    } else {
        Err(FactoryError::InvalidParam {
            component,
            param,
            value,
            expected,
        })
    }
}

// ─── Regime factory ─────────────────────────────────────────────────

pub fn create_regime(config: &RegimeConfig) -> Result<Box<dyn RegimeClassifier>, FactoryError> {
    let c = config;
    require(c.adx_trend_threshold > 0.0, "regime", "adx_trend_threshold", c.adx_trend_threshold, "> 0")?;
    require(c.vol_low_pct >= 0.0, "regime", "vol_low_pct", c.vol_low_pct, ">= 0")?;
    require(c.vol_high_pct > c.vol_low_pct, "regime", "vol_high_pct", c.vol_high_pct, "> vol_low_pct")?;
    require(
        c.vol_extreme_pct > c.vol_high_pct,
        "regime",
        "vol_extreme_pct",
        c.vol_extreme_pct,
        "> vol_high_pct",
    )?;
    Ok(Box::new(ThresholdClassifier::new(config.clone())))
}

// ─── Scorer factory ─────────────────────────────────────────────────

pub fn create_scorer(weights: &ScoringWeights) -> Result<Box<dyn EntryScorer>, FactoryError> {
    let all = [weights.trend, weights.momentum, weights.macd, weights.adx, weights.bollinger];
    let total = weights.total();
    if all.iter().any(|w| !w.is_finite() || *w < 0.0) || total <= 0.0 {
        return Err(FactoryError::InvalidWeights(total));
    }
    Ok(Box::new(WeightedScorer::new(weights.clone())))
}

// ─── Trailing factory ───────────────────────────────────────────────

/// Create the trailing calculator for the configured mode.
pub fn create_trailing(config: &TrailingConfig) -> Result<Box<dyn TrailingStopCalculator>, FactoryError> {
    let c = config;
    require(c.activation_pct >= 0.0, "trailing", "activation_pct", c.activation_pct, ">= 0")?;
    require(c.min_step_pct >= 0.0, "trailing", "min_step_pct", c.min_step_pct, ">= 0")?;
    let gate = TrailingGate::new(c.activation_pct, c.min_step_pct);

    match c.mode {
        TrailingMode::Percentage => {
            require(
                c.pct_distance > 0.0 && c.pct_distance < 100.0,
                "trailing",
                "pct_distance",
                c.pct_distance,
                "in (0, 100)",
            )?;
            Ok(Box::new(PercentTrailing::new(c.pct_distance, gate)))
        }
        TrailingMode::Atr => {
            if c.adaptive {
                require(c.ranging_multiplier > 0.0, "trailing", "ranging_multiplier", c.ranging_multiplier, "> 0")?;
                require(
                    c.trending_multiplier > 0.0,
                    "trailing",
                    "trending_multiplier",
                    c.trending_multiplier,
                    "> 0",
                )?;
                require(c.volatility_bonus >= 0.0, "trailing", "volatility_bonus", c.volatility_bonus, ">= 0")?;
            } else {
                require(c.atr_multiplier > 0.0, "trailing", "atr_multiplier", c.atr_multiplier, "> 0")?;
            }
            Ok(Box::new(AtrTrailing::new(AtrMultiplier::from_config(c), gate)))
        }
        TrailingMode::Structure => {
            require(
                c.structure_buffer_atr >= 0.0,
                "trailing",
                "structure_buffer_atr",
                c.structure_buffer_atr,
                ">= 0",
            )?;
            Ok(Box::new(StructureTrailing::new(c.structure_buffer_atr, gate)))
        }
    }
}

// ─── Exit factory ───────────────────────────────────────────────────

pub fn create_exit(config: &ExitConfig) -> Result<Box<dyn ExitChecker>, FactoryError> {
    let c = config;
    require(
        c.rsi_overbought > c.rsi_oversold,
        "exit",
        "rsi_overbought",
        c.rsi_overbought,
        "> rsi_oversold",
    )?;
    require(
        (0.0..=1.0).contains(&c.regime_flip_confidence),
        "exit",
        "regime_flip_confidence",
        c.regime_flip_confidence,
        "in [0, 1]",
    )?;
    Ok(Box::new(RuleExitChecker::new(config.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        assert_eq!(create_regime(&RegimeConfig::default()).unwrap().name(), "threshold");
        assert_eq!(create_scorer(&ScoringWeights::default()).unwrap().name(), "weighted");
        assert_eq!(create_trailing(&TrailingConfig::default()).unwrap().name(), "atr_trailing");
        assert_eq!(create_exit(&ExitConfig::default()).unwrap().name(), "rule_exit");
    }

    #[test]
    fn trailing_mode_selects_calculator() {
        for (mode, name) in [
            (TrailingMode::Percentage, "percent_trailing"),
            (TrailingMode::Atr, "atr_trailing"),
            (TrailingMode::Structure, "structure_trailing"),
        ] {
            let cfg = TrailingConfig {
                mode,
                ..TrailingConfig::default()
            };
            let calc = create_trailing(&cfg).unwrap();
            assert_eq!(calc.name(), name);
            assert_eq!(calc.mode(), mode);
        }
    }

    #[test]
    fn rejects_bad_percentage() {
        let cfg = TrailingConfig {
            mode: TrailingMode::Percentage,
            pct_distance: 0.0,
            ..TrailingConfig::default()
        };
        let err = create_trailing(&cfg).err().unwrap();
        assert!(matches!(err, FactoryError::InvalidParam { param: "pct_distance", .. }));
    }

    #[test]
    fn rejects_zero_weights() {
        let w = ScoringWeights {
            trend: 0.0,
            momentum: 0.0,
            macd: 0.0,
            adx: 0.0,
            bollinger: 0.0,
        };
        assert_eq!(create_scorer(&w).err(), Some(FactoryError::InvalidWeights(0.0)));
    }

    #[test]
    fn rejects_inverted_volatility_bands() {
        let cfg = RegimeConfig {
            vol_high_pct: 4.0,
            ..RegimeConfig::default()
        };
        assert!(create_regime(&cfg).is_err());
    }
}
