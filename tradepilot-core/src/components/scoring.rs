//! Entry scoring — weighted multi-indicator score in [0, 1] per side.
//!
//! Five families contribute: trend/MA alignment, RSI momentum, MACD, ADX
//! strength and Bollinger position. A family adds its full weight on a full
//! match and half on a partial one, but only if its inputs are present. The
//! total is divided by the weight of the families that were actually
//! evaluated, so missing data never drags the score toward zero.

use serde::{Deserialize, Serialize};

use crate::config::ScoringWeights;
use crate::domain::{keys, FeatureSnapshot, Side};

/// Indicator family contributing to the entry score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreFamily {
    Trend,
    Momentum,
    Macd,
    Adx,
    Bollinger,
}

/// How well a family matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyMatch {
    Full,
    Partial,
    None,
}

impl FamilyMatch {
    fn factor(self) -> f64 {
        match self {
            FamilyMatch::Full => 1.0,
            FamilyMatch::Partial => 0.5,
            FamilyMatch::None => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyContribution {
    pub family: ScoreFamily,
    pub weight: f64,
    pub matched: FamilyMatch,
}

/// Score plus the per-family detail behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub side: Side,
    /// Normalized score in [0, 1].
    pub score: f64,
    /// Sum of the weights of families whose data was present.
    pub applied_weight: f64,
    pub contributions: Vec<FamilyContribution>,
}

impl ScoreBreakdown {
    /// Reason codes for matched families, e.g. `trend:full`.
    pub fn reasons(&self) -> Vec<String> {
        self.contributions
            .iter()
            .filter(|c| c.matched != FamilyMatch::None)
            .map(|c| {
                let family = match c.family {
                    ScoreFamily::Trend => "trend",
                    ScoreFamily::Momentum => "momentum",
                    ScoreFamily::Macd => "macd",
                    ScoreFamily::Adx => "adx",
                    ScoreFamily::Bollinger => "bollinger",
                };
                let grade = if c.matched == FamilyMatch::Full { "full" } else { "partial" };
                format!("{family}:{grade}")
            })
            .collect()
    }
}

/// Trait for entry scorers.
pub trait EntryScorer: Send + Sync {
    fn name(&self) -> &str;

    /// Score the snapshot for entering on `side`. The score is always in [0, 1].
    fn score(&self, snapshot: &FeatureSnapshot, side: Side) -> ScoreBreakdown;
}

/// The five-family weighted scorer.
#[derive(Debug, Clone, Default)]
pub struct WeightedScorer {
    pub weights: ScoringWeights,
}

impl WeightedScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// Close vs. fast vs. slow moving average.
    fn trend(snapshot: &FeatureSnapshot, side: Side) -> Option<FamilyMatch> {
        let fast = snapshot.fast_ma()?;
        let slow = snapshot.slow_ma()?;
        let close = snapshot.close;
        let (stacked, partial) = match side {
            Side::Long => (close > fast && fast > slow, close > slow || fast > slow),
            Side::Short => (close < fast && fast < slow, close < slow || fast < slow),
        };
        Some(grade(stacked, partial))
    }

    /// RSI in the with-trend momentum zone, partial when neutral or stretched the other way.
    fn momentum(snapshot: &FeatureSnapshot, side: Side) -> Option<FamilyMatch> {
        let rsi = snapshot.get(keys::RSI)?;
        let (full, partial) = match side {
            Side::Long => (rsi > 50.0 && rsi < 70.0, (40.0..=50.0).contains(&rsi) || rsi < 30.0),
            Side::Short => (rsi < 50.0 && rsi > 30.0, (50.0..=60.0).contains(&rsi) || rsi > 70.0),
        };
        Some(grade(full, partial))
    }

    /// MACD above/below its signal line, full when also on the right side of zero.
    fn macd(snapshot: &FeatureSnapshot, side: Side) -> Option<FamilyMatch> {
        let macd = snapshot.get(keys::MACD)?;
        let signal = snapshot.get(keys::MACD_SIGNAL)?;
        let (full, partial) = match side {
            Side::Long => (macd > signal && macd > 0.0, macd > signal),
            Side::Short => (macd < signal && macd < 0.0, macd < signal),
        };
        Some(grade(full, partial))
    }

    /// Trend strength. When directional indices are present they must agree with the side.
    fn adx(snapshot: &FeatureSnapshot, side: Side) -> Option<FamilyMatch> {
        let adx = snapshot.get(keys::ADX)?;
        let agrees = match (snapshot.get(keys::PLUS_DI), snapshot.get(keys::MINUS_DI)) {
            (Some(plus), Some(minus)) => match side {
                Side::Long => plus > minus,
                Side::Short => minus > plus,
            },
            _ => true,
        };
        if !agrees {
            return Some(FamilyMatch::None);
        }
        Some(grade(adx > 25.0, adx >= 20.0))
    }

    /// Position within the Bollinger bands (%b).
    fn bollinger(snapshot: &FeatureSnapshot, side: Side) -> Option<FamilyMatch> {
        let upper = snapshot.get(keys::BB_UPPER)?;
        let lower = snapshot.get(keys::BB_LOWER)?;
        if upper <= lower {
            return None;
        }
        let middle = snapshot.get(keys::BB_MIDDLE).unwrap_or((upper + lower) / 2.0);
        let pct_b = (snapshot.close - lower) / (upper - lower);
        let close = snapshot.close;
        let (full, partial) = match side {
            Side::Long => (close > middle && pct_b <= 0.8, pct_b < 0.2),
            Side::Short => (close < middle && pct_b >= 0.2, pct_b > 0.8),
        };
        Some(grade(full, partial))
    }
}

fn grade(full: bool, partial: bool) -> FamilyMatch {
    if full {
        FamilyMatch::Full
    } else if partial {
        FamilyMatch::Partial
    } else {
        FamilyMatch::None
    }
}

impl EntryScorer for WeightedScorer {
    fn name(&self) -> &str {
        "weighted"
    }

    fn score(&self, snapshot: &FeatureSnapshot, side: Side) -> ScoreBreakdown {
        let w = &self.weights;
        let families: [(ScoreFamily, f64, Option<FamilyMatch>); 5] = [
            (ScoreFamily::Trend, w.trend, Self::trend(snapshot, side)),
            (ScoreFamily::Momentum, w.momentum, Self::momentum(snapshot, side)),
            (ScoreFamily::Macd, w.macd, Self::macd(snapshot, side)),
            (ScoreFamily::Adx, w.adx, Self::adx(snapshot, side)),
            (ScoreFamily::Bollinger, w.bollinger, Self::bollinger(snapshot, side)),
        ];

        let mut total = 0.0;
        let mut applied_weight = 0.0;
        let mut contributions = Vec::with_capacity(5);
        for (family, weight, matched) in families {
            let Some(matched) = matched else { continue };
            applied_weight += weight;
            total += weight * matched.factor();
            contributions.push(FamilyContribution {
                family,
                weight,
                matched,
            });
        }

        let score = if applied_weight > 0.0 {
            (total / applied_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        ScoreBreakdown {
            side,
            score,
            applied_weight,
            contributions,
        }
    }
}
