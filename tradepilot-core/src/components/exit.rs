//! Exit signal checking — prioritized, first match wins.
//!
//! Priority (urgency in parentheses):
//! 1. Stop breached by the bar's high/low (3)
//! 2. RSI extreme against the position (2)
//! 3. MACD cross against the position (2)
//! 4. Bollinger band reached while in profit (1)
//! 5. Close through the slow moving average (2)
//! 6. Volatility spike with an adverse move (3)
//! 7. Confident regime flip against the position (2)
//! 8. Bars held over the limit (1)
//!
//! Each check is a pure function of its inputs. Checks 2-7 can be disabled.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ExitConfig;
use crate::domain::{keys, FeatureSnapshot, Position, RegimeState, Side};

/// Why a position should be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopHit,
    RsiExtreme,
    MacdCross,
    BollingerReversion,
    TrendBreak,
    VolatilitySpike,
    RegimeFlip,
    TimeStop,
    /// A routed rule strategy's exit tree held.
    StrategyExit,
    Manual,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::StopHit => "stop_hit",
            ExitReason::RsiExtreme => "rsi_extreme",
            ExitReason::MacdCross => "macd_cross",
            ExitReason::BollingerReversion => "bollinger_reversion",
            ExitReason::TrendBreak => "trend_break",
            ExitReason::VolatilitySpike => "volatility_spike",
            ExitReason::RegimeFlip => "regime_flip",
            ExitReason::TimeStop => "time_stop",
            ExitReason::StrategyExit => "strategy_exit",
            ExitReason::Manual => "manual_exit",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitSignal {
    pub reason: ExitReason,
    /// 1 (low) to 3 (close immediately).
    pub urgency: u8,
    pub detail: String,
}

impl ExitSignal {
    pub fn new(reason: ExitReason, urgency: u8, detail: impl Into<String>) -> Self {
        Self {
            reason,
            urgency,
            detail: detail.into(),
        }
    }
}

/// Direction of a MACD signal-line cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacdCross {
    Bullish,
    Bearish,
}

impl MacdCross {
    /// Cross on this bar, if any.
    ///
    /// Uses the explicit `macd_cross` flag (+1/-1) when the producer supplies
    /// it, otherwise a sign change between `macd_hist_prev` and `macd_hist`.
    pub fn detect(snapshot: &FeatureSnapshot) -> Option<MacdCross> {
        if let Some(flag) = snapshot.get(keys::MACD_CROSS) {
            return if flag > 0.0 {
                Some(MacdCross::Bullish)
            } else if flag < 0.0 {
                Some(MacdCross::Bearish)
            } else {
                None
            };
        }
        let hist = snapshot.get(keys::MACD_HIST)?;
        let prev = snapshot.get(keys::MACD_HIST_PREV)?;
        if prev <= 0.0 && hist > 0.0 {
            Some(MacdCross::Bullish)
        } else if prev >= 0.0 && hist < 0.0 {
            Some(MacdCross::Bearish)
        } else {
            None
        }
    }

    pub fn is_against(self, side: Side) -> bool {
        matches!(
            (self, side),
            (MacdCross::Bearish, Side::Long) | (MacdCross::Bullish, Side::Short)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MacdCross::Bullish => "bullish",
            MacdCross::Bearish => "bearish",
        }
    }
}

/// Trait for exit checkers.
pub trait ExitChecker: Send + Sync {
    fn name(&self) -> &str;

    /// First exit condition that holds, or `None` to keep the position.
    fn check(
        &self,
        snapshot: &FeatureSnapshot,
        position: &Position,
        regime: &RegimeState,
        previous_regime: Option<&RegimeState>,
    ) -> Option<ExitSignal>;
}

/// The eight built-in checks in fixed priority order.
#[derive(Debug, Clone, Default)]
pub struct RuleExitChecker {
    pub config: ExitConfig,
}

impl RuleExitChecker {
    pub fn new(config: ExitConfig) -> Self {
        Self { config }
    }
}

pub fn stop_breached(snapshot: &FeatureSnapshot, position: &Position) -> Option<ExitSignal> {
    if position.is_stop_breached(snapshot.high, snapshot.low) {
        let touched = match position.side {
            Side::Long => snapshot.low,
            Side::Short => snapshot.high,
        };
        return Some(ExitSignal::new(
            ExitReason::StopHit,
            3,
            format!("stop {:.4} touched at {:.4}", position.stop(), touched),
        ));
    }
    None
}

pub fn rsi_extreme(snapshot: &FeatureSnapshot, side: Side, config: &ExitConfig) -> Option<ExitSignal> {
    let rsi = snapshot.get(keys::RSI)?;
    let hit = match side {
        Side::Long => rsi >= config.rsi_overbought,
        Side::Short => rsi <= config.rsi_oversold,
    };
    hit.then(|| ExitSignal::new(ExitReason::RsiExtreme, 2, format!("rsi {rsi:.1}")))
}

pub fn macd_cross(snapshot: &FeatureSnapshot, side: Side) -> Option<ExitSignal> {
    let cross = MacdCross::detect(snapshot)?;
    cross.is_against(side).then(|| {
        ExitSignal::new(ExitReason::MacdCross, 2, format!("{} macd cross", cross.as_str()))
    })
}

pub fn bollinger_reversion(snapshot: &FeatureSnapshot, position: &Position) -> Option<ExitSignal> {
    if !position.is_in_profit() {
        return None;
    }
    let hit = match position.side {
        Side::Long => snapshot.close >= snapshot.get(keys::BB_UPPER)?,
        Side::Short => snapshot.close <= snapshot.get(keys::BB_LOWER)?,
    };
    hit.then(|| ExitSignal::new(ExitReason::BollingerReversion, 1, "band reached in profit"))
}

pub fn trend_break(snapshot: &FeatureSnapshot, side: Side) -> Option<ExitSignal> {
    let ma = snapshot.slow_ma()?;
    let hit = match side {
        Side::Long => snapshot.close < ma,
        Side::Short => snapshot.close > ma,
    };
    hit.then(|| {
        ExitSignal::new(
            ExitReason::TrendBreak,
            2,
            format!("close {:.4} through slow ma {ma:.4}", snapshot.close),
        )
    })
}

pub fn volatility_spike(
    snapshot: &FeatureSnapshot,
    position: &Position,
    config: &ExitConfig,
) -> Option<ExitSignal> {
    let atr_pct = snapshot.atr_pct()?;
    let adverse = position.unrealized_pct() <= -config.adverse_move_pct;
    (atr_pct > config.volatility_spike_pct && adverse).then(|| {
        ExitSignal::new(
            ExitReason::VolatilitySpike,
            3,
            format!("atr {atr_pct:.2}% with {:.2}% adverse", position.unrealized_pct()),
        )
    })
}

pub fn regime_flip(
    side: Side,
    regime: &RegimeState,
    previous: Option<&RegimeState>,
    config: &ExitConfig,
) -> Option<ExitSignal> {
    let previous = previous?;
    let flipped = previous.regime != regime.regime
        && regime.regime.is_against(side)
        && regime.regime_confidence > config.regime_flip_confidence;
    flipped.then(|| {
        ExitSignal::new(
            ExitReason::RegimeFlip,
            2,
            format!(
                "{} -> {} ({:.2})",
                previous.regime, regime.regime, regime.regime_confidence
            ),
        )
    })
}

pub fn time_stop(position: &Position, max_bars: Option<u32>) -> Option<ExitSignal> {
    let max = max_bars?;
    (position.bars_held > max).then(|| {
        ExitSignal::new(
            ExitReason::TimeStop,
            1,
            format!("held {} bars > {max}", position.bars_held),
        )
    })
}

impl ExitChecker for RuleExitChecker {
    fn name(&self) -> &str {
        "rule_exit"
    }

    fn check(
        &self,
        snapshot: &FeatureSnapshot,
        position: &Position,
        regime: &RegimeState,
        previous_regime: Option<&RegimeState>,
    ) -> Option<ExitSignal> {
        let c = &self.config;
        let side = position.side;

        stop_breached(snapshot, position)
            .or_else(|| c.enable_rsi_extreme.then(|| rsi_extreme(snapshot, side, c)).flatten())
            .or_else(|| c.enable_macd_cross.then(|| macd_cross(snapshot, side)).flatten())
            .or_else(|| {
                c.enable_bollinger_reversion
                    .then(|| bollinger_reversion(snapshot, position))
                    .flatten()
            })
            .or_else(|| c.enable_trend_break.then(|| trend_break(snapshot, side)).flatten())
            .or_else(|| {
                c.enable_volatility_spike
                    .then(|| volatility_spike(snapshot, position, c))
                    .flatten()
            })
            .or_else(|| {
                c.enable_regime_flip
                    .then(|| regime_flip(side, regime, previous_regime, c))
                    .flatten()
            })
            .or_else(|| time_stop(position, c.max_bars_held))
    }
}
