//! Bot configuration — every tunable of the decision core.
//!
//! All sections deserialize with defaults, so a settings file only needs to
//! name the values it changes.

use serde::{Deserialize, Serialize};

use crate::domain::TrailingMode;

/// Complete configuration of one bot instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BotConfig {
    pub entry: EntryConfig,
    pub regime: RegimeConfig,
    pub scoring: ScoringWeights,
    pub trailing: TrailingConfig,
    pub exit: ExitConfig,
    pub guards: GuardConfig,
    pub sizing: SizingConfig,
    pub advisory: AdvisoryConfig,
    /// Bounded length of the state machine's transition history.
    pub transition_history: TransitionHistoryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    /// Minimum entry score for a signal candidate.
    pub threshold: f64,
    /// If false, a qualifying score enters directly (FLAT → ENTERED).
    pub require_confirmation: bool,
    /// Fraction of `threshold` the refreshed score must keep to confirm.
    pub confirm_ratio: f64,
    /// Bars to wait before a candidate is re-scored.
    pub confirm_after_bars: u32,
    /// Hard wall-clock expiry for candidates, in seconds.
    pub signal_timeout_secs: i64,
    /// Initial stop distance as a percentage of the entry price.
    pub stop_loss_pct: f64,
    pub allow_long: bool,
    pub allow_short: bool,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            threshold: 0.60,
            require_confirmation: true,
            confirm_ratio: 0.9,
            confirm_after_bars: 1,
            signal_timeout_secs: 600,
            stop_loss_pct: 2.0,
            allow_long: true,
            allow_short: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// ADX above this value is a trending market.
    pub adx_trend_threshold: f64,
    /// ATR% of price above which volatility is extreme.
    pub vol_extreme_pct: f64,
    /// ATR% of price above which volatility is high.
    pub vol_high_pct: f64,
    /// ATR% of price below which volatility is low.
    pub vol_low_pct: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            adx_trend_threshold: 25.0,
            vol_extreme_pct: 3.0,
            vol_high_pct: 2.0,
            vol_low_pct: 0.5,
        }
    }
}

/// Weights of the five entry-score families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub trend: f64,
    pub momentum: f64,
    pub macd: f64,
    pub adx: f64,
    pub bollinger: f64,
}

impl ScoringWeights {
    pub fn total(&self) -> f64 {
        self.trend + self.momentum + self.macd + self.adx + self.bollinger
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            trend: 0.30,
            momentum: 0.20,
            macd: 0.20,
            adx: 0.15,
            bollinger: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingConfig {
    pub mode: TrailingMode,
    /// Return-on-risk percentage at which trailing starts.
    pub activation_pct: f64,
    /// Minimum stop move, as a percentage of the current stop.
    pub min_step_pct: f64,
    /// Percentage mode: distance from the current price.
    pub pct_distance: f64,
    /// ATR mode: fixed multiplier (used when `adaptive` is false).
    pub atr_multiplier: f64,
    /// ATR mode: interpolate the multiplier from ADX.
    pub adaptive: bool,
    pub ranging_multiplier: f64,
    pub trending_multiplier: f64,
    /// Added to the multiplier when ATR% of price exceeds `volatility_bonus_above_pct`.
    pub volatility_bonus: f64,
    pub volatility_bonus_above_pct: f64,
    /// Structure mode: ATR multiple added beyond the Bollinger band.
    pub structure_buffer_atr: f64,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            mode: TrailingMode::Atr,
            activation_pct: 10.0,
            min_step_pct: 0.1,
            pct_distance: 1.0,
            atr_multiplier: 2.0,
            adaptive: true,
            ranging_multiplier: 1.5,
            trending_multiplier: 2.5,
            volatility_bonus: 0.5,
            volatility_bonus_above_pct: 2.0,
            structure_buffer_atr: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    /// ATR% of price that counts as a volatility spike.
    pub volatility_spike_pct: f64,
    /// Adverse move (percent of entry) that, with a spike, forces an exit.
    pub adverse_move_pct: f64,
    pub regime_flip_confidence: f64,
    /// Time stop. `None` disables it.
    pub max_bars_held: Option<u32>,
    pub enable_rsi_extreme: bool,
    pub enable_macd_cross: bool,
    pub enable_bollinger_reversion: bool,
    pub enable_trend_break: bool,
    pub enable_volatility_spike: bool,
    pub enable_regime_flip: bool,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            rsi_overbought: 75.0,
            rsi_oversold: 25.0,
            volatility_spike_pct: 3.0,
            adverse_move_pct: 1.0,
            regime_flip_confidence: 0.7,
            max_bars_held: Some(96),
            enable_rsi_extreme: true,
            enable_macd_cross: true,
            enable_bollinger_reversion: true,
            enable_trend_break: true,
            enable_volatility_spike: true,
            enable_regime_flip: true,
        }
    }
}

/// Soft limits that suppress new entries while active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Maximum realized loss per UTC day (positive number).
    pub max_daily_loss: Option<f64>,
    pub max_trades_per_day: Option<u32>,
    /// Consecutive losing trades that start a cooldown.
    pub loss_streak_limit: Option<u32>,
    pub cooldown_minutes: i64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: None,
            max_trades_per_day: None,
            loss_streak_limit: None,
            cooldown_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Fixed quantity per entry; rule strategies may scale it by `position_size`.
    pub quantity: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self { quantity: 1.0 }
    }
}

/// Gates applied when the optional advisory or pattern services are attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisoryConfig {
    /// Pattern lookups with fewer samples than this never block.
    pub pattern_min_samples: usize,
    /// Entries are blocked when similar setups won less often than this.
    pub pattern_min_win_rate: f64,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            pattern_min_samples: 20,
            pattern_min_win_rate: 0.45,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionHistoryConfig {
    pub limit: usize,
}

impl Default for TransitionHistoryConfig {
    fn default() -> Self {
        Self { limit: 1000 }
    }
}
