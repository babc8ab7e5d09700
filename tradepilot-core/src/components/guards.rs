//! Trading guards — soft limits that suppress new entries.
//!
//! Guards implement the three blocking conditions:
//! - DailyLossGuard: realized loss for the UTC day has reached the limit
//! - MaxTradesGuard: entries for the UTC day have reached the limit
//! - LossStreakGuard: a losing streak started a cooldown that has not elapsed
//!
//! Guards never close positions. They only stop FLAT from opening new ones,
//! and they lift on their own once the day rolls over or the cooldown ends.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::GuardConfig;
use crate::domain::ClosedTrade;

/// Why entries are currently blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    DailyLossLimit,
    MaxTradesPerDay,
    LossStreakCooldown,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::DailyLossLimit => write!(f, "daily_loss_limit"),
            BlockReason::MaxTradesPerDay => write!(f, "max_trades_per_day"),
            BlockReason::LossStreakCooldown => write!(f, "loss_streak_cooldown"),
        }
    }
}

/// Running per-day and streak counters the guards read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardLedger {
    pub day: Option<NaiveDate>,
    pub realized_today: f64,
    pub entries_today: u32,
    pub loss_streak: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl GuardLedger {
    /// Reset the daily counters when `now` falls on a new UTC day.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.realized_today = 0.0;
            self.entries_today = 0;
        }
    }
}

/// Trait for guards that can block entries.
pub trait Guard: Send + Sync {
    /// Returns the block reason if this guard is currently tripped.
    fn evaluate(&self, ledger: &GuardLedger, now: DateTime<Utc>) -> Option<BlockReason>;

    /// Guard name for logging.
    fn name(&self) -> &str;
}

#[derive(Debug)]
pub struct DailyLossGuard {
    /// Maximum realized loss per day, as a positive number.
    pub max_loss: f64,
}

impl Guard for DailyLossGuard {
    fn evaluate(&self, ledger: &GuardLedger, _now: DateTime<Utc>) -> Option<BlockReason> {
        (ledger.realized_today <= -self.max_loss).then_some(BlockReason::DailyLossLimit)
    }

    fn name(&self) -> &str {
        "DailyLossGuard"
    }
}

#[derive(Debug)]
pub struct MaxTradesGuard {
    pub max_trades: u32,
}

impl Guard for MaxTradesGuard {
    fn evaluate(&self, ledger: &GuardLedger, _now: DateTime<Utc>) -> Option<BlockReason> {
        (ledger.entries_today >= self.max_trades).then_some(BlockReason::MaxTradesPerDay)
    }

    fn name(&self) -> &str {
        "MaxTradesGuard"
    }
}

#[derive(Debug)]
pub struct LossStreakGuard;

impl Guard for LossStreakGuard {
    fn evaluate(&self, ledger: &GuardLedger, now: DateTime<Utc>) -> Option<BlockReason> {
        match ledger.cooldown_until {
            Some(until) if now < until => Some(BlockReason::LossStreakCooldown),
            _ => None,
        }
    }

    fn name(&self) -> &str {
        "LossStreakGuard"
    }
}

/// Result of one guard evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardStatus {
    pub reasons: Vec<BlockReason>,
    /// True when `reasons` differs from the previous evaluation.
    pub changed: bool,
}

impl GuardStatus {
    pub fn is_blocked(&self) -> bool {
        !self.reasons.is_empty()
    }
}

/// Owns the ledger and the configured guards.
pub struct TradingGuard {
    config: GuardConfig,
    guards: Vec<Box<dyn Guard>>,
    ledger: GuardLedger,
    last_reported: Vec<BlockReason>,
}

impl TradingGuard {
    pub fn new(config: GuardConfig) -> Self {
        let mut guards: Vec<Box<dyn Guard>> = Vec::new();
        if let Some(max_loss) = config.max_daily_loss {
            guards.push(Box::new(DailyLossGuard {
                max_loss: max_loss.abs(),
            }));
        }
        if let Some(max_trades) = config.max_trades_per_day {
            guards.push(Box::new(MaxTradesGuard { max_trades }));
        }
        if config.loss_streak_limit.is_some() {
            guards.push(Box::new(LossStreakGuard));
        }
        Self {
            config,
            guards,
            ledger: GuardLedger::default(),
            last_reported: Vec::new(),
        }
    }

    pub fn ledger(&self) -> &GuardLedger {
        &self.ledger
    }

    pub fn guard_names(&self) -> Vec<&str> {
        self.guards.iter().map(|g| g.name()).collect()
    }

    pub fn record_entry(&mut self, at: DateTime<Utc>) {
        self.ledger.roll(at);
        self.ledger.entries_today += 1;
    }

    /// Book a closed trade's P&L and update the loss streak.
    pub fn record_close(&mut self, trade: &ClosedTrade) {
        self.ledger.roll(trade.exit_time);
        self.ledger.realized_today += trade.pnl;
        if trade.pnl < 0.0 {
            self.ledger.loss_streak += 1;
            if let Some(limit) = self.config.loss_streak_limit {
                if self.ledger.loss_streak >= limit {
                    self.ledger.cooldown_until =
                        Some(trade.exit_time + Duration::minutes(self.config.cooldown_minutes));
                    self.ledger.loss_streak = 0;
                }
            }
        } else {
            self.ledger.loss_streak = 0;
        }
    }

    /// Evaluate all guards at `now`.
    ///
    /// `changed` is set only when the set of reasons differs from the last
    /// evaluation, so callers can surface it once per change.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> GuardStatus {
        self.ledger.roll(now);
        if matches!(self.ledger.cooldown_until, Some(until) if now >= until) {
            self.ledger.cooldown_until = None;
        }
        let reasons: Vec<BlockReason> = self
            .guards
            .iter()
            .filter_map(|g| g.evaluate(&self.ledger, now))
            .collect();
        let changed = reasons != self.last_reported;
        if changed {
            self.last_reported = reasons.clone();
        }
        GuardStatus { reasons, changed }
    }
}

impl fmt::Debug for TradingGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradingGuard")
            .field("guards", &self.guard_names())
            .field("ledger", &self.ledger)
            .finish()
    }
}
