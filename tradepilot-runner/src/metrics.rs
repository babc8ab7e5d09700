//! Run statistics — pure functions over closed trades and decisions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tradepilot_core::domain::{ClosedTrade, Decision, DecisionAction};

/// Aggregate statistics for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub trade_count: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub profit_factor: f64,
    /// Largest peak-to-trough drop of cumulative P&L (positive number).
    pub max_drawdown: f64,
    pub max_consecutive_losses: usize,
    pub avg_bars_held: f64,
    pub avg_stop_updates: f64,
    pub exit_reasons: BTreeMap<String, usize>,
}

impl TradeStats {
    pub fn compute(trades: &[ClosedTrade]) -> Self {
        let wins = trades.iter().filter(|t| t.is_win()).count();
        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let mut exit_reasons = BTreeMap::new();
        for t in trades {
            *exit_reasons.entry(t.exit_reason.clone()).or_insert(0) += 1;
        }
        Self {
            trade_count: trades.len(),
            wins,
            losses: trades.len() - wins,
            win_rate: ratio(wins as f64, trades.len() as f64),
            total_pnl,
            avg_pnl: ratio(total_pnl, trades.len() as f64),
            profit_factor: profit_factor(trades),
            max_drawdown: max_drawdown(&cumulative_pnl(trades)),
            max_consecutive_losses: max_consecutive_losses(trades),
            avg_bars_held: ratio(trades.iter().map(|t| f64::from(t.bars_held)).sum(), trades.len() as f64),
            avg_stop_updates: ratio(
                trades.iter().map(|t| f64::from(t.stop_updates)).sum(),
                trades.len() as f64,
            ),
            exit_reasons,
        }
    }
}

/// How often each decision action was taken.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionCounts {
    pub no_trade: usize,
    pub enter: usize,
    pub hold: usize,
    pub exit: usize,
    pub adjust_stop: usize,
}

impl DecisionCounts {
    pub fn compute(decisions: &[Decision]) -> Self {
        let mut c = Self::default();
        for d in decisions {
            match d.action {
                DecisionAction::NoTrade => c.no_trade += 1,
                DecisionAction::Enter => c.enter += 1,
                DecisionAction::Hold => c.hold += 1,
                DecisionAction::Exit => c.exit += 1,
                DecisionAction::AdjustStop => c.adjust_stop += 1,
            }
        }
        c
    }

    pub fn total(&self) -> usize {
        self.no_trade + self.enter + self.hold + self.exit + self.adjust_stop
    }
}

// ─── Individual metric functions ────────────────────────────────────

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Gross profit over gross loss; `f64::MAX` when there are wins and no losses.
pub fn profit_factor(trades: &[ClosedTrade]) -> f64 {
    let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = trades.iter().filter(|t| t.pnl < 0.0).map(|t| -t.pnl).sum();
    if gross_loss < 1e-12 {
        return if gross_profit > 0.0 { f64::MAX } else { 0.0 };
    }
    gross_profit / gross_loss
}

/// Running sum of trade P&L, starting at zero.
pub fn cumulative_pnl(trades: &[ClosedTrade]) -> Vec<f64> {
    let mut curve = Vec::with_capacity(trades.len() + 1);
    let mut acc = 0.0;
    curve.push(acc);
    for t in trades {
        acc += t.pnl;
        curve.push(acc);
    }
    curve
}

pub fn max_drawdown(curve: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &v in curve {
        peak = peak.max(v);
        worst = worst.max(peak - v);
    }
    worst
}

pub fn max_consecutive_losses(trades: &[ClosedTrade]) -> usize {
    let mut run = 0;
    let mut best = 0;
    for t in trades {
        if t.is_win() {
            run = 0;
        } else {
            run += 1;
            best = best.max(run);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use tradepilot_core::domain::Side;

    fn trade(pnl: f64, reason: &str) -> ClosedTrade {
        let t = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        ClosedTrade {
            side: Side::Long,
            strategy: "weighted".into(),
            entry_time: t,
            entry_price: 100.0,
            exit_time: t,
            exit_price: 100.0 + pnl,
            quantity: 1.0,
            pnl,
            initial_stop: 98.0,
            final_stop: 98.0,
            stop_updates: 2,
            bars_held: 4,
            exit_reason: reason.into(),
        }
    }

    #[test]
    fn stats_over_mixed_trades() {
        let trades = vec![
            trade(3.0, "bollinger_reversion"),
            trade(-1.0, "stop_hit"),
            trade(-2.0, "stop_hit"),
            trade(4.0, "time_stop"),
        ];
        let s = TradeStats::compute(&trades);
        assert_eq!(s.trade_count, 4);
        assert_eq!(s.wins, 2);
        assert_eq!(s.win_rate, 0.5);
        assert_eq!(s.total_pnl, 4.0);
        assert!((s.profit_factor - 7.0 / 3.0).abs() < 1e-12);
        assert_eq!(s.max_drawdown, 3.0);
        assert_eq!(s.max_consecutive_losses, 2);
        assert_eq!(s.exit_reasons["stop_hit"], 2);
        assert_eq!(s.avg_bars_held, 4.0);
    }

    #[test]
    fn empty_run_is_all_zero() {
        let s = TradeStats::compute(&[]);
        assert_eq!(s.trade_count, 0);
        assert_eq!(s.win_rate, 0.0);
        assert_eq!(s.profit_factor, 0.0);
        assert_eq!(s.max_drawdown, 0.0);
    }

    #[test]
    fn drawdown_from_first_peak() {
        assert_eq!(max_drawdown(&[0.0, 5.0, 1.0, 6.0, 2.5]), 4.0);
    }
}
