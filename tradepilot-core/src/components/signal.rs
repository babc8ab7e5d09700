//! Signal factory — turns a qualifying score into a candidate signal, and
//! decides whether a pending candidate confirms or expires.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::config::EntryConfig;
use crate::domain::{FeatureSnapshot, Side, Signal, SignalId, SignalStatus};

/// Why a candidate signal was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    /// Older than the hard wall-clock timeout.
    Timeout,
    /// Refreshed score fell below the confirmation floor.
    ScoreDecayed,
}

impl ExpiryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExpiryReason::Timeout => "signal_timeout",
            ExpiryReason::ScoreDecayed => "score_decayed",
        }
    }
}

/// Outcome of re-checking a pending candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalReview {
    Confirm,
    Wait,
    Expire(ExpiryReason),
}

/// Builds signals and reviews pending candidates.
#[derive(Debug, Clone)]
pub struct SignalFactory {
    pub config: EntryConfig,
    next_id: u64,
}

impl SignalFactory {
    pub fn new(config: EntryConfig) -> Self {
        Self { config, next_id: 1 }
    }

    /// Score a signal must keep on re-check to confirm.
    pub fn confirmation_floor(&self) -> f64 {
        self.config.threshold * self.config.confirm_ratio
    }

    pub fn timeout(&self) -> Duration {
        Duration::seconds(self.config.signal_timeout_secs)
    }

    /// Initial stop for an entry at `price`.
    pub fn stop_for(&self, side: Side, price: f64, stop_pct: f64) -> f64 {
        match side {
            Side::Long => price * (1.0 - stop_pct / 100.0),
            Side::Short => price * (1.0 + stop_pct / 100.0),
        }
    }

    /// Create a candidate signal at the snapshot's close.
    ///
    /// `stop_pct` overrides the configured stop-loss percentage (strategy risk block).
    pub fn create(
        &mut self,
        snapshot: &FeatureSnapshot,
        side: Side,
        score: f64,
        strategy: &str,
        stop_pct: Option<f64>,
        bar_index: usize,
        reasons: Vec<String>,
    ) -> Signal {
        let stop_pct = stop_pct.unwrap_or(self.config.stop_loss_pct);
        let id = SignalId(self.next_id);
        self.next_id += 1;
        Signal {
            id,
            side,
            score: score.clamp(0.0, 1.0),
            entry_price: snapshot.close,
            stop_price: self.stop_for(side, snapshot.close, stop_pct),
            stop_pct,
            strategy: strategy.to_string(),
            reasons,
            status: SignalStatus::Candidate,
            created_at: snapshot.timestamp,
            bar_index,
        }
    }

    /// Decide the fate of a pending candidate.
    ///
    /// `age` is measured on the caller's clock since the candidate was
    /// received, not from the bar timestamp. The hard timeout wins over
    /// everything, then the signal waits until `confirm_after_bars` bars
    /// have passed, then the refreshed score decides.
    pub fn review(&self, refreshed_score: f64, age: Duration, bars_waited: u32) -> SignalReview {
        if age >= self.timeout() {
            return SignalReview::Expire(ExpiryReason::Timeout);
        }
        if bars_waited < self.config.confirm_after_bars {
            return SignalReview::Wait;
        }
        if refreshed_score >= self.confirmation_floor() {
            SignalReview::Confirm
        } else {
            SignalReview::Expire(ExpiryReason::ScoreDecayed)
        }
    }

    /// Confirm a candidate, re-anchoring entry and stop at the confirming bar's close.
    pub fn confirm(&self, mut signal: Signal, snapshot: &FeatureSnapshot, refreshed_score: f64) -> Signal {
        signal.entry_price = snapshot.close;
        signal.stop_price = self.stop_for(signal.side, snapshot.close, signal.stop_pct);
        signal.score = refreshed_score.clamp(0.0, 1.0);
        signal.status = SignalStatus::Confirmed;
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snap_at(minute: u32, close: f64) -> FeatureSnapshot {
        FeatureSnapshot::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 14, minute, 0).unwrap(),
            close,
            close,
            close,
            close,
            0.0,
        )
    }

    #[test]
    fn long_stop_below_close() {
        let mut f = SignalFactory::new(EntryConfig::default());
        let sig = f.create(&snap_at(0, 100.0), Side::Long, 0.7, "weighted", None, 0, vec![]);
        assert!((sig.stop_price - 98.0).abs() < 1e-9);
        assert_eq!(sig.stop_pct, 2.0);
        assert!(sig.is_candidate());
    }

    #[test]
    fn short_stop_above_close_with_strategy_pct() {
        let mut f = SignalFactory::new(EntryConfig::default());
        let sig = f.create(&snap_at(0, 200.0), Side::Short, 0.7, "s", Some(1.5), 0, vec![]);
        assert!((sig.stop_price - 203.0).abs() < 1e-9);
    }

    #[test]
    fn ids_increase() {
        let mut f = SignalFactory::new(EntryConfig::default());
        let a = f.create(&snap_at(0, 1.0), Side::Long, 0.7, "s", None, 0, vec![]);
        let b = f.create(&snap_at(0, 1.0), Side::Long, 0.7, "s", None, 1, vec![]);
        assert!(b.id > a.id);
    }

    #[test]
    fn confirms_at_ninety_percent_of_threshold() {
        let mut f = SignalFactory::new(EntryConfig::default());
        let sig = f.create(&snap_at(0, 100.0), Side::Long, 0.62, "s", None, 0, vec![]);
        let now = snap_at(1, 100.0).timestamp;
        assert!((f.confirmation_floor() - 0.54).abs() < 1e-12);
        assert_eq!(f.review(0.545, sig.age(now), 1), SignalReview::Confirm);
        assert_eq!(
            f.review(0.53, sig.age(now), 1),
            SignalReview::Expire(ExpiryReason::ScoreDecayed)
        );
    }

    #[test]
    fn hard_timeout_wins_regardless_of_score() {
        let mut f = SignalFactory::new(EntryConfig::default());
        let sig = f.create(&snap_at(0, 100.0), Side::Long, 0.62, "s", None, 0, vec![]);
        let later = snap_at(11, 100.0).timestamp;
        assert_eq!(
            f.review(0.95, sig.age(later), 5),
            SignalReview::Expire(ExpiryReason::Timeout)
        );
    }

    #[test]
    fn timeout_counts_elapsed_time_not_bar_spacing() {
        let f = SignalFactory::new(EntryConfig::default());
        // One hourly bar later, but reviewed seconds after it arrived.
        assert_eq!(f.review(0.9, Duration::seconds(2), 1), SignalReview::Confirm);
        assert_eq!(
            f.review(0.9, Duration::seconds(600), 1),
            SignalReview::Expire(ExpiryReason::Timeout)
        );
    }

    #[test]
    fn waits_until_confirmation_bars_elapsed() {
        let cfg = EntryConfig {
            confirm_after_bars: 2,
            ..EntryConfig::default()
        };
        let mut f = SignalFactory::new(cfg);
        let sig = f.create(&snap_at(0, 100.0), Side::Long, 0.7, "s", None, 0, vec![]);
        let now = snap_at(1, 100.0).timestamp;
        assert_eq!(f.review(0.1, sig.age(now), 1), SignalReview::Wait);
        assert_eq!(
            f.review(0.1, sig.age(now), 2),
            SignalReview::Expire(ExpiryReason::ScoreDecayed)
        );
    }

    #[test]
    fn confirm_reanchors_entry() {
        let mut f = SignalFactory::new(EntryConfig::default());
        let sig = f.create(&snap_at(0, 100.0), Side::Long, 0.7, "s", None, 0, vec![]);
        let confirmed = f.confirm(sig, &snap_at(1, 110.0), 0.66);
        assert_eq!(confirmed.status, SignalStatus::Confirmed);
        assert_eq!(confirmed.entry_price, 110.0);
        assert!((confirmed.stop_price - 107.8).abs() < 1e-9);
        assert_eq!(confirmed.score, 0.66);
    }
}
