//! Backtest driver — replays snapshots through a [`BarProcessor`] and
//! simulates the order collaborator.
//!
//! Open intents fill immediately at the bar's reference price, moved against
//! the trade by `slippage_bps`. Exit fills are priced by the processor itself
//! (stop price, gap open, or close). A position still open when the data ends
//! is reported, not force-closed.
//!
//! Each bar counts as received when it is replayed, so candidate timeouts
//! follow the replay clock rather than the spacing of the bars.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use tradepilot_core::components::factory::FactoryError;
use tradepilot_core::domain::{ClosedTrade, Decision, FeatureSnapshot, OrderIntent, Position, Side};
use tradepilot_core::engine::{BarProcessor, BotState, ProcessorError};
use tradepilot_core::fingerprint::RunFingerprint;
use tradepilot_core::rules::RulesEngine;

use crate::data_loader::LoadError;
use crate::metrics::{DecisionCounts, TradeStats};
use crate::settings::{BotSettings, SettingsError};

/// Current schema version for persisted reports.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("processor error: {0}")]
    Processor(#[from] ProcessorError),
    #[error("composition error: {0}")]
    Factory(#[from] FactoryError),
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("data error: {0}")]
    Load(#[from] LoadError),
    #[error("no snapshots to replay")]
    Empty,
}

/// Complete result of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub fingerprint: RunFingerprint,
    pub stats: TradeStats,
    pub counts: DecisionCounts,
    pub decisions: Vec<Decision>,
    pub trades: Vec<ClosedTrade>,
    pub open_position: Option<Position>,
    pub final_state: BotState,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Entry fill after adverse slippage: longs pay more, shorts receive less.
pub fn slipped_price(side: Side, reference: f64, slippage_bps: f64) -> f64 {
    reference * (1.0 + side.sign() * slippage_bps / 10_000.0)
}

pub struct BacktestDriver {
    processor: BarProcessor,
    slippage_bps: f64,
}

impl BacktestDriver {
    pub fn new(processor: BarProcessor, slippage_bps: f64) -> Self {
        Self {
            processor,
            slippage_bps,
        }
    }

    pub fn processor(&self) -> &BarProcessor {
        &self.processor
    }

    /// Feed one bar and fill any open intent it produced.
    pub fn step(&mut self, snapshot: &FeatureSnapshot) -> Result<(), RunError> {
        let outcome = self.processor.process_at(snapshot, Utc::now());
        for intent in &outcome.intents {
            if let OrderIntent::Open {
                side,
                reference_price,
                ..
            } = intent
            {
                let fill = slipped_price(*side, *reference_price, self.slippage_bps);
                let position = self.processor.on_order_filled(fill, snapshot.timestamp)?;
                debug!(bar = outcome.decision.bar_index, fill, stop = position.stop(), "simulated entry fill");
            }
        }
        Ok(())
    }

    /// Replay every snapshot, then assemble the report.
    pub fn run(mut self, snapshots: &[FeatureSnapshot], fingerprint: RunFingerprint) -> Result<BacktestReport, RunError> {
        if snapshots.is_empty() {
            return Err(RunError::Empty);
        }
        for snapshot in snapshots {
            self.step(snapshot)?;
        }
        Ok(self.finish(fingerprint))
    }

    fn finish(mut self, fingerprint: RunFingerprint) -> BacktestReport {
        let decisions = self.processor.decisions().entries().to_vec();
        let trades = self.processor.trades().to_vec();
        let open_position = self.processor.position().cloned();
        let final_state = self.processor.state();
        self.processor.shutdown();

        let stats = TradeStats::compute(&trades);
        info!(
            bars = decisions.len(),
            trades = stats.trade_count,
            pnl = stats.total_pnl,
            open = open_position.is_some(),
            "backtest finished"
        );
        BacktestReport {
            schema_version: SCHEMA_VERSION,
            fingerprint,
            counts: DecisionCounts::compute(&decisions),
            stats,
            decisions,
            trades,
            open_position,
            final_state,
        }
    }
}

/// Build a processor from `settings` (plus optional rules) and replay `snapshots`.
pub fn run_backtest(
    settings: &BotSettings,
    rules: Option<RulesEngine>,
    snapshots: &[FeatureSnapshot],
) -> Result<BacktestReport, RunError> {
    settings.validate()?;
    let mut processor = BarProcessor::new(settings.bot.clone())?;
    let fingerprint = RunFingerprint::new(
        &settings.bot,
        rules.as_ref().map(RulesEngine::document),
        snapshots,
        processor.pipeline().describe(),
    );
    if let Some(rules) = rules {
        processor = processor.with_rules(rules);
    }
    info!(
        bars = snapshots.len(),
        config = %fingerprint.config.short(),
        dataset = %fingerprint.dataset.short(),
        "backtest starting"
    );
    BacktestDriver::new(processor, settings.backtest.slippage_bps).run(snapshots, fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slippage_is_adverse() {
        assert!((slipped_price(Side::Long, 100.0, 10.0) - 100.1).abs() < 1e-9);
        assert!((slipped_price(Side::Short, 100.0, 10.0) - 99.9).abs() < 1e-9);
        assert_eq!(slipped_price(Side::Long, 100.0, 0.0), 100.0);
    }

    #[test]
    fn empty_input_is_an_error() {
        let err = run_backtest(&BotSettings::default(), None, &[]).unwrap_err();
        assert!(matches!(err, RunError::Empty));
    }
}
