//! Batch backtests — independent jobs run in parallel with Rayon.
//!
//! Each job owns its processor; snapshots are shared read-only through `Arc`.
//! One failing job does not stop the others.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, warn};

use tradepilot_core::domain::FeatureSnapshot;
use tradepilot_core::rules::{RulesDocument, RulesEngine};

use crate::backtest::{run_backtest, BacktestReport, RunError};
use crate::settings::BotSettings;

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub name: String,
    pub settings: BotSettings,
    pub rules: Option<RulesDocument>,
    pub snapshots: Arc<Vec<FeatureSnapshot>>,
}

impl BatchJob {
    pub fn new(name: impl Into<String>, settings: BotSettings, snapshots: Arc<Vec<FeatureSnapshot>>) -> Self {
        Self {
            name: name.into(),
            settings,
            rules: None,
            snapshots,
        }
    }

    pub fn with_rules(mut self, rules: RulesDocument) -> Self {
        self.rules = Some(rules);
        self
    }

    fn run(&self) -> Result<BacktestReport, RunError> {
        let engine = self.rules.clone().map(RulesEngine::new);
        run_backtest(&self.settings, engine, &self.snapshots)
    }
}

#[derive(Debug)]
pub struct BatchResult {
    pub name: String,
    pub result: Result<BacktestReport, RunError>,
}

impl BatchResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run every job; results come back in job order.
pub fn run_batch(jobs: &[BatchJob], parallel: bool) -> Vec<BatchResult> {
    run_batch_with_progress(jobs, parallel, |_, _, _| {})
}

/// Like [`run_batch`], calling `progress(index, total, result)` as each job completes.
pub fn run_batch_with_progress<F>(jobs: &[BatchJob], parallel: bool, progress: F) -> Vec<BatchResult>
where
    F: Fn(usize, usize, &BatchResult) + Send + Sync,
{
    let total = jobs.len();
    let run_one = |(idx, job): (usize, &BatchJob)| {
        let result = BatchResult {
            name: job.name.clone(),
            result: job.run(),
        };
        if let Err(e) = &result.result {
            warn!(job = %job.name, error = %e, "batch job failed");
        }
        progress(idx, total, &result);
        result
    };

    let results: Vec<BatchResult> = if parallel {
        jobs.par_iter().enumerate().map(run_one).collect()
    } else {
        jobs.iter().enumerate().map(run_one).collect()
    };
    info!(
        jobs = total,
        failed = results.iter().filter(|r| !r.is_ok()).count(),
        "batch finished"
    );
    results
}
