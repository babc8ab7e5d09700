//! Run artifacts — decisions as JSONL, closed trades as CSV, summary as JSON.
//!
//! The summary carries `schema_version`; newer versions are rejected on load.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use tradepilot_core::domain::{ClosedTrade, Decision, Position};
use tradepilot_core::engine::BotState;
use tradepilot_core::fingerprint::RunFingerprint;

use crate::backtest::{BacktestReport, SCHEMA_VERSION};
use crate::metrics::{DecisionCounts, TradeStats};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("unsupported schema version {found} (max supported: {max})")]
    Schema { found: u32, max: u32 },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError {
    let path = path.to_path_buf();
    move |source| ExportError::Io { path, source }
}

/// Report without the per-bar detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: u32,
    pub fingerprint: RunFingerprint,
    pub stats: TradeStats,
    pub counts: DecisionCounts,
    pub open_position: Option<Position>,
    pub final_state: BotState,
}

impl From<&BacktestReport> for RunSummary {
    fn from(report: &BacktestReport) -> Self {
        Self {
            schema_version: report.schema_version,
            fingerprint: report.fingerprint.clone(),
            stats: report.stats.clone(),
            counts: report.counts.clone(),
            open_position: report.open_position.clone(),
            final_state: report.final_state,
        }
    }
}

// ─── Decisions (JSONL) ──────────────────────────────────────────────

pub fn write_decisions_jsonl<W: Write>(decisions: &[Decision], mut writer: W) -> Result<(), ExportError> {
    for d in decisions {
        serde_json::to_writer(&mut writer, d)?;
        writer.write_all(b"\n").map_err(serde_json::Error::io)?;
    }
    writer.flush().map_err(serde_json::Error::io)?;
    Ok(())
}

pub fn read_decisions_jsonl<R: BufRead>(reader: R) -> Result<Vec<Decision>, ExportError> {
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(serde_json::Error::io)?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

// ─── Trades (CSV) ───────────────────────────────────────────────────

/// One CSV row per closed trade; columns follow [`ClosedTrade`] field order.
pub fn write_trades_csv<W: Write>(trades: &[ClosedTrade], writer: W) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for t in trades {
        wtr.serialize(t)?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

// ─── Summary (JSON) ─────────────────────────────────────────────────

pub fn summary_json(summary: &RunSummary) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(summary)?)
}

pub fn parse_summary(json: &str) -> Result<RunSummary, ExportError> {
    let summary: RunSummary = serde_json::from_str(json)?;
    if summary.schema_version > SCHEMA_VERSION {
        return Err(ExportError::Schema {
            found: summary.schema_version,
            max: SCHEMA_VERSION,
        });
    }
    Ok(summary)
}

// ─── Directory export ───────────────────────────────────────────────

/// Paths written by [`export_report`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPaths {
    pub decisions: PathBuf,
    pub trades: PathBuf,
    pub summary: PathBuf,
}

/// Write `decisions.jsonl`, `trades.csv` and `summary.json` under `dir`.
pub fn export_report(report: &BacktestReport, dir: &Path) -> Result<ExportPaths, ExportError> {
    std::fs::create_dir_all(dir).map_err(io_err(dir))?;
    let paths = ExportPaths {
        decisions: dir.join("decisions.jsonl"),
        trades: dir.join("trades.csv"),
        summary: dir.join("summary.json"),
    };

    let file = File::create(&paths.decisions).map_err(io_err(&paths.decisions))?;
    write_decisions_jsonl(&report.decisions, BufWriter::new(file))?;

    let file = File::create(&paths.trades).map_err(io_err(&paths.trades))?;
    write_trades_csv(&report.trades, BufWriter::new(file))?;

    let json = summary_json(&RunSummary::from(report))?;
    std::fs::write(&paths.summary, json).map_err(io_err(&paths.summary))?;

    info!(dir = %dir.display(), decisions = report.decisions.len(), trades = report.trades.len(), "run exported");
    Ok(paths)
}

/// Read back a `decisions.jsonl` file.
pub fn load_decisions(path: &Path) -> Result<Vec<Decision>, ExportError> {
    let file = File::open(path).map_err(io_err(path))?;
    read_decisions_jsonl(BufReader::new(file))
}
