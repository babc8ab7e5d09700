//! TradePilot CLI — backtest, batch and rules commands.
//!
//! Commands:
//! - `backtest` — replay a snapshot CSV through one bot configuration
//! - `batch` — every settings file × every data file, in parallel
//! - `validate-rules` — parse a rules document and report reference problems
//! - `default-settings` — print the default settings TOML
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tradepilot_core::rules::{RulesDocument, RulesEngine};
use tradepilot_runner::{
    export_report, load_snapshots, rules_or_builtin, run_backtest, run_batch_with_progress, BacktestReport,
    BatchJob, BotSettings,
};

#[derive(Parser)]
#[command(name = "tradepilot", about = "TradePilot — bar-driven trading decision engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a snapshot CSV through one bot configuration.
    Backtest {
        /// Bot settings TOML. Defaults apply when omitted.
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Snapshot CSV (timestamp, OHLCV, indicator columns).
        #[arg(long)]
        data: PathBuf,

        /// Rules document; overrides `[rules] path` from the settings.
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Entry slippage in basis points; overrides `[backtest]`.
        #[arg(long)]
        slippage_bps: Option<f64>,

        /// Directory for decisions.jsonl, trades.csv and summary.json.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Abort on a bad rules document instead of using the built-ins.
        #[arg(long, default_value_t = false)]
        strict_rules: bool,
    },
    /// Run every settings file against every data file.
    Batch {
        /// Bot settings TOML files.
        #[arg(long = "settings", required = true, num_args = 1..)]
        settings: Vec<PathBuf>,

        /// Snapshot CSV files.
        #[arg(long = "data", required = true, num_args = 1..)]
        data: Vec<PathBuf>,

        /// Run jobs one after another.
        #[arg(long, default_value_t = false)]
        sequential: bool,

        /// Export each successful run under `<out>/<job name>/`.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Abort on a bad rules document instead of using the built-ins.
        #[arg(long, default_value_t = false)]
        strict_rules: bool,
    },
    /// Parse a rules document and report reference problems.
    ValidateRules {
        path: PathBuf,
    },
    /// Print the default settings TOML.
    DefaultSettings,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Backtest {
            settings,
            data,
            rules,
            slippage_bps,
            out,
            strict_rules,
        } => run_backtest_cmd(settings, &data, rules, slippage_bps, out, strict_rules),
        Commands::Batch {
            settings,
            data,
            sequential,
            out,
            strict_rules,
        } => run_batch_cmd(&settings, &data, !sequential, out, strict_rules),
        Commands::ValidateRules { path } => run_validate_rules(&path),
        Commands::DefaultSettings => {
            print!("{}", BotSettings::default().to_toml()?);
            Ok(())
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<BotSettings> {
    match path {
        Some(p) => BotSettings::load(p).with_context(|| format!("loading settings {}", p.display())),
        None => Ok(BotSettings::default()),
    }
}

fn run_backtest_cmd(
    settings_path: Option<PathBuf>,
    data: &Path,
    rules_path: Option<PathBuf>,
    slippage_bps: Option<f64>,
    out: Option<PathBuf>,
    strict_rules: bool,
) -> Result<()> {
    let mut settings = load_settings(settings_path.as_deref())?;
    if let Some(bps) = slippage_bps {
        settings.backtest.slippage_bps = bps;
    }
    let rules = match (rules_path, strict_rules) {
        (Some(p), true) => Some(RulesEngine::from_path(&p).with_context(|| format!("loading rules {}", p.display()))?),
        (Some(p), false) => rules_or_builtin(&p, RulesEngine::from_path(&p)),
        (None, true) => settings.load_rules_strict()?,
        (None, false) => settings.load_rules(),
    };
    let snapshots = load_snapshots(data).with_context(|| format!("loading snapshots {}", data.display()))?;

    let report = run_backtest(&settings, rules, &snapshots)?;
    print_summary(&report);

    if let Some(dir) = out {
        let paths = export_report(&report, &dir)?;
        println!("Artifacts saved to: {}", dir.display());
        info!(decisions = %paths.decisions.display(), "export complete");
    }
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn run_batch_cmd(
    settings_paths: &[PathBuf],
    data_paths: &[PathBuf],
    parallel: bool,
    out: Option<PathBuf>,
    strict_rules: bool,
) -> Result<()> {
    let mut datasets = Vec::with_capacity(data_paths.len());
    for path in data_paths {
        let snapshots = load_snapshots(path).with_context(|| format!("loading snapshots {}", path.display()))?;
        datasets.push((file_stem(path), Arc::new(snapshots)));
    }

    let mut jobs = Vec::new();
    for path in settings_paths {
        let settings = load_settings(Some(path))?;
        let rules = match settings.rules_path() {
            Some(p) if strict_rules => {
                Some(RulesDocument::load(&p).with_context(|| format!("loading rules {}", p.display()))?)
            }
            Some(_) => settings.load_rules_document(),
            None => None,
        };
        for (data_name, snapshots) in &datasets {
            let mut job = BatchJob::new(
                format!("{}@{}", file_stem(path), data_name),
                settings.clone(),
                Arc::clone(snapshots),
            );
            if let Some(doc) = &rules {
                job = job.with_rules(doc.clone());
            }
            jobs.push(job);
        }
    }

    let results = run_batch_with_progress(&jobs, parallel, |_, total, result| {
        info!(job = %result.name, ok = result.is_ok(), total, "job done");
    });

    println!();
    println!("{:<40} {:>7} {:>8} {:>12} {:>10}", "Job", "Trades", "Win %", "Total P&L", "Max DD");
    let mut failed = 0;
    for r in &results {
        match &r.result {
            Ok(report) => {
                let s = &report.stats;
                println!(
                    "{:<40} {:>7} {:>7.1}% {:>12.4} {:>10.4}",
                    r.name,
                    s.trade_count,
                    s.win_rate * 100.0,
                    s.total_pnl,
                    s.max_drawdown
                );
                if let Some(dir) = &out {
                    export_report(report, &dir.join(&r.name))?;
                }
            }
            Err(e) => {
                failed += 1;
                println!("{:<40} error: {e}", r.name);
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} jobs failed", results.len());
    }
    Ok(())
}

fn run_validate_rules(path: &Path) -> Result<()> {
    let document = RulesDocument::load(path).with_context(|| format!("loading rules {}", path.display()))?;
    let warnings = document.validate();
    println!(
        "{}: {} indicators, {} regimes, {} strategies, {} strategy sets, {} routes",
        path.display(),
        document.indicators.len(),
        document.regimes.len(),
        document.strategies.len(),
        document.strategy_sets.len(),
        document.routing.len()
    );
    if warnings.is_empty() {
        println!("OK");
        return Ok(());
    }
    for w in &warnings {
        println!("  warning: {w}");
    }
    bail!("{} problem(s) found", warnings.len());
}

fn print_summary(report: &BacktestReport) {
    let s = &report.stats;
    let c = &report.counts;
    println!();
    println!("=== Backtest Result ===");
    println!("Bars:           {}", report.fingerprint.bars);
    println!("Config:         {}", report.fingerprint.config.short());
    println!("Dataset:        {}", report.fingerprint.dataset.short());
    if let Some(rules) = &report.fingerprint.rules {
        println!("Rules:          {}", rules.short());
    }
    println!("Pipeline:       {}", report.fingerprint.pipeline);
    println!();
    println!("--- Decisions ---");
    println!(
        "enter {}  hold {}  adjust_stop {}  exit {}  no_trade {}",
        c.enter, c.hold, c.adjust_stop, c.exit, c.no_trade
    );
    println!();
    println!("--- Trades ---");
    println!("Trades:         {}", s.trade_count);
    println!("Win Rate:       {:.1}%", s.win_rate * 100.0);
    println!("Total P&L:      {:.4}", s.total_pnl);
    println!("Avg P&L:        {:.4}", s.avg_pnl);
    println!("Profit Factor:  {:.2}", s.profit_factor);
    println!("Max Drawdown:   {:.4}", s.max_drawdown);
    println!("Loss Streak:    {}", s.max_consecutive_losses);
    println!("Avg Bars Held:  {:.1}", s.avg_bars_held);
    for (reason, count) in &s.exit_reasons {
        println!("  {reason:<20} {count}");
    }
    if let Some(p) = &report.open_position {
        println!();
        println!(
            "Open position:  {} {} @ {:.4} (stop {:.4})",
            p.side,
            p.quantity,
            p.entry_price,
            p.stop()
        );
    }
    println!("Final state:    {}", report.final_state);
}
