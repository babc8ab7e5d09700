//! TradePilot Runner — settings, snapshot loading, backtest and live drivers.
//!
//! This crate builds on `tradepilot-core` to provide:
//! - TOML bot settings with validation and fingerprinting
//! - CSV snapshot loading
//! - Backtest driver with simulated fills and run statistics
//! - Live driver over a `Broker` and a `Clock`, with stop update throttling
//! - Parallel batch backtests
//! - JSONL/CSV/JSON exports

pub mod backtest;
pub mod batch;
pub mod data_loader;
pub mod export;
pub mod live;
pub mod metrics;
pub mod settings;

pub use backtest::{run_backtest, slipped_price, BacktestDriver, BacktestReport, RunError, SCHEMA_VERSION};
pub use batch::{run_batch, run_batch_with_progress, BatchJob, BatchResult};
pub use data_loader::{load_snapshots, read_snapshots, LoadError};
pub use export::{export_report, ExportError, ExportPaths, RunSummary};
pub use live::{Broker, BrokerError, Clock, LiveDriver, LiveError, StopThrottle, SystemClock};
pub use metrics::{DecisionCounts, TradeStats};
pub use settings::{rules_or_builtin, BotSettings, SettingsError};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn report_types_are_send_sync() {
        assert_send::<BacktestReport>();
        assert_sync::<BacktestReport>();
        assert_send::<RunSummary>();
        assert_sync::<RunSummary>();
    }

    #[test]
    fn batch_types_are_send() {
        assert_send::<BatchJob>();
        assert_sync::<BatchJob>();
        assert_send::<BatchResult>();
    }

    #[test]
    fn settings_are_send_sync() {
        assert_send::<BotSettings>();
        assert_sync::<BotSettings>();
    }
}
