//! Live driver against a recording broker and a manual clock: immediate and
//! working fills, rejections, throttled stop updates, manual exit.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tradepilot_core::config::BotConfig;
use tradepilot_core::domain::{keys, DecisionAction, DecisionSource, FeatureSnapshot, Side, TrailingMode};
use tradepilot_core::engine::{BarProcessor, BotState};
use tradepilot_runner::{BotSettings, Broker, BrokerError, Clock, LiveDriver};

// ── Collaborators ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum FillMode {
    Immediate,
    Working,
    Reject,
}

#[derive(Debug)]
struct RecordingBroker {
    mode: FillMode,
    opens: Vec<(Side, f64)>,
    closes: Vec<String>,
    stops: Vec<f64>,
    /// Number of upcoming stop updates to refuse.
    failing_stops: u32,
}

impl RecordingBroker {
    fn new(mode: FillMode) -> Self {
        Self {
            mode,
            opens: Vec::new(),
            closes: Vec::new(),
            stops: Vec::new(),
            failing_stops: 0,
        }
    }

    fn failing_stops(mut self, n: u32) -> Self {
        self.failing_stops = n;
        self
    }
}

impl Broker for RecordingBroker {
    fn name(&self) -> &str {
        "recording"
    }

    fn open(&mut self, side: Side, _quantity: f64, reference_price: f64, _stop: f64) -> Result<Option<f64>, BrokerError> {
        self.opens.push((side, reference_price));
        match self.mode {
            FillMode::Immediate => Ok(Some(reference_price)),
            FillMode::Working => Ok(None),
            FillMode::Reject => Err(BrokerError::Rejected("insufficient buying power".into())),
        }
    }

    fn close(&mut self, _side: Side, _quantity: f64, reason: &str) -> Result<(), BrokerError> {
        self.closes.push(reason.to_string());
        Ok(())
    }

    fn update_stop(&mut self, _side: Side, stop: f64) -> Result<(), BrokerError> {
        if self.failing_stops > 0 {
            self.failing_stops -= 1;
            return Err(BrokerError::Unavailable("gateway timeout".into()));
        }
        self.stops.push(stop);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(at(0))))
    }

    fn set(&self, t: DateTime<Utc>) {
        *self.0.lock().unwrap() = t;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 14, 0, 0).unwrap() + Duration::minutes(minute)
}

fn bullish(minute: i64, close: f64) -> FeatureSnapshot {
    FeatureSnapshot::new(at(minute), close, close + 0.2, close - 0.2, close, 1_000.0)
        .with(keys::SMA_FAST, close - 1.0)
        .with(keys::SMA_SLOW, close - 2.0)
        .with(keys::RSI, 60.0)
        .with(keys::MACD, 0.5)
        .with(keys::MACD_SIGNAL, 0.3)
        .with(keys::ADX, 30.0)
        .with(keys::PLUS_DI, 30.0)
        .with(keys::MINUS_DI, 15.0)
        .with(keys::BB_UPPER, close + 2.0)
        .with(keys::BB_MIDDLE, close - 1.0)
        .with(keys::BB_LOWER, close - 4.0)
}

fn driver(mode: FillMode, clock: &ManualClock) -> LiveDriver<RecordingBroker, ManualClock> {
    driver_with(RecordingBroker::new(mode), clock)
}

fn driver_with(broker: RecordingBroker, clock: &ManualClock) -> LiveDriver<RecordingBroker, ManualClock> {
    let mut config = BotConfig::default();
    config.trailing.mode = TrailingMode::Percentage;
    config.trailing.pct_distance = 1.0;
    let processor = BarProcessor::new(config).unwrap();
    LiveDriver::new(processor, broker, clock.clone(), Duration::seconds(60))
}

/// Candidate at minute 0, entry order at minute 5.
fn submit_entry(d: &mut LiveDriver<RecordingBroker, ManualClock>, clock: &ManualClock) {
    d.on_bar(&bullish(0, 100.0)).unwrap();
    clock.set(at(5));
    let out = d.on_bar(&bullish(5, 100.0)).unwrap();
    assert_eq!(out.decision.action, DecisionAction::Enter);
}

// ── Entries ──────────────────────────────────────────────────────────

#[test]
fn immediate_fill_opens_position() {
    let clock = ManualClock::new();
    let mut d = driver(FillMode::Immediate, &clock);
    submit_entry(&mut d, &clock);
    assert_eq!(d.broker().opens, vec![(Side::Long, 100.0)]);
    assert_eq!(d.processor().state(), BotState::Manage);
    assert_eq!(d.processor().position().unwrap().entry_time, at(5));
}

#[test]
fn working_order_fills_later() {
    let clock = ManualClock::new();
    let mut d = driver(FillMode::Working, &clock);
    submit_entry(&mut d, &clock);
    assert_eq!(d.processor().state(), BotState::Entered);

    clock.set(at(6));
    d.on_fill(100.2).unwrap();
    let position = d.processor().position().unwrap();
    assert_eq!(position.entry_price, 100.2);
    assert_eq!(d.processor().state(), BotState::Manage);
}

#[test]
fn broker_rejection_returns_to_flat() {
    let clock = ManualClock::new();
    let mut d = driver(FillMode::Reject, &clock);
    submit_entry(&mut d, &clock);
    assert_eq!(d.processor().state(), BotState::Flat);
    assert!(d.processor().position().is_none());
}

// ── Stop throttle ────────────────────────────────────────────────────

#[test]
fn stop_updates_are_throttled_and_latest_is_flushed() {
    let clock = ManualClock::new();
    let mut d = driver(FillMode::Immediate, &clock);
    submit_entry(&mut d, &clock);

    clock.set(at(10));
    let up = d.on_bar(&bullish(10, 101.0)).unwrap();
    assert_eq!(up.decision.action, DecisionAction::AdjustStop);
    assert_eq!(d.broker().stops.len(), 1);
    assert!((d.broker().stops[0] - 99.99).abs() < 1e-9);

    // 30 s later: processor tightens, broker is not told yet.
    clock.set(at(10) + Duration::seconds(30));
    let higher = d.on_bar(&bullish(15, 102.0)).unwrap();
    assert_eq!(higher.decision.action, DecisionAction::AdjustStop);
    assert_eq!(d.broker().stops.len(), 1);
    assert!(d.throttle().pending().is_some());

    // Interval passed; a quiet bar flushes the withheld stop.
    clock.set(at(10) + Duration::seconds(70));
    let quiet = d.on_bar(&bullish(20, 102.0)).unwrap();
    assert_eq!(quiet.decision.action, DecisionAction::Hold);
    assert_eq!(d.broker().stops.len(), 2);
    assert!((d.broker().stops[1] - 100.98).abs() < 1e-9);
    assert!(d.throttle().pending().is_none());
}

#[test]
fn failed_stop_update_is_retried_on_next_bar() {
    let clock = ManualClock::new();
    let mut d = driver_with(RecordingBroker::new(FillMode::Immediate).failing_stops(1), &clock);
    submit_entry(&mut d, &clock);

    clock.set(at(10));
    assert!(d.on_bar(&bullish(10, 101.0)).is_err());
    assert!(d.broker().stops.is_empty());
    let (_, kept) = d.throttle().pending().unwrap();
    assert!((kept - 99.99).abs() < 1e-9);

    // Stop unchanged on the next bar; the unsent one goes out now.
    clock.set(at(10) + Duration::seconds(5));
    let quiet = d.on_bar(&bullish(15, 101.0)).unwrap();
    assert_eq!(quiet.decision.action, DecisionAction::Hold);
    assert_eq!(d.broker().stops.len(), 1);
    assert!((d.broker().stops[0] - 99.99).abs() < 1e-9);
    assert!(d.throttle().pending().is_none());
}

// ── Operator control ─────────────────────────────────────────────────

#[test]
fn manual_exit_sends_close_order() {
    let clock = ManualClock::new();
    let mut d = driver(FillMode::Immediate, &clock);
    submit_entry(&mut d, &clock);

    clock.set(at(7));
    let out = d.manual_exit(101.0).unwrap();
    assert_eq!(out.decision.source, DecisionSource::Manual);
    assert_eq!(d.broker().closes, vec!["manual_exit".to_string()]);
    assert!((out.closed_trade.unwrap().pnl - 1.0).abs() < 1e-9);
    assert!(d.throttle().pending().is_none());
}

#[test]
fn pause_blocks_and_resume_readopts() {
    let clock = ManualClock::new();
    let mut d = driver(FillMode::Immediate, &clock);
    submit_entry(&mut d, &clock);

    d.pause().unwrap();
    clock.set(at(10));
    let paused = d.on_bar(&bullish(10, 101.0)).unwrap();
    assert_eq!(paused.decision.reasons, vec!["paused"]);
    assert!(d.broker().stops.is_empty());

    d.resume().unwrap();
    assert_eq!(d.processor().state(), BotState::Manage);
    assert!(d.processor().position().is_some());
}

#[test]
fn driver_from_settings_uses_live_interval() {
    let settings = BotSettings::from_toml("[live]\nstop_update_interval_secs = 5\n").unwrap();
    let clock = ManualClock::new();
    let d = LiveDriver::from_settings(&settings, None, RecordingBroker::new(FillMode::Immediate), clock).unwrap();
    assert_eq!(d.processor().state(), BotState::Flat);
}
