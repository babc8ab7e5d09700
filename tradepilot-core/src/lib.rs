//! TradePilot Core — bar-by-bar trading decisions.
//!
//! This crate contains the decision engine shared by live trading and backtests:
//! - Domain types (snapshots, signals, positions, decisions, closed trades)
//! - Regime classification, entry scoring, trailing stops, exit checks
//! - Declarative rules bridge (regimes, strategies, routing, overrides)
//! - Bot state machine with a total transition table
//! - Bar processor emitting exactly one decision per bar

pub mod components;
pub mod config;
pub mod domain;
pub mod engine;
pub mod fingerprint;
pub mod rules;

pub use config::BotConfig;
pub use engine::{BarOutcome, BarProcessor, BotState, Trigger};
