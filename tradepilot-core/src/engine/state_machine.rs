//! Bot lifecycle state machine.
//!
//! The transition table is a single total `match` over (state, trigger): every
//! pair yields exactly one target or `None` (invalid). Invalid transitions are
//! rejected with [`StateError::InvalidTransition`] and leave the state as is.
//! `force` bypasses the table for error recovery and may only land in FLAT or
//! ERROR. Every applied transition is appended to a bounded history and
//! reported to the registered observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotState {
    Flat,
    Signal,
    Entered,
    Manage,
    Exited,
    Paused,
    Error,
}

impl BotState {
    pub const ALL: [BotState; 7] = [
        BotState::Flat,
        BotState::Signal,
        BotState::Entered,
        BotState::Manage,
        BotState::Exited,
        BotState::Paused,
        BotState::Error,
    ];

    /// Target state for `trigger`, or `None` if the transition is invalid.
    pub fn target(self, trigger: Trigger) -> Option<BotState> {
        use BotState as S;
        use Trigger as T;
        match (self, trigger) {
            (S::Flat, T::SignalCandidate) => Some(S::Signal),
            (S::Flat, T::SignalConfirmed) => Some(S::Entered),
            (S::Flat, T::Pause) => Some(S::Paused),
            (S::Flat, T::Error) => Some(S::Error),

            (S::Signal, T::SignalConfirmed) => Some(S::Entered),
            (S::Signal, T::SignalExpired) => Some(S::Flat),
            (S::Signal, T::CandleClose) => Some(S::Signal),
            (S::Signal, T::Pause) => Some(S::Paused),
            (S::Signal, T::Error) => Some(S::Error),
            (S::Signal, T::Reset) => Some(S::Flat),

            (S::Entered, T::OrderFilled) => Some(S::Manage),
            (S::Entered, T::OrderRejected | T::OrderCancelled) => Some(S::Flat),
            (S::Entered, T::StopHit) => Some(S::Exited),
            (S::Entered, T::Pause) => Some(S::Paused),
            (S::Entered, T::Error) => Some(S::Error),

            (S::Manage, T::CandleClose | T::Tick | T::StopUpdated) => Some(S::Manage),
            (S::Manage, T::StopHit | T::ExitSignal | T::ManualExit | T::TimeStop) => Some(S::Exited),
            (S::Manage, T::Pause) => Some(S::Paused),
            (S::Manage, T::Error) => Some(S::Error),

            (S::Exited, T::Reset | T::CandleClose) => Some(S::Flat),
            (S::Exited, T::Pause) => Some(S::Paused),

            (S::Paused, T::Resume) => Some(S::Flat),
            (S::Paused, T::Error) => Some(S::Error),

            (S::Error, T::ErrorCleared | T::Reset) => Some(S::Flat),

            _ => None,
        }
    }

    /// True while a position may be open.
    pub fn holds_position(self) -> bool {
        matches!(self, BotState::Entered | BotState::Manage)
    }
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BotState::Flat => "FLAT",
            BotState::Signal => "SIGNAL",
            BotState::Entered => "ENTERED",
            BotState::Manage => "MANAGE",
            BotState::Exited => "EXITED",
            BotState::Paused => "PAUSED",
            BotState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    SignalCandidate,
    SignalConfirmed,
    SignalExpired,
    CandleClose,
    Tick,
    OrderFilled,
    OrderRejected,
    OrderCancelled,
    StopHit,
    ExitSignal,
    ManualExit,
    TimeStop,
    StopUpdated,
    Pause,
    Resume,
    Error,
    ErrorCleared,
    Reset,
}

impl Trigger {
    pub const ALL: [Trigger; 18] = [
        Trigger::SignalCandidate,
        Trigger::SignalConfirmed,
        Trigger::SignalExpired,
        Trigger::CandleClose,
        Trigger::Tick,
        Trigger::OrderFilled,
        Trigger::OrderRejected,
        Trigger::OrderCancelled,
        Trigger::StopHit,
        Trigger::ExitSignal,
        Trigger::ManualExit,
        Trigger::TimeStop,
        Trigger::StopUpdated,
        Trigger::Pause,
        Trigger::Resume,
        Trigger::Error,
        Trigger::ErrorCleared,
        Trigger::Reset,
    ];
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trigger::SignalCandidate => "signal_candidate",
            Trigger::SignalConfirmed => "signal_confirmed",
            Trigger::SignalExpired => "signal_expired",
            Trigger::CandleClose => "candle_close",
            Trigger::Tick => "tick",
            Trigger::OrderFilled => "order_filled",
            Trigger::OrderRejected => "order_rejected",
            Trigger::OrderCancelled => "order_cancelled",
            Trigger::StopHit => "stop_hit",
            Trigger::ExitSignal => "exit_signal",
            Trigger::ManualExit => "manual_exit",
            Trigger::TimeStop => "time_stop",
            Trigger::StopUpdated => "stop_updated",
            Trigger::Pause => "pause",
            Trigger::Resume => "resume",
            Trigger::Error => "error",
            Trigger::ErrorCleared => "error_cleared",
            Trigger::Reset => "reset",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("invalid transition: {trigger} in state {from}")]
    InvalidTransition { from: BotState, trigger: Trigger },
    #[error("forced transitions may only target FLAT or ERROR, not {0}")]
    ForbiddenForceTarget(BotState),
}

/// Free-form key/value context attached to a transition.
pub type TransitionContext = BTreeMap<String, String>;

/// Build a [`TransitionContext`] from string pairs.
pub fn context<const N: usize>(pairs: [(&str, String); N]) -> TransitionContext {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub from: BotState,
    pub to: BotState,
    /// `None` for forced transitions.
    pub trigger: Option<Trigger>,
    pub forced: bool,
    pub context: TransitionContext,
}

pub type TransitionObserver = Box<dyn FnMut(&TransitionRecord) + Send>;

pub struct StateMachine {
    state: BotState,
    history: VecDeque<TransitionRecord>,
    history_limit: usize,
    next_seq: u64,
    observers: Vec<TransitionObserver>,
}

impl StateMachine {
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: BotState::Flat,
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
            next_seq: 1,
            observers: Vec::new(),
        }
    }

    pub fn state(&self) -> BotState {
        self.state
    }

    pub fn can_fire(&self, trigger: Trigger) -> bool {
        self.state.target(trigger).is_some()
    }

    pub fn history(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.history.iter()
    }

    pub fn last_transition(&self) -> Option<&TransitionRecord> {
        self.history.back()
    }

    pub fn add_observer(&mut self, observer: TransitionObserver) {
        self.observers.push(observer);
    }

    /// Apply `trigger` if the table allows it.
    pub fn fire(
        &mut self,
        trigger: Trigger,
        timestamp: DateTime<Utc>,
        context: TransitionContext,
    ) -> Result<BotState, StateError> {
        let from = self.state;
        let Some(to) = from.target(trigger) else {
            warn!(state = %from, trigger = %trigger, "rejected invalid transition");
            return Err(StateError::InvalidTransition { from, trigger });
        };
        self.apply(from, to, Some(trigger), false, timestamp, context);
        Ok(to)
    }

    /// Jump to FLAT or ERROR regardless of the table.
    pub fn force(
        &mut self,
        target: BotState,
        timestamp: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<(), StateError> {
        if !matches!(target, BotState::Flat | BotState::Error) {
            return Err(StateError::ForbiddenForceTarget(target));
        }
        let from = self.state;
        let mut ctx = TransitionContext::new();
        ctx.insert("reason".to_string(), reason.into());
        warn!(from = %from, to = %target, reason = ?ctx.get("reason"), "forced transition");
        self.apply(from, target, None, true, timestamp, ctx);
        Ok(())
    }

    fn apply(
        &mut self,
        from: BotState,
        to: BotState,
        trigger: Option<Trigger>,
        forced: bool,
        timestamp: DateTime<Utc>,
        context: TransitionContext,
    ) {
        let record = TransitionRecord {
            seq: self.next_seq,
            timestamp,
            from,
            to,
            trigger,
            forced,
            context,
        };
        self.next_seq += 1;
        self.state = to;
        if from != to {
            debug!(seq = record.seq, from = %from, to = %to, trigger = ?trigger, "state transition");
        }
        for observer in &mut self.observers {
            observer(&record);
        }
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state)
            .field("history_len", &self.history.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}
