//! Bar processor — feeds one decision pipeline per bar and emits exactly one
//! [`Decision`] per processed bar.
//!
//! Per bar: classify regime → dispatch on state:
//! - FLAT: guards, score both sides, optional rule/pattern/advisory gates,
//!   then a candidate signal (or a direct entry without confirmation)
//! - SIGNAL: re-score, confirm, keep waiting, or expire
//! - ENTERED: wait for the fill reported through [`BarProcessor::on_order_filled`]
//! - MANAGE: wick stop check, exit checks, strategy exit, trailing update
//! - EXITED: auto-reset to FLAT, then the FLAT logic on the same bar
//! - PAUSED / ERROR: no trade
//!
//! The processor is shared verbatim by the backtest and live drivers; only the
//! way fills come back differs.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::components::exit::{ExitReason, ExitSignal, MacdCross};
use crate::components::factory::FactoryError;
use crate::components::guards::{BlockReason, TradingGuard};
use crate::components::pipeline::DecisionPipeline;
use crate::components::regime::RegimeClassifier;
use crate::components::signal::{SignalFactory, SignalReview};
use crate::config::BotConfig;
use crate::domain::{
    ClosedTrade, Decision, DecisionAction, DecisionSource, FeatureSnapshot, OrderIntent, Position,
    RegimeState, Side, Signal, SnapshotHash,
};
use crate::rules::{EntryVerdict, RuleEntryGate, RuleRegimeClassifier, RulesEngine, RulesError};

use super::advisory::{
    open_advisory, open_patterns, AdvisoryRequest, AdvisoryService, AdvisoryVerdict, PatternService,
};
use super::callbacks::Callbacks;
use super::decision_log::DecisionLog;
use super::position_slot::{PositionSlot, SlotError};
use super::state_machine::{context, BotState, StateError, StateMachine, TransitionContext, Trigger};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error("no order awaiting a fill")]
    NoPendingOrder,
    #[error("no open position")]
    NoPosition,
    #[error("fill price must be finite and positive, got {0}")]
    InvalidFill(f64),
}

/// Everything one bar produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BarOutcome {
    pub decision: Decision,
    pub intents: Vec<OrderIntent>,
    /// Set when the bar closed the position.
    pub closed_trade: Option<ClosedTrade>,
    pub state: BotState,
}

/// Candidate signal waiting for confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSignal {
    pub signal: Signal,
    pub bars_waited: u32,
    pub size_multiplier: f64,
    /// Clock time the candidate was raised; the hard timeout counts from here.
    pub received_at: DateTime<Utc>,
}

/// Confirmed signal whose open order has not filled yet.
#[derive(Debug, Clone, PartialEq)]
struct AwaitingFill {
    signal: Signal,
    quantity: f64,
}

/// Decision fields decided by a state handler; bar-level fields are added later.
#[derive(Debug, Clone)]
struct Draft {
    action: DecisionAction,
    side: Option<Side>,
    confidence: f64,
    strategy: Option<String>,
    stop_before: Option<f64>,
    stop_after: Option<f64>,
    reasons: Vec<String>,
    source: DecisionSource,
    intents: Vec<OrderIntent>,
    closed_trade: Option<ClosedTrade>,
}

impl Draft {
    fn new(action: DecisionAction) -> Self {
        Self {
            action,
            side: None,
            confidence: 0.0,
            strategy: None,
            stop_before: None,
            stop_after: None,
            reasons: Vec::new(),
            source: DecisionSource::RuleBased,
            intents: Vec::new(),
            closed_trade: None,
        }
    }

    fn no_trade(reason: impl Into<String>) -> Self {
        Self::new(DecisionAction::NoTrade).reason(reason)
    }

    fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    fn side(mut self, side: Side) -> Self {
        self.side = Some(side);
        self
    }

    fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

pub struct BarProcessor {
    config: BotConfig,
    pipeline: DecisionPipeline,
    signals: SignalFactory,
    guard: TradingGuard,
    machine: StateMachine,
    slot: PositionSlot,
    pending: Option<PendingSignal>,
    awaiting_fill: Option<AwaitingFill>,
    rules: Option<RulesEngine>,
    advisory: Option<Box<dyn AdvisoryService>>,
    patterns: Option<Box<dyn PatternService>>,
    callbacks: Callbacks,
    log: DecisionLog,
    trades: Vec<ClosedTrade>,
    previous_regime: Option<RegimeState>,
    last_hash: Option<SnapshotHash>,
    bar_index: usize,
}

impl BarProcessor {
    /// Processor with the pipeline built from `config`.
    pub fn new(config: BotConfig) -> Result<Self, FactoryError> {
        let pipeline = DecisionPipeline::from_config(&config)?;
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: BotConfig, pipeline: DecisionPipeline) -> Self {
        Self {
            signals: SignalFactory::new(config.entry.clone()),
            guard: TradingGuard::new(config.guards.clone()),
            machine: StateMachine::new(config.transition_history.limit),
            slot: PositionSlot::new(),
            pending: None,
            awaiting_fill: None,
            rules: None,
            advisory: None,
            patterns: None,
            callbacks: Callbacks::default(),
            log: DecisionLog::new(),
            trades: Vec::new(),
            previous_regime: None,
            last_hash: None,
            bar_index: 0,
            pipeline,
            config,
        }
    }

    pub fn with_rules(mut self, rules: RulesEngine) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Attach the advisory service. A service that fails to open is dropped.
    pub fn with_advisory(mut self, service: Box<dyn AdvisoryService>) -> Self {
        self.advisory = open_advisory(service);
        self
    }

    pub fn with_patterns(mut self, service: Box<dyn PatternService>) -> Self {
        self.patterns = open_patterns(service);
        self
    }

    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    // ─── Accessors ──────────────────────────────────────────────────

    pub fn state(&self) -> BotState {
        self.machine.state()
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut StateMachine {
        &mut self.machine
    }

    pub fn position(&self) -> Option<&Position> {
        self.slot.get()
    }

    pub fn pending_signal(&self) -> Option<&PendingSignal> {
        self.pending.as_ref()
    }

    pub fn decisions(&self) -> &DecisionLog {
        &self.log
    }

    pub fn trades(&self) -> &[ClosedTrade] {
        &self.trades
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &DecisionPipeline {
        &self.pipeline
    }

    pub fn rules(&self) -> Option<&RulesEngine> {
        self.rules.as_ref()
    }

    pub fn callbacks_mut(&mut self) -> &mut Callbacks {
        &mut self.callbacks
    }

    pub fn bars_processed(&self) -> usize {
        self.bar_index
    }

    // ─── Per-bar entry point ────────────────────────────────────────

    /// Process a bar, using its own timestamp as the clock.
    pub fn process(&mut self, snapshot: &FeatureSnapshot) -> BarOutcome {
        self.process_at(snapshot, snapshot.timestamp)
    }

    /// Process a bar received at `now`. Candidate timeouts are measured on
    /// this clock, so bar spacing does not count against them.
    pub fn process_at(&mut self, snapshot: &FeatureSnapshot, now: DateTime<Utc>) -> BarOutcome {
        let hash = snapshot.content_hash();
        self.last_hash = Some(hash.clone());

        if !snapshot.is_sane() {
            warn!(bar = self.bar_index, ts = %snapshot.timestamp, "skipping malformed bar");
            let regime = self
                .previous_regime
                .clone()
                .unwrap_or_else(|| RegimeState::unknown(snapshot.timestamp));
            return self.finish(snapshot, hash, &regime, Draft::no_trade("invalid_bar"));
        }

        let regime = self.classify(snapshot);
        if let Some(cross) = MacdCross::detect(snapshot) {
            self.callbacks.macd_signal(cross, snapshot.close);
        }

        let draft = match self.machine.state() {
            BotState::Exited => {
                self.transition(Trigger::CandleClose, snapshot.timestamp, context([("auto_reset", "true".into())]));
                self.on_flat(snapshot, &regime, now)
            }
            BotState::Flat => self.on_flat(snapshot, &regime, now),
            BotState::Signal => self.on_signal(snapshot, &regime, now),
            BotState::Entered => self.on_entered(),
            BotState::Manage => self.on_manage(snapshot, &regime),
            BotState::Paused => Draft::no_trade("paused"),
            BotState::Error => Draft::no_trade("error_state"),
        };

        let outcome = self.finish(snapshot, hash, &regime, draft);
        self.previous_regime = Some(regime);
        outcome
    }

    fn classify(&mut self, snapshot: &FeatureSnapshot) -> RegimeState {
        let regime = match &self.rules {
            Some(rules) => RuleRegimeClassifier::new(rules, self.pipeline.regime.as_ref()).classify(snapshot),
            None => self.pipeline.regime.classify(snapshot),
        };
        if let Some(rules) = self.rules.as_mut() {
            rules.sync_overlay(&regime.active_rule_ids);
        }
        regime
    }

    fn finish(&mut self, snapshot: &FeatureSnapshot, hash: SnapshotHash, regime: &RegimeState, draft: Draft) -> BarOutcome {
        let decision = Decision {
            bar_index: self.bar_index,
            timestamp: snapshot.timestamp,
            action: draft.action,
            side: draft.side,
            confidence: draft.confidence,
            snapshot_hash: hash,
            regime: regime.regime,
            volatility: regime.volatility,
            strategy: draft.strategy,
            stop_before: draft.stop_before,
            stop_after: draft.stop_after,
            reasons: draft.reasons,
            source: draft.source,
        };
        self.bar_index += 1;
        self.emit(decision, draft.intents, draft.closed_trade)
    }

    fn emit(&mut self, decision: Decision, intents: Vec<OrderIntent>, closed_trade: Option<ClosedTrade>) -> BarOutcome {
        debug!(
            bar = decision.bar_index,
            action = %decision.action,
            state = %self.machine.state(),
            reasons = ?decision.reasons,
            "decision"
        );
        let decision = self.log.append(decision).clone();
        self.callbacks.decision(&decision);
        for intent in &intents {
            self.callbacks.order(intent);
        }
        BarOutcome {
            decision,
            intents,
            closed_trade,
            state: self.machine.state(),
        }
    }

    /// Fire a trigger the handlers expect to be legal. A rejection means the
    /// processor's own bookkeeping is inconsistent, so it escalates to ERROR.
    fn transition(&mut self, trigger: Trigger, ts: DateTime<Utc>, ctx: TransitionContext) -> bool {
        match self.machine.fire(trigger, ts, ctx) {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "internal state inconsistency");
                self.escalate(ts, e.to_string());
                false
            }
        }
    }

    fn escalate(&mut self, ts: DateTime<Utc>, reason: String) {
        if let Err(e) = self.machine.force(BotState::Error, ts, reason) {
            error!(error = %e, "could not force ERROR");
        }
    }

    // ─── FLAT ───────────────────────────────────────────────────────

    fn on_flat(&mut self, snapshot: &FeatureSnapshot, regime: &RegimeState, now: DateTime<Utc>) -> Draft {
        let ts = snapshot.timestamp;
        if let Some(blocked) = self.check_guards(ts) {
            return blocked;
        }

        let entry = &self.config.entry;
        let mut scored: Vec<(Side, f64, Vec<String>)> = Vec::with_capacity(2);
        for (side, allowed) in [(Side::Long, entry.allow_long), (Side::Short, entry.allow_short)] {
            if allowed {
                let breakdown = self.pipeline.scorer.score(snapshot, side);
                scored.push((side, breakdown.score, breakdown.reasons()));
            }
        }
        let best_score = scored.iter().map(|s| s.1).fold(0.0, f64::max);
        let threshold = entry.threshold;
        let qualifying: Vec<&(Side, f64, Vec<String>)> = scored.iter().filter(|s| s.1 >= threshold).collect();

        let (side, score, reasons) = match qualifying.as_slice() {
            [] => return Draft::no_trade("below_threshold").confidence(best_score),
            [one] => (one.0, one.1, one.2.clone()),
            [a, b, ..] if a.1 == b.1 => return Draft::no_trade("conflicting_sides").confidence(a.1),
            [a, b, ..] => {
                let winner = if a.1 > b.1 { a } else { b };
                (winner.0, winner.1, winner.2.clone())
            }
        };

        let (strategy, stop_pct, size_multiplier) = match self.gate_entry(snapshot, side, regime) {
            Ok(gate) => gate,
            Err(draft) => return draft.side(side).confidence(score),
        };
        if let Some(draft) = self.check_patterns(snapshot, side) {
            return draft.side(side).confidence(score);
        }
        let source = match self.consult_advisory(snapshot, regime, side, score) {
            Ok(source) => source,
            Err(draft) => return draft.side(side).confidence(score),
        };

        let signal = self
            .signals
            .create(snapshot, side, score, &strategy, stop_pct, self.bar_index, reasons);
        self.callbacks.signal(&signal);
        info!(id = %signal.id, side = %side, score = %format!("{score:.3}"), strategy = %strategy, "signal candidate");

        if self.config.entry.require_confirmation {
            let ctx = context([("signal", signal.id.to_string()), ("score", format!("{score:.4}"))]);
            if !self.transition(Trigger::SignalCandidate, ts, ctx) {
                return Draft::no_trade("internal_error");
            }
            let mut draft = Draft::no_trade("signal_candidate").side(side).confidence(score);
            draft.strategy = Some(strategy);
            draft.reasons.extend(signal.reasons.iter().cloned());
            draft.source = source;
            self.pending = Some(PendingSignal {
                signal,
                bars_waited: 0,
                size_multiplier,
                received_at: now,
            });
            draft
        } else {
            let confirmed = self.signals.confirm(signal, snapshot, score);
            let mut draft = self.enter(confirmed, size_multiplier, ts);
            draft.source = source;
            draft
        }
    }

    /// Evaluate the guards; returns a blocking draft while blocked.
    fn check_guards(&mut self, ts: DateTime<Utc>) -> Option<Draft> {
        let status = self.guard.evaluate(ts);
        if status.changed {
            if status.is_blocked() {
                info!(reasons = ?status.reasons, "trading blocked");
            } else {
                info!("trading unblocked");
            }
            self.callbacks.trading_blocked(&status.reasons);
        }
        if !status.is_blocked() {
            return None;
        }
        let mut draft = Draft::new(DecisionAction::NoTrade);
        draft.reasons = status
            .reasons
            .iter()
            .map(|r: &BlockReason| format!("blocked:{r}"))
            .collect();
        Some(draft)
    }

    /// Strategy name, stop override, and size multiplier for an entry on `side`.
    fn gate_entry(
        &self,
        snapshot: &FeatureSnapshot,
        side: Side,
        regime: &RegimeState,
    ) -> Result<(String, Option<f64>, f64), Draft> {
        let default = (self.pipeline.scorer.name().to_string(), None, 1.0);
        let Some(rules) = &self.rules else {
            return Ok(default);
        };
        match RuleEntryGate::new(rules).check_entry(snapshot, side, regime) {
            EntryVerdict::Unrouted => Ok(default),
            EntryVerdict::Allowed {
                strategy,
                stop_pct,
                size_multiplier,
            } => Ok((strategy, stop_pct, size_multiplier)),
            EntryVerdict::Blocked { checked } => {
                let mut draft = Draft::no_trade("strategy_gate");
                draft.reasons.extend(checked.into_iter().map(|id| format!("not_met:{id}")));
                Err(draft)
            }
        }
    }

    fn check_patterns(&mut self, snapshot: &FeatureSnapshot, side: Side) -> Option<Draft> {
        let service = self.patterns.as_mut()?;
        match service.lookup(snapshot, side) {
            Ok(m) if m.samples >= self.config.advisory.pattern_min_samples
                && m.win_rate < self.config.advisory.pattern_min_win_rate =>
            {
                Some(Draft::no_trade(format!("pattern_gate:win_rate={:.2}", m.win_rate)))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(service = service.name(), error = %e, "pattern lookup failed; using rule-based path");
                None
            }
        }
    }

    fn consult_advisory(
        &mut self,
        snapshot: &FeatureSnapshot,
        regime: &RegimeState,
        side: Side,
        score: f64,
    ) -> Result<DecisionSource, Draft> {
        let Some(service) = self.advisory.as_mut() else {
            return Ok(DecisionSource::RuleBased);
        };
        let request = AdvisoryRequest {
            snapshot,
            regime,
            side,
            score,
        };
        match service.review_entry(&request) {
            Ok(AdvisoryVerdict::Approve { confidence, note }) => {
                debug!(confidence, note = %note, "advisory approved entry");
                Ok(DecisionSource::Llm)
            }
            Ok(AdvisoryVerdict::Veto { reason }) => {
                let mut draft = Draft::no_trade(format!("advisory_veto:{reason}"));
                draft.source = DecisionSource::Llm;
                Err(draft)
            }
            Ok(AdvisoryVerdict::Abstain) => Ok(DecisionSource::RuleBased),
            Err(e) => {
                warn!(service = service.name(), error = %e, "advisory failed; using rule-based path");
                Ok(DecisionSource::RuleBased)
            }
        }
    }

    /// Confirmed signal → ENTERED with an open intent.
    fn enter(&mut self, signal: Signal, size_multiplier: f64, ts: DateTime<Utc>) -> Draft {
        if let Some(open) = self.slot.get() {
            warn!(side = %open.side, "confirmed signal dropped: position already open");
            return Draft::no_trade("position_already_open").side(signal.side);
        }
        let quantity = self.config.sizing.quantity * size_multiplier;
        if !(quantity.is_finite() && quantity > 0.0) {
            warn!(quantity, "confirmed signal dropped: non-positive quantity");
            return Draft::no_trade("zero_quantity").side(signal.side);
        }

        let ctx = context([("signal", signal.id.to_string()), ("strategy", signal.strategy.clone())]);
        if !self.transition(Trigger::SignalConfirmed, ts, ctx) {
            return Draft::no_trade("internal_error");
        }
        self.callbacks.signal(&signal);
        self.guard.record_entry(ts);

        let mut draft = Draft::new(DecisionAction::Enter)
            .side(signal.side)
            .confidence(signal.score)
            .reason("signal_confirmed");
        draft.strategy = Some(signal.strategy.clone());
        draft.stop_after = Some(signal.stop_price);
        draft.intents.push(OrderIntent::Open {
            side: signal.side,
            quantity,
            reference_price: signal.entry_price,
            stop: signal.stop_price,
        });
        self.awaiting_fill = Some(AwaitingFill { signal, quantity });
        draft
    }

    // ─── SIGNAL ─────────────────────────────────────────────────────

    fn on_signal(&mut self, snapshot: &FeatureSnapshot, regime: &RegimeState, now: DateTime<Utc>) -> Draft {
        let ts = snapshot.timestamp;
        let Some(mut pending) = self.pending.take() else {
            self.escalate(ts, "SIGNAL without a pending signal".into());
            return Draft::no_trade("internal_error:no_pending_signal");
        };
        pending.bars_waited += 1;
        let side = pending.signal.side;
        let refreshed = self.pipeline.scorer.score(snapshot, side).score;

        if self.check_guards(ts).is_some() {
            self.transition(Trigger::SignalExpired, ts, context([("reason", "trading_blocked".into())]));
            return Draft::no_trade("trading_blocked").side(side).confidence(refreshed);
        }

        let age = now - pending.received_at;
        match self.signals.review(refreshed, age, pending.bars_waited) {
            SignalReview::Wait => {
                self.transition(Trigger::CandleClose, ts, TransitionContext::new());
                let draft = Draft::no_trade("awaiting_confirmation").side(side).confidence(refreshed);
                self.pending = Some(pending);
                draft
            }
            SignalReview::Expire(reason) => {
                info!(id = %pending.signal.id, reason = reason.as_str(), "signal expired");
                self.transition(Trigger::SignalExpired, ts, context([("reason", reason.as_str().into())]));
                Draft::no_trade(reason.as_str()).side(side).confidence(refreshed)
            }
            SignalReview::Confirm => {
                if let Some(rules) = &self.rules {
                    if let EntryVerdict::Blocked { .. } = RuleEntryGate::new(rules).check_entry(snapshot, side, regime) {
                        self.transition(Trigger::SignalExpired, ts, context([("reason", "strategy_gate".into())]));
                        return Draft::no_trade("strategy_gate").side(side).confidence(refreshed);
                    }
                }
                let confirmed = self.signals.confirm(pending.signal, snapshot, refreshed);
                info!(id = %confirmed.id, entry = confirmed.entry_price, stop = confirmed.stop_price, "signal confirmed");
                self.enter(confirmed, pending.size_multiplier, ts)
            }
        }
    }

    // ─── ENTERED ────────────────────────────────────────────────────

    fn on_entered(&mut self) -> Draft {
        match &self.awaiting_fill {
            Some(a) => Draft::new(DecisionAction::Hold).side(a.signal.side).reason("awaiting_fill"),
            None => Draft::new(DecisionAction::Hold).reason("awaiting_fill"),
        }
    }

    /// Report the fill of the pending open order. ENTERED → MANAGE.
    ///
    /// A fill that arrives while PAUSED opens the position without a
    /// transition; it is re-adopted as MANAGE on resume.
    pub fn on_order_filled(&mut self, fill_price: f64, ts: DateTime<Utc>) -> Result<&Position, ProcessorError> {
        if !(fill_price.is_finite() && fill_price > 0.0) {
            return Err(ProcessorError::InvalidFill(fill_price));
        }
        let state = self.machine.state();
        let paused = state == BotState::Paused && self.awaiting_fill.is_some();
        if state != BotState::Entered && !paused {
            return Err(StateError::InvalidTransition {
                from: state,
                trigger: Trigger::OrderFilled,
            }
            .into());
        }
        let awaiting = self.awaiting_fill.take().ok_or(ProcessorError::NoPendingOrder)?;
        let signal = awaiting.signal;
        let stop = self.signals.stop_for(signal.side, fill_price, signal.stop_pct);
        let position = Position::open(
            signal.side,
            ts,
            fill_price,
            awaiting.quantity,
            stop,
            self.pipeline.trailing.mode(),
            signal.strategy.clone(),
        );
        if let Err(e) = self.slot.open(position) {
            self.escalate(ts, e.to_string());
            return Err(e.into());
        }
        if paused {
            info!(side = %signal.side, price = fill_price, stop, "fill received while paused; position kept for resume");
        } else {
            self.machine.fire(
                Trigger::OrderFilled,
                ts,
                context([("price", format!("{fill_price:.4}")), ("stop", format!("{stop:.4}"))]),
            )?;
            info!(side = %signal.side, price = fill_price, stop, qty = awaiting.quantity, "position opened");
        }
        self.slot.get().ok_or(ProcessorError::NoPosition)
    }

    pub fn on_order_rejected(&mut self, reason: &str, ts: DateTime<Utc>) -> Result<(), ProcessorError> {
        if !self.drop_order_while_paused(reason) {
            self.machine
                .fire(Trigger::OrderRejected, ts, context([("reason", reason.to_string())]))?;
            self.awaiting_fill = None;
        }
        warn!(reason, "entry order rejected");
        Ok(())
    }

    pub fn on_order_cancelled(&mut self, ts: DateTime<Utc>) -> Result<(), ProcessorError> {
        if !self.drop_order_while_paused("cancelled") {
            self.machine.fire(Trigger::OrderCancelled, ts, TransitionContext::new())?;
            self.awaiting_fill = None;
        }
        Ok(())
    }

    /// A rejected or cancelled order while PAUSED only forgets the order.
    fn drop_order_while_paused(&mut self, reason: &str) -> bool {
        if self.machine.state() != BotState::Paused {
            return false;
        }
        match self.awaiting_fill.take() {
            Some(a) => {
                info!(id = %a.signal.id, reason, "pending entry order dropped while paused");
                true
            }
            None => false,
        }
    }

    // ─── MANAGE ─────────────────────────────────────────────────────

    fn on_manage(&mut self, snapshot: &FeatureSnapshot, regime: &RegimeState) -> Draft {
        let ts = snapshot.timestamp;
        let activation_pct = self.config.trailing.activation_pct;
        let Some(position) = self.slot.get_mut() else {
            error!("MANAGE without an open position");
            self.transition(Trigger::Error, ts, context([("reason", "manage_without_position".into())]));
            return Draft::no_trade("internal_error:no_position");
        };

        position.update_mark(snapshot.close, snapshot.high, snapshot.low);
        position.tick_bar();
        if !position.trailing.activated && position.return_on_risk_pct() >= activation_pct {
            position.trailing.activated = true;
            debug!(ror = position.return_on_risk_pct(), "trailing activated");
        }

        let exit = self
            .pipeline
            .exit
            .check(snapshot, position, regime, self.previous_regime.as_ref())
            .or_else(|| {
                self.rules
                    .as_ref()
                    .and_then(|rules| RuleEntryGate::new(rules).check_exit(snapshot, position))
            });
        if let Some(exit) = exit {
            let price = match exit.reason {
                ExitReason::StopHit => stop_fill_price(position, snapshot),
                _ => snapshot.close,
            };
            return self.close_position(exit, price, ts, DecisionSource::RuleBased);
        }

        let side = position.side;
        let stop_before = position.stop();
        let mut draft = Draft::new(DecisionAction::Hold)
            .side(side)
            .confidence(regime.regime_confidence);
        draft.strategy = Some(position.strategy.clone());
        draft.stop_before = Some(stop_before);
        draft.stop_after = Some(stop_before);

        let Some(candidate) = self.pipeline.trailing.compute(snapshot, position) else {
            self.transition(Trigger::CandleClose, ts, TransitionContext::new());
            return draft.reason("hold");
        };
        if !side.is_tighter(candidate, stop_before) {
            error!(
                calculator = self.pipeline.trailing.name(),
                stop_before,
                candidate,
                "trailing calculator proposed a looser stop; ignored"
            );
            self.transition(Trigger::CandleClose, ts, TransitionContext::new());
            return draft.reason("trailing_rejected");
        }
        if let Err(e) = position.trailing.tighten(candidate, ts, self.pipeline.trailing.name()) {
            error!(error = %e, "stop update rejected");
            self.transition(Trigger::CandleClose, ts, TransitionContext::new());
            return draft.reason("trailing_rejected");
        }

        let ctx = context([("from", format!("{stop_before:.4}")), ("to", format!("{candidate:.4}"))]);
        self.transition(Trigger::StopUpdated, ts, ctx);
        draft.action = DecisionAction::AdjustStop;
        draft.stop_after = Some(candidate);
        draft.intents.push(OrderIntent::UpdateStop { side, stop: candidate });
        draft.reason(format!("trail:{}", self.pipeline.trailing.mode()))
    }

    fn close_position(&mut self, exit: ExitSignal, price: f64, ts: DateTime<Utc>, source: DecisionSource) -> Draft {
        let trigger = match exit.reason {
            ExitReason::StopHit => Trigger::StopHit,
            ExitReason::TimeStop => Trigger::TimeStop,
            ExitReason::Manual => Trigger::ManualExit,
            _ => Trigger::ExitSignal,
        };
        let position = match self.slot.take() {
            Ok(p) => p,
            Err(e) => {
                self.escalate(ts, e.to_string());
                return Draft::no_trade("internal_error:no_position");
            }
        };
        let ctx = context([("reason", exit.reason.as_str().into()), ("detail", exit.detail.clone())]);
        self.transition(trigger, ts, ctx);

        let trade = ClosedTrade::from_position(&position, ts, price, exit.reason.as_str());
        info!(
            side = %position.side,
            reason = %exit.reason,
            price,
            pnl = %format!("{:.2}", trade.pnl),
            bars = position.bars_held,
            "position closed"
        );
        self.guard.record_close(&trade);
        self.trades.push(trade.clone());

        let mut draft = Draft::new(DecisionAction::Exit)
            .side(position.side)
            .confidence(f64::from(exit.urgency) / 3.0)
            .reason(exit.reason.as_str());
        if !exit.detail.is_empty() {
            draft.reasons.push(exit.detail.clone());
        }
        draft.source = source;
        draft.strategy = Some(position.strategy.clone());
        draft.stop_before = Some(position.stop());
        draft.intents.push(OrderIntent::Close {
            side: position.side,
            quantity: position.quantity,
            reason: exit.reason.as_str().to_string(),
            urgency: exit.urgency,
        });
        draft.closed_trade = Some(trade);
        draft
    }

    // ─── Explicit control ───────────────────────────────────────────

    /// Pause. An open position and an in-flight entry order are kept; a
    /// pending candidate is dropped.
    pub fn pause(&mut self, ts: DateTime<Utc>) -> Result<(), ProcessorError> {
        self.machine.fire(Trigger::Pause, ts, TransitionContext::new())?;
        if let Some(p) = self.pending.take() {
            info!(id = %p.signal.id, "pending signal dropped on pause");
        }
        Ok(())
    }

    /// Resume to FLAT, re-adopting an open position through ENTERED → MANAGE,
    /// or an unfilled entry order as ENTERED.
    pub fn resume(&mut self, ts: DateTime<Utc>) -> Result<(), ProcessorError> {
        self.machine.fire(Trigger::Resume, ts, TransitionContext::new())?;
        self.readopt_position(ts)
    }

    /// Leave ERROR, re-adopting an open position or entry order if there is one.
    pub fn clear_error(&mut self, ts: DateTime<Utc>) -> Result<(), ProcessorError> {
        self.machine.fire(Trigger::ErrorCleared, ts, TransitionContext::new())?;
        self.pending = None;
        self.readopt_position(ts)
    }

    fn readopt_position(&mut self, ts: DateTime<Utc>) -> Result<(), ProcessorError> {
        if !self.slot.is_open() {
            if let Some(a) = &self.awaiting_fill {
                let ctx = context([
                    ("context", "resume_with_pending_order".to_string()),
                    ("signal", a.signal.id.to_string()),
                ]);
                self.machine.fire(Trigger::SignalConfirmed, ts, ctx)?;
                info!("pending entry order re-adopted");
            }
            return Ok(());
        }
        let ctx = || context([("context", "resume_with_position".to_string())]);
        self.machine.fire(Trigger::SignalConfirmed, ts, ctx())?;
        self.machine.fire(Trigger::OrderFilled, ts, ctx())?;
        info!("open position re-adopted");
        Ok(())
    }

    /// Close the open position at `price` on operator request.
    pub fn manual_exit(&mut self, price: f64, ts: DateTime<Utc>) -> Result<BarOutcome, ProcessorError> {
        if !(price.is_finite() && price > 0.0) {
            return Err(ProcessorError::InvalidFill(price));
        }
        if !self.machine.can_fire(Trigger::ManualExit) {
            return Err(StateError::InvalidTransition {
                from: self.machine.state(),
                trigger: Trigger::ManualExit,
            }
            .into());
        }
        if !self.slot.is_open() {
            return Err(ProcessorError::NoPosition);
        }
        let exit = ExitSignal::new(ExitReason::Manual, 3, "operator request");
        let draft = self.close_position(exit, price, ts, DecisionSource::Manual);
        let regime = self
            .previous_regime
            .clone()
            .unwrap_or_else(|| RegimeState::unknown(ts));
        let decision = Decision {
            bar_index: self.bar_index.saturating_sub(1),
            timestamp: ts,
            action: draft.action,
            side: draft.side,
            confidence: draft.confidence,
            snapshot_hash: self.last_hash.clone().unwrap_or_else(|| SnapshotHash(String::new())),
            regime: regime.regime,
            volatility: regime.volatility,
            strategy: draft.strategy,
            stop_before: draft.stop_before,
            stop_after: draft.stop_after,
            reasons: draft.reasons,
            source: draft.source,
        };
        Ok(self.emit(decision, draft.intents, draft.closed_trade))
    }

    /// Reload the rules document between bars. The previous document stays on failure.
    pub fn reload_rules(&mut self) -> Result<(), ProcessorError> {
        let rules = self.rules.as_mut().ok_or(RulesError::NoSource)?;
        rules.reload()?;
        Ok(())
    }

    /// Close attached services.
    pub fn shutdown(&mut self) {
        if let Some(mut s) = self.advisory.take() {
            s.close();
        }
        if let Some(mut s) = self.patterns.take() {
            s.close();
        }
    }
}

/// Fill price for a stop exit; a gap through the stop fills at the open.
pub fn stop_fill_price(position: &Position, snapshot: &FeatureSnapshot) -> f64 {
    let stop = position.stop();
    match position.side {
        Side::Long if snapshot.open < stop => snapshot.open,
        Side::Short if snapshot.open > stop => snapshot.open,
        _ => stop,
    }
}

impl std::fmt::Debug for BarProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarProcessor")
            .field("state", &self.machine.state())
            .field("pipeline", &self.pipeline)
            .field("bar_index", &self.bar_index)
            .field("position", &self.slot.get().map(|p| p.side))
            .field("rules", &self.rules)
            .finish()
    }
}

impl Drop for BarProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
