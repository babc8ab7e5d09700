//! Live driver — the same [`BarProcessor`] wired to a broker and a clock.
//!
//! Entries go to the broker as they are emitted; the broker either fills at
//! once or reports the fill later through [`LiveDriver::on_fill`]. Stop updates
//! are throttled: at most one per interval reaches the broker, and the latest
//! withheld stop is flushed on a later bar once the interval has passed.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use tradepilot_core::components::factory::FactoryError;
use tradepilot_core::domain::{FeatureSnapshot, OrderIntent, Side};
use tradepilot_core::engine::{BarOutcome, BarProcessor, ProcessorError};
use tradepilot_core::rules::RulesEngine;

use crate::settings::BotSettings;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("processor error: {0}")]
    Processor(#[from] ProcessorError),
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("composition error: {0}")]
    Factory(#[from] FactoryError),
}

// ─── Collaborator traits ────────────────────────────────────────────

/// Order-execution collaborator.
pub trait Broker: Send {
    fn name(&self) -> &str;

    /// Submit an entry order. `Ok(Some(price))` is an immediate fill,
    /// `Ok(None)` a working order whose fill arrives later.
    fn open(&mut self, side: Side, quantity: f64, reference_price: f64, stop: f64)
        -> Result<Option<f64>, BrokerError>;

    fn close(&mut self, side: Side, quantity: f64, reason: &str) -> Result<(), BrokerError>;

    fn update_stop(&mut self, side: Side, stop: f64) -> Result<(), BrokerError>;
}

pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ─── Stop update throttle ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StopThrottle {
    interval: Duration,
    last_sent: Option<DateTime<Utc>>,
    pending: Option<(Side, f64)>,
}

impl StopThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            pending: None,
        }
    }

    fn due(&self, now: DateTime<Utc>) -> bool {
        self.last_sent.map_or(true, |last| now - last >= self.interval)
    }

    /// Offer a new stop. It replaces any withheld stop and is returned when
    /// it may be sent now. It stays pending until [`mark_sent`](Self::mark_sent).
    pub fn offer(&mut self, side: Side, stop: f64, now: DateTime<Utc>) -> Option<(Side, f64)> {
        self.pending = Some((side, stop));
        self.flush_due(now)
    }

    /// The withheld stop, once the interval has passed.
    pub fn flush_due(&self, now: DateTime<Utc>) -> Option<(Side, f64)> {
        self.pending.filter(|_| self.due(now))
    }

    /// The broker accepted the pending stop; restart the interval.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.last_sent = Some(now);
        self.pending = None;
    }

    pub fn pending(&self) -> Option<(Side, f64)> {
        self.pending
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.last_sent = None;
    }
}

// ─── Driver ─────────────────────────────────────────────────────────

pub struct LiveDriver<B: Broker, C: Clock> {
    processor: BarProcessor,
    broker: B,
    clock: C,
    throttle: StopThrottle,
}

impl<B: Broker, C: Clock> LiveDriver<B, C> {
    pub fn new(processor: BarProcessor, broker: B, clock: C, stop_interval: Duration) -> Self {
        Self {
            processor,
            broker,
            clock,
            throttle: StopThrottle::new(stop_interval),
        }
    }

    pub fn from_settings(
        settings: &BotSettings,
        rules: Option<RulesEngine>,
        broker: B,
        clock: C,
    ) -> Result<Self, LiveError> {
        let mut processor = BarProcessor::new(settings.bot.clone())?;
        if let Some(rules) = rules {
            processor = processor.with_rules(rules);
        }
        let interval = Duration::seconds(settings.live.stop_update_interval_secs);
        info!(broker = broker.name(), interval_secs = interval.num_seconds(), "live driver ready");
        Ok(Self::new(processor, broker, clock, interval))
    }

    pub fn processor(&self) -> &BarProcessor {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut BarProcessor {
        &mut self.processor
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn throttle(&self) -> &StopThrottle {
        &self.throttle
    }

    /// Process one closed bar and forward its intents to the broker.
    pub fn on_bar(&mut self, snapshot: &FeatureSnapshot) -> Result<BarOutcome, LiveError> {
        let outcome = self.processor.process_at(snapshot, self.clock.now());
        self.dispatch(&outcome.intents)?;

        let stop_sent = outcome
            .intents
            .iter()
            .any(|i| matches!(i, OrderIntent::UpdateStop { .. }));
        if !stop_sent && self.processor.position().is_some() {
            if let Some((side, stop)) = self.throttle.flush_due(self.clock.now()) {
                debug!(stop, "flushing withheld stop");
                self.send_stop(side, stop)?;
            }
        }
        Ok(outcome)
    }

    /// Fill of a working entry order.
    pub fn on_fill(&mut self, price: f64) -> Result<(), LiveError> {
        let now = self.clock.now();
        self.processor.on_order_filled(price, now)?;
        self.throttle.clear();
        Ok(())
    }

    pub fn on_reject(&mut self, reason: &str) -> Result<(), LiveError> {
        self.processor.on_order_rejected(reason, self.clock.now())?;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), LiveError> {
        self.processor.pause(self.clock.now())?;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), LiveError> {
        self.processor.resume(self.clock.now())?;
        Ok(())
    }

    /// Close the position on operator request and send the close order.
    pub fn manual_exit(&mut self, price: f64) -> Result<BarOutcome, LiveError> {
        let outcome = self.processor.manual_exit(price, self.clock.now())?;
        self.dispatch(&outcome.intents)?;
        Ok(outcome)
    }

    fn dispatch(&mut self, intents: &[OrderIntent]) -> Result<(), LiveError> {
        for intent in intents {
            match intent {
                OrderIntent::Open {
                    side,
                    quantity,
                    reference_price,
                    stop,
                } => self.submit_entry(*side, *quantity, *reference_price, *stop)?,
                OrderIntent::Close {
                    side,
                    quantity,
                    reason,
                    ..
                } => {
                    self.throttle.clear();
                    if let Err(e) = self.broker.close(*side, *quantity, reason) {
                        error!(broker = self.broker.name(), error = %e, "close order failed");
                        return Err(e.into());
                    }
                }
                OrderIntent::UpdateStop { side, stop } => {
                    if let Some((side, stop)) = self.throttle.offer(*side, *stop, self.clock.now()) {
                        self.send_stop(side, stop)?;
                    } else {
                        debug!(stop, "stop update withheld by throttle");
                    }
                }
            }
        }
        Ok(())
    }

    /// A failed send leaves the stop pending, so the next bar retries it.
    fn send_stop(&mut self, side: Side, stop: f64) -> Result<(), LiveError> {
        let now = self.clock.now();
        if let Err(e) = self.broker.update_stop(side, stop) {
            warn!(broker = self.broker.name(), error = %e, stop, "stop update failed; kept for retry");
            return Err(e.into());
        }
        self.throttle.mark_sent(now);
        Ok(())
    }

    fn submit_entry(&mut self, side: Side, quantity: f64, reference: f64, stop: f64) -> Result<(), LiveError> {
        let now = self.clock.now();
        match self.broker.open(side, quantity, reference, stop) {
            Ok(Some(price)) => {
                self.processor.on_order_filled(price, now)?;
                self.throttle.clear();
            }
            Ok(None) => debug!(%side, "entry order working"),
            Err(e) => {
                warn!(broker = self.broker.name(), error = %e, "entry order not accepted");
                self.processor.on_order_rejected(&e.to_string(), now)?;
            }
        }
        Ok(())
    }
}

impl<B: Broker, C: Clock> std::fmt::Debug for LiveDriver<B, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveDriver")
            .field("broker", &self.broker.name())
            .field("processor", &self.processor)
            .field("throttle", &self.throttle)
            .finish()
    }
}
