//! Optional push callbacks toward order-execution and UI collaborators.
//!
//! Every hook is an `Option`; an unset hook is skipped and never changes what
//! the processor decides.

use crate::components::exit::MacdCross;
use crate::components::guards::BlockReason;
use crate::domain::{Decision, OrderIntent, Signal};

pub type SignalHook = Box<dyn FnMut(&Signal) + Send>;
pub type DecisionHook = Box<dyn FnMut(&Decision) + Send>;
pub type OrderHook = Box<dyn FnMut(&OrderIntent) + Send>;
pub type BlockedHook = Box<dyn FnMut(&[BlockReason]) + Send>;
pub type MacdHook = Box<dyn FnMut(MacdCross, f64) + Send>;

#[derive(Default)]
pub struct Callbacks {
    pub on_signal: Option<SignalHook>,
    pub on_decision: Option<DecisionHook>,
    pub on_order: Option<OrderHook>,
    /// Called once per change of the blocking reasons (empty slice when lifted).
    pub on_trading_blocked: Option<BlockedHook>,
    pub on_macd_signal: Option<MacdHook>,
}

impl Callbacks {
    pub fn signal(&mut self, signal: &Signal) {
        if let Some(f) = self.on_signal.as_mut() {
            f(signal);
        }
    }

    pub fn decision(&mut self, decision: &Decision) {
        if let Some(f) = self.on_decision.as_mut() {
            f(decision);
        }
    }

    pub fn order(&mut self, intent: &OrderIntent) {
        if let Some(f) = self.on_order.as_mut() {
            f(intent);
        }
    }

    pub fn trading_blocked(&mut self, reasons: &[BlockReason]) {
        if let Some(f) = self.on_trading_blocked.as_mut() {
            f(reasons);
        }
    }

    pub fn macd_signal(&mut self, kind: MacdCross, price: f64) {
        if let Some(f) = self.on_macd_signal.as_mut() {
            f(kind, price);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_signal", &self.on_signal.is_some())
            .field("on_decision", &self.on_decision.is_some())
            .field("on_order", &self.on_order.is_some())
            .field("on_trading_blocked", &self.on_trading_blocked.is_some())
            .field("on_macd_signal", &self.on_macd_signal.is_some())
            .finish()
    }
}
