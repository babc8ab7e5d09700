//! Bot lifecycle: state machine, position slot, decision log, external
//! collaborators, and the bar processor that ties them together.

pub mod advisory;
pub mod callbacks;
pub mod decision_log;
pub mod position_slot;
pub mod processor;
pub mod state_machine;

pub use advisory::{
    AdvisoryError, AdvisoryRequest, AdvisoryService, AdvisoryVerdict, PatternMatch, PatternService,
};
pub use callbacks::Callbacks;
pub use decision_log::DecisionLog;
pub use position_slot::{PositionSlot, SlotError};
pub use processor::{stop_fill_price, BarOutcome, BarProcessor, PendingSignal, ProcessorError};
pub use state_machine::{
    context, BotState, StateError, StateMachine, TransitionContext, TransitionRecord, Trigger,
};
