//! Domain types for TradePilot

pub mod decision;
pub mod ids;
pub mod position;
pub mod regime;
pub mod signal;
pub mod snapshot;
pub mod trade;

pub use decision::{Decision, DecisionAction, DecisionSource, OrderIntent};
pub use ids::{SignalId, SnapshotHash};
pub use position::{Position, Side, StopChange, TrailingError, TrailingMode, TrailingState};
pub use regime::{RegimeSource, RegimeState, RegimeType, VolatilityLevel};
pub use signal::{Signal, SignalStatus};
pub use snapshot::{keys, FeatureSnapshot};
pub use trade::ClosedTrade;
