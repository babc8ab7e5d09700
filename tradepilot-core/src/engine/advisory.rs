//! Optional external gates: an LLM advisory service and a pattern-similarity
//! service.
//!
//! Both are explicit handles passed to the processor with an open/close
//! lifecycle. Any error degrades to the rule-based decision; neither can stop
//! bar processing.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::domain::{FeatureSnapshot, RegimeState, Side};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdvisoryError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("service timed out")]
    Timeout,
    #[error("request budget exhausted")]
    BudgetExhausted,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// What the advisory service is asked about.
#[derive(Debug, Clone, Copy)]
pub struct AdvisoryRequest<'a> {
    pub snapshot: &'a FeatureSnapshot,
    pub regime: &'a RegimeState,
    pub side: Side,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum AdvisoryVerdict {
    Approve { confidence: f64, note: String },
    Veto { reason: String },
    Abstain,
}

pub trait AdvisoryService: Send {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<(), AdvisoryError>;

    fn review_entry(&mut self, request: &AdvisoryRequest<'_>) -> Result<AdvisoryVerdict, AdvisoryError>;

    fn close(&mut self);
}

/// Historical outcome of setups similar to the current bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub samples: usize,
    /// Fraction of similar setups that were profitable, in [0, 1].
    pub win_rate: f64,
}

pub trait PatternService: Send {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<(), AdvisoryError>;

    fn lookup(&mut self, snapshot: &FeatureSnapshot, side: Side) -> Result<PatternMatch, AdvisoryError>;

    fn close(&mut self);
}

/// Open a service, logging and discarding it on failure.
pub fn open_advisory(mut service: Box<dyn AdvisoryService>) -> Option<Box<dyn AdvisoryService>> {
    match service.open() {
        Ok(()) => Some(service),
        Err(e) => {
            warn!(service = service.name(), error = %e, "advisory service failed to open; continuing without it");
            None
        }
    }
}

pub fn open_patterns(mut service: Box<dyn PatternService>) -> Option<Box<dyn PatternService>> {
    match service.open() {
        Ok(()) => Some(service),
        Err(e) => {
            warn!(service = service.name(), error = %e, "pattern service failed to open; continuing without it");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Offline;

    impl AdvisoryService for Offline {
        fn name(&self) -> &str {
            "offline"
        }
        fn open(&mut self) -> Result<(), AdvisoryError> {
            Err(AdvisoryError::Unavailable("no network".into()))
        }
        fn review_entry(&mut self, _: &AdvisoryRequest<'_>) -> Result<AdvisoryVerdict, AdvisoryError> {
            Err(AdvisoryError::Timeout)
        }
        fn close(&mut self) {}
    }

    #[test]
    fn failed_open_is_dropped() {
        assert!(open_advisory(Box::new(Offline)).is_none());
    }

    #[test]
    fn verdict_serializes_tagged() {
        let v = AdvisoryVerdict::Veto {
            reason: "news".into(),
        };
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"verdict":"veto","reason":"news"}"#);
    }
}
