//! Append-only decision log. Entries are never mutated or removed.

use crate::domain::{Decision, DecisionAction};

#[derive(Debug, Clone, Default)]
pub struct DecisionLog {
    entries: Vec<Decision>,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, decision: Decision) -> &Decision {
        self.entries.push(decision);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[Decision] {
        &self.entries
    }

    pub fn last(&self) -> Option<&Decision> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, action: DecisionAction) -> usize {
        self.entries.iter().filter(|d| d.action == action).count()
    }
}
