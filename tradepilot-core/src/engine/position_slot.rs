//! Single position slot — at most one open position at any time.

use thiserror::Error;

use crate::domain::{Position, Side};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SlotError {
    #[error("a {side} position is already open; new position rejected")]
    AlreadyOpen { side: Side },
    #[error("no open position")]
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionSlot {
    position: Option<Position>,
}

impl PositionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Occupy the slot. A second open is rejected, never merged.
    pub fn open(&mut self, position: Position) -> Result<&mut Position, SlotError> {
        if let Some(existing) = &self.position {
            return Err(SlotError::AlreadyOpen { side: existing.side });
        }
        Ok(self.position.insert(position))
    }

    pub fn take(&mut self) -> Result<Position, SlotError> {
        self.position.take().ok_or(SlotError::Empty)
    }

    pub fn get(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut Position> {
        self.position.as_mut()
    }

    pub fn is_open(&self) -> bool {
        self.position.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TrailingMode;
    use chrono::DateTime;

    fn pos(side: Side) -> Position {
        let t = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        Position::open(side, t, 100.0, 1.0, 98.0, TrailingMode::Atr, "t")
    }

    #[test]
    fn second_open_is_rejected() {
        let mut slot = PositionSlot::new();
        slot.open(pos(Side::Long)).unwrap();
        assert_eq!(
            slot.open(pos(Side::Short)).unwrap_err(),
            SlotError::AlreadyOpen { side: Side::Long }
        );
        assert_eq!(slot.get().unwrap().side, Side::Long);
    }

    #[test]
    fn take_empties_slot() {
        let mut slot = PositionSlot::new();
        assert_eq!(slot.take().unwrap_err(), SlotError::Empty);
        slot.open(pos(Side::Short)).unwrap();
        assert_eq!(slot.take().unwrap().side, Side::Short);
        assert!(!slot.is_open());
    }
}
