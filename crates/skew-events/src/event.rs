//! The game event shape.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of game activity an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BetPlaced,
    HandFinished,
    ChipsAdded,
}

impl EventType {
    /// Every variant, in draw order.
    pub const ALL: [EventType; 3] = [
        EventType::BetPlaced,
        EventType::HandFinished,
        EventType::ChipsAdded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::BetPlaced => "bet_placed",
            EventType::HandFinished => "hand_finished",
            EventType::ChipsAdded => "chips_added",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single game event. Built once by the factory, encoded once, then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEvent {
    /// Producer-local monotonic sequence number
    pub id: u64,
    pub player_id: String,
    pub game_id: String,
    pub event_type: EventType,
    /// Always in `[10, 210)`
    pub amount: u32,
    pub table_id: String,
    /// Milliseconds since the unix epoch
    pub timestamp_millis: i64,
}
