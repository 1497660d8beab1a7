//! Wire payload carried as the record value.
//!
//! The payload is a flat JSON object. Field names and their order are part of
//! the contract with downstream readers:
//! `id, player_id, game_id, event_type, amount, table_id, ts`.

use crate::event::{EventType, GameEvent};
use crate::key_policy::RoutingKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Payload encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Payload decoding error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Flat wire form of a [`GameEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePayload {
    pub id: u64,
    pub player_id: String,
    pub game_id: String,
    pub event_type: EventType,
    pub amount: u32,
    pub table_id: String,
    pub ts: i64,
}

impl From<&GameEvent> for WirePayload {
    fn from(event: &GameEvent) -> Self {
        Self {
            id: event.id,
            player_id: event.player_id.clone(),
            game_id: event.game_id.clone(),
            event_type: event.event_type,
            amount: event.amount,
            table_id: event.table_id.clone(),
            ts: event.timestamp_millis,
        }
    }
}

impl WirePayload {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }
}

/// A `(topic, key, value)` triple ready to hand to the transport.
///
/// Ownership moves into the sink on send; a dropped record is simply
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    pub topic: String,
    pub key: RoutingKey,
    pub value: Vec<u8>,
}

impl PublishedRecord {
    /// Encode `event` and pair it with its routing key.
    pub fn new(
        topic: impl Into<String>,
        key: RoutingKey,
        event: &GameEvent,
    ) -> Result<Self, WireError> {
        Ok(Self {
            topic: topic.into(),
            key,
            value: WirePayload::from(event).encode()?,
        })
    }
}
