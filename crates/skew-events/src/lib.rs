//! Event generation for the partition-skew tooling.
//!
//! This crate builds the game events that flow through the topic and decides
//! which routing key each event is published under. The routing key is what
//! the transport hashes to pick a partition, so the key policy is the knob
//! that either concentrates traffic on one partition or spreads it.
//!
//! # Architecture
//!
//! ```text
//!   seeded rng
//!       │
//!       ▼
//! ┌─────────────┐   player   ┌──────────────┐
//! │  KeyPolicy  │──────────▶│ EventFactory │
//! │ skewed /    │            └──────┬───────┘
//! │ sharded     │                   │ GameEvent
//! └──────┬──────┘                   ▼
//!        │ RoutingKey        ┌──────────────┐
//!        └─────────────────▶│PublishedRecord│ (topic, key, json value)
//!                            └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use skew_events::{EventFactory, KeyPolicy, PublishedRecord};
//!
//! let policy = KeyPolicy::sharded(16, 95).unwrap();
//! let mut factory = EventFactory::new(StdRng::seed_from_u64(42));
//!
//! let draw = factory.draw_key(&policy);
//! let event = factory.next(0, draw.player_id.clone());
//! let record = PublishedRecord::new("game-events", draw.routing_key, &event).unwrap();
//! assert!(record.key.as_str().starts_with(&event.player_id));
//! ```

pub mod error;
pub mod event;
pub mod factory;
pub mod key_policy;
pub mod partition;
pub mod wire;

// Re-exports for convenience
pub use error::ConfigError;
pub use event::{EventType, GameEvent};
pub use factory::EventFactory;
pub use key_policy::{KeyDraw, KeyPolicy, RoutingKey, SHARD_DELIMITER, VIP_PLAYER_ID};
pub use partition::partition_for;
pub use wire::{PublishedRecord, WireError, WirePayload};
