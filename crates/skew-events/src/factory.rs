//! Event factory producing deterministic game events from a seeded rng.
//!
//! Building an event takes two steps. The [`KeyPolicy`] decides who the
//! event belongs to and how it is keyed; [`EventFactory::draw_key`] runs
//! that decision on the factory's rng so one seed drives the whole stream.
//! [`EventFactory::next`] then fills in everything else (game, type,
//! amount, table, timestamp) for the drawn player under a sequence id:
//!
//! ```
//! use skew_events::{EventFactory, KeyPolicy};
//!
//! let policy = KeyPolicy::sharded(16, 95).unwrap();
//! let mut factory = EventFactory::seeded(7);
//! let draw = factory.draw_key(&policy);
//! let event = factory.next(0, draw.player_id.clone());
//! assert_eq!(draw.routing_key.player_id(), event.player_id);
//! ```

use crate::event::{EventType, GameEvent};
use crate::key_policy::{KeyDraw, KeyPolicy};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Number of distinct games events are spread over.
pub const GAME_COUNT: u32 = 50;

/// Number of distinct tables events are spread over.
pub const TABLE_COUNT: u32 = 100;

/// Smallest amount an event can carry.
pub const MIN_AMOUNT: u32 = 10;

/// Width of the amount range, so amounts fall in `[10, 210)`.
pub const AMOUNT_SPAN: u32 = 200;

/// Builds game events.
///
/// The factory owns its random source so generation is reproducible: two
/// factories seeded alike yield identical event streams.
pub struct EventFactory<R = StdRng> {
    rng: R,
}

impl EventFactory<StdRng> {
    /// Factory seeded with an explicit seed.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Factory seeded from the wall clock.
    pub fn from_clock() -> Self {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        Self::seeded(nanos as u64)
    }
}

impl<R: Rng> EventFactory<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Draw the player and routing key for the next event.
    pub fn draw_key(&mut self, policy: &KeyPolicy) -> KeyDraw {
        policy.draw(&mut self.rng)
    }

    /// Build the event with sequence `id` for `player_id`, stamped now.
    pub fn next(&mut self, id: u64, player_id: String) -> GameEvent {
        self.next_at(id, player_id, chrono::Utc::now().timestamp_millis())
    }

    /// Build an event with an explicit timestamp.
    pub fn next_at(&mut self, id: u64, player_id: String, timestamp_millis: i64) -> GameEvent {
        let game_id = format!("game-{}", self.rng.gen_range(0..GAME_COUNT));
        let event_type = *EventType::ALL
            .choose(&mut self.rng)
            .unwrap_or(&EventType::BetPlaced);
        let amount = MIN_AMOUNT + self.rng.gen_range(0..AMOUNT_SPAN);
        let table_id = format!("table-{}", self.rng.gen_range(0..TABLE_COUNT));

        GameEvent {
            id,
            player_id,
            game_id,
            event_type,
            amount,
            table_id,
            timestamp_millis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_event_fields_in_range() {
        let mut factory = EventFactory::seeded(42);
        let mut types = HashSet::new();
        for id in 0..5_000 {
            let event = factory.next_at(id, "player-000123".to_string(), 1_700_000_000_000);
            assert_eq!(event.id, id);
            assert!((10..210).contains(&event.amount));
            let game: u32 = event.game_id.strip_prefix("game-").unwrap().parse().unwrap();
            assert!(game < GAME_COUNT);
            let table: u32 = event.table_id.strip_prefix("table-").unwrap().parse().unwrap();
            assert!(table < TABLE_COUNT);
            types.insert(event.event_type);
        }
        assert_eq!(types.len(), EventType::ALL.len());
    }

    #[test]
    fn test_same_seed_same_events() {
        let policy = KeyPolicy::sharded(16, 95).unwrap();
        let mut a = EventFactory::seeded(99);
        let mut b = EventFactory::seeded(99);
        for id in 0..100 {
            let draw_a = a.draw_key(&policy);
            let draw_b = b.draw_key(&policy);
            assert_eq!(draw_a, draw_b);
            assert_eq!(
                a.next_at(id, draw_a.player_id, 0),
                b.next_at(id, draw_b.player_id, 0)
            );
        }
    }

    #[test]
    fn test_event_carries_drawn_player() {
        let policy = KeyPolicy::skewed(50).unwrap();
        let mut factory = EventFactory::seeded(3);
        let mut players = HashSet::new();
        for id in 0..200 {
            let draw = factory.draw_key(&policy);
            let event = factory.next_at(id, draw.player_id.clone(), 0);
            assert_eq!(event.player_id, draw.player_id);
            assert_eq!(draw.routing_key.player_id(), event.player_id);
            players.insert(event.player_id);
        }
        // Half the traffic is the VIP, the rest is spread over other players.
        assert!(players.len() > 10);
    }

    #[test]
    fn test_different_seeds_diverge() {
        let mut a = EventFactory::seeded(1);
        let mut b = EventFactory::seeded(2);
        let left: Vec<_> = (0..20).map(|i| a.next_at(i, "p".into(), 0)).collect();
        let right: Vec<_> = (0..20).map(|i| b.next_at(i, "p".into(), 0)).collect();
        assert_ne!(left, right);
    }
}
