//! Routing-key policies.
//!
//! A policy is chosen once at startup. [`KeyPolicy::Skewed`] keys every event
//! by its player, so a dominant VIP player hashes onto a single partition.
//! [`KeyPolicy::Sharded`] appends a `#shard=<n>` suffix so the same VIP is
//! spread over up to `shards` routing keys (and therefore partitions), at the
//! cost of strict per-player ordering.

use crate::error::ConfigError;
use rand::Rng;
use std::fmt;
use std::num::NonZeroU32;

/// The hot player that dominates traffic.
pub const VIP_PLAYER_ID: &str = "player-000001";

/// Literal separating the player id from the shard index in a routing key.
pub const SHARD_DELIMITER: &str = "#shard=";

/// Size of the player identifier space (`player-000000` .. `player-199999`).
pub const PLAYER_ID_SPACE: u32 = 200_000;

const VIP_PLAYER_NUMBER: u32 = 1;

/// Key under which a record is handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Key a record directly by player.
    pub fn for_player(player_id: &str) -> Self {
        Self(player_id.to_string())
    }

    /// Key a record by player plus shard suffix, e.g. `player-000001#shard=9`.
    pub fn for_shard(player_id: &str, shard: u32) -> Self {
        Self(format!("{player_id}{SHARD_DELIMITER}{shard}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// The logical player prefix shared by every shard of the same player.
    pub fn player_id(&self) -> &str {
        match self.0.split_once(SHARD_DELIMITER) {
            Some((player, _)) => player,
            None => &self.0,
        }
    }

    /// Shard index, if the key carries a suffix.
    pub fn shard(&self) -> Option<u32> {
        self.0
            .split_once(SHARD_DELIMITER)
            .and_then(|(_, shard)| shard.parse().ok())
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RoutingKey> for String {
    fn from(key: RoutingKey) -> Self {
        key.0
    }
}

/// Outcome of one policy draw: who the event is for and how it is keyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDraw {
    pub player_id: String,
    pub routing_key: RoutingKey,
}

/// Routing-key assignment strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPolicy {
    /// `skew_percent`% of events go to the VIP, keyed by player id.
    Skewed { skew_percent: u8 },
    /// `vip_weight_percent`% of events go to the VIP, every key gets a
    /// uniformly drawn shard suffix in `[0, shards)`.
    Sharded {
        shards: NonZeroU32,
        vip_weight_percent: u8,
    },
}

impl KeyPolicy {
    /// Build a skewed policy. `skew_percent` must lie in `0..=100`.
    pub fn skewed(skew_percent: i64) -> Result<Self, ConfigError> {
        let skew_percent =
            percent(skew_percent).ok_or(ConfigError::InvalidSkewPercent(skew_percent))?;
        Ok(KeyPolicy::Skewed { skew_percent })
    }

    /// Build a sharded policy. `shards` must be positive.
    pub fn sharded(shards: i64, vip_weight_percent: i64) -> Result<Self, ConfigError> {
        let shards = u32::try_from(shards)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or(ConfigError::InvalidShardCount(shards))?;
        let vip_weight_percent =
            percent(vip_weight_percent).ok_or(ConfigError::InvalidVipWeight(vip_weight_percent))?;
        Ok(KeyPolicy::Sharded {
            shards,
            vip_weight_percent,
        })
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            KeyPolicy::Skewed { .. } => "skewed",
            KeyPolicy::Sharded { .. } => "sharded",
        }
    }

    /// Percentage of traffic that belongs to the VIP under this policy.
    pub fn vip_percent(&self) -> u8 {
        match self {
            KeyPolicy::Skewed { skew_percent } => *skew_percent,
            KeyPolicy::Sharded {
                vip_weight_percent, ..
            } => *vip_weight_percent,
        }
    }

    /// Number of routing keys a single player can be spread over.
    pub fn shard_count(&self) -> u32 {
        match self {
            KeyPolicy::Skewed { .. } => 1,
            KeyPolicy::Sharded { shards, .. } => shards.get(),
        }
    }

    /// Draw a player and derive its routing key.
    pub fn draw<R: Rng>(&self, rng: &mut R) -> KeyDraw {
        let player_id = pick_player(self.vip_percent(), rng);
        let routing_key = match self {
            KeyPolicy::Skewed { .. } => RoutingKey::for_player(&player_id),
            KeyPolicy::Sharded { shards, .. } => {
                RoutingKey::for_shard(&player_id, rng.gen_range(0..shards.get()))
            }
        };
        KeyDraw {
            player_id,
            routing_key,
        }
    }
}

fn percent(value: i64) -> Option<u8> {
    if (0..=100).contains(&value) {
        Some(value as u8)
    } else {
        None
    }
}

fn pick_player<R: Rng>(vip_percent: u8, rng: &mut R) -> String {
    if rng.gen_range(0..100u8) < vip_percent {
        return VIP_PLAYER_ID.to_string();
    }
    // Uniform over the space minus the VIP number.
    let mut n = rng.gen_range(0..PLAYER_ID_SPACE - 1);
    if n >= VIP_PLAYER_NUMBER {
        n += 1;
    }
    format!("player-{n:06}")
}
