//! CLI argument definitions for the producer.

use clap::{Args, ValueEnum};
use skew_events::{ConfigError, KeyPolicy};
use std::time::Duration;

use crate::rate::RateController;

/// Which routing-key policy to run.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyKind {
    /// Key by player id; the VIP lands on a single partition
    Skewed,
    /// Key by player id plus a shard suffix
    Sharded,
}

/// Key policy arguments, shared by `produce` and `simulate`.
#[derive(Args, Clone, Debug)]
pub struct PolicyArgs {
    /// Routing-key policy
    #[arg(long, value_enum, default_value_t = PolicyKind::Skewed)]
    pub policy: PolicyKind,

    /// Percentage of events keyed by the VIP player (skewed policy, 0-100)
    #[arg(long, short = 's', default_value_t = 95, allow_negative_numbers = true)]
    pub skew_percent: i64,

    /// Number of shards to spread each player over (sharded policy)
    #[arg(long, default_value_t = 16, allow_negative_numbers = true)]
    pub shards: i64,

    /// Percentage of events belonging to the VIP player (sharded policy, 0-100)
    #[arg(long, default_value_t = 95, allow_negative_numbers = true)]
    pub vip_weight_percent: i64,
}

impl PolicyArgs {
    pub fn key_policy(&self) -> Result<KeyPolicy, ConfigError> {
        match self.policy {
            PolicyKind::Skewed => KeyPolicy::skewed(self.skew_percent),
            PolicyKind::Sharded => KeyPolicy::sharded(self.shards, self.vip_weight_percent),
        }
    }
}

/// Arguments for the `produce` command.
#[derive(Args, Clone, Debug)]
pub struct ProduceArgs {
    /// Kafka brokers (comma-separated, e.g., "localhost:29092")
    #[arg(long, short = 'b', env = "KAFKA_BROKERS", default_value = "localhost:29092")]
    pub brokers: String,

    /// Topic to produce to
    #[arg(long, short = 't')]
    pub topic: String,

    /// Events per second
    #[arg(long, short = 'r', default_value_t = 400, allow_negative_numbers = true)]
    pub rate: i64,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Transport input buffer, in records; sends beyond it are dropped
    #[arg(long, default_value_t = 100_000)]
    pub buffer_capacity: usize,

    /// Seconds allowed for flushing on shutdown
    #[arg(long, default_value_t = 5)]
    pub grace_secs: u64,

    /// Seconds to wait for a broker to answer at startup
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Random seed (defaults to the wall clock)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop after this many events instead of running until interrupted
    #[arg(long)]
    pub max_events: Option<u64>,
}

/// Validated producer configuration.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub brokers: String,
    pub topic: String,
    pub rate: RateController,
    pub policy: KeyPolicy,
    pub buffer_capacity: usize,
    pub grace: Duration,
    pub connect_timeout: Duration,
    pub seed: Option<u64>,
    pub max_events: Option<u64>,
}

impl ProduceArgs {
    /// Check every setting up front, before any task starts.
    pub fn validate(&self) -> Result<ProducerConfig, ConfigError> {
        let rate = RateController::new(self.rate)?;
        let policy = self.policy.key_policy()?;
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "topic",
                reason: "must not be empty".to_string(),
            });
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid {
                name: "buffer-capacity",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "connect-timeout-secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(ProducerConfig {
            brokers: self.brokers.clone(),
            topic: self.topic.clone(),
            rate,
            policy,
            buffer_capacity: self.buffer_capacity,
            grace: Duration::from_secs(self.grace_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            seed: self.seed,
            max_events: self.max_events,
        })
    }
}
