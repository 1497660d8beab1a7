//! CLI argument definitions for the consumer.

use clap::Args;
use skew_events::ConfigError;
use std::num::NonZeroU64;
use std::time::Duration;

/// Arguments for the `consume` command.
#[derive(Args, Clone, Debug)]
pub struct ConsumeArgs {
    /// Kafka brokers (comma-separated, e.g., "localhost:29092")
    #[arg(long, short = 'b', env = "KAFKA_BROKERS", default_value = "localhost:29092")]
    pub brokers: String,

    /// Topic to consume from
    #[arg(long, short = 't')]
    pub topic: String,

    /// Consumer group ID
    #[arg(long, short = 'g')]
    pub group: String,

    /// Milliseconds of simulated work per record
    #[arg(long, short = 'w', default_value_t = 2, allow_negative_numbers = true)]
    pub work_ms: i64,

    /// Log every Nth offset of each partition
    #[arg(long, default_value_t = 500, allow_negative_numbers = true)]
    pub sample_every: i64,

    /// Records buffered per partition task before its feed waits
    #[arg(long, default_value_t = 256)]
    pub partition_buffer: usize,

    /// Where to start when the group has no committed offset ("earliest" or "latest")
    #[arg(long, default_value = "latest")]
    pub offset_reset: String,

    /// Session timeout in milliseconds
    #[arg(long, default_value = "10000")]
    pub session_timeout_ms: String,

    /// Seconds allowed for draining partitions on shutdown
    #[arg(long, default_value_t = 5)]
    pub grace_secs: u64,

    /// Seconds to wait for a broker to answer at startup
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// New sessions to start after a consume fault before giving up
    #[arg(long, default_value_t = 0)]
    pub max_session_restarts: u32,
}

/// Validated consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub work: Duration,
    pub sample_every: NonZeroU64,
    pub partition_buffer: usize,
    pub auto_offset_reset: String,
    pub session_timeout_ms: String,
    pub grace: Duration,
    pub connect_timeout: Duration,
    pub max_session_restarts: u32,
}

impl ConsumeArgs {
    /// Check every setting up front, before any task starts.
    pub fn validate(&self) -> Result<ConsumerConfig, ConfigError> {
        let sample_every = u64::try_from(self.sample_every)
            .ok()
            .and_then(NonZeroU64::new)
            .ok_or(ConfigError::InvalidSampleInterval(self.sample_every))?;
        let work_ms = u64::try_from(self.work_ms).map_err(|_| ConfigError::Invalid {
            name: "work-ms",
            reason: format!("{} is negative", self.work_ms),
        })?;
        if self.partition_buffer == 0 {
            return Err(ConfigError::Invalid {
                name: "partition-buffer",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "connect-timeout-secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !matches!(self.offset_reset.as_str(), "earliest" | "latest") {
            return Err(ConfigError::Invalid {
                name: "offset-reset",
                reason: format!("'{}' is neither earliest nor latest", self.offset_reset),
            });
        }
        for (name, value) in [("topic", &self.topic), ("group", &self.group)] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "must not be empty".to_string(),
                });
            }
        }

        Ok(ConsumerConfig {
            brokers: self.brokers.clone(),
            topic: self.topic.clone(),
            group_id: self.group.clone(),
            work: Duration::from_millis(work_ms),
            sample_every,
            partition_buffer: self.partition_buffer,
            auto_offset_reset: self.offset_reset.clone(),
            session_timeout_ms: self.session_timeout_ms.clone(),
            grace: Duration::from_secs(self.grace_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_session_restarts: self.max_session_restarts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ConsumeArgs,
    }

    fn parse(extra: &[&str]) -> ConsumeArgs {
        let mut argv = vec!["consume", "--topic", "game-events", "--group", "skew"];
        argv.extend_from_slice(extra);
        TestCli::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).validate().unwrap();
        assert_eq!(config.work, Duration::from_millis(2));
        assert_eq!(config.sample_every.get(), 500);
        assert_eq!(config.auto_offset_reset, "latest");
        assert_eq!(config.max_session_restarts, 0);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            parse(&["--sample-every", "0"]).validate().unwrap_err(),
            ConfigError::InvalidSampleInterval(0)
        );
        assert!(parse(&["--work-ms", "-1"]).validate().is_err());
        assert!(parse(&["--offset-reset", "middle"]).validate().is_err());
        assert!(parse(&["--partition-buffer", "0"]).validate().is_err());
        assert!(parse(&["--connect-timeout-secs", "0"]).validate().is_err());
    }
}
