//! Configuration errors shared by every stage of the pipeline.

use thiserror::Error;

/// Rejected configuration. Raised before any task starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid rate: {0} events/sec (must be greater than zero)")]
    InvalidRate(i64),

    #[error("Invalid shard count: {0} (must be greater than zero)")]
    InvalidShardCount(i64),

    #[error("Invalid skew percent: {0} (must be between 0 and 100)")]
    InvalidSkewPercent(i64),

    #[error("Invalid VIP weight percent: {0} (must be between 0 and 100)")]
    InvalidVipWeight(i64),

    #[error("Invalid sampling interval: {0} (must be greater than zero)")]
    InvalidSampleInterval(i64),

    #[error("Invalid partition count: {0} (must be greater than zero)")]
    InvalidPartitionCount(i64),

    #[error("Invalid setting '{name}': {reason}")]
    Invalid { name: &'static str, reason: String },
}
