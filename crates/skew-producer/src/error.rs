//! Error types for the producer.

use skew_events::{ConfigError, WireError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to connect Kafka producer: {0}")]
    Connect(#[source] rdkafka::error::KafkaError),

    #[error(transparent)]
    Encode(#[from] WireError),

    #[error("Flush timed out with {in_flight} records in flight")]
    FlushTimeout { in_flight: i32 },

    #[error("Flush failed: {0}")]
    Flush(#[source] rdkafka::error::KafkaError),

    #[error("Generation task failed: {0}")]
    Task(String),
}
