use skew_events::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to connect Kafka consumer: {0}")]
    Connect(#[source] rdkafka::error::KafkaError),

    #[error("Failed to subscribe to topic '{topic}': {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: rdkafka::error::KafkaError,
    },

    #[error("Consume fault (partition {partition:?}): {reason}")]
    ConsumeFault {
        partition: Option<i32>,
        reason: String,
    },

    #[error("Failed to acknowledge partition {partition} offset {offset}: {reason}")]
    Ack {
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("Partition task failed: {0}")]
    Task(String),
}

impl ConsumerError {
    pub fn is_consume_fault(&self) -> bool {
        matches!(self, ConsumerError::ConsumeFault { .. })
    }
}

pub type Result<T> = std::result::Result<T, ConsumerError>;
