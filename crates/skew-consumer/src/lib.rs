//! Consumer side of the partition-skew tooling.
//!
//! Features:
//!
//! - One [`PartitionLoop`] task per assigned partition, processing records in
//!   offset order and acknowledging each one only after its simulated work
//! - Sampled `(partition, offset, key)` log lines: a hot partition reaches the
//!   next sampled offset far sooner than its siblings, which makes skew visible
//! - A Kafka consumer-group session that reads every assigned partition from
//!   its own partition queue, follows rebalances, and stores offsets for
//!   auto-commit

pub mod ack;
pub mod args;
pub mod dispatch;
pub mod error;
pub mod group;
pub mod partition_loop;
pub mod record;

// Re-export main types for easy access
pub use ack::{Acknowledger, KafkaAcknowledger, MemoryAcknowledger};
pub use args::{ConsumeArgs, ConsumerConfig};
pub use error::{ConsumerError, Result};
pub use dispatch::{log_source, DispatchSettings, Dispatcher, SessionReport};
pub use group::{run_consumer, AssignmentEvent, KafkaConsumerGroup, SessionContext};
pub use partition_loop::{LoopState, PartitionLoop, PartitionSummary, RecordFeed};
pub use record::ConsumedRecord;
