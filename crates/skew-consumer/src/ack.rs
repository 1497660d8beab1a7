//! Offset acknowledgment.
//!
//! Acknowledging a record asks the group subsystem to advance the partition
//! cursor past it. The cursor itself is owned externally; this crate never
//! reads it back.

use crate::error::{ConsumerError, Result};
use crate::group::SessionContext;
use crate::record::ConsumedRecord;
use rdkafka::consumer::{Consumer, StreamConsumer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub trait Acknowledger: Send + Sync {
    /// Mark `record` as processed.
    fn ack(&self, record: &ConsumedRecord) -> Result<()>;
}

/// Stores offsets on the Kafka consumer; librdkafka's auto-commit picks them
/// up on its next commit and on close.
pub struct KafkaAcknowledger {
    consumer: Arc<StreamConsumer<SessionContext>>,
}

impl KafkaAcknowledger {
    pub fn new(consumer: Arc<StreamConsumer<SessionContext>>) -> Self {
        Self { consumer }
    }
}

impl Acknowledger for KafkaAcknowledger {
    fn ack(&self, record: &ConsumedRecord) -> Result<()> {
        self.consumer
            .store_offset(&record.topic, record.partition, record.offset)
            .map_err(|e| ConsumerError::Ack {
                partition: record.partition,
                offset: record.offset,
                reason: e.to_string(),
            })
    }
}

/// Records acknowledgments in memory, in the order they happen.
#[derive(Debug, Default)]
pub struct MemoryAcknowledger {
    acked: Mutex<Vec<(i32, i64)>>,
}

impl MemoryAcknowledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(partition, offset)` acknowledged so far.
    pub fn acknowledged(&self) -> Vec<(i32, i64)> {
        self.acked
            .lock()
            .map(|acked| acked.clone())
            .unwrap_or_default()
    }

    /// Acknowledgment count per partition.
    pub fn counts(&self) -> HashMap<i32, u64> {
        let mut counts = HashMap::new();
        for (partition, _) in self.acknowledged() {
            *counts.entry(partition).or_default() += 1;
        }
        counts
    }

    /// Highest acknowledged offset per partition; the cursor a broker would hold.
    pub fn committed(&self) -> HashMap<i32, i64> {
        let mut committed: HashMap<i32, i64> = HashMap::new();
        for (partition, offset) in self.acknowledged() {
            let entry = committed.entry(partition).or_insert(offset);
            *entry = (*entry).max(offset);
        }
        committed
    }
}

impl Acknowledger for MemoryAcknowledger {
    fn ack(&self, record: &ConsumedRecord) -> Result<()> {
        let mut acked = self.acked.lock().map_err(|e| ConsumerError::Ack {
            partition: record.partition,
            offset: record.offset,
            reason: e.to_string(),
        })?;
        acked.push((record.partition, record.offset));
        Ok(())
    }
}
