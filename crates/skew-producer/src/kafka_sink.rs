//! Kafka-backed publish sink.

use crate::error::ProducerError;
use crate::sink::{DeliveryCounts, PublishSink, SendOutcome};
use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use skew_events::PublishedRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Counts delivery reports coming back from librdkafka.
///
/// Failures are counted and logged rather than propagated to the generation
/// loop; the totals are reported when the producer shuts down.
#[derive(Debug, Default)]
pub struct DeliveryReporter {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DeliveryReporter {
    pub fn counts(&self) -> DeliveryCounts {
        DeliveryCounts {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl ClientContext for DeliveryReporter {}

impl ProducerContext for DeliveryReporter {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _: Self::DeliveryOpaque) {
        match delivery_result {
            Ok(_) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err((err, _)) => {
                let previous = self.failed.fetch_add(1, Ordering::Relaxed);
                if previous == 0 {
                    warn!(error = %err, "delivery failed");
                } else {
                    debug!(error = %err, "delivery failed");
                }
            }
        }
    }
}

/// Publishes records through a librdkafka threaded producer.
///
/// `queue.buffering.max.messages` is the transport input buffer: once it is
/// full, sends fail with `QueueFull` and the record is dropped.
pub struct KafkaSink {
    producer: Arc<ThreadedProducer<DeliveryReporter>>,
}

impl KafkaSink {
    /// Create the producer and make sure a broker answers.
    ///
    /// librdkafka connects lazily, so a metadata request bounded by
    /// `connect_timeout` is issued up front; no answer is a connect error.
    pub async fn connect(
        brokers: &str,
        buffer_capacity: usize,
        connect_timeout: Duration,
    ) -> Result<Self, ProducerError> {
        let producer: ThreadedProducer<DeliveryReporter> = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            // Wait for the partition leader only.
            .set("acks", "1")
            // Same hash as `skew_events::partition_for`.
            .set("partitioner", "fnv1a")
            .set("message.timeout.ms", "30000")
            .set("queue.buffering.max.messages", buffer_capacity.to_string())
            .set("linger.ms", "5")
            .create_with_context(DeliveryReporter::default())
            .map_err(ProducerError::Connect)?;
        let producer = Arc::new(producer);

        let check = Arc::clone(&producer);
        let brokers_seen = tokio::task::spawn_blocking(move || {
            check
                .client()
                .fetch_metadata(None, connect_timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| ProducerError::Task(e.to_string()))?
        .map_err(ProducerError::Connect)?;
        debug!(brokers = brokers_seen, "producer connected");

        Ok(Self { producer })
    }
}

#[async_trait]
impl PublishSink for KafkaSink {
    fn try_send(&self, record: PublishedRecord) -> SendOutcome {
        let base = BaseRecord::to(&record.topic)
            .key(record.key.as_bytes())
            .payload(&record.value);

        match self.producer.send(base) {
            Ok(()) => SendOutcome::Accepted,
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), _)) => {
                SendOutcome::Dropped
            }
            Err((err, _)) => {
                warn!(error = %err, key = %record.key, "send rejected, dropping record");
                SendOutcome::Dropped
            }
        }
    }

    async fn flush(&self, grace: Duration) -> Result<(), ProducerError> {
        let producer = Arc::clone(&self.producer);
        let result = tokio::task::spawn_blocking(move || {
            let result = producer.flush(grace);
            (result, producer.in_flight_count())
        })
        .await
        .map_err(|e| ProducerError::Task(e.to_string()))?;

        match result {
            (Ok(()), _) => Ok(()),
            (Err(KafkaError::Flush(RDKafkaErrorCode::OperationTimedOut)), in_flight) => {
                Err(ProducerError::FlushTimeout { in_flight })
            }
            (Err(err), _) => Err(ProducerError::Flush(err)),
        }
    }

    fn delivery_counts(&self) -> Option<DeliveryCounts> {
        Some(self.producer.context().counts())
    }
}
