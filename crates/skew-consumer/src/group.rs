//! Kafka consumer-group sessions.
//!
//! Each assigned partition is read from its own librdkafka partition queue,
//! so a hot partition backs up only its own queue. The group queue is still
//! polled: it serves rebalances and delivers the odd record fetched before
//! its partition queue was split off.

use crate::ack::KafkaAcknowledger;
use crate::args::ConsumerConfig;
use crate::dispatch::{DispatchSettings, Dispatcher, SessionReport};
use crate::error::{ConsumerError, Result};
use crate::record::ConsumedRecord;
use futures::Stream;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::stream_consumer::StreamPartitionQueue;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::TopicPartitionList;
use skew_lifecycle::{Lifecycle, ShutdownOutcome};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Partition ownership changes reported by the group protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentEvent {
    Assigned(Vec<i32>),
    Revoked(Vec<i32>),
}

/// Consumer context that forwards rebalances to the session loop.
///
/// Revocations are reported before the partitions are given up, and
/// assignments after they are taken, so the session never runs a loop for a
/// partition this member does not own.
pub struct SessionContext {
    topic: String,
    events: mpsc::UnboundedSender<AssignmentEvent>,
}

impl SessionContext {
    pub fn new(topic: impl Into<String>, events: mpsc::UnboundedSender<AssignmentEvent>) -> Self {
        Self {
            topic: topic.into(),
            events,
        }
    }

    fn report(&self, event: AssignmentEvent) {
        // The session may already be gone while the consumer closes.
        let _ = self.events.send(event);
    }
}

impl ClientContext for SessionContext {}

impl ConsumerContext for SessionContext {
    fn pre_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                let partitions = topic_partitions(tpl, &self.topic);
                info!(?partitions, "partitions revoked");
                self.report(AssignmentEvent::Revoked(partitions));
            }
            Rebalance::Error(e) => warn!(error = %e, "rebalance failed"),
            Rebalance::Assign(_) => {}
        }
    }

    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        if let Rebalance::Assign(tpl) = rebalance {
            let partitions = topic_partitions(tpl, &self.topic);
            info!(?partitions, "partitions assigned");
            self.report(AssignmentEvent::Assigned(partitions));
        }
    }
}

/// Partitions of `topic` in `tpl`, in list order.
pub fn topic_partitions(tpl: &TopicPartitionList, topic: &str) -> Vec<i32> {
    tpl.elements_for_topic(topic)
        .iter()
        .map(|elem| elem.partition())
        .collect()
}

type GroupConsumer = StreamConsumer<SessionContext>;

fn partition_source(
    queue: StreamPartitionQueue<SessionContext>,
) -> impl Stream<Item = Result<ConsumedRecord>> + Send + 'static {
    futures::stream::unfold(queue, |queue| async move {
        let item = match queue.recv().await {
            Ok(msg) => Ok(ConsumedRecord::from_message(&msg)),
            Err(e) => Err(ConsumerError::ConsumeFault {
                partition: None,
                reason: e.to_string(),
            }),
        };
        Some((item, queue))
    })
}

/// A member of the consumer group, subscribed to the configured topic.
pub struct KafkaConsumerGroup {
    consumer: Arc<GroupConsumer>,
    events: mpsc::UnboundedReceiver<AssignmentEvent>,
    config: ConsumerConfig,
}

impl KafkaConsumerGroup {
    /// Create the consumer, check that a broker answers, and subscribe.
    pub async fn connect(config: &ConsumerConfig) -> Result<Self> {
        let (events_tx, events) = mpsc::unbounded_channel();
        let context = SessionContext::new(config.topic.clone(), events_tx);
        let consumer: GroupConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            // Range keeps the same partition with the same member, which
            // makes skew easy to spot.
            .set("partition.assignment.strategy", "range")
            // Offsets are stored per record after its work, then auto-committed.
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", &config.session_timeout_ms)
            .set("enable.partition.eof", "false")
            .create_with_context(context)
            .map_err(ConsumerError::Connect)?;
        let consumer = Arc::new(consumer);

        // librdkafka connects lazily; a bounded metadata request surfaces an
        // unreachable cluster now.
        let client = Arc::clone(&consumer);
        let timeout = config.connect_timeout;
        let brokers_seen = tokio::task::spawn_blocking(move || {
            client
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| ConsumerError::Task(e.to_string()))?
        .map_err(ConsumerError::Connect)?;
        debug!(brokers = brokers_seen, "consumer connected");

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|source| ConsumerError::Subscribe {
                topic: config.topic.clone(),
                source,
            })?;

        Ok(Self {
            consumer,
            events,
            config: config.clone(),
        })
    }

    /// Consume until shutdown or a receive fault.
    ///
    /// Returns the session report on shutdown, or the fault that ended the
    /// session. The partition loops are drained within the grace period in
    /// both cases.
    pub async fn run_session(&mut self, lifecycle: &Lifecycle) -> Result<SessionReport> {
        let session = lifecycle.token().child_token();
        let settings = DispatchSettings {
            work: self.config.work,
            sample_every: self.config.sample_every,
            partition_buffer: self.config.partition_buffer,
        };
        let acker = Arc::new(KafkaAcknowledger::new(Arc::clone(&self.consumer)));
        let mut dispatcher = Dispatcher::new(settings, acker, session.clone());
        let mut faults = dispatcher
            .take_faults()
            .ok_or_else(|| ConsumerError::Task("fault channel already taken".to_string()))?;

        let Self {
            consumer,
            events,
            config,
        } = self;

        let fault = loop {
            tokio::select! {
                biased;
                _ = session.cancelled() => break None,
                Some(fault) = faults.recv() => break Some(fault),
                Some(event) = events.recv() => {
                    apply_assignment(event, consumer, &config.topic, &mut dispatcher);
                }
                received = consumer.recv() => match received {
                    Ok(msg) => {
                        let record = ConsumedRecord::from_message(&msg);
                        drop(msg);
                        // A rebalance served by this poll may not be applied yet.
                        while let Ok(event) = events.try_recv() {
                            apply_assignment(event, consumer, &config.topic, &mut dispatcher);
                        }
                        debug!(
                            partition = record.partition,
                            offset = record.offset,
                            "record on the group queue"
                        );
                        dispatcher.dispatch(record).await;
                    }
                    Err(e) => {
                        break Some(ConsumerError::ConsumeFault {
                            partition: None,
                            reason: e.to_string(),
                        });
                    }
                },
            }
        };

        if let Some(fault) = &fault {
            error!(error = %fault, "consume error");
            dispatcher.fail(&fault.to_string());
        }

        let report = dispatcher.close(lifecycle).await;
        match fault {
            Some(fault) => Err(fault),
            None => Ok(report),
        }
    }

    /// Leave the group and commit stored offsets, bounded by the grace period.
    pub async fn close(self, lifecycle: &Lifecycle) {
        let Self {
            consumer, events, ..
        } = self;
        drop(events);
        let closing = tokio::task::spawn_blocking(move || {
            consumer.unsubscribe();
            drop(consumer);
        });
        match lifecycle.drain("consumer close", closing).await {
            ShutdownOutcome::Clean(Ok(())) => info!("consumer closed"),
            ShutdownOutcome::Clean(Err(e)) => error!(error = %e, "failed to close consumer"),
            ShutdownOutcome::TimedOut(_) => error!("consumer close timed out"),
        }
    }
}

fn apply_assignment(
    event: AssignmentEvent,
    consumer: &Arc<GroupConsumer>,
    topic: &str,
    dispatcher: &mut Dispatcher<KafkaAcknowledger>,
) {
    match event {
        AssignmentEvent::Assigned(partitions) => {
            for partition in partitions {
                match consumer.split_partition_queue(topic, partition) {
                    Some(queue) => dispatcher.assign(partition, partition_source(queue)),
                    None => {
                        warn!(partition, "no partition queue, reading from the group queue");
                        dispatcher.assign(partition, futures::stream::pending());
                    }
                }
            }
        }
        AssignmentEvent::Revoked(partitions) => {
            for partition in partitions {
                dispatcher.revoke(partition);
            }
        }
    }
}

/// Run consumer sessions until shutdown.
///
/// A consume fault ends the current session. Up to `max_session_restarts`
/// fresh sessions are started after faults; past that the fault is returned.
pub async fn run_consumer(config: &ConsumerConfig, lifecycle: &Lifecycle) -> Result<()> {
    info!(
        brokers = %config.brokers,
        group = %config.group_id,
        topic = %config.topic,
        work_ms = config.work.as_millis() as u64,
        sample_every = config.sample_every.get(),
        "consumer started"
    );

    let mut restarts = 0;
    loop {
        let mut group = KafkaConsumerGroup::connect(config).await?;
        let result = group.run_session(lifecycle).await;
        group.close(lifecycle).await;

        match result {
            Ok(report) => {
                info!(
                    partitions = report.partitions.len(),
                    processed = report.processed(),
                    timed_out = report.timed_out,
                    tasks_spawned = report.tasks.spawned,
                    tasks_aborted = report.tasks.aborted,
                    "consumer session ended"
                );
                return Ok(());
            }
            Err(e)
                if e.is_consume_fault()
                    && restarts < config.max_session_restarts
                    && !lifecycle.is_shutting_down() =>
            {
                restarts += 1;
                warn!(restarts, error = %e, "starting new consumer session");
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment() -> TopicPartitionList {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition("game-events", 4);
        tpl.add_partition("other-topic", 1);
        tpl.add_partition("game-events", 2);
        tpl
    }

    #[test]
    fn test_topic_partitions_filters_by_topic() {
        assert_eq!(topic_partitions(&assignment(), "game-events"), vec![4, 2]);
        assert!(topic_partitions(&assignment(), "missing").is_empty());
    }

    #[test]
    fn test_revoke_reported_before_rebalance() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let context = SessionContext::new("game-events", tx);
        let tpl = assignment();

        context.pre_rebalance(&Rebalance::Revoke(&tpl));
        assert_eq!(rx.try_recv().unwrap(), AssignmentEvent::Revoked(vec![4, 2]));

        // Assignments only count once they have been applied.
        context.pre_rebalance(&Rebalance::Assign(&tpl));
        assert!(rx.try_recv().is_err());
        context.post_rebalance(&Rebalance::Assign(&tpl));
        assert_eq!(rx.try_recv().unwrap(), AssignmentEvent::Assigned(vec![4, 2]));
    }

    #[test]
    fn test_rebalance_after_session_ended_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = SessionContext::new("game-events", tx);
        drop(rx);
        context.pre_rebalance(&Rebalance::Revoke(&assignment()));
    }
}
