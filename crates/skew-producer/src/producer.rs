//! Producer lifecycle: start the generation task, wait for it, flush.

use crate::args::ProducerConfig;
use crate::error::ProducerError;
use crate::generation::{Generation, GenerationStats};
use crate::sink::{DeliveryCounts, PublishSink};
use skew_events::EventFactory;
use skew_lifecycle::{Lifecycle, ShutdownOutcome};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Summary of a producer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerReport {
    pub stats: GenerationStats,
    pub delivery: Option<DeliveryCounts>,
    /// Whether every accepted record was flushed within the grace period.
    pub flushed: bool,
}

pub struct Producer<S: ?Sized> {
    config: ProducerConfig,
    sink: Arc<S>,
}

impl<S> Producer<S>
where
    S: PublishSink + ?Sized + 'static,
{
    pub fn new(config: ProducerConfig, sink: impl Into<Arc<S>>) -> Self {
        Self {
            config,
            sink: sink.into(),
        }
    }

    /// Generate until shutdown (or the event budget runs out), then flush
    /// within the grace period. A flush timeout is logged, not returned.
    pub async fn run(self, lifecycle: &Lifecycle) -> Result<ProducerReport, ProducerError> {
        let config = self.config;
        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            rate = config.rate.rate(),
            policy = config.policy.name(),
            vip_percent = config.policy.vip_percent(),
            shards = config.policy.shard_count(),
            buffer_capacity = config.buffer_capacity,
            "producer started"
        );

        let factory = match config.seed {
            Some(seed) => EventFactory::seeded(seed),
            None => EventFactory::from_clock(),
        };
        let generation = Generation::new(config.topic.clone(), config.policy, config.rate, factory)
            .with_max_events(config.max_events);

        let stats = tokio::spawn(generation.run(Arc::clone(&self.sink), lifecycle.token()))
            .await
            .map_err(|e| ProducerError::Task(e.to_string()))??;

        info!(
            ticks = stats.ticks,
            accepted = stats.accepted,
            dropped = stats.dropped,
            "generation stopped"
        );

        let flushed = match lifecycle
            .drain("producer flush", self.sink.flush(lifecycle.grace()))
            .await
        {
            ShutdownOutcome::Clean(Ok(())) => {
                info!("producer closed cleanly");
                true
            }
            ShutdownOutcome::Clean(Err(ProducerError::FlushTimeout { in_flight })) => {
                error!(in_flight, "producer close timed out");
                false
            }
            ShutdownOutcome::Clean(Err(e)) => {
                warn!(error = %e, "producer flush failed");
                false
            }
            ShutdownOutcome::TimedOut(grace) => {
                error!(grace_ms = grace.as_millis() as u64, "producer close timed out");
                false
            }
        };

        let delivery = self.sink.delivery_counts();
        if let Some(counts) = delivery {
            info!(
                delivered = counts.delivered,
                failed = counts.failed,
                "delivery reports"
            );
        }

        Ok(ProducerReport {
            stats,
            delivery,
            flushed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{PolicyArgs, PolicyKind, ProduceArgs};
    use crate::sink::ChannelSink;
    use std::time::Duration;

    fn config(max_events: Option<u64>) -> ProducerConfig {
        ProduceArgs {
            brokers: "localhost:29092".to_string(),
            topic: "game-events".to_string(),
            rate: 1000,
            policy: PolicyArgs {
                policy: PolicyKind::Sharded,
                skew_percent: 95,
                shards: 16,
                vip_weight_percent: 95,
            },
            buffer_capacity: 16,
            grace_secs: 1,
            connect_timeout_secs: 10,
            seed: Some(42),
            max_events,
        }
        .validate()
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_run_flushes() {
        let (sink, mut rx) = ChannelSink::new(256);
        let reader = tokio::spawn(async move {
            let mut n = 0u64;
            while rx.recv().await.is_some() {
                n += 1;
            }
            n
        });

        let lifecycle = Lifecycle::new(Duration::from_secs(1));
        let report = Producer::<ChannelSink>::new(config(Some(100)), sink)
            .run(&lifecycle)
            .await
            .unwrap();

        assert_eq!(report.stats.accepted, 100);
        assert!(report.flushed);
        assert_eq!(report.delivery, None);
        assert_eq!(reader.await.unwrap(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_with_stuck_transport_times_out() {
        // Nobody reads: the buffer fills, later sends drop, flush never drains.
        let (sink, _rx) = ChannelSink::new(8);
        let lifecycle = Lifecycle::new(Duration::from_secs(1));
        let trigger = lifecycle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.shutdown("test");
        });

        let started = tokio::time::Instant::now();
        let report = Producer::<ChannelSink>::new(config(None), sink)
            .run(&lifecycle)
            .await
            .unwrap();

        assert!(!report.flushed);
        assert_eq!(report.stats.accepted, 8);
        assert!(report.stats.dropped > 0);
        assert!(started.elapsed() < Duration::from_millis(1_200));
    }
}
