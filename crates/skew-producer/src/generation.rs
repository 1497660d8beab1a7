//! The generation loop: tick, build, key, offer.

use crate::error::ProducerError;
use crate::rate::RateController;
use crate::sink::{PublishSink, SendOutcome};
use skew_events::{EventFactory, KeyPolicy, PublishedRecord};
use skew_lifecycle::CancellationToken;
use std::sync::Arc;
use tracing::debug;

/// Counters kept by the generation loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationStats {
    /// Rate controller ticks consumed.
    pub ticks: u64,
    /// Records handed to the transport.
    pub accepted: u64,
    /// Records discarded because the transport buffer was full.
    pub dropped: u64,
}

impl GenerationStats {
    /// Fraction of generated records that were dropped.
    pub fn drop_ratio(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.dropped as f64 / self.ticks as f64
        }
    }
}

/// Everything the single generation task owns.
pub struct Generation {
    topic: String,
    policy: KeyPolicy,
    rate: RateController,
    factory: EventFactory,
    max_events: Option<u64>,
}

impl Generation {
    pub fn new(
        topic: impl Into<String>,
        policy: KeyPolicy,
        rate: RateController,
        factory: EventFactory,
    ) -> Self {
        Self {
            topic: topic.into(),
            policy,
            rate,
            factory,
            max_events: None,
        }
    }

    /// Stop after `max_events` ticks instead of running until cancelled.
    pub fn with_max_events(mut self, max_events: Option<u64>) -> Self {
        self.max_events = max_events;
        self
    }

    /// Run until `token` is cancelled or the event budget is spent.
    ///
    /// The event id is the count of accepted records, so ids seen downstream
    /// are contiguous.
    pub async fn run<S>(
        mut self,
        sink: Arc<S>,
        token: CancellationToken,
    ) -> Result<GenerationStats, ProducerError>
    where
        S: PublishSink + ?Sized,
    {
        let mut stats = GenerationStats::default();
        let mut ticker = self.rate.ticker();

        while self.max_events.map_or(true, |max| stats.ticks < max) {
            if ticker.tick(&token).await.is_none() {
                debug!("generation cancelled");
                break;
            }
            stats.ticks += 1;

            let draw = self.factory.draw_key(&self.policy);
            let event = self.factory.next(stats.accepted, draw.player_id);
            let record = PublishedRecord::new(self.topic.as_str(), draw.routing_key, &event)?;

            match sink.try_send(record) {
                SendOutcome::Accepted => stats.accepted += 1,
                SendOutcome::Dropped => stats.dropped += 1,
            }
        }

        Ok(stats)
    }
}
