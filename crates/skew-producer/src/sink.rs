//! Non-blocking publish sinks.
//!
//! [`PublishSink::try_send`] either hands the record to the transport or
//! drops it on the spot. There is no queueing on our side and no
//! retry-then-drop: a full transport buffer is an immediate
//! [`SendOutcome::Dropped`].

use crate::error::ProducerError;
use async_trait::async_trait;
use skew_events::PublishedRecord;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Result of a single non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Ownership moved to the transport; delivery happens asynchronously.
    Accepted,
    /// The transport buffer was saturated; the record was discarded.
    Dropped,
}

/// Delivery reports observed by a sink, when the transport surfaces them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryCounts {
    pub delivered: u64,
    pub failed: u64,
}

#[async_trait]
pub trait PublishSink: Send + Sync {
    /// Offer a record without blocking.
    fn try_send(&self, record: PublishedRecord) -> SendOutcome;

    /// Push accepted records out, giving up after `grace`.
    async fn flush(&self, grace: Duration) -> Result<(), ProducerError>;

    /// Delivery outcomes reported so far.
    fn delivery_counts(&self) -> Option<DeliveryCounts> {
        None
    }
}

/// Sink backed by a bounded in-memory channel.
///
/// Stands in for the transport in `simulate` runs and in tests; the
/// channel capacity plays the role of the transport input buffer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<PublishedRecord>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PublishedRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PublishSink for ChannelSink {
    fn try_send(&self, record: PublishedRecord) -> SendOutcome {
        match self.tx.try_send(record) {
            Ok(()) => SendOutcome::Accepted,
            Err(TrySendError::Full(_)) => SendOutcome::Dropped,
            Err(TrySendError::Closed(_)) => {
                debug!("Channel sink closed, dropping record");
                SendOutcome::Dropped
            }
        }
    }

    async fn flush(&self, grace: Duration) -> Result<(), ProducerError> {
        // Drained once every permit is back or the reader has gone away.
        let drained = async {
            while !self.tx.is_closed() && self.tx.capacity() < self.tx.max_capacity() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(grace, drained).await.map_err(|_| {
            let in_flight = self.tx.max_capacity() - self.tx.capacity();
            ProducerError::FlushTimeout {
                in_flight: i32::try_from(in_flight).unwrap_or(i32::MAX),
            }
        })
    }
}
