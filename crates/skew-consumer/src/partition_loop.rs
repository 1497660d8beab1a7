//! The per-partition consumption loop.
//!
//! ```text
//! Idle ──first record──▶ Active ──shutdown / feed closed──▶ Draining ──▶ Closed
//!   │                      │
//!   └──────── fault ───────┴──────────────────────────────────────────▶ Closed
//! ```
//!
//! Records arrive in offset order (the partition assignment guarantees it).
//! Each record gets its simulated work, is sampled for the skew log, and is
//! acknowledged only after the work has finished. A redelivered record is
//! processed and acknowledged again; the loop keeps no per-key state, so
//! duplicates cannot corrupt it. Business-level idempotence is the caller's
//! concern.

use crate::ack::Acknowledger;
use crate::error::Result;
use crate::record::ConsumedRecord;
use skew_lifecycle::CancellationToken;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Ordered records for one partition. An `Err` item is a fatal receive fault.
pub type RecordFeed = mpsc::Receiver<Result<ConsumedRecord>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Active,
    Draining,
    Closed,
}

/// Counters for one partition session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSummary {
    pub partition: i32,
    pub processed: u64,
    /// Records that hit the sampling cadence and were logged.
    pub sampled: u64,
    /// Records whose offset did not advance past the previous one.
    pub redelivered: u64,
    pub ack_failures: u64,
    pub last_offset: Option<i64>,
}

pub struct PartitionLoop<A: ?Sized> {
    partition: i32,
    work: Duration,
    sample_every: NonZeroU64,
    acker: Arc<A>,
    state: LoopState,
    summary: PartitionSummary,
}

impl<A> PartitionLoop<A>
where
    A: Acknowledger + ?Sized,
{
    pub fn new(partition: i32, work: Duration, sample_every: NonZeroU64, acker: Arc<A>) -> Self {
        Self {
            partition,
            work,
            sample_every,
            acker,
            state: LoopState::Idle,
            summary: PartitionSummary {
                partition,
                ..Default::default()
            },
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Consume `feed` until it closes, `token` is cancelled, or a fault
    /// arrives. A record already being worked on is always finished and
    /// acknowledged; records still buffered at cancellation are left
    /// unacknowledged for redelivery.
    pub async fn run(
        mut self,
        mut feed: RecordFeed,
        token: CancellationToken,
    ) -> Result<PartitionSummary> {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                next = feed.recv() => next,
            };

            match next {
                Some(Ok(record)) => {
                    if self.state == LoopState::Idle {
                        self.transition(LoopState::Active);
                    }
                    self.process(record).await;
                }
                Some(Err(fault)) => {
                    error!(partition = self.partition, error = %fault, "consume error");
                    self.transition(LoopState::Closed);
                    return Err(fault);
                }
                None => break,
            }
        }

        self.transition(LoopState::Draining);
        self.transition(LoopState::Closed);
        debug!(
            partition = self.partition,
            processed = self.summary.processed,
            "partition loop closed"
        );
        Ok(self.summary)
    }

    async fn process(&mut self, record: ConsumedRecord) {
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }

        if record.offset >= 0 && (record.offset as u64) % self.sample_every.get() == 0 {
            self.summary.sampled += 1;
            info!(
                partition = record.partition,
                offset = record.offset,
                key = %record.key_str(),
                "message"
            );
        }

        if let Some(last) = self.summary.last_offset {
            if record.offset <= last {
                self.summary.redelivered += 1;
                debug!(
                    partition = record.partition,
                    offset = record.offset,
                    last_offset = last,
                    "redelivered record"
                );
            }
        }

        if let Err(e) = self.acker.ack(&record) {
            self.summary.ack_failures += 1;
            warn!(error = %e, "acknowledgment failed, record will be redelivered");
        }

        self.summary.processed += 1;
        self.summary.last_offset = Some(
            self.summary
                .last_offset
                .map_or(record.offset, |last| last.max(record.offset)),
        );
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!(partition = self.partition, from = ?self.state, to = ?next, "partition state");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::MemoryAcknowledger;
    use crate::error::ConsumerError;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn record(partition: i32, offset: i64) -> ConsumedRecord {
        ConsumedRecord {
            topic: "game-events".to_string(),
            partition,
            offset,
            key: Some(b"player-000001".to_vec()),
            payload: None,
            timestamp: None,
        }
    }

    fn every(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    async fn feed(records: impl IntoIterator<Item = ConsumedRecord>) -> RecordFeed {
        let records: Vec<_> = records.into_iter().collect();
        let (tx, rx) = mpsc::channel(records.len().max(1));
        for r in records {
            tx.send(Ok(r)).await.unwrap();
        }
        rx
    }

    /// Remembers when each acknowledgment happened.
    #[derive(Default)]
    struct TimedAcknowledger {
        acks: Mutex<Vec<(i64, Instant)>>,
    }

    impl Acknowledger for TimedAcknowledger {
        fn ack(&self, record: &ConsumedRecord) -> Result<()> {
            self.acks
                .lock()
                .unwrap()
                .push((record.offset, Instant::now()));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offsets_processed_in_order_and_acked_after_work() {
        let acker = Arc::new(TimedAcknowledger::default());
        let work = Duration::from_millis(10);
        let started = Instant::now();

        let summary = PartitionLoop::new(3, work, every(500), Arc::clone(&acker))
            .run(
                feed((0..20).map(|o| record(3, o))).await,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.processed, 20);
        assert_eq!(summary.last_offset, Some(19));
        assert_eq!(summary.redelivered, 0);

        let acks = acker.acks.lock().unwrap();
        let offsets: Vec<i64> = acks.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, (0..20).collect::<Vec<_>>());
        for (i, (_, at)) in acks.iter().enumerate() {
            // Offset N is acknowledged only once N+1 work slots have elapsed.
            assert!(*at - started >= work * (i as u32 + 1));
        }
    }

    #[tokio::test]
    async fn test_sampling_cadence() {
        let acker = Arc::new(MemoryAcknowledger::new());
        let summary = tokio_test::assert_ok!(
            PartitionLoop::new(0, Duration::ZERO, every(500), acker)
                .run(
                    feed((0..1_001).map(|o| record(0, o))).await,
                    CancellationToken::new(),
                )
                .await
        );
        // Offsets 0, 500 and 1000.
        assert_eq!(summary.sampled, 3);
    }

    #[tokio::test]
    async fn test_redelivery_acknowledged_twice() {
        let acker = Arc::new(MemoryAcknowledger::new());
        let summary = PartitionLoop::new(1, Duration::ZERO, every(500), Arc::clone(&acker))
            .run(
                feed([record(1, 0), record(1, 1), record(1, 1), record(1, 2)]).await,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.processed, 4);
        assert_eq!(summary.redelivered, 1);
        assert_eq!(summary.last_offset, Some(2));
        assert_eq!(acker.acknowledged(), vec![(1, 0), (1, 1), (1, 1), (1, 2)]);
        assert_eq!(acker.committed().get(&1), Some(&2));
    }

    #[tokio::test]
    async fn test_fault_terminates_loop() {
        let acker = Arc::new(MemoryAcknowledger::new());
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(record(2, 0))).await.unwrap();
        tx.send(Err(ConsumerError::ConsumeFault {
            partition: Some(2),
            reason: "broker went away".to_string(),
        }))
        .await
        .unwrap();
        tx.send(Ok(record(2, 1))).await.unwrap();

        let result = PartitionLoop::new(2, Duration::ZERO, every(500), Arc::clone(&acker))
            .run(rx, CancellationToken::new())
            .await;

        assert!(result.unwrap_err().is_consume_fault());
        // The record after the fault was never processed.
        assert_eq!(acker.acknowledged(), vec![(2, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_finishes_in_flight_record_only() {
        let acker = Arc::new(MemoryAcknowledger::new());
        let token = CancellationToken::new();
        let handle = tokio::spawn(
            PartitionLoop::new(
                0,
                Duration::from_millis(100),
                every(500),
                Arc::clone(&acker),
            )
            .run(feed((0..10).map(|o| record(0, o))).await, token.clone()),
        );

        // Cancel while offset 2 is being worked on.
        tokio::time::sleep(Duration::from_millis(250)).await;
        token.cancel();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(acker.acknowledged(), vec![(0, 0), (0, 1), (0, 2)]);
    }

    #[tokio::test]
    async fn test_state_starts_idle() {
        let partition_loop =
            PartitionLoop::new(0, Duration::ZERO, every(1), Arc::new(MemoryAcknowledger::new()));
        assert_eq!(partition_loop.state(), LoopState::Idle);
    }
}
