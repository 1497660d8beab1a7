//! Per-partition fan-out.
//!
//! Every assigned partition gets its own record source and two tasks: a feed
//! task that moves records from the source into a bounded feed, and the
//! [`PartitionLoop`] that works through that feed. A hot partition only
//! ever waits on its own feed, so its siblings keep moving at their own
//! pace.
//!
//! Revoking a partition stops its tasks after the in-flight record; they are
//! joined with everything else when the dispatcher closes.

use crate::ack::Acknowledger;
use crate::error::{ConsumerError, Result};
use crate::partition_loop::{PartitionLoop, PartitionSummary};
use crate::record::ConsumedRecord;
use futures::{Stream, StreamExt};
use skew_lifecycle::{CancellationToken, Lifecycle, TaskTally};
use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-partition loop settings.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub work: Duration,
    pub sample_every: NonZeroU64,
    pub partition_buffer: usize,
}

/// Outcome of one dispatch session.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    /// One entry per partition loop that closed cleanly, ordered by partition.
    pub partitions: Vec<PartitionSummary>,
    /// Partition loops that ended with a fault.
    pub faulted: Vec<i32>,
    /// Whether tasks were still running when the grace period ran out.
    pub timed_out: bool,
    /// How the feed and loop tasks of this session ended.
    pub tasks: TaskTally,
}

impl SessionReport {
    pub fn processed(&self) -> u64 {
        self.partitions.iter().map(|p| p.processed).sum()
    }
}

/// Records for one partition from an unbounded log, such as the in-process
/// partition logs of `simulate`.
pub fn log_source(
    log: mpsc::UnboundedReceiver<Result<ConsumedRecord>>,
) -> impl Stream<Item = Result<ConsumedRecord>> + Send + 'static {
    futures::stream::unfold(log, |mut log| async move {
        log.recv().await.map(|item| (item, log))
    })
}

struct Worker {
    /// Out-of-band writer; `None` once the dispatcher stops taking records.
    tx: Option<mpsc::Sender<Result<ConsumedRecord>>>,
    token: CancellationToken,
    /// Cancelled once the loop task returns.
    done: CancellationToken,
    feed: JoinHandle<()>,
    handle: JoinHandle<Result<PartitionSummary>>,
}

pub struct Dispatcher<A: ?Sized> {
    settings: DispatchSettings,
    acker: Arc<A>,
    token: CancellationToken,
    workers: BTreeMap<i32, Worker>,
    retired: Vec<(i32, Worker)>,
    spawned: usize,
    fault_tx: mpsc::UnboundedSender<ConsumerError>,
    fault_rx: Option<mpsc::UnboundedReceiver<ConsumerError>>,
}

impl<A> Dispatcher<A>
where
    A: Acknowledger + ?Sized + 'static,
{
    /// `token` scopes the session: cancelling it stops every partition loop
    /// after its in-flight record.
    pub fn new(settings: DispatchSettings, acker: Arc<A>, token: CancellationToken) -> Self {
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            acker,
            token,
            workers: BTreeMap::new(),
            retired: Vec::new(),
            spawned: 0,
            fault_tx,
            fault_rx: Some(fault_rx),
        }
    }

    /// Partitions with a running loop.
    pub fn partitions(&self) -> Vec<i32> {
        self.workers.keys().copied().collect()
    }

    /// Receive faults raised by partition sources. Only the first call gets
    /// the receiver.
    pub fn take_faults(&mut self) -> Option<mpsc::UnboundedReceiver<ConsumerError>> {
        self.fault_rx.take()
    }

    /// Start consuming `partition` from `source`. A partition that is already
    /// running is revoked first.
    pub fn assign<S>(&mut self, partition: i32, source: S)
    where
        S: Stream<Item = Result<ConsumedRecord>> + Send + 'static,
    {
        if self.workers.contains_key(&partition) {
            self.revoke(partition);
        }
        debug!(partition, "starting partition loop");

        let token = self.token.child_token();
        let (tx, rx) = mpsc::channel(self.settings.partition_buffer);
        let partition_loop = PartitionLoop::new(
            partition,
            self.settings.work,
            self.settings.sample_every,
            Arc::clone(&self.acker),
        );
        let done = CancellationToken::new();
        let loop_token = token.clone();
        let finished = done.clone().drop_guard();
        let handle = tokio::spawn(async move {
            let _finished = finished;
            partition_loop.run(rx, loop_token).await
        });
        let feed = tokio::spawn(feed_partition(
            partition,
            source,
            tx.clone(),
            token.clone(),
            self.fault_tx.clone(),
        ));
        self.spawned += 2;

        self.workers.insert(
            partition,
            Worker {
                tx: Some(tx),
                token,
                done,
                feed,
                handle,
            },
        );
    }

    /// Stop `partition` after its in-flight record. Buffered records stay
    /// unacknowledged.
    pub fn revoke(&mut self, partition: i32) {
        if let Some(worker) = self.workers.remove(&partition) {
            debug!(partition, "stopping partition loop");
            worker.token.cancel();
            self.retired.push((partition, worker));
        }
    }

    /// Hand a record that arrived outside its partition's source to the
    /// running loop, waiting on that loop's feed only. Returns `false` if no
    /// loop runs for the partition or the session was cancelled.
    pub async fn dispatch(&self, record: ConsumedRecord) -> bool {
        let partition = record.partition;
        let Some((worker, tx)) = self
            .workers
            .get(&partition)
            .and_then(|worker| worker.tx.as_ref().map(|tx| (worker, tx)))
        else {
            warn!(partition, offset = record.offset, "record for unassigned partition");
            return false;
        };

        tokio::select! {
            biased;
            _ = worker.token.cancelled() => false,
            sent = tx.send(Ok(record)) => sent.is_ok(),
        }
    }

    /// Stop taking out-of-band records and wait until every running loop has
    /// worked through its source, or the session is cancelled. Sources must
    /// end for this to return on its own.
    pub async fn settle(&mut self) {
        for worker in self.workers.values_mut() {
            worker.tx = None;
        }
        for worker in self.workers.values() {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return,
                _ = worker.done.cancelled() => {}
            }
        }
    }

    /// Signal a receive-side fault to every loop and cancel the session.
    pub fn fail(&mut self, reason: &str) {
        for (partition, worker) in &self.workers {
            let fault = ConsumerError::ConsumeFault {
                partition: Some(*partition),
                reason: reason.to_string(),
            };
            // A full feed still stops through cancellation below.
            if let Some(tx) = &worker.tx {
                let _ = tx.try_send(Err(fault));
            }
        }
        self.token.cancel();
    }

    /// Wait for every feed and loop within the grace period. Loops end once
    /// their source is exhausted or the session is cancelled.
    pub async fn close(self, lifecycle: &Lifecycle) -> SessionReport {
        let mut partitions = Vec::with_capacity(self.spawned / 2);
        let mut loops = Vec::with_capacity(self.spawned / 2);
        let mut feeds = Vec::with_capacity(self.spawned / 2);
        for (partition, worker) in self.workers.into_iter().chain(self.retired) {
            partitions.push(partition);
            loops.push(worker.handle);
            feeds.push(worker.feed);
            // Dropping the sender leaves the feed task as its only writer.
        }

        let (loops, feeds) = tokio::join!(
            lifecycle.join_tasks("partition loops", loops),
            lifecycle.join_tasks("partition feeds", feeds),
        );

        let mut joined = loops.tally();
        joined.merge(feeds.tally());
        let mut report = SessionReport {
            timed_out: loops.timed_out || feeds.timed_out,
            tasks: TaskTally {
                spawned: self.spawned,
                ..joined
            },
            ..Default::default()
        };

        for (partition, result) in partitions.into_iter().zip(loops.results) {
            match result {
                Ok(Ok(summary)) => report.partitions.push(summary),
                Ok(Err(e)) => {
                    debug!(partition, error = %e, "partition loop faulted");
                    report.faulted.push(partition);
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    error!(partition, error = %e, "partition task panicked");
                    report.faulted.push(partition);
                }
            }
        }
        report.partitions.sort_by_key(|summary| summary.partition);
        report.faulted.sort_unstable();

        for summary in &report.partitions {
            info!(
                partition = summary.partition,
                processed = summary.processed,
                last_offset = summary.last_offset,
                redelivered = summary.redelivered,
                "partition summary"
            );
        }
        report
    }
}

/// Move records from `source` into the partition's bounded feed until the
/// source ends, the loop goes away, or `token` is cancelled. A source error
/// is passed to the loop and raised on `faults`.
async fn feed_partition<S>(
    partition: i32,
    source: S,
    feed: mpsc::Sender<Result<ConsumedRecord>>,
    token: CancellationToken,
    faults: mpsc::UnboundedSender<ConsumerError>,
) where
    S: Stream<Item = Result<ConsumedRecord>> + Send + 'static,
{
    let mut source = std::pin::pin!(source);
    loop {
        let item = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            item = source.next() => item,
        };
        let Some(item) = item else { break };

        let fault = item.as_ref().err().map(|e| e.to_string());
        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            sent = feed.send(item) => sent.is_ok(),
        };
        if let Some(reason) = fault {
            let _ = faults.send(ConsumerError::ConsumeFault {
                partition: Some(partition),
                reason,
            });
            break;
        }
        if !sent {
            break;
        }
    }
    debug!(partition, "partition feed closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::MemoryAcknowledger;
    use tokio::time::Instant;

    fn settings() -> DispatchSettings {
        DispatchSettings {
            work: Duration::ZERO,
            sample_every: NonZeroU64::new(500).unwrap(),
            partition_buffer: 4,
        }
    }

    fn record(partition: i32, offset: i64) -> ConsumedRecord {
        ConsumedRecord {
            topic: "game-events".to_string(),
            partition,
            offset,
            key: None,
            payload: None,
            timestamp: None,
        }
    }

    fn records(partition: i32, offsets: std::ops::Range<i64>) -> Vec<Result<ConsumedRecord>> {
        offsets.map(|offset| Ok(record(partition, offset))).collect()
    }

    /// Acknowledges like `MemoryAcknowledger` and remembers when.
    #[derive(Default)]
    struct TimedAcknowledger {
        acked: std::sync::Mutex<Vec<(i32, i64, Instant)>>,
    }

    impl Acknowledger for TimedAcknowledger {
        fn ack(&self, record: &ConsumedRecord) -> Result<()> {
            self.acked
                .lock()
                .unwrap()
                .push((record.partition, record.offset, Instant::now()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_records_routed_per_partition() {
        let acker = Arc::new(MemoryAcknowledger::new());
        let lifecycle = Lifecycle::new(Duration::from_secs(5));
        let mut dispatcher = Dispatcher::new(settings(), Arc::clone(&acker), lifecycle.token());

        for partition in [5, 0, 2] {
            dispatcher.assign(partition, futures::stream::iter(records(partition, 0..10)));
        }
        assert_eq!(dispatcher.partitions(), vec![0, 2, 5]);

        let report = dispatcher.close(&lifecycle).await;
        assert!(!report.timed_out);
        assert_eq!(report.processed(), 30);
        assert_eq!(
            report
                .partitions
                .iter()
                .map(|p| p.partition)
                .collect::<Vec<_>>(),
            vec![0, 2, 5]
        );
        assert_eq!(report.tasks.spawned, 6);
        assert_eq!(report.tasks.finished, 6);
        assert!(report.tasks.all_ended());

        let acked = acker.acknowledged();
        for partition in [0, 2, 5] {
            let offsets: Vec<i64> = acked
                .iter()
                .filter(|(p, _)| *p == partition)
                .map(|(_, o)| *o)
                .collect();
            assert_eq!(offsets, (0..10).collect::<Vec<_>>());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hot_partition_does_not_hold_back_siblings() {
        let acker = Arc::new(TimedAcknowledger::default());
        let lifecycle = Lifecycle::new(Duration::from_secs(30));
        let settings = DispatchSettings {
            work: Duration::from_millis(100),
            sample_every: NonZeroU64::new(500).unwrap(),
            partition_buffer: 2,
        };
        let mut dispatcher = Dispatcher::new(settings, Arc::clone(&acker), lifecycle.token());

        let (hot_log, hot) = mpsc::unbounded_channel();
        let (cold_log, cold) = mpsc::unbounded_channel();
        dispatcher.assign(0, log_source(hot));
        dispatcher.assign(1, log_source(cold));

        // The hot partition's backlog is far beyond its feed capacity.
        let started = Instant::now();
        for item in records(0, 0..20) {
            hot_log.send(item).unwrap();
        }
        cold_log.send(Ok(record(1, 0))).unwrap();
        drop((hot_log, cold_log));

        let report = dispatcher.close(&lifecycle).await;
        assert_eq!(report.processed(), 21);

        let acked = acker.acked.lock().unwrap().clone();
        let (_, _, cold_acked_at) = acked.iter().find(|(p, _, _)| *p == 1).copied().unwrap();
        let (_, _, hot_done_at) = acked.iter().filter(|(p, _, _)| *p == 0).last().copied().unwrap();
        assert!(cold_acked_at - started < Duration::from_millis(150));
        assert!(hot_done_at - started >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_waits_for_backlog_not_grace() {
        let acker = Arc::new(MemoryAcknowledger::new());
        // Far less than the backlog takes to work off.
        let lifecycle = Lifecycle::new(Duration::from_millis(100));
        let settings = DispatchSettings {
            work: Duration::from_millis(50),
            ..settings()
        };
        let mut dispatcher = Dispatcher::new(settings, Arc::clone(&acker), lifecycle.token());
        dispatcher.assign(0, futures::stream::iter(records(0, 0..40)));

        dispatcher.settle().await;
        let report = dispatcher.close(&lifecycle).await;
        assert!(!report.timed_out);
        assert_eq!(report.processed(), 40);
        assert_eq!(report.tasks.aborted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke_stops_only_that_partition() {
        let acker = Arc::new(MemoryAcknowledger::new());
        let lifecycle = Lifecycle::new(Duration::from_secs(5));
        let settings = DispatchSettings {
            work: Duration::from_millis(10),
            ..settings()
        };
        let mut dispatcher = Dispatcher::new(settings, Arc::clone(&acker), lifecycle.token());

        let (log_0, rx_0) = mpsc::unbounded_channel();
        let (log_1, rx_1) = mpsc::unbounded_channel();
        dispatcher.assign(0, log_source(rx_0));
        dispatcher.assign(1, log_source(rx_1));
        for offset in 0..5 {
            log_0.send(Ok(record(0, offset))).unwrap();
            log_1.send(Ok(record(1, offset))).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        dispatcher.revoke(0);
        assert_eq!(dispatcher.partitions(), vec![1]);
        for offset in 5..10 {
            // Nobody reads partition 0 any more.
            let _ = log_0.send(Ok(record(0, offset)));
            log_1.send(Ok(record(1, offset))).unwrap();
        }
        drop((log_0, log_1));

        let report = dispatcher.close(&lifecycle).await;
        assert!(!report.timed_out);
        assert!(report.tasks.all_ended());
        let counts = acker.counts();
        assert_eq!(counts[&0], 5);
        assert_eq!(counts[&1], 10);
        assert_eq!(report.partitions.len(), 2);
    }

    #[tokio::test]
    async fn test_source_error_is_raised_as_fault() {
        let acker = Arc::new(MemoryAcknowledger::new());
        let lifecycle = Lifecycle::new(Duration::from_secs(5));
        let mut dispatcher = Dispatcher::new(settings(), Arc::clone(&acker), lifecycle.token());
        let mut faults = dispatcher.take_faults().unwrap();
        assert!(dispatcher.take_faults().is_none());

        let mut items = records(3, 0..2);
        items.push(Err(ConsumerError::ConsumeFault {
            partition: Some(3),
            reason: "broker gone".to_string(),
        }));
        dispatcher.assign(3, futures::stream::iter(items));

        let fault = faults.recv().await.unwrap();
        assert!(matches!(
            fault,
            ConsumerError::ConsumeFault {
                partition: Some(3),
                ..
            }
        ));

        let report = dispatcher.close(&lifecycle).await;
        assert_eq!(report.faulted, vec![3]);
        assert_eq!(acker.counts()[&3], 2);
    }

    #[tokio::test]
    async fn test_fail_ends_every_loop() {
        let acker = Arc::new(MemoryAcknowledger::new());
        let lifecycle = Lifecycle::new(Duration::from_secs(5));
        let session = lifecycle.token().child_token();
        let mut dispatcher = Dispatcher::new(settings(), acker, session.clone());

        dispatcher.assign(0, futures::stream::pending());
        dispatcher.assign(1, futures::stream::pending());
        assert!(dispatcher.dispatch(record(0, 0)).await);
        assert!(!dispatcher.dispatch(record(7, 0)).await);
        dispatcher.fail("transport closed");

        assert!(session.is_cancelled());
        assert!(!lifecycle.is_shutting_down());
        assert!(!dispatcher.dispatch(record(0, 1)).await);

        let report = dispatcher.close(&lifecycle).await;
        assert!(!report.timed_out);
        assert_eq!(report.partitions.len() + report.faulted.len(), 2);
        assert_eq!(report.tasks.spawned, 4);
        assert!(report.tasks.all_ended());
    }
}
