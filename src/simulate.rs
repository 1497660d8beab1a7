//! In-process run of the whole pipeline, no broker required.
//!
//! ```text
//! Generation ──► ChannelSink ──► router (FNV-1a) ──► partition log × N ──► PartitionLoop × N
//! ```
//!
//! The router assigns each record the partition librdkafka's `fnv1a`
//! partitioner would pick, so the report predicts what a real topic with the
//! same partition count would see. Partition logs are unbounded, like a
//! broker's, so the router never waits on a slow partition.

use crate::report::{max_over_mean, SimulationReport, SkewReport};
use anyhow::Context;
use clap::Args;
use skew_consumer::{log_source, ConsumedRecord, DispatchSettings, Dispatcher, MemoryAcknowledger};
use skew_events::{partition_for, ConfigError, EventFactory, KeyPolicy, WirePayload};
use skew_lifecycle::Lifecycle;
use skew_producer::{ChannelSink, Generation, GenerationStats, PolicyArgs, RateController};
use std::num::{NonZeroU32, NonZeroU64};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Arguments for the `simulate` command.
#[derive(Args, Clone, Debug)]
pub struct SimulateArgs {
    /// Number of events to generate
    #[arg(long, short = 'n', default_value_t = 1_000)]
    pub events: u64,

    /// Keep generating until interrupted; overrides --events
    #[arg(long)]
    pub until_interrupted: bool,

    /// Partitions of the simulated topic
    #[arg(long, short = 'p', default_value_t = 6, allow_negative_numbers = true)]
    pub partitions: i64,

    /// Events per second
    #[arg(long, short = 'r', default_value_t = 1_000, allow_negative_numbers = true)]
    pub rate: i64,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// In-memory transport buffer, in records; sends beyond it are dropped
    #[arg(long, default_value_t = 100_000)]
    pub buffer_capacity: usize,

    /// Milliseconds of simulated work per record
    #[arg(long, short = 'w', default_value_t = 0)]
    pub work_ms: u64,

    /// Log every Nth offset of each partition
    #[arg(long, default_value_t = 500, allow_negative_numbers = true)]
    pub sample_every: i64,

    /// Records buffered ahead of each partition loop
    #[arg(long, default_value_t = 256)]
    pub partition_buffer: usize,

    /// Seconds allowed for draining partition loops on shutdown
    #[arg(long, default_value_t = 5)]
    pub grace_secs: u64,

    /// Topic name stamped on simulated records
    #[arg(long, short = 't', default_value = "game-events")]
    pub topic: String,

    /// Print the report as JSON instead of a table
    #[arg(long)]
    pub report_json: bool,
}

/// Validated simulation settings.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub topic: String,
    /// `None` runs until shutdown.
    pub events: Option<u64>,
    pub partitions: NonZeroU32,
    pub rate: RateController,
    pub policy: KeyPolicy,
    pub seed: u64,
    pub buffer_capacity: usize,
    pub settings: DispatchSettings,
    pub grace: Duration,
}

impl SimulateArgs {
    pub fn validate(&self) -> Result<SimulationConfig, ConfigError> {
        let rate = RateController::new(self.rate)?;
        let policy = self.policy.key_policy()?;
        let partitions = u32::try_from(self.partitions)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or(ConfigError::InvalidPartitionCount(self.partitions))?;
        let sample_every = u64::try_from(self.sample_every)
            .ok()
            .and_then(NonZeroU64::new)
            .ok_or(ConfigError::InvalidSampleInterval(self.sample_every))?;
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid {
                name: "buffer-capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.partition_buffer == 0 {
            return Err(ConfigError::Invalid {
                name: "partition-buffer",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(SimulationConfig {
            topic: self.topic.clone(),
            events: (!self.until_interrupted).then_some(self.events),
            partitions,
            rate,
            policy,
            seed: self.seed,
            buffer_capacity: self.buffer_capacity,
            settings: DispatchSettings {
                work: Duration::from_millis(self.work_ms),
                sample_every,
                partition_buffer: self.partition_buffer,
            },
            grace: Duration::from_secs(self.grace_secs),
        })
    }
}

/// Generate, route and consume in-process until the event budget is spent or
/// `lifecycle` shuts down.
pub async fn simulate(
    config: SimulationConfig,
    lifecycle: &Lifecycle,
) -> anyhow::Result<SimulationReport> {
    info!(
        policy = config.policy.name(),
        vip_percent = config.policy.vip_percent(),
        shards = config.policy.shard_count(),
        partitions = config.partitions.get(),
        rate = config.rate.rate(),
        events = ?config.events,
        seed = config.seed,
        "simulation started"
    );

    let partitions = config.partitions.get();
    let session = lifecycle.token().child_token();
    let (sink, mut intake) = ChannelSink::new(config.buffer_capacity);
    let generator = tokio::spawn(
        Generation::new(
            config.topic.as_str(),
            config.policy,
            config.rate,
            EventFactory::seeded(config.seed),
        )
        .with_max_events(config.events)
        .run(Arc::new(sink), session.clone()),
    );

    let acker = Arc::new(MemoryAcknowledger::new());
    let mut dispatcher = Dispatcher::new(config.settings, Arc::clone(&acker), session.clone());
    let mut skew = SkewReport::new(partitions);
    let mut next_offsets = vec![0i64; partitions as usize];
    let mut logs: Vec<Option<mpsc::UnboundedSender<skew_consumer::Result<ConsumedRecord>>>> =
        vec![None; partitions as usize];

    // Ends once the generator finishes and its sink is dropped.
    loop {
        let published = tokio::select! {
            biased;
            _ = session.cancelled() => break,
            published = intake.recv() => match published {
                Some(published) => published,
                None => break,
            },
        };
        let partition = partition_for(published.key.as_bytes(), partitions);
        skew.observe(partition, &published.key);

        let offset = &mut next_offsets[partition as usize];
        let record = ConsumedRecord {
            topic: published.topic,
            partition: partition as i32,
            offset: *offset,
            timestamp: WirePayload::decode(&published.value).ok().map(|p| p.ts),
            key: Some(published.key.into_string().into_bytes()),
            payload: Some(published.value),
        };
        *offset += 1;

        let log = logs[partition as usize].get_or_insert_with(|| {
            let (log, records) = mpsc::unbounded_channel();
            dispatcher.assign(partition as i32, log_source(records));
            log
        });
        if log.send(Ok(record)).is_err() {
            // The partition loop is gone; stop the generator too, it may be
            // running unbounded.
            session.cancel();
            break;
        }
    }
    drop(intake);
    drop(logs);

    // Work off the backlog; the grace period only bounds a shutdown.
    dispatcher.settle().await;
    let session_report = dispatcher.close(lifecycle).await;
    if !session_report.faulted.is_empty() {
        warn!(partitions = ?session_report.faulted, "partition loops faulted");
    }

    let mut generation = lifecycle.join_tasks("generation", vec![generator]).await;
    let mut tasks = session_report.tasks;
    tasks.merge(generation.tally());
    let stats = match generation.results.pop() {
        Some(Ok(stats)) => stats.context("Generation failed")?,
        Some(Err(e)) if e.is_cancelled() => {
            warn!("generation abandoned");
            GenerationStats::default()
        }
        Some(Err(e)) => return Err(e).context("Generation task panicked"),
        None => GenerationStats::default(),
    };

    let loads = skew.loads(&acker.counts());
    let report = SimulationReport {
        policy: config.policy.name().to_string(),
        ticks: stats.ticks,
        accepted: stats.accepted,
        dropped: stats.dropped,
        distinct_keys: skew.distinct_keys(),
        max_over_mean: max_over_mean(&loads),
        partitions: loads,
        interrupted: lifecycle.is_shutting_down(),
        timed_out: session_report.timed_out || generation.timed_out,
        tasks_spawned: tasks.spawned,
        tasks_finished: tasks.finished,
        tasks_aborted: tasks.aborted,
    };
    info!(
        accepted = report.accepted,
        dropped = report.dropped,
        acknowledged = report.acknowledged(),
        distinct_keys = report.distinct_keys,
        max_over_mean = report.max_over_mean,
        "simulation finished"
    );
    Ok(report)
}
