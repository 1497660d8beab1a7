//! Command-line interface for partition-skew
//!
//! # Usage Examples
//!
//! ## Reproduce the skew
//! ```bash
//! # 95% of events keyed by one VIP player
//! partition-skew produce --topic game-events --policy skewed --skew-percent 95 --rate 400
//!
//! # Watch one partition's offsets race ahead of its siblings
//! partition-skew consume --topic game-events --group skew-demo --work-ms 2
//! ```
//!
//! ## Apply the fix
//! ```bash
//! # Same VIP traffic spread over 16 shard keys
//! partition-skew produce --topic game-events --policy sharded --shards 16
//! ```
//!
//! ## Without a broker
//! ```bash
//! partition-skew simulate --events 1000 --partitions 6 --policy sharded --shards 16
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use partition_skew::telemetry::init_tracing;
use partition_skew::{simulate, SimulateArgs};
use skew_consumer::{run_consumer, ConsumeArgs};
use skew_lifecycle::Lifecycle;
use skew_producer::{KafkaSink, ProduceArgs, Producer};
use tracing::info;

#[derive(Parser)]
#[command(name = "partition-skew")]
#[command(about = "Reproduce and remedy Kafka partition skew caused by a hot key")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish game events at a fixed rate under a key policy
    Produce(ProduceArgs),
    /// Consume the topic with one ordered loop per assigned partition
    Consume(ConsumeArgs),
    /// Run producer, partitioner and consumer in-process and report the spread
    Simulate(SimulateArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Produce(args) => run_produce(args).await,
        Commands::Consume(args) => run_consume(args).await,
        Commands::Simulate(args) => run_simulate(args).await,
    }
}

async fn run_produce(args: ProduceArgs) -> anyhow::Result<()> {
    let config = args
        .validate()
        .context("Invalid producer configuration")?;
    let sink = KafkaSink::connect(&config.brokers, config.buffer_capacity, config.connect_timeout)
        .await
        .with_context(|| format!("Failed to connect to Kafka at {}", config.brokers))?;

    let lifecycle = Lifecycle::new(config.grace);
    let signals = lifecycle.listen_for_signals();
    let report = Producer::<KafkaSink>::new(config, sink)
        .run(&lifecycle)
        .await
        .context("Producer failed")?;
    signals.abort();

    info!(
        ticks = report.stats.ticks,
        accepted = report.stats.accepted,
        dropped = report.stats.dropped,
        flushed = report.flushed,
        "completed"
    );
    Ok(())
}

async fn run_consume(args: ConsumeArgs) -> anyhow::Result<()> {
    let config = args
        .validate()
        .context("Invalid consumer configuration")?;

    let lifecycle = Lifecycle::new(config.grace);
    let signals = lifecycle.listen_for_signals();
    let result = run_consumer(&config, &lifecycle).await;
    signals.abort();
    result.context("Consumer failed")?;

    info!("completed");
    Ok(())
}

async fn run_simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let report_json = args.report_json;
    let config = args
        .validate()
        .context("Invalid simulation configuration")?;

    let lifecycle = Lifecycle::new(config.grace);
    let signals = lifecycle.listen_for_signals();
    let report = simulate(config, &lifecycle).await?;
    signals.abort();

    if report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    info!("completed");
    Ok(())
}
