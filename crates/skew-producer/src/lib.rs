//! Producer side of the partition-skew tooling.
//!
//! One generation task paces itself with a [`RateController`], builds an event,
//! keys it with the configured [`KeyPolicy`](skew_events::KeyPolicy) and hands
//! it to a [`PublishSink`]. The sink never blocks: when the transport buffer is
//! full the record is dropped and counted, so pacing stays accurate under
//! overload.
//!
//! # Example
//!
//! ```rust,ignore
//! use skew_lifecycle::Lifecycle;
//! use skew_producer::{KafkaSink, ProduceArgs, Producer};
//!
//! let config = args.validate()?;
//! let sink = KafkaSink::connect(&config.brokers, config.buffer_capacity)?;
//! let lifecycle = Lifecycle::new(config.grace);
//! let report = Producer::new(config, sink).run(&lifecycle).await?;
//! println!("accepted {} dropped {}", report.stats.accepted, report.stats.dropped);
//! ```

pub mod args;
pub mod error;
pub mod generation;
pub mod kafka_sink;
pub mod producer;
pub mod rate;
pub mod sink;

// Re-exports for convenience
pub use args::{PolicyArgs, PolicyKind, ProduceArgs, ProducerConfig};
pub use error::ProducerError;
pub use generation::{Generation, GenerationStats};
pub use kafka_sink::{DeliveryReporter, KafkaSink};
pub use producer::{Producer, ProducerReport};
pub use rate::{RateController, Ticker};
pub use sink::{ChannelSink, DeliveryCounts, PublishSink, SendOutcome};
