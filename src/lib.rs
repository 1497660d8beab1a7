//! Reproduce partition skew caused by a hot routing key, and its sharded fix.
//!
//! The pipeline pieces live in the `skew-*` crates; this crate wires them into
//! the `partition-skew` binary and an in-process [`simulate`] run.

pub mod report;
pub mod simulate;
pub mod telemetry;

pub use report::{max_over_mean, PartitionLoad, SimulationReport, SkewReport};
pub use simulate::{simulate, SimulateArgs, SimulationConfig};
