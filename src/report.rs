//! Partition distribution report.

use serde::Serialize;
use skew_events::RoutingKey;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Load observed on one partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionLoad {
    pub partition: u32,
    /// Records routed to the partition.
    pub records: u64,
    /// Distinct routing keys among them.
    pub distinct_keys: usize,
    /// Records the partition's consumer acknowledged.
    pub acknowledged: u64,
}

/// Per-partition record counts and distinct keys for one run.
#[derive(Debug, Clone)]
pub struct SkewReport {
    records: Vec<u64>,
    keys: Vec<HashSet<RoutingKey>>,
}

impl SkewReport {
    pub fn new(partitions: u32) -> Self {
        Self {
            records: vec![0; partitions as usize],
            keys: vec![HashSet::new(); partitions as usize],
        }
    }

    pub fn observe(&mut self, partition: u32, key: &RoutingKey) {
        let index = partition as usize;
        self.records[index] += 1;
        if !self.keys[index].contains(key) {
            self.keys[index].insert(key.clone());
        }
    }

    pub fn distinct_keys(&self) -> usize {
        self.keys.iter().flatten().collect::<HashSet<_>>().len()
    }

    /// Combine with per-partition acknowledgment counts.
    pub fn loads(&self, acknowledged: &HashMap<i32, u64>) -> Vec<PartitionLoad> {
        self.records
            .iter()
            .zip(&self.keys)
            .enumerate()
            .map(|(partition, (records, keys))| PartitionLoad {
                partition: partition as u32,
                records: *records,
                distinct_keys: keys.len(),
                acknowledged: acknowledged
                    .get(&(partition as i32))
                    .copied()
                    .unwrap_or_default(),
            })
            .collect()
    }
}

/// Busiest partition's load relative to the mean over all partitions.
///
/// 1.0 is a perfectly even spread; with `n` partitions, `n` means everything
/// landed on one partition.
pub fn max_over_mean(loads: &[PartitionLoad]) -> f64 {
    let total: u64 = loads.iter().map(|l| l.records).sum();
    if total == 0 || loads.is_empty() {
        return 0.0;
    }
    let mean = total as f64 / loads.len() as f64;
    let max = loads.iter().map(|l| l.records).max().unwrap_or_default();
    max as f64 / mean
}

/// Summary of a simulated run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub policy: String,
    pub ticks: u64,
    pub accepted: u64,
    pub dropped: u64,
    pub distinct_keys: usize,
    pub partitions: Vec<PartitionLoad>,
    pub max_over_mean: f64,
    /// Whether the run was cut short by a shutdown signal.
    pub interrupted: bool,
    /// Whether partition loops outlived the grace period.
    pub timed_out: bool,
    /// Generator, partition feed and partition loop tasks started.
    pub tasks_spawned: usize,
    /// Tasks that returned on their own.
    pub tasks_finished: usize,
    /// Tasks aborted after the grace period.
    pub tasks_aborted: usize,
}

impl SimulationReport {
    pub fn routed(&self) -> u64 {
        self.partitions.iter().map(|p| p.records).sum()
    }

    pub fn acknowledged(&self) -> u64 {
        self.partitions.iter().map(|p| p.acknowledged).sum()
    }

    /// Partitions that received at least one record.
    pub fn active_partitions(&self) -> usize {
        self.partitions.iter().filter(|p| p.records > 0).count()
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "policy={} ticks={} accepted={} dropped={} distinct_keys={}",
            self.policy, self.ticks, self.accepted, self.dropped, self.distinct_keys
        )?;
        let busiest = self
            .partitions
            .iter()
            .map(|p| p.records)
            .max()
            .unwrap_or_default()
            .max(1);
        for load in &self.partitions {
            let bar = "#".repeat((load.records * 40 / busiest) as usize);
            writeln!(
                f,
                "partition {:>3} | {:>8} records | {:>6} keys | {bar}",
                load.partition, load.records, load.distinct_keys
            )?;
        }
        write!(f, "max/mean = {:.2}", self.max_over_mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_and_ratio() {
        let mut tally = SkewReport::new(3);
        let hot = RoutingKey::for_player("player-000001");
        for _ in 0..8 {
            tally.observe(1, &hot);
        }
        tally.observe(0, &RoutingKey::for_player("player-000002"));
        tally.observe(2, &RoutingKey::for_player("player-000003"));

        let acked = HashMap::from([(1, 8)]);
        let loads = tally.loads(&acked);
        assert_eq!(loads[1].records, 8);
        assert_eq!(loads[1].distinct_keys, 1);
        assert_eq!(loads[1].acknowledged, 8);
        assert_eq!(loads[0].acknowledged, 0);
        assert_eq!(tally.distinct_keys(), 3);
        // mean = 10 / 3
        assert!((max_over_mean(&loads) - 2.4).abs() < 1e-9);
    }

    #[test]
    fn test_empty_ratio() {
        assert_eq!(max_over_mean(&SkewReport::new(4).loads(&HashMap::new())), 0.0);
    }
}
