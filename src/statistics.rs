//! # Latency Statistics
//!
//! Order statistics over the records of successful requests.
//!
//! ## Percentile Policy
//!
//! Records are sorted ascending by latency and the value at percentile `p`
//! is `records[floor(p * N)]` (0-indexed). This is the rank formula used for
//! every percentile the crate reports; it is not the `p * (N - 1)` form.
//! For `p < 1` the rank is always a valid index.
//!
//! ## Throughput
//!
//! Throughput is `1000 * N / wall_clock_millis`: completed requests per
//! second of wall time. It is not derived from the mean latency, which
//! measures a different thing under concurrency.

use crate::error::HarnessError;
use crate::latency_log::LatencyRecord;
use serde::{Deserialize, Serialize};

/// Summary statistics of one run's successful requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyReport {
    pub count: usize,
    pub mean_ms: f64,
    pub median_ms: u64,
    pub p99_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    /// Successful requests per second of wall time
    pub throughput_per_sec: f64,
    pub wall_clock_ms: u64,
}

/// Index of percentile `p` (0.0..1.0) in a sorted sequence of `n` items.
pub fn percentile_rank(p: f64, n: usize) -> usize {
    let rank = (p * n as f64).floor() as usize;
    rank.min(n.saturating_sub(1))
}

pub struct StatisticsEngine;

impl StatisticsEngine {
    /// Sort `records` in place by latency and compute the report.
    ///
    /// ## Errors
    /// - `HarnessError::NoData` when `records` is empty
    /// - `HarnessError::Config` when `wall_clock_millis` is zero
    pub fn compute(
        records: &mut [LatencyRecord],
        wall_clock_millis: u64,
    ) -> Result<LatencyReport, HarnessError> {
        if records.is_empty() {
            return Err(HarnessError::NoData);
        }
        if wall_clock_millis == 0 {
            return Err(HarnessError::Config(
                "wall clock duration must be non-zero to compute throughput".to_string(),
            ));
        }

        records.sort_by_key(|r| r.latency_ms);
        let n = records.len();

        let mut sum: u128 = 0;
        let mut min = u64::MAX;
        let mut max = 0u64;
        for record in records.iter() {
            sum += record.latency_ms as u128;
            min = min.min(record.latency_ms);
            max = max.max(record.latency_ms);
        }

        Ok(LatencyReport {
            count: n,
            mean_ms: sum as f64 / n as f64,
            median_ms: records[percentile_rank(0.5, n)].latency_ms,
            p99_ms: records[percentile_rank(0.99, n)].latency_ms,
            min_ms: min,
            max_ms: max,
            throughput_per_sec: 1000.0 * n as f64 / wall_clock_millis as f64,
            wall_clock_ms: wall_clock_millis,
        })
    }
}
