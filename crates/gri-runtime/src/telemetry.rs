// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run metrics collection for the orchestrator.

use gri_core::JobStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Metrics captured for a single ingestion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Job identifier (prior job id for bypasses).
    pub job_id: String,
    /// Environment the job ran in.
    pub environment: String,
    /// Terminal status.
    pub final_status: JobStatus,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Chunks produced (or carried over).
    pub chunk_count: u64,
    /// Vector records produced.
    pub vector_count: u64,
    /// Graph nodes upserted.
    pub graph_node_count: u64,
    /// Graph edges upserted.
    pub graph_edge_count: u64,
    /// Per-pass durations in milliseconds, keyed by pass letter.
    #[serde(default)]
    pub pass_durations_ms: BTreeMap<String, u64>,
}

/// Aggregated statistics across recorded runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Number of runs recorded.
    pub count: usize,
    /// Mean duration in milliseconds.
    pub mean_duration_ms: f64,
    /// Median (p50) duration in milliseconds.
    pub p50_duration_ms: f64,
    /// 99th-percentile duration in milliseconds.
    pub p99_duration_ms: f64,
    /// Total chunks across all runs.
    pub total_chunks: u64,
    /// Failure rate (failed + cancelled over total).
    pub failure_rate: f64,
    /// Run counts per terminal status (deterministic ordering).
    pub status_counts: BTreeMap<String, usize>,
}

/// Compute a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

/// Thread-safe collector for run metrics.
///
/// Clone freely — all clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<Vec<RunMetrics>>>,
}

impl MetricsCollector {
    /// A new, empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed run's metrics.
    pub fn record(&self, metrics: RunMetrics) {
        self.inner.lock().expect("metrics lock poisoned").push(metrics);
    }

    /// All recorded run metrics.
    #[must_use]
    pub fn runs(&self) -> Vec<RunMetrics> {
        self.inner.lock().expect("metrics lock poisoned").clone()
    }

    /// Number of runs recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("metrics lock poisoned").len()
    }

    /// Whether the collector has no recorded runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute an aggregated summary of all recorded runs.
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let data = self.inner.lock().expect("metrics lock poisoned");
        if data.is_empty() {
            return MetricsSummary::default();
        }
        let mut durations: Vec<u64> = data.iter().map(|r| r.duration_ms).collect();
        durations.sort_unstable();
        let mean = durations.iter().sum::<u64>() as f64 / durations.len() as f64;

        let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut failures = 0usize;
        let mut total_chunks = 0u64;
        for run in data.iter() {
            *status_counts.entry(run.final_status.to_string()).or_insert(0) += 1;
            if matches!(run.final_status, JobStatus::Failed | JobStatus::Cancelled) {
                failures += 1;
            }
            total_chunks += run.chunk_count;
        }

        MetricsSummary {
            count: data.len(),
            mean_duration_ms: mean,
            p50_duration_ms: percentile(&durations, 50.0),
            p99_duration_ms: percentile(&durations, 99.0),
            total_chunks,
            failure_rate: failures as f64 / data.len() as f64,
            status_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: JobStatus, duration_ms: u64, chunks: u64) -> RunMetrics {
        RunMetrics {
            job_id: "j".into(),
            environment: "dev".into(),
            final_status: status,
            duration_ms,
            chunk_count: chunks,
            vector_count: chunks,
            graph_node_count: 0,
            graph_edge_count: 0,
            pass_durations_ms: BTreeMap::new(),
        }
    }

    #[test]
    fn empty_collector_has_zero_summary() {
        let c = MetricsCollector::new();
        assert!(c.is_empty());
        assert_eq!(c.summary(), MetricsSummary::default());
    }

    #[test]
    fn summary_aggregates_counts_and_percentiles() {
        let c = MetricsCollector::new();
        c.record(run(JobStatus::Succeeded, 100, 10));
        c.record(run(JobStatus::Succeeded, 200, 20));
        c.record(run(JobStatus::Failed, 300, 0));
        c.record(run(JobStatus::Bypassed, 400, 30));
        let s = c.summary();
        assert_eq!(s.count, 4);
        assert_eq!(s.total_chunks, 60);
        assert!((s.mean_duration_ms - 250.0).abs() < f64::EPSILON);
        assert!((s.p50_duration_ms - 250.0).abs() < f64::EPSILON);
        assert!((s.failure_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(s.status_counts["SUCCEEDED"], 2);
    }

    #[test]
    fn clones_share_storage() {
        let a = MetricsCollector::new();
        let b = a.clone();
        a.record(run(JobStatus::Succeeded, 1, 1));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn percentile_interpolates() {
        assert_eq!(percentile(&[10, 20, 30], 50.0), 20.0);
        assert_eq!(percentile(&[10, 20], 50.0), 15.0);
        assert_eq!(percentile(&[], 99.0), 0.0);
    }
}
