// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent metrics for monitoring the instrumentation pipeline itself.
//!
//! Lightweight counters and latency histograms without an exporter. Each
//! agent owns one `AgentMetrics` instance, so several agents in one process
//! (as in tests) never share counts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Operation names recorded by the agent.
pub mod operations {
    /// One scheduler cycle, from popping pending units to committing hooks.
    pub const RETRANSFORM_BATCH: &str = "retransform_batch";
    /// One registry update, from `start_update` to `commit`.
    pub const HOOK_UPDATE: &str = "hook_update";
    /// One discovery scan of the loaded units.
    pub const DISCOVERY_SCAN: &str = "discovery_scan";
}

/// Counters and latency histograms of one agent.
#[derive(Debug)]
pub struct AgentMetrics {
    counters: Counters,

    /// Operation latencies by name.
    operations: RwLock<HashMap<String, OperationMetrics>>,

    /// Start time for calculating uptime.
    start_time: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    units_discovered: AtomicU64,
    units_checked: AtomicU64,
    units_retransformed: AtomicU64,
    retransform_failures: AtomicU64,
    hook_build_failures: AtomicU64,
    actions_disabled: AtomicU64,
    hook_commits: AtomicU64,
}

impl AgentMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            operations: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn record_units_discovered(&self, count: u64) {
        self.counters.units_discovered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_units_checked(&self, count: u64) {
        self.counters.units_checked.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_units_retransformed(&self, count: u64) {
        self.counters.units_retransformed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_retransform_failure(&self) {
        self.counters.retransform_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hook_build_failure(&self) {
        self.counters.hook_build_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action_disabled(&self) {
        self.counters.actions_disabled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hook_commit(&self) {
        self.counters.hook_commits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a timed operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write();
        let metrics = ops.entry(name.to_string()).or_insert_with(OperationMetrics::new);
        metrics.record(duration);
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations.read().get(name).cloned()
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        MetricsSnapshot {
            units_discovered: c.units_discovered.load(Ordering::Relaxed),
            units_checked: c.units_checked.load(Ordering::Relaxed),
            units_retransformed: c.units_retransformed.load(Ordering::Relaxed),
            retransform_failures: c.retransform_failures.load(Ordering::Relaxed),
            hook_build_failures: c.hook_build_failures.load(Ordering::Relaxed),
            actions_disabled: c.actions_disabled.load(Ordering::Relaxed),
            hook_commits: c.hook_commits.load(Ordering::Relaxed),
            operations: self.operations.read().clone(),
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        let c = &self.counters;
        for counter in [
            &c.units_discovered,
            &c.units_checked,
            &c.units_retransformed,
            &c.retransform_failures,
            &c.hook_build_failures,
            &c.actions_disabled,
            &c.hook_commits,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.operations.write().clear();
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Generic operation metrics with histogram.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    /// Number of operations.
    pub count: u64,

    /// Total duration.
    pub total_duration: Duration,

    /// Minimum duration.
    pub min_duration: Duration,

    /// Maximum duration.
    pub max_duration: Duration,

    /// Histogram buckets for latency distribution.
    pub histogram: Histogram,
}

impl OperationMetrics {
    /// Create new operation metrics.
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    /// Record an operation.
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    /// Calculate average duration.
    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_duration.as_nanos() / u128::from(self.count);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple histogram with fixed buckets for latency tracking.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Bucket boundaries in microseconds.
    buckets: Vec<u64>,

    /// Count per bucket, plus one overflow bucket.
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries (in microseconds).
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    /// Record a duration value.
    pub fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| micros <= b)
            .unwrap_or(self.buckets.len());
        self.counts[bucket_idx] += 1;
    }

    /// Get counts for each bucket.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Calculate approximate percentile (p50, p90, p99, etc.).
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let micros = if i < self.buckets.len() {
                    self.buckets[i]
                } else {
                    self.buckets.last().copied().unwrap_or(0) * 10
                };
                return Duration::from_micros(micros);
            }
        }

        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // 100us, 1ms, 10ms, 100ms, 1s, 10s
        Self::with_buckets(vec![100, 1_000, 10_000, 100_000, 1_000_000, 10_000_000])
    }
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub units_discovered: u64,
    pub units_checked: u64,
    pub units_retransformed: u64,
    pub retransform_failures: u64,
    pub hook_build_failures: u64,
    pub actions_disabled: u64,
    pub hook_commits: u64,

    /// Operation metrics by name.
    pub operations: HashMap<String, OperationMetrics>,

    /// Uptime when snapshot was taken.
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Agent Metrics ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!(
            "Units: {} discovered, {} checked, {} retransformed, {} failed\n",
            self.units_discovered, self.units_checked, self.units_retransformed, self.retransform_failures
        ));
        report.push_str(&format!(
            "Hooks: {} commits, {} build failures, {} actions disabled\n\n",
            self.hook_commits, self.hook_build_failures, self.actions_disabled
        ));

        if !self.operations.is_empty() {
            let mut names: Vec<&String> = self.operations.keys().collect();
            names.sort();
            report.push_str("Operation Metrics:\n");
            for name in names {
                let metrics = &self.operations[name];
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    metrics.count,
                    metrics.avg_duration(),
                    metrics.histogram.p99()
                ));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = AgentMetrics::new();
        metrics.record_units_checked(5);
        metrics.record_units_retransformed(3);
        metrics.record_retransform_failure();
        metrics.record_action_disabled();
        metrics.record_hook_commit();
        metrics.record_hook_commit();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.units_checked, 5);
        assert_eq!(snapshot.units_retransformed, 3);
        assert_eq!(snapshot.retransform_failures, 1);
        assert_eq!(snapshot.actions_disabled, 1);
        assert_eq!(snapshot.hook_commits, 2);
    }

    #[test]
    fn test_operation_metrics() {
        let mut metrics = OperationMetrics::new();
        metrics.record(Duration::from_millis(10));
        metrics.record(Duration::from_millis(20));
        metrics.record(Duration::from_millis(30));

        assert_eq!(metrics.count, 3);
        assert_eq!(metrics.avg_duration(), Duration::from_millis(20));
        assert_eq!(metrics.min_duration, Duration::from_millis(10));
    }

    #[test]
    fn test_avg_duration_past_u32_count() {
        let op = OperationMetrics {
            count: u64::from(u32::MAX) + 2,
            total_duration: Duration::from_secs(u64::from(u32::MAX) + 2),
            ..OperationMetrics::new()
        };
        assert_eq!(op.avg_duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_histogram() {
        let mut hist = Histogram::default();

        hist.record(Duration::from_micros(50));
        hist.record(Duration::from_micros(500));
        hist.record(Duration::from_millis(5));
        hist.record(Duration::from_secs(60));

        assert_eq!(hist.counts()[0], 1);
        assert_eq!(hist.counts()[1], 1);
        assert_eq!(hist.counts()[2], 1);
        assert_eq!(hist.counts()[6], 1);
    }

    #[test]
    fn test_histogram_percentiles() {
        let mut hist = Histogram::default();
        for _ in 0..100 {
            hist.record(Duration::from_micros(500));
        }

        assert_eq!(hist.p50(), Duration::from_micros(1_000));
        assert_eq!(hist.p99(), Duration::from_micros(1_000));
    }

    #[test]
    fn test_report_and_reset() {
        let metrics = AgentMetrics::new();
        metrics.record_operation(operations::RETRANSFORM_BATCH, Duration::from_millis(2));
        metrics.record_units_checked(7);

        let report = metrics.snapshot().format_report();
        assert!(report.contains("7 checked"));
        assert!(report.contains("retransform_batch: 1 ops"));

        metrics.reset();
        assert!(metrics.operation_metrics(operations::RETRANSFORM_BATCH).is_none());
        assert_eq!(metrics.snapshot().units_checked, 0);
    }
}
