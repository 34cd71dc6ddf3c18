// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Span helpers for timing agent operations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug_span, Span};

use super::metrics::AgentMetrics;

/// RAII guard for timing an agent operation.
///
/// Records the duration to the owning agent's metrics when finished or
/// dropped, whichever comes first.
pub struct TimedOperation {
    name: &'static str,
    start: Instant,
    span: Span,
    metrics: Option<Arc<AgentMetrics>>,
}

impl TimedOperation {
    /// Start a new timed operation.
    pub fn start(name: &'static str, metrics: Option<Arc<AgentMetrics>>) -> Self {
        let span = debug_span!(
            "operation",
            op = %name,
            duration_ms = tracing::field::Empty,
        );

        Self {
            name,
            start: Instant::now(),
            span,
            metrics,
        }
    }

    /// Get elapsed time so far.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the underlying span.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Finish and record the operation.
    pub fn finish(self) {
        // Recording happens in drop.
    }
}

impl Drop for TimedOperation {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_ms", duration.as_secs_f64() * 1000.0);
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(self.name, duration);
        }
    }
}

/// Macro for timing an operation against an agent's metrics.
///
/// # Example
///
/// ```rust,ignore
/// use hookline::timed;
///
/// fn scan(metrics: Option<Arc<AgentMetrics>>) {
///     let _timer = timed!("discovery_scan", metrics);
///     // ... work happens ...
/// } // Timer automatically records on drop
/// ```
#[macro_export]
macro_rules! timed {
    ($name:expr, $metrics:expr) => {
        $crate::telemetry::TimedOperation::start($name, $metrics)
    };
}
