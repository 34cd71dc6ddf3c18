// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry, tracing, and metrics infrastructure.
//!
//! This module provides observability for the agent itself, not for the
//! instrumented code (that goes through the hook sinks):
//!
//! - **Tracing**: Structured logging via `tracing` with an env-filter subscriber
//! - **Metrics**: Per-agent counters and latency histograms
//!
//! # Usage
//!
//! Initialize telemetry at application startup:
//!
//! ```rust,ignore
//! use hookline::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::agent())?;
//! ```
//!
//! # Log levels
//!
//! - `trace`: per-unit and per-method decisions
//! - `debug`: batch summaries and lifecycle transitions
//! - `info`: agent start, configuration changes, shutdown
//! - `warn`: disabled actions, failed rewrites, skipped hooks
//! - `error`: failures that leave instrumentation in place at shutdown

mod init;
pub mod metrics;
pub mod spans;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard, HOOKS_TARGET, RETRANSFORM_TARGET};
pub use metrics::{AgentMetrics, Histogram, MetricsSnapshot, OperationMetrics};
pub use spans::TimedOperation;
