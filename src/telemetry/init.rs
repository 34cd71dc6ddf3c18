// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Log subscriber setup for the agent and the CLI.
//!
//! The filter is assembled from a base level plus per-subsystem levels, so an
//! agent embedded in a busy host can stay quiet overall while still reporting
//! rewrites and hook failures. `RUST_LOG` replaces the assembled filter.

use std::io;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log target of the retransformation scheduler.
pub const RETRANSFORM_TARGET: &str = "hookline::retransform";

/// Log target of hook building, execution and publication.
pub const HOOKS_TARGET: &str = "hookline::hooks";

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level for every target without an override.
    pub base_level: Level,

    /// Per-target overrides, applied after the base level.
    pub target_levels: Vec<(String, Level)>,

    /// Emit span enter/close events (scheduler batches, hook updates).
    pub include_span_events: bool,

    pub include_file_line: bool,

    pub include_target: bool,

    pub ansi_colors: bool,

    pub compact: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::agent()
    }
}

impl TelemetryConfig {
    /// Settings for an agent running inside a host process.
    ///
    /// Warnings only, except that unit rewrites and hook publication are
    /// reported at info.
    pub fn agent() -> Self {
        Self {
            base_level: Level::WARN,
            target_levels: vec![
                (RETRANSFORM_TARGET.to_string(), Level::INFO),
                (HOOKS_TARGET.to_string(), Level::INFO),
            ],
            include_span_events: false,
            include_file_line: false,
            include_target: true,
            ansi_colors: false,
            compact: true,
        }
    }

    /// Verbose settings for `--verbose` CLI runs and local debugging.
    pub fn development() -> Self {
        Self {
            base_level: Level::INFO,
            target_levels: vec![("hookline".to_string(), Level::DEBUG)],
            include_span_events: true,
            include_file_line: true,
            include_target: true,
            ansi_colors: true,
            compact: false,
        }
    }

    /// Override the level of one target.
    pub fn with_target_level(mut self, target: impl Into<String>, level: Level) -> Self {
        let target = target.into();
        self.target_levels.retain(|(existing, _)| *existing != target);
        self.target_levels.push((target, level));
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }

    /// Filter directive equivalent to these settings, e.g.
    /// `warn,hookline::retransform=info`.
    pub fn directive(&self) -> String {
        let mut directive = level_name(self.base_level).to_string();
        for (target, level) in &self.target_levels {
            directive.push(',');
            directive.push_str(target);
            directive.push('=');
            directive.push_str(level_name(*level));
        }
        directive
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new(self.directive()).unwrap_or_else(|_| EnvFilter::new(level_name(self.base_level)))
        })
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Guard returned by [`init_telemetry`].
///
/// Keep it alive for as long as the agent runs.
pub struct TelemetryGuard {
    _private: (),
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::debug!("Telemetry shutting down");
    }
}

/// Install the global subscriber. Logs go to stderr.
///
/// Fails when a global subscriber is already installed, which is the case
/// when the host process set up its own.
///
/// # Example
///
/// ```rust,ignore
/// use hookline::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _guard = init_telemetry(&TelemetryConfig::agent())?;
/// ```
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let span_events = if config.include_span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events);

    let registry = tracing_subscriber::registry().with(config.filter());
    let installed = if config.compact {
        registry.with(fmt_layer.compact()).try_init()
    } else {
        registry.with(fmt_layer).try_init()
    };
    installed.map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    Ok(TelemetryGuard { _private: () })
}
