// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! hookline command line: settings validation and offline hook planning.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use hookline::config::{load_settings_file, resolve_settings};
use hookline::plan::{plan_units, UnitPlan};
use hookline::rules::InstrumentationConfiguration;
use hookline::telemetry::{init_telemetry, TelemetryConfig};
use hookline::types::TypeDescriptor;
use hookline::VERSION;

/// Rule-driven method hooks with live re-instrumentation.
#[derive(Parser)]
#[command(name = "hookline")]
#[command(author, version, about = "Inspect hookline instrumentation settings", long_about = None)]
struct Cli {
    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a settings file and print a summary
    Validate {
        /// Settings file (JSON or YAML)
        config: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the hook plan for units described in a JSON file
    Plan {
        /// Settings file (JSON or YAML)
        config: PathBuf,

        /// JSON array of type descriptors
        units: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

/// Output format.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = if cli.verbose {
        TelemetryConfig::development()
    } else {
        TelemetryConfig::agent()
    };
    let _guard = init_telemetry(&telemetry)?;

    match cli.command {
        Commands::Validate { config, format } => {
            let resolved = load_configuration(&config)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary_json(&resolved))?),
                OutputFormat::Text => print_summary(&config, &resolved),
            }
        }
        Commands::Plan { config, units, format } => {
            let resolved = load_configuration(&config)?;
            let content = std::fs::read_to_string(&units)
                .with_context(|| format!("Failed to read {}", units.display()))?;
            let descriptors: Vec<TypeDescriptor> = serde_json::from_str(&content)
                .with_context(|| format!("Invalid unit descriptions in {}", units.display()))?;
            let plans = plan_units(&resolved, descriptors);
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plans)?),
                OutputFormat::Text => print_plans(&plans),
            }
        }
        Commands::Version => {
            println!("hookline {}", VERSION);
        }
    }
    Ok(())
}

fn load_configuration(path: &Path) -> anyhow::Result<InstrumentationConfiguration> {
    let settings = load_settings_file(path).with_context(|| format!("Failed to load {}", path.display()))?;
    let resolved = resolve_settings(&settings, 1).with_context(|| format!("Invalid settings in {}", path.display()))?;
    Ok(resolved)
}

fn summary_json(config: &InstrumentationConfiguration) -> serde_json::Value {
    serde_json::json!({
        "enabled": config.enabled,
        "rules": config.rules.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        "ignoredPackages": config.ignored_packages,
        "excludeLambdas": config.exclude_lambdas,
        "scheduler": {
            "checkLimit": config.scheduler.check_limit,
            "retransformLimit": config.scheduler.retransform_limit,
            "batchDelayMs": config.scheduler.batch_delay.as_millis() as u64,
            "removalRetryDelayMs": config.scheduler.removal_retry_delay.as_millis() as u64,
        },
        "discovery": {
            "pollDelayMs": config.discovery.poll_delay.as_millis() as u64,
            "inactivityThresholdMs": config.discovery.inactivity_threshold.as_millis() as u64,
            "maxInactiveTrials": config.discovery.max_inactive_trials,
        },
    })
}

fn print_summary(path: &Path, config: &InstrumentationConfiguration) {
    println!("{} {}", "✓".green(), path.display().to_string().bright_white());
    if !config.enabled {
        println!("  {}", "instrumentation disabled".yellow());
    }
    println!("  {} rules", config.rules.len());
    for rule in &config.rules {
        let scopes: Vec<&str> = rule.scopes.iter().map(|s| s.name.as_str()).collect();
        let includes: Vec<&str> = rule.includes.iter().map(|r| r.name.as_str()).collect();
        print!("    {} scopes=[{}]", rule.name.cyan(), scopes.join(", "));
        if !includes.is_empty() {
            print!(" includes=[{}]", includes.join(", "));
        }
        println!();
    }
    println!(
        "  scheduler: check_limit={} retransform_limit={} batch_delay={:?}",
        config.scheduler.check_limit, config.scheduler.retransform_limit, config.scheduler.batch_delay
    );
}

fn print_plans(plans: &[UnitPlan]) {
    for plan in plans {
        if plan.ignored {
            println!("{} {}", plan.unit.dimmed(), "(ignored)".dimmed());
            continue;
        }
        println!("{} rules=[{}]", plan.unit.bright_white().bold(), plan.rules.join(", "));
        for method in &plan.methods {
            match &method.error {
                Some(error) => println!("  {} {} {}", "✗".red(), method.signature, error.red()),
                None => {
                    println!("  {} {} rules=[{}]", "✓".green(), method.signature, method.rules.join(", "));
                    if !method.entry.is_empty() {
                        println!("      entry: {}", method.entry.join(" → "));
                    }
                    if !method.exit.is_empty() {
                        println!("      exit:  {}", method.exit.join(" → "));
                    }
                    if method.starts_span || method.ends_span {
                        println!("      span:  start={} end={}", method.starts_span, method.ends_span);
                    }
                    if !method.metrics.is_empty() {
                        println!("      metrics: {}", method.metrics.join(", "));
                    }
                }
            }
        }
    }
}
