// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Live configuration handle.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::error::ConfigError;
use crate::rules::InstrumentationConfiguration;

use super::merger::resolve_settings;
use super::types::Settings;

/// Publishes resolved configurations to subscribers.
///
/// Every published value carries a generation one higher than the previous
/// one. Invalid settings are rejected and leave the current value in place.
#[derive(Debug)]
pub struct ConfigSource {
    tx: watch::Sender<Arc<InstrumentationConfiguration>>,
}

impl ConfigSource {
    /// Start from an already resolved configuration.
    pub fn new(initial: InstrumentationConfiguration) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Start from raw settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self::new(resolve_settings(settings, 1)?))
    }

    /// Resolve and publish new settings; returns the new generation.
    pub fn publish(&self, settings: &Settings) -> Result<u64, ConfigError> {
        let resolved = resolve_settings(settings, 0)?;
        Ok(self.publish_configuration(resolved))
    }

    /// Publish a resolved configuration, overriding its generation.
    pub fn publish_configuration(&self, mut config: InstrumentationConfiguration) -> u64 {
        let mut generation = 0;
        self.tx.send_modify(|current| {
            generation = current.generation + 1;
            config.generation = generation;
            *current = Arc::new(config);
        });
        info!(generation, "Published instrumentation configuration");
        generation
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<InstrumentationConfiguration>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Arc<InstrumentationConfiguration> {
        self.tx.borrow().clone()
    }

    pub fn generation(&self) -> u64 {
        self.tx.borrow().generation
    }
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self::new(InstrumentationConfiguration::default())
    }
}
