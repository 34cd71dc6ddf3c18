// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Interfaces to the host runtime.
//!
//! The host owns loaded units and the facility that rewrites them. This crate
//! only decides what to rewrite and when; it reaches the host through
//! [`HostRuntime`] and [`Retransformer`], and the host calls back through
//! [`Weaver`] while it rewrites.

use crate::error::RetransformError;
use crate::rules::{rules_for_method, ClassInstrumentationConfiguration};
use crate::types::{Unit, UnitId};

/// Read access to the set of loaded units.
pub trait HostRuntime: Send + Sync {
    /// All currently loaded units.
    fn all_loaded_units(&self) -> Vec<Unit>;

    /// Whether the runtime allows rewriting this unit.
    fn is_modifiable(&self, unit: &Unit) -> bool;

    /// Whether the whole process is terminating.
    ///
    /// When true, shutdown skips removing rewritten code from loaded units.
    fn is_terminating(&self) -> bool {
        false
    }
}

/// The host's "redefine loaded code" facility.
///
/// For every unit it rewrites, the host calls [`Weaver::weave`] to learn what
/// to splice in and [`Weaver::on_unit_woven`] once the new code is live.
pub trait Retransformer: Send + Sync {
    /// Rewrite several units in one host call.
    fn retransform_batch(&self, units: &[Unit], weaver: &dyn Weaver) -> Result<(), RetransformError>;

    /// Rewrite a single unit.
    fn retransform(&self, unit: &Unit, weaver: &dyn Weaver) -> Result<(), RetransformError>;
}

/// Callbacks the host invokes while rewriting a unit.
///
/// Also used for units woven at definition time, outside any retransform.
pub trait Weaver: Send + Sync {
    /// The unit is about to be rewritten.
    fn weave(&self, unit: &Unit) -> WeavePlan;

    /// The rewritten unit is live.
    fn on_unit_woven(&self, unit: &Unit);
}

/// What to splice into one unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeavePlan {
    pub unit: Option<UnitId>,
    pub configuration: ClassInstrumentationConfiguration,
    /// Signatures of methods that receive call-site advice, in declaration order.
    pub methods: Vec<String>,
}

impl WeavePlan {
    /// Plan for a unit woven with the given configuration.
    pub fn for_unit(unit: &Unit, configuration: ClassInstrumentationConfiguration) -> Self {
        let descriptor = unit.descriptor();
        let methods = if configuration.active_rules.is_empty() {
            Vec::new()
        } else {
            descriptor
                .methods
                .iter()
                .filter(|m| !rules_for_method(&configuration.active_rules, descriptor, m).is_empty())
                .map(|m| m.signature())
                .collect()
        };
        Self {
            unit: Some(unit.id()),
            configuration,
            methods,
        }
    }

    /// Whether the unit is left uninstrumented.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.configuration.is_empty()
    }
}
