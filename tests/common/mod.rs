// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory host used by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use hookline::error::RetransformError;
use hookline::hooks::MetricSink;
use hookline::runtime::{HostRuntime, Retransformer, WeavePlan, Weaver};
use hookline::types::{LoaderId, MethodDescriptor, TypeDescriptor, Unit, UnitId};

/// Host that keeps loaded units in memory and weaves synchronously.
#[derive(Default)]
pub struct FakeHost {
    units: Mutex<Vec<Unit>>,
    /// Latest plan woven into each unit.
    pub woven: Mutex<HashMap<UnitId, WeavePlan>>,
    pub batch_calls: AtomicUsize,
    pub single_calls: AtomicUsize,
    pub fail_batches: AtomicBool,
    pub terminating: AtomicBool,
}

impl FakeHost {
    pub fn load(&self, unit: Unit) {
        self.units.lock().push(unit);
    }

    pub fn unload(&self, id: UnitId) {
        self.units.lock().retain(|u| u.id() != id);
    }

    /// Methods currently spliced into a unit.
    pub fn woven_methods(&self, id: UnitId) -> Vec<String> {
        self.woven
            .lock()
            .get(&id)
            .map(|plan| plan.methods.clone())
            .unwrap_or_default()
    }

    fn weave(&self, unit: &Unit, weaver: &dyn Weaver) {
        let plan = weaver.weave(unit);
        self.woven.lock().insert(unit.id(), plan);
        weaver.on_unit_woven(unit);
    }
}

impl HostRuntime for FakeHost {
    fn all_loaded_units(&self) -> Vec<Unit> {
        self.units.lock().clone()
    }

    fn is_modifiable(&self, _unit: &Unit) -> bool {
        true
    }

    fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }
}

impl Retransformer for FakeHost {
    fn retransform_batch(&self, units: &[Unit], weaver: &dyn Weaver) -> Result<(), RetransformError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(RetransformError::Rejected("batch refused".into()));
        }
        for unit in units {
            self.weave(unit, weaver);
        }
        Ok(())
    }

    fn retransform(&self, unit: &Unit, weaver: &dyn Weaver) -> Result<(), RetransformError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.weave(unit, weaver);
        Ok(())
    }
}

/// Metric sink that keeps every recorded value.
#[derive(Default)]
pub struct RecordingMetrics {
    pub values: Mutex<Vec<(String, f64, BTreeMap<String, String>)>>,
}

impl MetricSink for RecordingMetrics {
    fn record(&self, metric: &str, value: f64, tags: &BTreeMap<String, String>) {
        self.values.lock().push((metric.to_string(), value, tags.clone()));
    }
}

/// A service unit with `handle(Request)` and `close()`.
pub fn service(id: u64, name: &str) -> Unit {
    Unit::new(
        UnitId(id),
        LoaderId::Application(1),
        TypeDescriptor::new(name)
            .with_method(MethodDescriptor::new("handle").with_parameters(["Request"]))
            .with_method(MethodDescriptor::new("close")),
    )
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
