// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The executable hook of one (unit, method) pair.
//!
//! Each bound action carries its own active flag. An action that returns an
//! error or panics is switched off for good and the hook keeps running the
//! remaining actions. The host never sees the failure.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::warn;

use crate::error::ActionError;
use crate::telemetry::AgentMetrics;

use super::action::{DataValues, ExecutionContext, HookAction, Invocation, SpanId};
use super::configuration::MethodHookConfiguration;

/// Shared hook that does nothing, returned for every lookup miss.
static NOOP: Lazy<Arc<Hook>> = Lazy::new(|| Arc::new(Hook::empty()));

/// An action together with its active flag.
pub struct BoundAction {
    action: Arc<dyn HookAction>,
    active: AtomicBool,
}

impl BoundAction {
    pub fn new(action: Arc<dyn HookAction>) -> Self {
        Self {
            action,
            active: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        self.action.name()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn fresh(&self) -> Self {
        Self::new(self.action.clone())
    }
}

/// State carried from method entry to method exit.
#[derive(Debug, Default)]
pub struct HookFrame {
    /// Values produced by entry calls.
    pub values: DataValues,
    /// Span opened at entry.
    pub span: Option<SpanId>,
}

/// Entry and exit action lists of one method.
pub struct Hook {
    configuration: Option<MethodHookConfiguration>,
    entry: Vec<BoundAction>,
    exit: Vec<BoundAction>,
    metrics: Option<Arc<AgentMetrics>>,
}

impl Hook {
    /// Create a hook from its configuration and built action lists.
    pub fn new(
        configuration: MethodHookConfiguration,
        entry: Vec<Arc<dyn HookAction>>,
        exit: Vec<Arc<dyn HookAction>>,
    ) -> Self {
        Self {
            configuration: Some(configuration),
            entry: entry.into_iter().map(BoundAction::new).collect(),
            exit: exit.into_iter().map(BoundAction::new).collect(),
            metrics: None,
        }
    }

    /// Report disabled actions to the given metrics.
    pub fn with_metrics(mut self, metrics: Arc<AgentMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn empty() -> Self {
        Self {
            configuration: None,
            entry: Vec::new(),
            exit: Vec::new(),
            metrics: None,
        }
    }

    /// The shared hook that does nothing.
    pub fn noop() -> Arc<Hook> {
        NOOP.clone()
    }

    /// Whether this hook was built from a configuration.
    pub fn is_noop(&self) -> bool {
        self.configuration.is_none()
    }

    /// The configuration this hook was built from.
    pub fn configuration(&self) -> Option<&MethodHookConfiguration> {
        self.configuration.as_ref()
    }

    /// Copy with every action active again.
    ///
    /// Action objects are shared with the original.
    pub fn reset_copy(&self) -> Self {
        Self {
            configuration: self.configuration.clone(),
            entry: self.entry.iter().map(BoundAction::fresh).collect(),
            exit: self.exit.iter().map(BoundAction::fresh).collect(),
            metrics: self.metrics.clone(),
        }
    }

    /// Number of entry and exit actions still active.
    pub fn active_action_count(&self) -> usize {
        self.entry
            .iter()
            .chain(self.exit.iter())
            .filter(|a| a.is_active())
            .count()
    }

    /// Names of the entry actions, in execution order.
    pub fn entry_action_names(&self) -> Vec<&str> {
        self.entry.iter().map(BoundAction::name).collect()
    }

    /// Names of the exit actions, in execution order.
    pub fn exit_action_names(&self) -> Vec<&str> {
        self.exit.iter().map(BoundAction::name).collect()
    }

    /// Run the entry actions.
    pub fn on_enter(&self, invocation: &Invocation<'_>) -> HookFrame {
        let mut frame = HookFrame::default();
        if self.entry.is_empty() {
            return frame;
        }
        let mut ctx = ExecutionContext {
            invocation,
            entry: None,
            values: &mut frame.values,
            span: &mut frame.span,
        };
        self.run(&self.entry, &mut ctx);
        frame
    }

    /// Run the exit actions with the frame produced at entry.
    pub fn on_exit(&self, mut frame: HookFrame, invocation: &Invocation<'_>) {
        if self.exit.is_empty() {
            return;
        }
        let mut values = DataValues::new();
        let mut ctx = ExecutionContext {
            invocation,
            entry: Some(&frame.values),
            values: &mut values,
            span: &mut frame.span,
        };
        self.run(&self.exit, &mut ctx);
    }

    fn run(&self, actions: &[BoundAction], ctx: &mut ExecutionContext<'_>) {
        for bound in actions {
            if !bound.is_active() {
                continue;
            }
            let result = catch_unwind(AssertUnwindSafe(|| bound.action.execute(ctx)))
                .unwrap_or_else(|payload| Err(ActionError::Panicked(panic_message(payload.as_ref()))));
            if let Err(err) = result {
                self.disable(bound, ctx.invocation, &err);
            }
        }
    }

    fn disable(&self, bound: &BoundAction, invocation: &Invocation<'_>, err: &ActionError) {
        // Only the thread that flips the flag reports it.
        if bound.active.swap(false, Ordering::AcqRel) {
            warn!(
                unit = %invocation.unit,
                method = invocation.method,
                action = bound.name(),
                error = %err,
                "Disabling failing hook action"
            );
            #[cfg(feature = "telemetry")]
            {
                if let Some(metrics) = &self.metrics {
                    metrics.record_action_disabled();
                }
            }
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("entry", &self.entry_action_names())
            .field("exit", &self.exit_action_names())
            .field("active", &self.active_action_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LoaderId, TypeDescriptor, Unit, UnitId};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        name: &'static str,
        calls: AtomicUsize,
        fail: bool,
        panic: bool,
    }

    impl Counting {
        fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail: false,
                panic: false,
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail: true,
                panic: false,
            })
        }

        fn panicking(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail: false,
                panic: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HookAction for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("boom");
            }
            if self.fail {
                return Err(ActionError::failed("nope"));
            }
            ctx.values.insert(self.name.to_string(), json!(true));
            Ok(())
        }
    }

    fn dynamic(action: &Arc<Counting>) -> Arc<dyn HookAction> {
        action.clone()
    }

    fn unit() -> Unit {
        Unit::new(UnitId(9), LoaderId::Application(1), TypeDescriptor::new("A"))
    }

    #[test]
    fn test_noop_hook_is_shared() {
        assert!(Arc::ptr_eq(&Hook::noop(), &Hook::noop()));
        assert!(Hook::noop().is_noop());

        let u = unit();
        let inv = Invocation::new(&u, "m()", &[]);
        let frame = Hook::noop().on_enter(&inv);
        assert!(frame.values.is_empty());
        Hook::noop().on_exit(frame, &inv);
    }

    #[test]
    fn test_failing_action_is_disabled_once() {
        let first = Counting::ok("first");
        let bad = Counting::failing("bad");
        let last = Counting::ok("last");
        let metrics = Arc::new(AgentMetrics::new());
        let hook = Hook::new(
            MethodHookConfiguration::default(),
            vec![dynamic(&first), dynamic(&bad), dynamic(&last)],
            vec![],
        )
        .with_metrics(metrics.clone());

        let u = unit();
        let inv = Invocation::new(&u, "m()", &[]);
        for _ in 0..3 {
            let frame = hook.on_enter(&inv);
            assert!(frame.values.contains_key("last"));
        }

        assert_eq!(first.calls(), 3);
        assert_eq!(bad.calls(), 1);
        assert_eq!(last.calls(), 3);
        assert_eq!(hook.active_action_count(), 2);
        #[cfg(feature = "telemetry")]
        assert_eq!(metrics.snapshot().actions_disabled, 1);
    }

    #[test]
    fn test_panicking_action_is_contained() {
        let bad = Counting::panicking("explode");
        let after = Counting::ok("after");
        let hook = Hook::new(MethodHookConfiguration::default(), vec![], vec![dynamic(&bad), dynamic(&after)]);

        let u = unit();
        let inv = Invocation::new(&u, "m()", &[]);
        hook.on_exit(hook.on_enter(&inv), &inv);
        hook.on_exit(hook.on_enter(&inv), &inv);

        assert_eq!(bad.calls(), 1);
        assert_eq!(after.calls(), 2);
    }

    #[test]
    fn test_reset_copy_reactivates() {
        let bad = Counting::failing("bad");
        let hook = Hook::new(MethodHookConfiguration::default(), vec![dynamic(&bad)], vec![]);

        let u = unit();
        let inv = Invocation::new(&u, "m()", &[]);
        hook.on_enter(&inv);
        assert_eq!(hook.active_action_count(), 0);

        let copy = hook.reset_copy();
        assert_eq!(copy.active_action_count(), 1);
        assert_eq!(hook.active_action_count(), 0);
        copy.on_enter(&inv);
        assert_eq!(bad.calls(), 2);
    }

    #[test]
    fn test_exit_sees_entry_values() {
        struct ReadsEntry;
        impl HookAction for ReadsEntry {
            fn name(&self) -> &str {
                "reads"
            }
            fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError> {
                if ctx.data("first").is_some() {
                    Ok(())
                } else {
                    Err(ActionError::failed("entry value missing"))
                }
            }
        }

        let hook = Hook::new(
            MethodHookConfiguration::default(),
            vec![dynamic(&Counting::ok("first"))],
            vec![Arc::new(ReadsEntry) as Arc<dyn HookAction>],
        );
        let u = unit();
        let inv = Invocation::new(&u, "m()", &[]);
        hook.on_exit(hook.on_enter(&inv), &inv);
        assert_eq!(hook.active_action_count(), 2);
    }
}
