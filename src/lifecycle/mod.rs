// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Discovery of loaded units.

mod tracker;

pub use tracker::{ClassLifecycleTracker, DiscoveryListener, TickOutcome};
