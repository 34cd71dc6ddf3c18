// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Retransformation scheduling: pending set, applied state and batch cycle.

mod applied;
mod pending;
mod scheduler;

pub use applied::AppliedStateStore;
pub use pending::{PendingMarker, PendingSet};
pub use scheduler::{BatchReport, DrainReport, RetransformScheduler};
