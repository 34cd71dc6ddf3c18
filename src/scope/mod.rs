// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scope matching.
//!
//! Scopes are pure predicates over unit and method metadata. They are
//! resolved from configuration once and never mutated afterwards.

mod definition;
mod matcher;

pub use definition::{MethodPredicate, ScopeDefinition, TypePredicate};
pub use matcher::{MatchMode, Matcher, NameMatcher, Predicate};
