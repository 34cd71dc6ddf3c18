// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Boolean matcher trees and name matchers.
//!
//! A [`Matcher`] is an AND/OR/NOT tree over leaf predicates. Evaluation is
//! pure and allocation-free except for case-insensitive substring tests.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A leaf predicate evaluated against some target.
pub trait Predicate<T: ?Sized> {
    fn test(&self, target: &T) -> bool;
}

/// Boolean combination of leaf predicates.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Matcher<P> {
    /// Accepts everything.
    #[default]
    Any,
    /// A single leaf predicate.
    Is(P),
    /// Negation.
    Not(Box<Matcher<P>>),
    /// All children must match (an empty list matches).
    All(Vec<Matcher<P>>),
    /// At least one child must match (an empty list never matches).
    AnyOf(Vec<Matcher<P>>),
}

impl<P> Matcher<P> {
    /// Evaluate the tree against a target.
    pub fn matches<T: ?Sized>(&self, target: &T) -> bool
    where
        P: Predicate<T>,
    {
        match self {
            Self::Any => true,
            Self::Is(p) => p.test(target),
            Self::Not(inner) => !inner.matches(target),
            Self::All(children) => children.iter().all(|c| c.matches(target)),
            Self::AnyOf(children) => children.iter().any(|c| c.matches(target)),
        }
    }

    /// Combine with another matcher using AND, flattening nested conjunctions.
    pub fn and(self, other: Matcher<P>) -> Self {
        match (self, other) {
            (Self::Any, m) | (m, Self::Any) => m,
            (Self::All(mut left), Self::All(right)) => {
                left.extend(right);
                Self::All(left)
            }
            (Self::All(mut left), m) => {
                left.push(m);
                Self::All(left)
            }
            (m, other) => Self::All(vec![m, other]),
        }
    }

    /// Combine with another matcher using OR.
    pub fn or(self, other: Matcher<P>) -> Self {
        match (self, other) {
            (Self::AnyOf(mut left), m) => {
                left.push(m);
                Self::AnyOf(left)
            }
            (m, other) => Self::AnyOf(vec![m, other]),
        }
    }

    /// Negate this matcher.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }
}

// ============================================================================
// Name matching
// ============================================================================

/// How a [`NameMatcher`] compares its pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchMode {
    #[default]
    Equals,
    StartsWith,
    EndsWith,
    Contains,
    Matches,
}

/// String matcher used for type, method, annotation and package names.
///
/// Regular expressions are compiled once at construction, so an invalid
/// pattern is rejected when the configuration is resolved.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    mode: MatchMode,
    pattern: String,
    ignore_case: bool,
    regex: Option<Regex>,
}

impl NameMatcher {
    /// Create a matcher, compiling the pattern when `mode` is [`MatchMode::Matches`].
    pub fn new(mode: MatchMode, pattern: impl Into<String>, ignore_case: bool) -> Result<Self, ConfigError> {
        let pattern = pattern.into();
        let regex = if mode == MatchMode::Matches {
            let anchored = format!("^(?:{})$", pattern);
            let compiled = RegexBuilder::new(&anchored)
                .case_insensitive(ignore_case)
                .build()
                .map_err(|e| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
            Some(compiled)
        } else {
            None
        };

        Ok(Self {
            mode,
            pattern,
            ignore_case,
            regex,
        })
    }

    /// Exact, case-sensitive match.
    pub fn equals(pattern: impl Into<String>) -> Self {
        Self::literal(MatchMode::Equals, pattern)
    }

    /// Prefix match.
    pub fn starts_with(pattern: impl Into<String>) -> Self {
        Self::literal(MatchMode::StartsWith, pattern)
    }

    /// Suffix match.
    pub fn ends_with(pattern: impl Into<String>) -> Self {
        Self::literal(MatchMode::EndsWith, pattern)
    }

    /// Substring match.
    pub fn contains(pattern: impl Into<String>) -> Self {
        Self::literal(MatchMode::Contains, pattern)
    }

    /// Full regular expression match.
    pub fn regex(pattern: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(MatchMode::Matches, pattern, false)
    }

    fn literal(mode: MatchMode, pattern: impl Into<String>) -> Self {
        Self {
            mode,
            pattern: pattern.into(),
            ignore_case: false,
            regex: None,
        }
    }

    /// Toggle case-insensitive comparison for literal modes.
    pub fn ignoring_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Test a name against this matcher.
    pub fn matches(&self, name: &str) -> bool {
        let pattern = self.pattern.as_str();
        match self.mode {
            MatchMode::Matches => self.regex.as_ref().is_some_and(|r| r.is_match(name)),
            MatchMode::Equals if self.ignore_case => name.eq_ignore_ascii_case(pattern),
            MatchMode::Equals => name == pattern,
            MatchMode::StartsWith if self.ignore_case => name
                .get(..pattern.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(pattern)),
            MatchMode::StartsWith => name.starts_with(pattern),
            MatchMode::EndsWith if self.ignore_case => name
                .len()
                .checked_sub(pattern.len())
                .and_then(|start| name.get(start..))
                .is_some_and(|tail| tail.eq_ignore_ascii_case(pattern)),
            MatchMode::EndsWith => name.ends_with(pattern),
            MatchMode::Contains if self.ignore_case => name
                .to_ascii_lowercase()
                .contains(&pattern.to_ascii_lowercase()),
            MatchMode::Contains => name.contains(pattern),
        }
    }
}

impl PartialEq for NameMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.mode == other.mode && self.pattern == other.pattern && self.ignore_case == other.ignore_case
    }
}

impl Eq for NameMatcher {}

impl Predicate<str> for NameMatcher {
    fn test(&self, target: &str) -> bool {
        self.matches(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_modes() {
        assert!(NameMatcher::equals("com.acme.A").matches("com.acme.A"));
        assert!(!NameMatcher::equals("com.acme.A").matches("com.acme.AB"));
        assert!(NameMatcher::starts_with("com.acme.").matches("com.acme.A"));
        assert!(NameMatcher::ends_with("Servlet").matches("com.acme.HttpServlet"));
        assert!(NameMatcher::contains("acme").matches("com.acme.A"));
    }

    #[test]
    fn test_ignore_case() {
        let matcher = NameMatcher::starts_with("COM.ACME").ignoring_case();
        assert!(matcher.matches("com.acme.Service"));
        assert!(!matcher.matches("co"));

        let matcher = NameMatcher::ends_with("servlet").ignoring_case();
        assert!(matcher.matches("HttpServlet"));
        assert!(!matcher.matches("let"));

        assert!(NameMatcher::contains("ACME").ignoring_case().matches("com.acme.x"));
    }

    #[test]
    fn test_regex_is_anchored() {
        let matcher = NameMatcher::regex("do(Get|Post)").unwrap();
        assert!(matcher.matches("doGet"));
        assert!(!matcher.matches("doGetAll"));
        assert!(!matcher.matches("xdoPost"));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = NameMatcher::regex("(unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_matcher_tree() {
        let starts = Matcher::Is(NameMatcher::starts_with("get"));
        let setter = Matcher::Is(NameMatcher::starts_with("set"));
        let excluded = Matcher::Is(NameMatcher::equals("getClass"));

        let tree = starts.or(setter).and(excluded.not());
        assert!(tree.matches("getName"));
        assert!(tree.matches("setName"));
        assert!(!tree.matches("getClass"));
        assert!(!tree.matches("run"));
    }

    #[test]
    fn test_empty_combinators() {
        let all: Matcher<NameMatcher> = Matcher::All(vec![]);
        let any: Matcher<NameMatcher> = Matcher::AnyOf(vec![]);
        assert!(all.matches("x"));
        assert!(!any.matches("x"));
        assert!(Matcher::<NameMatcher>::Any.matches("x"));
    }

    #[test]
    fn test_and_with_any_is_identity() {
        let leaf = Matcher::Is(NameMatcher::equals("a"));
        assert_eq!(Matcher::Any.and(leaf.clone()), leaf);
    }
}
