// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scope definitions: type-level and method-level predicates.

use crate::types::{MethodDescriptor, MethodKind, TypeDescriptor, Visibility};

use super::matcher::{Matcher, NameMatcher, Predicate};

/// Leaf predicate over a [`TypeDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypePredicate {
    /// Fully-qualified type name.
    Name(NameMatcher),
    /// Any class in the superclass chain.
    SuperClass(NameMatcher),
    /// Any implemented interface.
    Interface(NameMatcher),
    /// Any type-level annotation.
    Annotation(NameMatcher),
    /// Whether the type is an interface.
    IsInterface(bool),
}

impl Predicate<TypeDescriptor> for TypePredicate {
    fn test(&self, target: &TypeDescriptor) -> bool {
        match self {
            Self::Name(m) => m.matches(&target.name),
            Self::SuperClass(m) => target.superclasses.iter().any(|s| m.matches(s)),
            Self::Interface(m) => target.interfaces.iter().any(|i| m.matches(i)),
            Self::Annotation(m) => target.annotations.iter().any(|a| m.matches(a)),
            Self::IsInterface(flag) => target.is_interface == *flag,
        }
    }
}

/// Leaf predicate over a [`MethodDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodPredicate {
    Name(NameMatcher),
    /// Visibility must be one of the listed values.
    Visibility(Vec<Visibility>),
    Kind(MethodKind),
    /// Exact number of parameters.
    ArgumentCount(usize),
    /// Exact parameter type list.
    Arguments(Vec<String>),
    ReturnType(NameMatcher),
    Annotation(NameMatcher),
    IsAbstract(bool),
    IsStatic(bool),
    IsSynchronized(bool),
    /// The method overrides or implements one declared by a matching supertype.
    InheritedFrom(NameMatcher),
}

impl Predicate<MethodDescriptor> for MethodPredicate {
    fn test(&self, target: &MethodDescriptor) -> bool {
        match self {
            Self::Name(m) => m.matches(&target.name),
            Self::Visibility(allowed) => allowed.contains(&target.visibility),
            Self::Kind(kind) => target.kind == *kind,
            Self::ArgumentCount(count) => target.parameter_types.len() == *count,
            Self::Arguments(types) => &target.parameter_types == types,
            Self::ReturnType(m) => m.matches(&target.return_type),
            Self::Annotation(m) => target.annotations.iter().any(|a| m.matches(a)),
            Self::IsAbstract(flag) => target.is_abstract == *flag,
            Self::IsStatic(flag) => target.is_static == *flag,
            Self::IsSynchronized(flag) => target.is_synchronized == *flag,
            Self::InheritedFrom(m) => target.inherited_from.iter().any(|s| m.matches(s)),
        }
    }
}

/// A named predicate over unit and method shape.
///
/// A scope matches a method when its type matcher accepts the declaring
/// type and its method matcher accepts the method. Type initializers are
/// only matched when the method matcher explicitly asks for them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScopeDefinition {
    pub name: String,
    pub types: Matcher<TypePredicate>,
    pub methods: Matcher<MethodPredicate>,
}

impl ScopeDefinition {
    /// Create a scope with the given matchers.
    pub fn new(
        name: impl Into<String>,
        types: Matcher<TypePredicate>,
        methods: Matcher<MethodPredicate>,
    ) -> Self {
        Self {
            name: name.into(),
            types,
            methods,
        }
    }

    /// Type-level check.
    pub fn matches_type(&self, descriptor: &TypeDescriptor) -> bool {
        self.types.matches(descriptor)
    }

    /// Method-level check, assuming the type already matched.
    pub fn matches_method(&self, method: &MethodDescriptor) -> bool {
        if method.kind == MethodKind::TypeInitializer && !self.requests_type_initializer() {
            return false;
        }
        self.methods.matches(method)
    }

    /// Combined type and method check.
    pub fn matches(&self, descriptor: &TypeDescriptor, method: &MethodDescriptor) -> bool {
        self.matches_type(descriptor) && self.matches_method(method)
    }

    fn requests_type_initializer(&self) -> bool {
        fn walk(m: &Matcher<MethodPredicate>) -> bool {
            match m {
                Matcher::Is(MethodPredicate::Kind(MethodKind::TypeInitializer)) => true,
                Matcher::All(children) | Matcher::AnyOf(children) => children.iter().any(walk),
                _ => false,
            }
        }
        walk(&self.methods)
    }
}
