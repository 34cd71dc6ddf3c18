// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types shared by every subsystem.
//!
//! A [`Unit`] is one loaded code entity (a class) as reported by the host
//! runtime. The runtime owns units; everything in this crate keeps
//! [`WeakUnit`] back-references so that tracking a unit never prevents the
//! runtime from unloading it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};

// ============================================================================
// Identity
// ============================================================================

/// Stable numeric identity of a loaded unit, assigned by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of the loader that defined a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderId {
    /// The runtime's own bootstrap loader.
    #[default]
    Bootstrap,
    /// The loader hosting this instrumentation system.
    Agent,
    /// Any application loader.
    Application(u64),
}

// ============================================================================
// Descriptors
// ============================================================================

/// Visibility of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Package,
    Private,
}

/// Kind of a method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    #[default]
    Method,
    Constructor,
    TypeInitializer,
}

/// Shape of one method declared by a unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MethodDescriptor {
    pub name: String,
    pub parameter_types: Vec<String>,
    pub return_type: String,
    pub visibility: Visibility,
    pub kind: MethodKind,
    pub is_abstract: bool,
    pub is_static: bool,
    pub is_synchronized: bool,
    pub annotations: Vec<String>,
    /// Supertypes that declare a method with the same signature.
    pub inherited_from: Vec<String>,
}

impl MethodDescriptor {
    /// Create a public instance method with no parameters returning `void`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            return_type: "void".to_string(),
            ..Default::default()
        }
    }

    /// Create a public constructor.
    pub fn constructor() -> Self {
        Self {
            name: "<init>".to_string(),
            return_type: "void".to_string(),
            kind: MethodKind::Constructor,
            ..Default::default()
        }
    }

    /// Set the parameter types.
    pub fn with_parameters<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set the return type.
    pub fn returning(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = return_type.into();
        self
    }

    /// Set the visibility.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Add an annotation.
    pub fn annotated(mut self, annotation: impl Into<String>) -> Self {
        self.annotations.push(annotation.into());
        self
    }

    /// Mark as declared by the given supertype as well.
    pub fn inherited(mut self, supertype: impl Into<String>) -> Self {
        self.inherited_from.push(supertype.into());
        self
    }

    /// Mark as abstract.
    pub fn abstract_method(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Mark as static.
    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Signature used as hook key, e.g. `doGet(Request,Response)`.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.parameter_types.join(","))
    }

    pub fn is_constructor(&self) -> bool {
        self.kind == MethodKind::Constructor
    }
}

/// Shape of a loaded type as seen by the matchers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeDescriptor {
    pub name: String,
    /// Superclass chain, nearest first.
    pub superclasses: Vec<String>,
    /// All implemented interfaces, including inherited ones.
    pub interfaces: Vec<String>,
    pub annotations: Vec<String>,
    pub is_interface: bool,
    pub methods: Vec<MethodDescriptor>,
}

impl TypeDescriptor {
    /// Create a descriptor for a concrete class.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the superclass chain.
    pub fn extending<I, S>(mut self, superclasses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.superclasses = superclasses.into_iter().map(Into::into).collect();
        self
    }

    /// Set the implemented interfaces.
    pub fn implementing<I, S>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces = interfaces.into_iter().map(Into::into).collect();
        self
    }

    /// Add an annotation.
    pub fn annotated(mut self, annotation: impl Into<String>) -> Self {
        self.annotations.push(annotation.into());
        self
    }

    /// Add a method.
    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    /// Package prefix of the type name (empty for the default package).
    pub fn package(&self) -> &str {
        self.name.rsplit_once('.').map(|(pkg, _)| pkg).unwrap_or("")
    }

    /// Find a method by signature.
    pub fn method(&self, signature: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.signature() == signature)
    }
}

// ============================================================================
// Units
// ============================================================================

/// Data behind a [`Unit`] handle.
#[derive(Debug)]
pub struct UnitInfo {
    pub id: UnitId,
    pub loader: LoaderId,
    pub descriptor: TypeDescriptor,
}

/// Shared handle to a loaded unit.
///
/// Owned by the host runtime. Equality and hashing use the unit id only.
#[derive(Debug, Clone)]
pub struct Unit(Arc<UnitInfo>);

impl Unit {
    /// Create a new unit handle.
    pub fn new(id: UnitId, loader: LoaderId, descriptor: TypeDescriptor) -> Self {
        Self(Arc::new(UnitInfo {
            id,
            loader,
            descriptor,
        }))
    }

    pub fn id(&self) -> UnitId {
        self.0.id
    }

    pub fn loader(&self) -> LoaderId {
        self.0.loader
    }

    /// Fully-qualified type name.
    pub fn name(&self) -> &str {
        &self.0.descriptor.name
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.0.descriptor
    }

    /// Create a non-owning back-reference.
    pub fn downgrade(&self) -> WeakUnit {
        WeakUnit {
            id: self.0.id,
            inner: Arc::downgrade(&self.0),
        }
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Unit {}

impl std::hash::Hash for Unit {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name(), self.id())
    }
}

/// Non-owning reference to a unit.
///
/// Upgrading fails once the host runtime has dropped the unit.
#[derive(Debug, Clone)]
pub struct WeakUnit {
    id: UnitId,
    inner: Weak<UnitInfo>,
}

impl WeakUnit {
    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn upgrade(&self) -> Option<Unit> {
        self.inner.upgrade().map(Unit)
    }

    /// Whether the referenced unit has been unloaded.
    pub fn is_dead(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_signature() {
        let method = MethodDescriptor::new("doGet").with_parameters(["Request", "Response"]);
        assert_eq!(method.signature(), "doGet(Request,Response)");
        assert_eq!(MethodDescriptor::new("run").signature(), "run()");
    }

    #[test]
    fn test_type_package() {
        assert_eq!(TypeDescriptor::new("com.acme.Service").package(), "com.acme");
        assert_eq!(TypeDescriptor::new("Main").package(), "");
    }

    #[test]
    fn test_unit_identity_equality() {
        let a = Unit::new(UnitId(1), LoaderId::Bootstrap, TypeDescriptor::new("A"));
        let b = Unit::new(UnitId(1), LoaderId::Application(3), TypeDescriptor::new("B"));
        let c = Unit::new(UnitId(2), LoaderId::Bootstrap, TypeDescriptor::new("A"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_weak_unit_dies_with_owner() {
        let unit = Unit::new(UnitId(7), LoaderId::Bootstrap, TypeDescriptor::new("X"));
        let weak = unit.downgrade();
        assert_eq!(weak.id(), UnitId(7));
        assert!(weak.upgrade().is_some());

        drop(unit);
        assert!(weak.is_dead());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_descriptor_deserialize_defaults() {
        let json = r#"{"name": "com.acme.Api", "methods": [{"name": "call", "parameterTypes": ["int"]}]}"#;
        let descriptor: TypeDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.methods.len(), 1);
        assert_eq!(descriptor.methods[0].visibility, Visibility::Public);
        assert!(descriptor.method("call(int)").is_some());
    }
}
