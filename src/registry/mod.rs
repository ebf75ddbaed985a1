//! Type registry and dispatcher
//!
//! A [`TypeRegistry`] maps discriminator strings to builder functions. It is
//! assembled once through a [`RegistryBuilder`] and is read-only afterwards;
//! clones share the same frozen table.
//!
//! ```text
//! ConfigNode ──Directive::parse──▶ (name, payload)
//!                                      │ lookup(name)
//!                                      ▼
//!                              builder(ctx, payload) ──▶ T
//! ```
//!
//! Builders receive a caller-defined context `C` through which they resolve
//! nested nodes, so recursion goes back through the same dispatcher.

mod directive;

pub use directive::{Directive, LEGACY_TYPE_KEY, TYPE_KEY, UNTYPED, VALUE_KEY};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::ConfigNode;
use crate::error::{Error, Result};

/// Builder signature: build a `T` from a normalized payload.
pub type BuildFn<C, T> = Arc<dyn Fn(&C, ConfigNode) -> Result<T> + Send + Sync>;

/// Outcome of attempting to build a node, keeping "no builder for this"
/// apart from genuine failures.
#[derive(Debug)]
pub enum Attempt<T> {
    Built(T),
    Unsupported(Error),
    Failed(Error),
}

impl<T> From<Result<T>> for Attempt<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Attempt::Built(value),
            Err(e) if e.is_unsupported() => Attempt::Unsupported(e),
            Err(e) => Attempt::Failed(e),
        }
    }
}

/// Mutable registration phase.
pub struct RegistryBuilder<C, T> {
    kind: &'static str,
    builders: HashMap<String, BuildFn<C, T>>,
}

impl<C, T> RegistryBuilder<C, T> {
    /// `kind` names what this registry produces, e.g. `"stream dialer"`.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            builders: HashMap::new(),
        }
    }

    /// Register a builder. Re-registering a name replaces the previous builder.
    pub fn register<F>(mut self, name: &str, build: F) -> Self
    where
        F: Fn(&C, ConfigNode) -> Result<T> + Send + Sync + 'static,
    {
        if self.builders.insert(name.to_string(), Arc::new(build)).is_some() {
            debug!("Replacing {} builder for type {:?}", self.kind, name);
        }
        self
    }

    /// Freeze the table.
    pub fn build(self) -> TypeRegistry<C, T> {
        TypeRegistry {
            kind: self.kind,
            builders: Arc::new(self.builders),
        }
    }
}

/// Frozen discriminator → builder table.
pub struct TypeRegistry<C, T> {
    kind: &'static str,
    builders: Arc<HashMap<String, BuildFn<C, T>>>,
}

impl<C, T> Clone for TypeRegistry<C, T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            builders: Arc::clone(&self.builders),
        }
    }
}

impl<C, T> TypeRegistry<C, T> {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn supports(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Registered discriminators, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Dispatch `node` to its builder. `role` names the field being resolved
    /// and ends up in the error breadcrumb.
    pub fn resolve(&self, ctx: &C, role: &str, node: &ConfigNode) -> Result<T> {
        let directive = Directive::parse(node)?;
        let name = directive.name().to_string();
        let build = self.builders.get(&name).ok_or_else(|| {
            Error::Unsupported(format!("no {} builder for type {:?}", self.kind, name))
        })?;

        trace!("Building {} {:?} for {}", self.kind, name, role);
        build(ctx, directive.into_payload()).map_err(|e| Error::Build {
            kind: if name.is_empty() { self.kind.to_string() } else { name },
            role: role.to_string(),
            cause: Box::new(e),
        })
    }

    /// Like [`resolve`](Self::resolve), with unsupported nodes reported separately.
    pub fn attempt(&self, ctx: &C, role: &str, node: &ConfigNode) -> Attempt<T> {
        self.resolve(ctx, role, node).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> TypeRegistry<(), String> {
        RegistryBuilder::new("greeting")
            .register("string", |_, node| Ok(format!("str:{}", node.as_str().unwrap_or_default())))
            .register("nil", |_, _| Ok("nothing".to_string()))
            .register(UNTYPED, |_, node| Ok(format!("untyped:{}", node.to_json())))
            .register("fail", |_, _| Err(Error::Config("cipher must not be empty".into())))
            .build()
    }

    #[test]
    fn test_dispatch_by_kind_and_type() {
        let reg = registry();
        assert_eq!(reg.resolve(&(), "root", &"hi".into()).unwrap(), "str:hi");
        assert_eq!(reg.resolve(&(), "root", &ConfigNode::Null).unwrap(), "nothing");

        let node = ConfigNode::from(json!({"$type": "string", "$value": "there"}));
        assert_eq!(reg.resolve(&(), "root", &node).unwrap(), "str:there");

        let node = ConfigNode::from(json!({"a": 1, "$note": "x"}));
        assert_eq!(reg.resolve(&(), "root", &node).unwrap(), r#"untyped:{"a":1}"#);
    }

    #[test]
    fn test_unregistered_type_is_unsupported() {
        let reg = registry();
        let node = ConfigNode::from(json!({"$type": "quic"}));
        assert!(matches!(reg.attempt(&(), "root", &node), Attempt::Unsupported(_)));
        let err = reg.resolve(&(), "root", &ConfigNode::from(json!([1]))).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_builder_errors_get_breadcrumbs() {
        let reg = registry();
        let node = ConfigNode::from(json!({"$type": "fail"}));
        match reg.attempt(&(), "transport", &node) {
            Attempt::Failed(Error::Build { kind, role, cause }) => {
                assert_eq!(kind, "fail");
                assert_eq!(role, "transport");
                assert!(matches!(*cause, Error::Config(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_frozen_registry_is_shared() {
        let reg = registry();
        let copy = reg.clone();
        assert!(Arc::ptr_eq(&reg.builders, &copy.builders));
        assert_eq!(copy.names(), vec!["", "fail", "nil", "string"]);
    }
}
