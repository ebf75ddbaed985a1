//! Discriminator extraction.
//!
//! Wire format: a mapping may name its builder with `$type` (or the older
//! spelling `$parser`). `$value`, when present, is the payload; otherwise the
//! mapping minus every `$`-prefixed key is. Non-mapping nodes are dispatched
//! on their kind name.

use crate::config::ConfigNode;
use crate::error::{Error, Result};

pub const TYPE_KEY: &str = "$type";
pub const LEGACY_TYPE_KEY: &str = "$parser";
pub const VALUE_KEY: &str = "$value";

/// Discriminator for mappings without a type key.
pub const UNTYPED: &str = "";

/// A node split into its builder name and payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Typed { name: String, payload: ConfigNode },
    Untyped(ConfigNode),
}

impl Directive {
    pub fn parse(node: &ConfigNode) -> Result<Self> {
        let map = match node {
            ConfigNode::Mapping(map) => map,
            other => {
                return Ok(Directive::Typed {
                    name: other.kind_name().to_string(),
                    payload: other.clone(),
                })
            }
        };

        let name = match (type_name(node, TYPE_KEY)?, type_name(node, LEGACY_TYPE_KEY)?) {
            (Some(a), Some(b)) if a != b => {
                return Err(Error::TypeError(format!(
                    "{} \"{}\" conflicts with {} \"{}\"",
                    TYPE_KEY, a, LEGACY_TYPE_KEY, b
                )))
            }
            (Some(a), _) => Some(a),
            (None, b) => b,
        };

        let payload = match map.get(VALUE_KEY) {
            Some(value) => value.clone(),
            None => ConfigNode::Mapping(
                map.iter()
                    .filter(|(k, _)| !k.starts_with('$'))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        };

        Ok(match name {
            Some(name) => Directive::Typed { name, payload },
            None => Directive::Untyped(payload),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Directive::Typed { name, .. } => name,
            Directive::Untyped(_) => UNTYPED,
        }
    }

    pub fn into_payload(self) -> ConfigNode {
        match self {
            Directive::Typed { payload, .. } => payload,
            Directive::Untyped(payload) => payload,
        }
    }
}

fn type_name(node: &ConfigNode, key: &str) -> Result<Option<String>> {
    match node.get(key) {
        None => Ok(None),
        Some(ConfigNode::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(Error::TypeError(format!(
            "{} must be a string, got {}",
            key,
            other.kind_name()
        ))),
    }
}
