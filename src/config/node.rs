//! Decoded configuration values.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

use crate::error::{Error, Result};

/// One decoded configuration value. Immutable once built.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConfigNode {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Sequence(Vec<ConfigNode>),
    Mapping(BTreeMap<String, ConfigNode>),
}

impl ConfigNode {
    /// Kind name used as the discriminator for non-mapping nodes.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ConfigNode::Null => "nil",
            ConfigNode::Bool(_) => "bool",
            ConfigNode::Number(_) => "number",
            ConfigNode::String(_) => "string",
            ConfigNode::Sequence(_) => "sequence",
            ConfigNode::Mapping(_) => "mapping",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConfigNode::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigNode::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, ConfigNode>> {
        match self {
            ConfigNode::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key on a mapping node.
    pub fn get(&self, key: &str) -> Option<&ConfigNode> {
        self.as_mapping().and_then(|map| map.get(key))
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn to_json(&self) -> Value {
        match self {
            ConfigNode::Null => Value::Null,
            ConfigNode::Bool(b) => Value::Bool(*b),
            ConfigNode::Number(n) => Value::Number(n.clone()),
            ConfigNode::String(s) => Value::String(s.clone()),
            ConfigNode::Sequence(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            ConfigNode::Mapping(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Decode this node into a typed payload.
    ///
    /// Payload structs use `#[serde(deny_unknown_fields)]`, so stray keys are
    /// reported as schema errors under `path`.
    pub fn decode_as<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        serde_json::from_value(self.to_json()).map_err(|e| Error::schema(path, e))
    }
}

impl From<Value> for ConfigNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ConfigNode::Null,
            Value::Bool(b) => ConfigNode::Bool(b),
            Value::Number(n) => ConfigNode::Number(n),
            Value::String(s) => ConfigNode::String(s),
            Value::Array(items) => ConfigNode::Sequence(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                ConfigNode::Mapping(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<&str> for ConfigNode {
    fn from(s: &str) -> Self {
        ConfigNode::String(s.to_string())
    }
}

impl TryFrom<serde_yaml::Value> for ConfigNode {
    type Error = Error;

    fn try_from(value: serde_yaml::Value) -> Result<Self> {
        use serde_yaml::Value as Yaml;

        Ok(match value {
            Yaml::Null => ConfigNode::Null,
            Yaml::Bool(b) => ConfigNode::Bool(b),
            Yaml::Number(n) => ConfigNode::Number(yaml_number(&n)?),
            Yaml::String(s) => ConfigNode::String(s),
            Yaml::Sequence(items) => ConfigNode::Sequence(
                items
                    .into_iter()
                    .map(ConfigNode::try_from)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Yaml::Mapping(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    let key = match k {
                        Yaml::String(s) => s,
                        Yaml::Number(n) => n.to_string(),
                        Yaml::Bool(b) => b.to_string(),
                        other => {
                            return Err(Error::Decode(format!(
                                "mapping key must be a scalar, got {:?}",
                                other
                            )))
                        }
                    };
                    if out.insert(key.clone(), ConfigNode::try_from(v)?).is_some() {
                        return Err(Error::Decode(format!("duplicate mapping key {:?}", key)));
                    }
                }
                ConfigNode::Mapping(out)
            }
            Yaml::Tagged(tagged) => ConfigNode::try_from(tagged.value)?,
        })
    }
}

fn yaml_number(n: &serde_yaml::Number) -> Result<Number> {
    if let Some(i) = n.as_i64() {
        Ok(Number::from(i))
    } else if let Some(u) = n.as_u64() {
        Ok(Number::from(u))
    } else {
        n.as_f64()
            .and_then(Number::from_f64)
            .ok_or_else(|| Error::Decode(format!("unrepresentable number {}", n)))
    }
}

impl Serialize for ConfigNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConfigNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Value::deserialize(deserializer).map(ConfigNode::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Payload {
        address: String,
        #[serde(default)]
        dialer: ConfigNode,
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ConfigNode::Null.kind_name(), "nil");
        assert_eq!(ConfigNode::from("x").kind_name(), "string");
        assert_eq!(ConfigNode::from(json!([1])).kind_name(), "sequence");
        assert_eq!(ConfigNode::from(json!({"a": 1})).kind_name(), "mapping");
    }

    #[test]
    fn test_decode_as_keeps_nested_nodes() {
        let node = ConfigNode::from(json!({
            "address": "exit.example.com:4321",
            "dialer": {"$type": "shadowsocks", "endpoint": "entry.example.com:4321"},
        }));
        let payload: Payload = node.decode_as("endpoint").unwrap();
        assert_eq!(payload.address, "exit.example.com:4321");
        assert_eq!(payload.dialer.get("$type").and_then(|v| v.as_str()), Some("shadowsocks"));
    }

    #[test]
    fn test_decode_as_rejects_unknown_fields() {
        let node = ConfigNode::from(json!({"address": "a:1", "bogus": true}));
        let err = node.decode_as::<Payload>("endpoint").unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_missing_dialer_defaults_to_null() {
        let node = ConfigNode::from(json!({"address": "a:1"}));
        let payload: Payload = node.decode_as("endpoint").unwrap();
        assert!(payload.dialer.is_null());
    }
}
