//! `iptable` / `ip-table`: route by destination IP
//!
//! ```yaml
//! $type: iptable
//! table:
//!   - ip: 10.0.0.0/8
//!     dialer: {$type: nil}
//!   - ip: [192.168.0.0/16, 2001:db8::/32]
//!     dialer: ss://...
//!   - dialer: ss://...        # no ip: default route
//! ```
//!
//! The transport form uses `transport` instead of `dialer` in each entry.

use std::sync::Arc;

use ipnet::IpNet;
use serde::{Deserialize, Deserializer};

use crate::common::{ConnType, ConnectionProviderInfo, Result};
use crate::config::ConfigNode;
use crate::error::Error;
use crate::iptable::{parse_prefix, IpTable, IpTablePacketListener, IpTableStreamDialer, SharedIpTablePacketListener};
use crate::transport::{Provided, SharedPacketListener, SharedStreamDialer, TransportPair};

use super::{Provider, ProviderBuilder};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IpTableConfig {
    table: Vec<IpTableEntry>,
    #[serde(default)]
    fallback: Option<ConfigNode>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IpTableEntry {
    #[serde(default)]
    ip: Option<IpList>,
    #[serde(default, deserialize_with = "present")]
    dialer: Option<ConfigNode>,
    #[serde(default, deserialize_with = "present")]
    transport: Option<ConfigNode>,
}

/// Keeps an explicit `null` (a direct dialer) apart from a missing field.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<ConfigNode>, D::Error> {
    ConfigNode::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IpList {
    One(String),
    Many(Vec<String>),
}

impl IpList {
    fn prefixes(&self) -> Result<Vec<IpNet>> {
        let texts: Vec<&str> = match self {
            IpList::One(text) => vec![text.as_str()],
            IpList::Many(texts) => texts.iter().map(String::as_str).collect(),
        };
        texts
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .map(parse_prefix)
            .collect()
    }
}

/// Compiled routes, before they are split into a concrete router.
struct Routes<T> {
    entries: Vec<(Vec<IpNet>, T)>,
    default: Option<T>,
}

impl<T> Routes<T> {
    /// Compile every entry's `field` with `build`.
    fn compile<F>(node: &ConfigNode, field: &str, build: F) -> Result<Self>
    where
        F: Fn(&str, &ConfigNode) -> Result<T>,
    {
        let config: IpTableConfig = node.decode_as("iptable config")?;
        if config.table.is_empty() {
            return Err(Error::Config("iptable config 'table' must not be empty".into()));
        }

        let mut routes = Routes {
            entries: Vec::with_capacity(config.table.len()),
            default: None,
        };
        for (i, entry) in config.table.iter().enumerate() {
            let target = match (field, &entry.dialer, &entry.transport) {
                ("dialer", Some(node), None) | ("transport", None, Some(node)) => node,
                _ => {
                    return Err(Error::schema(
                        format!("table[{}]", i),
                        format!("entry must set '{}' and nothing else", field),
                    ))
                }
            };
            let prefixes = match &entry.ip {
                Some(list) => list.prefixes().map_err(|e| Error::schema(format!("table[{}].ip", i), e))?,
                None => Vec::new(),
            };

            let value = build(&format!("table[{}].{}", i, field), target)?;
            if prefixes.is_empty() {
                routes.set_default(value)?;
            } else {
                routes.entries.push((prefixes, value));
            }
        }
        if let Some(fallback) = &config.fallback {
            let value = build("fallback", fallback)?;
            routes.set_default(value)?;
        }
        Ok(routes)
    }

    fn set_default(&mut self, value: T) -> Result<()> {
        if self.default.is_some() {
            return Err(Error::Config("multiple default dialers specified".into()));
        }
        self.default = Some(value);
        Ok(())
    }

    fn map<U>(&self, f: impl Fn(&T) -> U) -> Routes<U> {
        Routes {
            entries: self.entries.iter().map(|(p, v)| (p.clone(), f(v))).collect(),
            default: self.default.as_ref().map(f),
        }
    }

    fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v).chain(self.default.iter())
    }
}

/// Composite metadata: the first hop depends on the destination.
fn composite_info<'a, T: ?Sized + 'a>(legs: impl Iterator<Item = &'a Provided<T>>) -> ConnectionProviderInfo {
    ConnectionProviderInfo::new(ConnType::combine(legs.map(Provided::conn_type)), "")
}

fn build_stream_dialer(routes: &Routes<SharedStreamDialer>) -> SharedStreamDialer {
    let mut table = IpTable::new();
    for (prefixes, dialer) in &routes.entries {
        for prefix in prefixes {
            table.add_prefix(*prefix, dialer.shared());
        }
    }
    let mut dialer = IpTableStreamDialer::new(table);
    if let Some(default) = &routes.default {
        dialer = dialer.with_default(default.shared());
    }
    SharedStreamDialer::new(composite_info(routes.values()), Arc::new(dialer))
}

fn build_packet_listener(routes: &Routes<SharedPacketListener>) -> SharedPacketListener {
    let mut listener = IpTablePacketListener::new();
    for (prefixes, route) in &routes.entries {
        listener.add_route(prefixes, route.shared());
    }
    if let Some(default) = &routes.default {
        listener = listener.with_default(default.shared());
    }
    let listener = SharedIpTablePacketListener::from(listener);
    SharedPacketListener::new(composite_info(routes.values()), Arc::new(listener))
}

pub(super) fn register(builder: ProviderBuilder) -> ProviderBuilder {
    let mut builder = builder;
    for name in ["iptable", "ip-table"] {
        builder = builder
            .stream_dialer(name, |p, node| {
                let routes = Routes::compile(&node, "dialer", |role, n| p.stream_dialer(role, n))?;
                Ok(build_stream_dialer(&routes))
            })
            .packet_listener(name, |p, node| {
                let routes = Routes::compile(&node, "dialer", |role, n| p.packet_listener(role, n))?;
                Ok(build_packet_listener(&routes))
            })
            .transport(name, |p, node| {
                let routes = Routes::compile(&node, "transport", |role, n| p.transport(role, n))?;
                Ok(TransportPair {
                    stream_dialer: build_stream_dialer(&routes.map(|pair| pair.stream_dialer.clone())),
                    packet_listener: build_packet_listener(&routes.map(|pair| pair.packet_listener.clone())),
                })
            });
    }
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Address;
    use crate::config::decode;

    const SS: &str = "ss://Y2hhY2hhMjAtaWV0Zi1wb2x5MTMwNTpTRUNSRVQ@example.com:4321/";

    #[test]
    fn test_composite_conn_type() {
        let provider = Provider::new();
        let mixed = decode(&format!(
            "{{$type: iptable, table: [{{ip: 10.0.0.0/8, dialer: null}}, {{dialer: '{}'}}]}}",
            SS
        ))
        .unwrap();
        let dialer = provider.stream_dialer("dialer", &mixed).unwrap();
        assert_eq!(dialer.conn_type(), ConnType::Partial);
        assert_eq!(dialer.first_hop(), "");

        let direct = decode("{$type: ip-table, table: [{ip: [10.0.0.0/8, '::1'], dialer: null}], fallback: null}").unwrap();
        assert_eq!(provider.stream_dialer("dialer", &direct).unwrap().conn_type(), ConnType::Direct);

        let tunneled = decode(&format!("{{$type: iptable, table: [{{ip: 1.1.1.1, dialer: '{0}'}}, {{dialer: '{0}'}}]}}", SS)).unwrap();
        assert_eq!(provider.packet_listener("listener", &tunneled).unwrap().conn_type(), ConnType::Tunneled);
    }

    #[test]
    fn test_table_validation() {
        let provider = Provider::new();
        let cases = [
            ("{$type: iptable, table: []}", "must not be empty"),
            ("{$type: iptable, table: [{dialer: null}, {ip: '', dialer: null}]}", "multiple default dialers"),
            ("{$type: iptable, table: [{dialer: null}], fallback: {$type: block}}", "multiple default dialers"),
            ("{$type: iptable, table: [{ip: 10.0.0.0/33, dialer: null}]}", "not a valid IP address"),
            ("{$type: iptable, table: [{ip: 10.0.0.1}]}", "must set 'dialer'"),
        ];
        for (text, expected) in cases {
            let err = provider.stream_dialer("dialer", &decode(text).unwrap()).unwrap_err();
            assert!(err.to_string().contains(expected), "{}: {}", text, err);
        }
    }

    #[tokio::test]
    async fn test_routes_to_blocked_entry() {
        let provider = Provider::new();
        let node = decode("{$type: iptable, table: [{ip: 192.0.2.0/24, transport: {$type: block}}]}").unwrap();
        let pair = provider.compile(&node).unwrap();

        let err = pair
            .stream_dialer
            .dial(&Address::parse("192.0.2.7:80").unwrap())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Blocked));

        let err = pair
            .stream_dialer
            .dial(&Address::parse("198.51.100.1:80").unwrap())
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "no dialer available for address 198.51.100.1:80");
    }
}
