//! Longest-prefix-match table
//!
//! One bucket per prefix length and family; each bucket maps the masked
//! network address to a value. Lookups walk from the longest length down,
//! so cost is bounded by the address width.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::error::{Error, Result};

/// Parse `10.0.0.0/8`, `2001:db8::/32` or a bare address (full-length prefix).
pub fn parse_prefix(text: &str) -> Result<IpNet> {
    let text = text.trim();
    if let Ok(net) = text.parse::<IpNet>() {
        return Ok(net);
    }
    text.parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| Error::Config(format!("{:?} is not a valid IP address or CIDR prefix", text)))
}

/// Routes addresses to values by longest matching prefix.
#[derive(Debug, Clone)]
pub struct IpTable<V> {
    v4: Vec<HashMap<Ipv4Addr, V>>,
    v6: Vec<HashMap<Ipv6Addr, V>>,
}

impl<V> IpTable<V> {
    pub fn new() -> Self {
        Self {
            v4: (0..=32).map(|_| HashMap::new()).collect(),
            v6: (0..=128).map(|_| HashMap::new()).collect(),
        }
    }

    /// Insert a route. Re-adding the same prefix replaces its value.
    pub fn add_prefix(&mut self, prefix: IpNet, value: V) {
        match prefix {
            IpNet::V4(net) => {
                self.v4[usize::from(net.prefix_len())].insert(net.network(), value);
            }
            IpNet::V6(net) => {
                self.v6[usize::from(net.prefix_len())].insert(net.network(), value);
            }
        }
    }

    /// The value of the longest prefix containing `addr`.
    ///
    /// IPv4-mapped IPv6 addresses are looked up as IPv4.
    pub fn lookup(&self, addr: IpAddr) -> Option<&V> {
        match addr.to_canonical() {
            IpAddr::V4(ip) => (0..=32u8).rev().find_map(|len| {
                let bucket = &self.v4[usize::from(len)];
                if bucket.is_empty() {
                    return None;
                }
                let masked = Ipv4Net::new(ip, len).ok()?.network();
                bucket.get(&masked)
            }),
            IpAddr::V6(ip) => (0..=128u8).rev().find_map(|len| {
                let bucket = &self.v6[usize::from(len)];
                if bucket.is_empty() {
                    return None;
                }
                let masked = Ipv6Net::new(ip, len).ok()?.network();
                bucket.get(&masked)
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.v4.iter().all(HashMap::is_empty) && self.v6.iter().all(HashMap::is_empty)
    }

    /// Number of distinct prefixes.
    pub fn len(&self) -> usize {
        self.v4.iter().map(HashMap::len).sum::<usize>() + self.v6.iter().map(HashMap::len).sum::<usize>()
    }
}

impl<V> Default for IpTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn net(s: &str) -> IpNet {
        parse_prefix(s).unwrap()
    }

    #[test]
    fn test_empty_table_finds_nothing() {
        let table: IpTable<u32> = IpTable::new();
        assert!(table.is_empty());
        assert_eq!(table.lookup(ip("1.2.3.4")), None);
        assert_eq!(table.lookup(ip("::1")), None);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut table = IpTable::new();
        table.add_prefix(net("10.0.0.0/8"), "wide");
        table.add_prefix(net("10.1.0.0/16"), "narrow");
        table.add_prefix(net("10.1.2.3"), "host");
        table.add_prefix(net("0.0.0.0/0"), "any");

        assert_eq!(table.lookup(ip("10.1.2.3")), Some(&"host"));
        assert_eq!(table.lookup(ip("10.1.9.9")), Some(&"narrow"));
        assert_eq!(table.lookup(ip("10.200.0.1")), Some(&"wide"));
        assert_eq!(table.lookup(ip("192.168.0.1")), Some(&"any"));
        // A v4 default route does not cover v6.
        assert_eq!(table.lookup(ip("2001:db8::1")), None);
    }

    #[test]
    fn test_unaligned_prefix_is_masked() {
        let mut table = IpTable::new();
        table.add_prefix(net("192.168.1.77/24"), 1);
        assert_eq!(table.lookup(ip("192.168.1.200")), Some(&1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_last_write_wins() {
        let mut table = IpTable::new();
        table.add_prefix(net("2001:db8::/32"), 1);
        table.add_prefix(net("2001:db8::/32"), 2);
        assert_eq!(table.lookup(ip("2001:db8:ffff::1")), Some(&2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_mapped_v6_uses_v4_routes() {
        let mut table = IpTable::new();
        table.add_prefix(net("8.8.8.0/24"), "dns");
        assert_eq!(table.lookup(ip("::ffff:8.8.8.8")), Some(&"dns"));
    }

    #[test]
    fn test_parse_prefix_errors() {
        assert!(parse_prefix("10.0.0.0/33").is_err());
        assert!(parse_prefix("example.com").is_err());
        assert_eq!(parse_prefix("::1").unwrap().prefix_len(), 128);
    }
}
