//! Address type for network connections

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::{Error, Result};

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Network address representation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// IP socket address (IP + port)
    Socket(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl Address {
    /// Parse a `host:port` string. IPv6 hosts must be bracketed.
    ///
    /// The host must be non-empty and the port in `1..=65535`.
    pub fn parse(text: &str) -> Result<Self> {
        let (host, port) = split_host_port(text)?;
        if host.is_empty() {
            return Err(Error::InvalidAddress(format!("{}: host must not be empty", text)));
        }
        if port.is_empty() {
            return Err(Error::InvalidAddress(format!("{}: port must not be empty", text)));
        }
        let port: u16 = port
            .parse()
            .map_err(|e| Error::InvalidAddress(format!("{}: invalid port number: {}", text, e)))?;
        if port == 0 {
            return Err(Error::InvalidAddress(format!("{}: port must not be zero", text)));
        }

        Ok(match host.parse::<IpAddr>() {
            Ok(ip) => Address::Socket(SocketAddr::new(ip, port)),
            Err(_) => Address::Domain(host.to_string(), port),
        })
    }

    /// Create from domain and port
    pub fn domain(domain: impl Into<String>, port: u16) -> Self {
        Address::Domain(domain.into(), port)
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        match self {
            Address::Socket(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }

    /// Get the host part as string
    pub fn host(&self) -> String {
        match self {
            Address::Socket(addr) => addr.ip().to_string(),
            Address::Domain(domain, _) => domain.clone(),
        }
    }

    /// The IP, when the host is a literal address. No name resolution happens here.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Address::Socket(addr) => Some(addr.ip()),
            Address::Domain(_, _) => None,
        }
    }

    /// Append the SOCKS5-style encoding (ATYP + address + port) used by Shadowsocks headers.
    pub fn write_socks(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Address::Socket(SocketAddr::V4(addr)) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&addr.ip().octets());
            }
            Address::Socket(SocketAddr::V6(addr)) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(&addr.ip().octets());
            }
            Address::Domain(domain, _) => {
                let len = u8::try_from(domain.len()).map_err(|_| {
                    Error::InvalidAddress(format!("domain too long: {}", domain.len()))
                })?;
                buf.push(ATYP_DOMAIN);
                buf.push(len);
                buf.extend_from_slice(domain.as_bytes());
            }
        }
        buf.extend_from_slice(&self.port().to_be_bytes());
        Ok(())
    }

    /// Decode a SOCKS5-style address from the front of `buf`, returning it and
    /// the number of bytes consumed.
    pub fn read_socks(buf: &[u8]) -> Result<(Self, usize)> {
        let truncated = || Error::Protocol("truncated socks address".into());
        let atyp = *buf.first().ok_or_else(truncated)?;
        let (addr, used) = match atyp {
            ATYP_IPV4 => {
                let raw: [u8; 4] = buf.get(1..5).ok_or_else(truncated)?.try_into().map_err(|_| truncated())?;
                let port = read_port(buf, 5).ok_or_else(truncated)?;
                (Address::Socket(SocketAddr::new(IpAddr::from(raw), port)), 7)
            }
            ATYP_IPV6 => {
                let raw: [u8; 16] = buf.get(1..17).ok_or_else(truncated)?.try_into().map_err(|_| truncated())?;
                let port = read_port(buf, 17).ok_or_else(truncated)?;
                (Address::Socket(SocketAddr::new(IpAddr::from(raw), port)), 19)
            }
            ATYP_DOMAIN => {
                let len = *buf.get(1).ok_or_else(truncated)? as usize;
                let raw = buf.get(2..2 + len).ok_or_else(truncated)?;
                let domain = String::from_utf8(raw.to_vec())
                    .map_err(|_| Error::Protocol("socks domain is not utf-8".into()))?;
                let port = read_port(buf, 2 + len).ok_or_else(truncated)?;
                (Address::Domain(domain, port), 4 + len)
            }
            other => {
                return Err(Error::Protocol(format!("unknown socks address type {:#04x}", other)));
            }
        };
        Ok((addr, used))
    }
}

fn read_port(buf: &[u8], at: usize) -> Option<u16> {
    let raw = buf.get(at..at + 2)?;
    Some(u16::from_be_bytes([raw[0], raw[1]]))
}

/// Split `host:port`, accepting `[v6]:port`.
fn split_host_port(text: &str) -> Result<(&str, &str)> {
    let missing = || Error::InvalidAddress(format!("{}: missing port", text));
    if let Some(rest) = text.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::InvalidAddress(format!("{}: missing ']'", text)))?;
        let port = tail.strip_prefix(':').ok_or_else(missing)?;
        return Ok((host, port));
    }
    let (host, port) = text.rsplit_once(':').ok_or_else(missing)?;
    if host.contains(':') {
        return Err(Error::InvalidAddress(format!("{}: too many colons", text)));
    }
    Ok((host, port))
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Socket(addr) => write!(f, "{}", addr),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Socket(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_domain_and_ips() {
        assert_eq!(
            Address::parse("example.com:4321").unwrap(),
            Address::domain("example.com", 4321)
        );
        let v4 = Address::parse("10.0.0.1:53").unwrap();
        assert_eq!(v4.ip(), Some("10.0.0.1".parse().unwrap()));
        let v6 = Address::parse("[2001:db8::1]:443").unwrap();
        assert_eq!(v6.to_string(), "[2001:db8::1]:443");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Address::parse(":80").is_err());
        assert!(Address::parse("example.com").is_err());
        assert!(Address::parse("example.com:").is_err());
        assert!(Address::parse("example.com:0").is_err());
        assert!(Address::parse("example.com:70000").is_err());
        assert!(Address::parse("2001:db8::1:80").is_err());
    }

    #[test]
    fn test_socks_encoding() {
        let mut buf = Vec::new();
        Address::domain("a.io", 80).write_socks(&mut buf).unwrap();
        assert_eq!(buf, [0x03, 4, b'a', b'.', b'i', b'o', 0, 80]);

        buf.extend_from_slice(b"payload");
        let (addr, used) = Address::read_socks(&buf).unwrap();
        assert_eq!(addr, Address::domain("a.io", 80));
        assert_eq!(&buf[used..], b"payload");

        assert!(Address::read_socks(&[0x01, 1, 2]).is_err());
        assert!(Address::read_socks(&[0x09]).is_err());
    }
}
