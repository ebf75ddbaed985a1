//! Direct sockets and `dial` endpoints

use std::sync::Arc;

use serde::Deserialize;

use crate::common::{Address, ConnType, ConnectionProviderInfo, Result};
use crate::config::{parse_duration, ConfigNode};
use crate::error::Error;
use crate::registry::UNTYPED;
use crate::transport::{
    DialerEndpoint, ListenerEndpoint, SharedPacketEndpoint, SharedPacketListener, SharedStreamDialer,
    SharedStreamEndpoint, TcpDialer, UdpEndpoint, UdpListener,
};

use super::{Provider, ProviderBuilder};

/// `{address, dialer}`. A bare string is the address with a direct dialer.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DialEndpointConfig {
    address: String,
    #[serde(default)]
    dialer: ConfigNode,
}

impl DialEndpointConfig {
    fn parse(node: &ConfigNode) -> Result<Self> {
        match node {
            ConfigNode::String(address) => Ok(Self {
                address: address.clone(),
                dialer: ConfigNode::Null,
            }),
            _ => node.decode_as("endpoint config"),
        }
    }
}

/// Optional payload of a `nil` stream dialer, e.g. `{$type: nil, connect_timeout: 5s}`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DirectDialerConfig {
    #[serde(default)]
    connect_timeout: Option<String>,
}

pub(super) fn register(builder: ProviderBuilder) -> ProviderBuilder {
    let mut builder = builder
        .stream_dialer("nil", |_, node| direct_dialer(node))
        .packet_listener("nil", |_, _| {
            Ok(SharedPacketListener::new(ConnectionProviderInfo::direct(), Arc::new(UdpListener::new())))
        });

    for name in [UNTYPED, "string", "dial"] {
        builder = builder
            .stream_endpoint(name, |p, node| stream_endpoint(p, DialEndpointConfig::parse(&node)?))
            .packet_endpoint(name, |p, node| packet_endpoint(p, DialEndpointConfig::parse(&node)?));
    }
    builder
}

fn direct_dialer(node: ConfigNode) -> Result<SharedStreamDialer> {
    let config: DirectDialerConfig = if node.is_null() {
        DirectDialerConfig::default()
    } else {
        node.decode_as("nil dialer config")?
    };
    let mut dialer = TcpDialer::new();
    if let Some(text) = &config.connect_timeout {
        dialer = dialer.with_connect_timeout(parse_duration("connect_timeout", text)?);
    }
    Ok(SharedStreamDialer::new(ConnectionProviderInfo::direct(), Arc::new(dialer)))
}

/// A direct dialer contacts `address` itself; anything else keeps its own first hop.
fn endpoint_info(dialer: &ConnectionProviderInfo, address: &str) -> ConnectionProviderInfo {
    match dialer.conn_type {
        ConnType::Direct => dialer.clone().with_first_hop(address),
        _ => dialer.clone(),
    }
}

fn parse_address(text: &str) -> Result<Address> {
    Address::parse(text).map_err(|e| Error::schema("address", e))
}

fn stream_endpoint(provider: &Provider, config: DialEndpointConfig) -> Result<SharedStreamEndpoint> {
    let address = parse_address(&config.address)?;
    let dialer = provider.stream_dialer("dialer", &config.dialer)?;
    let info = endpoint_info(&dialer.info, &config.address);
    Ok(SharedStreamEndpoint::new(info, Arc::new(DialerEndpoint::new(address, dialer.shared()))))
}

fn packet_endpoint(provider: &Provider, config: DialEndpointConfig) -> Result<SharedPacketEndpoint> {
    let address = parse_address(&config.address)?;
    if config.dialer.is_null() {
        let info = ConnectionProviderInfo::direct().with_first_hop(config.address.as_str());
        return Ok(SharedPacketEndpoint::new(info, Arc::new(UdpEndpoint::new(address))));
    }
    let listener = provider.packet_listener("dialer", &config.dialer)?;
    let info = endpoint_info(&listener.info, &config.address);
    Ok(SharedPacketEndpoint::new(info, Arc::new(ListenerEndpoint::new(address, listener.shared()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::decode;
    use crate::transport::StreamDialer;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, UdpSocket};

    #[test]
    fn test_string_endpoint_is_direct() {
        let provider = Provider::new();
        let endpoint = provider.stream_endpoint("endpoint", &"example.com:4321".into()).unwrap();
        assert_eq!(endpoint.conn_type(), ConnType::Direct);
        assert_eq!(endpoint.first_hop(), "example.com:4321");

        let endpoint = provider
            .packet_endpoint("endpoint", &decode("address: '[2001:db8::1]:53'").unwrap())
            .unwrap();
        assert_eq!(endpoint.first_hop(), "[2001:db8::1]:53");
    }

    #[test]
    fn test_bad_addresses() {
        let provider = Provider::new();
        for bad in ["example.com", ":80", "example.com:0"] {
            assert!(provider.stream_endpoint("endpoint", &bad.into()).is_err(), "{}", bad);
        }
        let err = provider
            .stream_endpoint("endpoint", &decode("{address: 'a:1', port: 2}").unwrap())
            .unwrap_err();
        assert!(matches!(err.root(), Error::Schema { .. }));
    }

    #[test]
    fn test_dial_through_blocked_dialer() {
        let node = decode("{$type: dial, address: 'exit.example.com:443', dialer: {$type: block}}").unwrap();
        let endpoint = Provider::new().stream_endpoint("endpoint", &node).unwrap();
        assert_eq!(endpoint.conn_type(), ConnType::Blocked);
        assert_eq!(endpoint.first_hop(), "");
    }

    #[tokio::test]
    async fn test_direct_dialer_connect_timeout() {
        let provider = Provider::new();
        let node = decode("{$type: nil, connect_timeout: 2s}").unwrap();
        let dialer = provider.stream_dialer("dialer", &node).unwrap();
        assert_eq!(dialer.conn_type(), ConnType::Direct);

        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = Address::from(tcp.local_addr().unwrap());
        assert!(dialer.dial(&addr).await.is_ok());

        for bad in ["{$type: nil, connect_timeout: soon}", "{$type: nil, keepalive: 1s}"] {
            let err = provider.stream_dialer("dialer", &decode(bad).unwrap()).unwrap_err();
            assert!(matches!(err.root(), Error::Schema { .. }), "{}: {}", bad, err);
        }
    }

    #[tokio::test]
    async fn test_direct_endpoints_connect() {
        let provider = Provider::new();

        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tcp_addr = tcp.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = tcp.accept().await.unwrap();
            socket.write_all(b"hi").await.unwrap();
        });
        let endpoint = provider.stream_endpoint("endpoint", &tcp_addr.to_string().as_str().into()).unwrap();
        let mut stream = endpoint.connect().await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let udp_addr = udp.local_addr().unwrap();
        let endpoint = provider.packet_endpoint("endpoint", &udp_addr.to_string().as_str().into()).unwrap();
        let conn = endpoint.connect().await.unwrap();
        conn.send(b"ping").await.unwrap();
        let mut buf = [0u8; 8];
        let (n, _) = udp.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        conn.close().await.unwrap();
    }
}
