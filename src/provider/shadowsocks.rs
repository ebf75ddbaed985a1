//! Shadowsocks dialers, listeners and transports

use std::sync::Arc;

use tracing::debug;

use crate::common::Result;
use crate::config::ConfigNode;
use crate::error::Error;
use crate::registry::UNTYPED;
use crate::shadowsocks::{ShadowsocksConfig, ShadowsocksDialer, ShadowsocksPacketListener};
use crate::transport::{SharedPacketListener, SharedStreamDialer, TransportPair};

use super::{Provider, ProviderBuilder};

pub(super) fn register(builder: ProviderBuilder) -> ProviderBuilder {
    let mut builder = builder;
    for name in [UNTYPED, "string", "shadowsocks"] {
        builder = builder
            .stream_dialer(name, |p, node| stream_dialer(p, &ShadowsocksConfig::parse(&node)?))
            .packet_listener(name, standalone_packet_listener)
            .transport(name, transport);
    }
    builder
}

fn stream_dialer(provider: &Provider, config: &ShadowsocksConfig) -> Result<SharedStreamDialer> {
    let endpoint = provider.stream_endpoint("endpoint", &config.endpoint)?;
    let mut dialer = ShadowsocksDialer::new(endpoint.shared(), config.key()?);
    let prefix = config.prefix_bytes()?;
    if !prefix.is_empty() {
        dialer = dialer.with_salt_prefix(prefix);
    }
    Ok(SharedStreamDialer::new(endpoint.info.tunneled(), Arc::new(dialer)))
}

fn packet_listener(provider: &Provider, config: &ShadowsocksConfig) -> Result<SharedPacketListener> {
    let endpoint = provider.packet_endpoint("endpoint", &config.endpoint)?;
    let listener = ShadowsocksPacketListener::new(endpoint.shared(), config.key()?);
    Ok(SharedPacketListener::new(endpoint.info.tunneled(), Arc::new(listener)))
}

/// Salt prefixes only exist for streams, so a listener asked for one is
/// reported as unsupported.
fn standalone_packet_listener(provider: &Provider, node: ConfigNode) -> Result<SharedPacketListener> {
    let config = ShadowsocksConfig::parse(&node)?;
    if !config.prefix.is_empty() {
        return Err(Error::Unsupported("prefix is not yet supported".into()));
    }
    packet_listener(provider, &config)
}

fn transport(provider: &Provider, node: ConfigNode) -> Result<TransportPair> {
    let config = ShadowsocksConfig::parse(&node)?;
    let stream_dialer = stream_dialer(provider, &config)?;
    if !config.prefix.is_empty() {
        debug!("Shadowsocks prefix applies to TCP only; UDP salts stay random");
    }
    let packet_listener = packet_listener(provider, &config)?;
    Ok(TransportPair {
        stream_dialer,
        packet_listener,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Address, ConnType};
    use crate::config::decode;
    use crate::shadowsocks::{EncryptionKey, SaltGenerator, ShadowsocksStream};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_prefix_only_blocks_standalone_listener() {
        let provider = Provider::new();
        let node = decode(
            r#"
$type: shadowsocks
endpoint: example.com:4321
cipher: aes-256-gcm
secret: SECRET
prefix: "POST "
"#,
        )
        .unwrap();

        let err = provider.packet_listener("listener", &node).unwrap_err();
        assert!(err.is_unsupported());

        let pair = provider.compile(&node).unwrap();
        assert_eq!(pair.packet_listener.conn_type(), ConnType::Tunneled);
        assert_eq!(pair.first_hop(), "example.com:4321");
    }

    #[tokio::test]
    async fn test_compiled_dialer_reaches_server() {
        let key = EncryptionKey::new("aes-128-gcm", "SECRET").unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut stream = ShadowsocksStream::new(Box::new(socket), key, SaltGenerator::random());
            let mut head = [0u8; 64];
            let n = stream.read(&mut head).await.unwrap();
            let (target, _) = Address::read_socks(&head[..n]).unwrap();
            stream.write_all(target.to_string().as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
        });

        let config = format!(
            "{{endpoint: '{}', cipher: aes-128-gcm, secret: SECRET, prefix: \"\\x16\\x03\\x01\"}}",
            server
        );
        let pair = Provider::new().compile(&decode(&config).unwrap()).unwrap();
        let mut stream = pair
            .stream_dialer
            .dial(&Address::parse("10.1.2.3:8080").unwrap())
            .await
            .unwrap();
        let mut got = String::new();
        stream.read_to_string(&mut got).await.unwrap();
        assert_eq!(got, "10.1.2.3:8080");
    }
}
