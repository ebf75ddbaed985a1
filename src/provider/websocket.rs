//! `websocket` endpoints
//!
//! ```yaml
//! $type: websocket
//! url: wss://cdn.example.com/tcp
//! endpoint: cdn-edge.example.net:443   # optional, defaults to the URL's host:port
//! headers: {X-Token: abc}
//! ```

use std::sync::Arc;

use crate::common::Result;
use crate::config::ConfigNode;
use crate::transport::{SharedPacketEndpoint, SharedStreamEndpoint};
use crate::websocket::{WebSocketConnector, WebSocketPacketEndpoint, WebSocketSettings, WebSocketStreamEndpoint};

use super::{Provider, ProviderBuilder};

pub(super) fn register(builder: ProviderBuilder) -> ProviderBuilder {
    builder
        .stream_endpoint("websocket", |p, node| {
            let (connector, inner) = prepare(p, &node)?;
            let info = inner.info.clone();
            Ok(SharedStreamEndpoint::new(
                info,
                Arc::new(WebSocketStreamEndpoint::new(connector, inner.shared())),
            ))
        })
        .packet_endpoint("websocket", |p, node| {
            let (connector, inner) = prepare(p, &node)?;
            let info = inner.info.clone();
            Ok(SharedPacketEndpoint::new(
                info,
                Arc::new(WebSocketPacketEndpoint::new(connector, inner.shared())),
            ))
        })
}

/// Both endpoint kinds run the upgrade over a stream endpoint.
fn prepare(provider: &Provider, node: &ConfigNode) -> Result<(WebSocketConnector, SharedStreamEndpoint)> {
    let settings = WebSocketSettings::parse(node)?;
    let connector = WebSocketConnector::new(&settings)?;
    let endpoint = match &settings.endpoint {
        Some(node) => node.clone(),
        None => ConfigNode::String(connector.authority().to_string()),
    };
    let inner = provider.stream_endpoint("endpoint", &endpoint)?;
    Ok((connector, inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ConnType;
    use crate::config::decode;

    #[test]
    fn test_first_hop_defaults_to_url_authority() {
        let provider = Provider::new();
        let node = decode("{$type: websocket, url: 'wss://cdn.example.com/tcp'}").unwrap();
        let endpoint = provider.stream_endpoint("endpoint", &node).unwrap();
        assert_eq!(endpoint.first_hop(), "cdn.example.com:443");
        assert_eq!(endpoint.conn_type(), ConnType::Direct);

        let node = decode("{$type: websocket, url: 'ws://cdn.example.com/udp', endpoint: 'edge.example.net:8080'}").unwrap();
        let endpoint = provider.packet_endpoint("endpoint", &node).unwrap();
        assert_eq!(endpoint.first_hop(), "edge.example.net:8080");
    }

    #[test]
    fn test_shadowsocks_over_websocket() {
        let node = decode(
            r#"
$type: shadowsocks
endpoint:
  $type: websocket
  url: wss://cdn.example.com/ss
cipher: chacha20-ietf-poly1305
secret: SECRET
"#,
        )
        .unwrap();
        let pair = Provider::new().compile(&node).unwrap();
        assert_eq!(pair.first_hop(), "cdn.example.com:443");
        assert_eq!(pair.conn_type(), ConnType::Tunneled);
    }

    #[test]
    fn test_bad_url_is_reported() {
        let node = decode("{$type: websocket, url: 'ftp://example.com/'}").unwrap();
        let err = Provider::new().stream_endpoint("endpoint", &node).unwrap_err();
        assert!(!err.is_unsupported());
        assert!(err.to_string().contains("websocket"), "{}", err);
    }
}
