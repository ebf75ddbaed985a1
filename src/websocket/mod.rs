//! WebSocket endpoints
//!
//! Both endpoints open a stream through a sub-endpoint, add TLS for
//! `wss://`, and run the client upgrade:
//!
//! ```text
//! sub-endpoint ──▶ [TLS] ──▶ HTTP upgrade ──▶ WebSocketByteStream  (stream)
//!                                        └──▶ WebSocketDatagram    (packet)
//! ```

mod packet;
mod stream;

pub use packet::WebSocketDatagram;
pub use stream::WebSocketByteStream;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_tungstenite::{
    client_async_with_config,
    tungstenite::{
        handshake::client::{generate_key, Request},
        protocol::WebSocketConfig as TungsteniteConfig,
    },
    WebSocketStream,
};
use tracing::debug;
use url::{Host, Url};

use crate::common::{Result, Stream};
use crate::config::ConfigNode;
use crate::error::Error;
use crate::transport::{DatagramConn, PacketEndpoint, StreamEndpoint, TlsConnector};

const USER_AGENT: &str = concat!("hopwire/", env!("CARGO_PKG_VERSION"));

/// Payload of a `websocket` endpoint node.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebSocketSettings {
    pub url: String,
    /// Stream endpoint to run the upgrade over. Defaults to a direct TCP
    /// connection to the URL's host and port.
    #[serde(default)]
    pub endpoint: Option<ConfigNode>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl WebSocketSettings {
    pub fn parse(node: &ConfigNode) -> Result<Self> {
        node.decode_as("websocket config")
    }
}

/// Everything needed to run the client handshake for one URL.
#[derive(Clone)]
pub struct WebSocketConnector {
    uri: String,
    host_header: String,
    authority: String,
    server_name: Option<String>,
    tls: Option<TlsConnector>,
    headers: BTreeMap<String, String>,
}

impl WebSocketConnector {
    pub fn new(settings: &WebSocketSettings) -> Result<Self> {
        let url = Url::parse(&settings.url)
            .map_err(|e| Error::Config(format!("invalid websocket url {:?}: {}", settings.url, e)))?;
        let (scheme, secure) = match url.scheme() {
            "ws" | "http" => ("ws", false),
            "wss" | "https" => ("wss", true),
            other => return Err(Error::Config(format!("unsupported websocket url scheme {:?}", other))),
        };
        let host = url
            .host()
            .ok_or_else(|| Error::Config(format!("websocket url {:?} has no host", settings.url)))?;
        let host_text = match &host {
            Host::Domain(domain) => domain.to_string(),
            Host::Ipv4(ip) => ip.to_string(),
            Host::Ipv6(ip) => format!("[{}]", ip),
        };
        let server_name = match &host {
            Host::Domain(domain) => domain.to_string(),
            Host::Ipv4(ip) => ip.to_string(),
            Host::Ipv6(ip) => ip.to_string(),
        };
        let port = url.port_or_known_default().unwrap_or(if secure { 443 } else { 80 });

        let host_header = match url.port() {
            Some(port) => format!("{}:{}", host_text, port),
            None => host_text.clone(),
        };
        let mut uri = format!("{}://{}{}", scheme, host_header, url.path());
        if let Some(query) = url.query() {
            uri.push('?');
            uri.push_str(query);
        }

        Ok(Self {
            uri,
            host_header,
            authority: format!("{}:{}", host_text, port),
            server_name: secure.then_some(server_name),
            tls: secure.then(|| TlsConnector::with_alpn(&["http/1.1"])),
            headers: settings.headers.clone(),
        })
    }

    /// `host:port` the upgrade request goes to.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// TLS (for `wss`) plus the HTTP upgrade over `stream`.
    pub async fn handshake(&self, stream: Stream) -> Result<WebSocketStream<Stream>> {
        let stream = match (&self.tls, &self.server_name) {
            (Some(tls), Some(name)) => tls.connect(name, stream).await?,
            _ => stream,
        };

        let mut request = Request::builder()
            .uri(&self.uri)
            .header("Host", &self.host_header)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .header("User-Agent", USER_AGENT);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let request = request
            .body(())
            .map_err(|e| Error::Config(format!("failed to build WebSocket request: {}", e)))?;

        let ws_config = TungsteniteConfig {
            max_message_size: Some(64 << 20), // 64 MB
            max_frame_size: Some(16 << 20),   // 16 MB
            ..Default::default()
        };

        let (ws_stream, _response) = client_async_with_config(request, stream, Some(ws_config))
            .await
            .map_err(|e| Error::Protocol(format!("WebSocket handshake failed: {}", e)))?;
        debug!("WebSocket connected to {}", self.uri);
        Ok(ws_stream)
    }
}

/// Stream endpoint carrying bytes in WebSocket binary messages.
pub struct WebSocketStreamEndpoint {
    connector: WebSocketConnector,
    endpoint: Arc<dyn StreamEndpoint>,
}

impl WebSocketStreamEndpoint {
    pub fn new(connector: WebSocketConnector, endpoint: Arc<dyn StreamEndpoint>) -> Self {
        Self { connector, endpoint }
    }
}

#[async_trait]
impl StreamEndpoint for WebSocketStreamEndpoint {
    async fn connect(&self) -> Result<Stream> {
        let stream = self.endpoint.connect().await?;
        let ws = self.connector.handshake(stream).await?;
        Ok(Box::new(WebSocketByteStream::new(ws)))
    }
}

/// Packet endpoint carrying one datagram per WebSocket binary message.
pub struct WebSocketPacketEndpoint {
    connector: WebSocketConnector,
    endpoint: Arc<dyn StreamEndpoint>,
}

impl WebSocketPacketEndpoint {
    pub fn new(connector: WebSocketConnector, endpoint: Arc<dyn StreamEndpoint>) -> Self {
        Self { connector, endpoint }
    }
}

#[async_trait]
impl PacketEndpoint for WebSocketPacketEndpoint {
    async fn connect(&self) -> Result<Box<dyn DatagramConn>> {
        let stream = self.endpoint.connect().await?;
        let ws = self.connector.handshake(stream).await?;
        Ok(Box::new(WebSocketDatagram::new(ws)))
    }
}
