//! Tunnel client
//!
//! Entry point for whole tunnel configs, as handed over by a config
//! provider. Accepted inputs:
//!
//! ```text
//! ss://...                          bare transport string
//! {"server": ..., "method": ...}    legacy JSON, the mapping is the transport
//! transport: ...                    current format, with an optional reporter
//! error: {message, details}         provider-declared failure
//! ```
//!
//! Everything is normalized to `{transport: ...}` before compiling.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::common::{Address, ConnType, Result, Stream};
use crate::config::{self, ConfigNode};
use crate::error::Error;
use crate::platform_error::PlatformError;
use crate::provider::Provider;
use crate::reporter::{self, SharedReporter};
use crate::transport::{PacketConn, SharedPacketListener, SharedStreamDialer, TransportPair};

const TRANSPORT_KEY: &str = "transport";
const ERROR_KEY: &str = "error";

/// Client config after normalization. Keys other than `transport` and
/// `reporter` are carried in the normalized JSON but not interpreted here.
#[derive(Debug, Deserialize)]
struct ClientConfig {
    transport: ConfigNode,
    #[serde(default)]
    reporter: ConfigNode,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorConfig {
    message: String,
    #[serde(default)]
    details: Option<String>,
}

/// Result of [`parse_tunnel_config`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TunnelConfigSummary {
    /// Normalized client config as JSON.
    pub client: String,
    /// Shared first hop of both legs, empty when they differ.
    #[serde(rename = "firstHop")]
    pub first_hop: String,
}

/// A compiled tunnel: TCP and UDP paths that are known to leave the device
/// through a proxy.
#[derive(Clone)]
pub struct Client {
    stream_dialer: SharedStreamDialer,
    packet_listener: SharedPacketListener,
    reporter: Option<SharedReporter>,
}

impl Client {
    /// Wrap a compiled transport. Direct legs are rejected.
    pub fn new(pair: TransportPair) -> Result<Self> {
        if pair.stream_dialer.conn_type() == ConnType::Direct {
            return Err(Error::Config("transport must tunnel TCP traffic".into()));
        }
        if pair.packet_listener.conn_type() == ConnType::Direct {
            return Err(Error::Config("transport must tunnel UDP traffic".into()));
        }
        Ok(Self {
            stream_dialer: pair.stream_dialer,
            packet_listener: pair.packet_listener,
            reporter: None,
        })
    }

    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Compile a normalized `{transport: ..., reporter: ...}` client config.
    pub fn from_config(provider: &Provider, node: &ConfigNode) -> Result<Self> {
        let config: ClientConfig = node.decode_as("client config")?;
        let client = Self::new(provider.compile(&config.transport)?)?;
        if config.reporter.is_null() {
            return Ok(client);
        }
        let reporter = provider
            .reporter("reporter", &config.reporter)
            .map_err(|e| Error::Reporter(Box::new(e)))?;
        Ok(client.with_reporter(reporter))
    }

    /// Decode, normalize and compile tunnel config text with the built-in types.
    pub fn parse(text: &str) -> Result<Self> {
        let node = normalize(config::decode(text.trim())?)?;
        Self::from_config(&Provider::new(), &node)
    }

    /// Start the configured reporter, if any. Reporting stops when the
    /// returned session ends or is dropped. Needs a tokio runtime.
    pub fn start_session(&self) -> Session {
        debug!("Starting session");
        let cancel = CancellationToken::new();
        let task = self.reporter.as_ref().map(|r| {
            tokio::spawn(reporter::run(Arc::clone(r), self.stream_dialer.shared(), cancel.clone()))
        });
        Session { cancel, task }
    }

    pub fn has_reporter(&self) -> bool {
        self.reporter.is_some()
    }

    pub async fn dial_stream(&self, address: &str) -> Result<Stream> {
        let addr = Address::parse(address)?;
        debug!("Client dialing {}", addr);
        self.stream_dialer.dial(&addr).await
    }

    pub async fn listen_packet(&self) -> Result<Box<dyn PacketConn>> {
        self.packet_listener.listen_packet().await
    }

    pub fn stream_dialer(&self) -> &SharedStreamDialer {
        &self.stream_dialer
    }

    pub fn packet_listener(&self) -> &SharedPacketListener {
        &self.packet_listener
    }

    pub fn first_hop(&self) -> &str {
        if self.stream_dialer.first_hop() == self.packet_listener.first_hop() {
            self.stream_dialer.first_hop()
        } else {
            ""
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("stream_dialer", &self.stream_dialer)
            .field("packet_listener", &self.packet_listener)
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

/// Background work tied to one use of a [`Client`].
pub struct Session {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Stop reporting and wait for the reporter to finish.
    pub async fn end(mut self) {
        debug!("Ending session");
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("Reporter task failed: {}", e);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Bring any accepted input shape to `{transport: ...}`, or surface the
/// provider's error node.
fn normalize(node: ConfigNode) -> Result<ConfigNode> {
    match node {
        ConfigNode::String(_) => Ok(wrap_transport(node)),
        ConfigNode::Mapping(_) => {
            if let Some(error) = node.get(ERROR_KEY).filter(|e| !e.is_null()) {
                let error: ProviderErrorConfig = error.decode_as(ERROR_KEY)?;
                let details = error
                    .details
                    .filter(|d| !d.is_empty())
                    .map(|d| serde_json::json!({ "details": d }));
                return Err(Error::Provider {
                    message: error.message,
                    details,
                });
            }
            if node.has_key(TRANSPORT_KEY) {
                Ok(node)
            } else {
                Ok(wrap_transport(node))
            }
        }
        other => Err(Error::Config(format!(
            "tunnel config must be a string or a mapping, got {}",
            other.kind_name()
        ))),
    }
}

fn wrap_transport(transport: ConfigNode) -> ConfigNode {
    let mut map = BTreeMap::new();
    map.insert(TRANSPORT_KEY.to_string(), transport);
    ConfigNode::Mapping(map)
}

/// Validate tunnel config text and describe it for the caller: the
/// normalized client config and the first hop to exclude from routing.
pub fn parse_tunnel_config(input: &str) -> std::result::Result<TunnelConfigSummary, PlatformError> {
    parse_with(&Provider::new(), input)
}

/// [`parse_tunnel_config`] with a caller-supplied provider.
pub fn parse_with(provider: &Provider, input: &str) -> std::result::Result<TunnelConfigSummary, PlatformError> {
    let (_, summary) = compile_tunnel_config(provider, config::decode(input.trim())?)?;
    Ok(summary)
}

/// Normalize and compile an already decoded tunnel config, keeping both the
/// client and its summary.
pub fn compile_tunnel_config(
    provider: &Provider,
    node: ConfigNode,
) -> std::result::Result<(Client, TunnelConfigSummary), PlatformError> {
    let node = normalize(node)?;
    let client = Client::from_config(provider, &node)?;
    let json = serde_json::to_string(&node.to_json())
        .map_err(|e| PlatformError::from(Error::Config(format!("failed to normalize config: {}", e))))?;

    let summary = TunnelConfigSummary {
        client: json,
        first_hop: client.first_hop().to_string(),
    };
    info!(
        "Parsed tunnel config: tcp={} udp={} first_hop={:?}",
        client.stream_dialer.conn_type(),
        client.packet_listener.conn_type(),
        summary.first_hop
    );
    Ok((client, summary))
}
