//! `tcpudp`, `block` and `first-supported`

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::common::{ConnectionProviderInfo, Result};
use crate::config::ConfigNode;
use crate::error::Error;
use crate::registry::{Attempt, TypeRegistry};
use crate::transport::{BlockedDialer, BlockedListener, SharedPacketListener, SharedStreamDialer, TransportPair};

use super::{Provider, ProviderBuilder};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TcpUdpConfig {
    tcp: ConfigNode,
    udp: ConfigNode,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FirstSupportedConfig {
    options: Vec<ConfigNode>,
}

pub(super) fn register(builder: ProviderBuilder) -> ProviderBuilder {
    builder
        .stream_dialer("block", |_, _| Ok(blocked_dialer()))
        .packet_listener("block", |_, _| Ok(blocked_listener()))
        .transport("block", |_, _| {
            Ok(TransportPair {
                stream_dialer: blocked_dialer(),
                packet_listener: blocked_listener(),
            })
        })
        .transport("tcpudp", tcpudp)
        .stream_endpoint("first-supported", first_supported(Provider::stream_endpoints))
        .packet_endpoint("first-supported", first_supported(Provider::packet_endpoints))
        .stream_dialer("first-supported", first_supported(Provider::stream_dialers))
        .packet_listener("first-supported", first_supported(Provider::packet_listeners))
        .transport("first-supported", first_supported(Provider::transports))
        .reporter("first-supported", first_supported(Provider::reporters))
}

fn blocked_dialer() -> SharedStreamDialer {
    SharedStreamDialer::new(ConnectionProviderInfo::blocked(), Arc::new(BlockedDialer))
}

fn blocked_listener() -> SharedPacketListener {
    SharedPacketListener::new(ConnectionProviderInfo::blocked(), Arc::new(BlockedListener))
}

fn tcpudp(provider: &Provider, node: ConfigNode) -> Result<TransportPair> {
    let config: TcpUdpConfig = node.decode_as("tcpudp config")?;
    Ok(TransportPair {
        stream_dialer: provider.stream_dialer("tcp", &config.tcp)?,
        packet_listener: provider.packet_listener("udp", &config.udp)?,
    })
}

/// Build the first option whose type is supported. Options are tried in
/// order and only constructed, never dialed; a genuine error in any option
/// stops the search.
fn first_supported<T: 'static>(
    registry: fn(&Provider) -> &TypeRegistry<Provider, T>,
) -> impl Fn(&Provider, ConfigNode) -> Result<T> + Send + Sync + 'static {
    move |provider, node| {
        let config: FirstSupportedConfig = node.decode_as("first-supported config")?;
        if config.options.is_empty() {
            return Err(Error::Config("options must not be empty".into()));
        }

        let registry = registry(provider);
        let mut skipped = Vec::with_capacity(config.options.len());
        for (i, option) in config.options.iter().enumerate() {
            let role = format!("options[{}]", i);
            match registry.attempt(provider, &role, option) {
                Attempt::Built(value) => {
                    debug!("first-supported picked {} option {}", registry.kind(), i);
                    return Ok(value);
                }
                Attempt::Unsupported(e) => {
                    debug!("first-supported skipping {} option {}: {}", registry.kind(), i, e);
                    skipped.push(e.to_string());
                }
                Attempt::Failed(e) => return Err(e),
            }
        }
        Err(Error::Unsupported(format!(
            "no supported {} among {} options: {}",
            registry.kind(),
            skipped.len(),
            skipped.join("; ")
        )))
    }
}
