//! Transport provider
//!
//! A [`Provider`] owns one frozen [`TypeRegistry`] per kind of object a
//! config can describe. Builders get the provider back as their context and
//! call it to resolve nested fields, so arbitrarily deep graphs compile
//! through the same tables:
//!
//! ```text
//! transport ──▶ shadowsocks ──▶ endpoint ──▶ websocket ──▶ endpoint ──▶ dial ──▶ dialer
//! ```
//!
//! Registered types:
//!
//! | type                   | stream endpoint | packet endpoint | stream dialer | packet listener | transport |
//! |------------------------|:---:|:---:|:---:|:---:|:---:|
//! | `string`               |  x  |  x  |  x  |  x  |  x  |
//! | `""` (untyped mapping) |  x  |  x  |  x  |  x  |  x  |
//! | `nil`                  |     |     |  x  |  x  |     |
//! | `dial`                 |  x  |  x  |     |     |     |
//! | `websocket`            |  x  |  x  |     |     |     |
//! | `shadowsocks`          |     |     |  x  |  x  |  x  |
//! | `block`                |     |     |  x  |  x  |  x  |
//! | `tcpudp`               |     |     |     |     |  x  |
//! | `iptable`, `ip-table`  |     |     |  x  |  x  |  x  |
//! | `first-supported`      |  x  |  x  |  x  |  x  |  x  |
//!
//! For endpoints, strings and untyped mappings are direct `host:port`
//! targets; for dialers, listeners and transports they are Shadowsocks
//! configs.
//!
//! Reporters have their own table: `http` and `first-supported`.

mod composite;
mod direct;
mod iptable;
mod reporter;
mod shadowsocks;
mod websocket;

use tracing::debug;

use crate::config::ConfigNode;
use crate::error::Result;
use crate::registry::{RegistryBuilder, TypeRegistry};
use crate::reporter::SharedReporter;
use crate::transport::{
    SharedPacketEndpoint, SharedPacketListener, SharedStreamDialer, SharedStreamEndpoint, TransportPair,
};

/// Compiles config nodes into dialers, endpoints, listeners and transports.
#[derive(Clone)]
pub struct Provider {
    stream_endpoints: TypeRegistry<Provider, SharedStreamEndpoint>,
    packet_endpoints: TypeRegistry<Provider, SharedPacketEndpoint>,
    stream_dialers: TypeRegistry<Provider, SharedStreamDialer>,
    packet_listeners: TypeRegistry<Provider, SharedPacketListener>,
    transports: TypeRegistry<Provider, TransportPair>,
    reporters: TypeRegistry<Provider, SharedReporter>,
}

impl Provider {
    /// Provider with every built-in type registered.
    pub fn new() -> Self {
        ProviderBuilder::with_defaults().build()
    }

    pub fn builder() -> ProviderBuilder {
        ProviderBuilder::with_defaults()
    }

    /// Compile a transport config into a stream dialer and packet listener.
    pub fn compile(&self, node: &ConfigNode) -> Result<TransportPair> {
        let pair = self.transport("transport", node)?;
        debug!(
            "Compiled transport: tcp={} udp={} first_hop={:?}",
            pair.stream_dialer.conn_type(),
            pair.packet_listener.conn_type(),
            pair.first_hop()
        );
        Ok(pair)
    }

    pub fn stream_endpoint(&self, role: &str, node: &ConfigNode) -> Result<SharedStreamEndpoint> {
        self.stream_endpoints.resolve(self, role, node)
    }

    pub fn packet_endpoint(&self, role: &str, node: &ConfigNode) -> Result<SharedPacketEndpoint> {
        self.packet_endpoints.resolve(self, role, node)
    }

    pub fn stream_dialer(&self, role: &str, node: &ConfigNode) -> Result<SharedStreamDialer> {
        self.stream_dialers.resolve(self, role, node)
    }

    pub fn packet_listener(&self, role: &str, node: &ConfigNode) -> Result<SharedPacketListener> {
        self.packet_listeners.resolve(self, role, node)
    }

    pub fn transport(&self, role: &str, node: &ConfigNode) -> Result<TransportPair> {
        self.transports.resolve(self, role, node)
    }

    pub fn reporter(&self, role: &str, node: &ConfigNode) -> Result<SharedReporter> {
        self.reporters.resolve(self, role, node)
    }

    pub fn stream_endpoints(&self) -> &TypeRegistry<Provider, SharedStreamEndpoint> {
        &self.stream_endpoints
    }

    pub fn packet_endpoints(&self) -> &TypeRegistry<Provider, SharedPacketEndpoint> {
        &self.packet_endpoints
    }

    pub fn stream_dialers(&self) -> &TypeRegistry<Provider, SharedStreamDialer> {
        &self.stream_dialers
    }

    pub fn packet_listeners(&self) -> &TypeRegistry<Provider, SharedPacketListener> {
        &self.packet_listeners
    }

    pub fn transports(&self) -> &TypeRegistry<Provider, TransportPair> {
        &self.transports
    }

    pub fn reporters(&self) -> &TypeRegistry<Provider, SharedReporter> {
        &self.reporters
    }
}

impl Default for Provider {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration phase of a [`Provider`]. Extra types can be added on top of
/// the built-ins before the tables are frozen.
pub struct ProviderBuilder {
    stream_endpoints: RegistryBuilder<Provider, SharedStreamEndpoint>,
    packet_endpoints: RegistryBuilder<Provider, SharedPacketEndpoint>,
    stream_dialers: RegistryBuilder<Provider, SharedStreamDialer>,
    packet_listeners: RegistryBuilder<Provider, SharedPacketListener>,
    transports: RegistryBuilder<Provider, TransportPair>,
    reporters: RegistryBuilder<Provider, SharedReporter>,
}

impl ProviderBuilder {
    /// No types at all.
    pub fn empty() -> Self {
        Self {
            stream_endpoints: RegistryBuilder::new("stream endpoint"),
            packet_endpoints: RegistryBuilder::new("packet endpoint"),
            stream_dialers: RegistryBuilder::new("stream dialer"),
            packet_listeners: RegistryBuilder::new("packet listener"),
            transports: RegistryBuilder::new("transport"),
            reporters: RegistryBuilder::new("reporter"),
        }
    }

    pub fn with_defaults() -> Self {
        let builder = Self::empty();
        let builder = direct::register(builder);
        let builder = shadowsocks::register(builder);
        let builder = websocket::register(builder);
        let builder = iptable::register(builder);
        let builder = reporter::register(builder);
        composite::register(builder)
    }

    pub fn stream_endpoint<F>(mut self, name: &str, build: F) -> Self
    where
        F: Fn(&Provider, ConfigNode) -> Result<SharedStreamEndpoint> + Send + Sync + 'static,
    {
        self.stream_endpoints = self.stream_endpoints.register(name, build);
        self
    }

    pub fn packet_endpoint<F>(mut self, name: &str, build: F) -> Self
    where
        F: Fn(&Provider, ConfigNode) -> Result<SharedPacketEndpoint> + Send + Sync + 'static,
    {
        self.packet_endpoints = self.packet_endpoints.register(name, build);
        self
    }

    pub fn stream_dialer<F>(mut self, name: &str, build: F) -> Self
    where
        F: Fn(&Provider, ConfigNode) -> Result<SharedStreamDialer> + Send + Sync + 'static,
    {
        self.stream_dialers = self.stream_dialers.register(name, build);
        self
    }

    pub fn packet_listener<F>(mut self, name: &str, build: F) -> Self
    where
        F: Fn(&Provider, ConfigNode) -> Result<SharedPacketListener> + Send + Sync + 'static,
    {
        self.packet_listeners = self.packet_listeners.register(name, build);
        self
    }

    pub fn transport<F>(mut self, name: &str, build: F) -> Self
    where
        F: Fn(&Provider, ConfigNode) -> Result<TransportPair> + Send + Sync + 'static,
    {
        self.transports = self.transports.register(name, build);
        self
    }

    pub fn reporter<F>(mut self, name: &str, build: F) -> Self
    where
        F: Fn(&Provider, ConfigNode) -> Result<SharedReporter> + Send + Sync + 'static,
    {
        self.reporters = self.reporters.register(name, build);
        self
    }

    pub fn build(self) -> Provider {
        Provider {
            stream_endpoints: self.stream_endpoints.build(),
            packet_endpoints: self.packet_endpoints.build(),
            stream_dialers: self.stream_dialers.build(),
            packet_listeners: self.packet_listeners.build(),
            transports: self.transports.build(),
            reporters: self.reporters.build(),
        }
    }
}
