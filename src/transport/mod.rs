//! Transport layer
//!
//! The trait objects every compiled path is made of:
//!
//! - [`StreamDialer`]: open a byte stream to any `host:port`
//! - [`StreamEndpoint`]: open a byte stream to one fixed remote
//! - [`PacketEndpoint`]: open a connected datagram socket to one fixed remote
//! - [`PacketListener`]: open an unconnected datagram socket ([`PacketConn`])
//!
//! Each compiled object is wrapped in [`Provided`], which carries the
//! [`ConnectionProviderInfo`] derived from config alongside it.
//!
//! Dial and connect calls are cancelled by dropping their future; the OS
//! connect in flight is aborted with it.

mod blocked;
mod endpoint;
mod tcp;
mod tls;
mod udp;

pub use blocked::{BlockedDialer, BlockedListener};
pub use endpoint::{DialerEndpoint, ListenerEndpoint};
pub use tcp::TcpDialer;
pub use tls::TlsConnector;
pub use udp::{UdpEndpoint, UdpListener};

use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::{Address, ConnType, ConnectionProviderInfo, Result, Stream};

/// Opens streams to arbitrary destinations.
#[async_trait]
pub trait StreamDialer: Send + Sync {
    async fn dial(&self, addr: &Address) -> Result<Stream>;
}

/// Opens streams to a destination fixed at build time.
#[async_trait]
pub trait StreamEndpoint: Send + Sync {
    async fn connect(&self) -> Result<Stream>;
}

/// A datagram socket connected to one remote.
#[async_trait]
pub trait DatagramConn: Send + Sync {
    async fn send(&self, buf: &[u8]) -> Result<usize>;

    /// Receive one datagram. Bytes beyond `buf.len()` are discarded.
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Pending and future calls fail with `Error::Closed` once this returns.
    async fn close(&self) -> Result<()>;
}

/// Opens datagram sockets to a destination fixed at build time.
#[async_trait]
pub trait PacketEndpoint: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DatagramConn>>;
}

/// An unconnected datagram socket.
#[async_trait]
pub trait PacketConn: Send + Sync {
    async fn send_to(&self, buf: &[u8], dest: &Address) -> Result<usize>;

    /// Receive one datagram and its source.
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)>;

    /// Pending and future calls fail with `Error::Closed` once this returns.
    async fn close(&self) -> Result<()>;
}

/// Hands out packet connections.
#[async_trait]
pub trait PacketListener: Send + Sync {
    async fn listen_packet(&self) -> Result<Box<dyn PacketConn>>;
}

/// A compiled object plus its connection metadata.
pub struct Provided<T: ?Sized> {
    pub info: ConnectionProviderInfo,
    inner: Arc<T>,
}

impl<T: ?Sized> Provided<T> {
    pub fn new(info: ConnectionProviderInfo, inner: Arc<T>) -> Self {
        Self { info, inner }
    }

    pub fn conn_type(&self) -> ConnType {
        self.info.conn_type
    }

    pub fn first_hop(&self) -> &str {
        &self.info.first_hop
    }

    /// The shared trait object, for wrappers that keep it.
    pub fn shared(&self) -> Arc<T> {
        Arc::clone(&self.inner)
    }
}

impl<T: ?Sized> Clone for Provided<T> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized> Deref for Provided<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: ?Sized> std::fmt::Debug for Provided<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provided").field("info", &self.info).finish_non_exhaustive()
    }
}

pub type SharedStreamDialer = Provided<dyn StreamDialer>;
pub type SharedStreamEndpoint = Provided<dyn StreamEndpoint>;
pub type SharedPacketEndpoint = Provided<dyn PacketEndpoint>;
pub type SharedPacketListener = Provided<dyn PacketListener>;

/// A stream dialer and a packet listener compiled from one config.
#[derive(Clone, Debug)]
pub struct TransportPair {
    pub stream_dialer: SharedStreamDialer,
    pub packet_listener: SharedPacketListener,
}

impl TransportPair {
    /// The first hop shared by both legs, or empty if they differ.
    pub fn first_hop(&self) -> &str {
        if self.stream_dialer.first_hop() == self.packet_listener.first_hop() {
            self.stream_dialer.first_hop()
        } else {
            ""
        }
    }

    /// The legs' conn type when they agree, `Partial` otherwise.
    pub fn conn_type(&self) -> ConnType {
        let tcp = self.stream_dialer.conn_type();
        if tcp == self.packet_listener.conn_type() {
            tcp
        } else {
            ConnType::Partial
        }
    }
}
