//! Direct UDP listener and endpoint

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::common::{Address, Result};
use crate::error::Error;

use super::{DatagramConn, PacketConn, PacketEndpoint, PacketListener};

/// Resolve to a socket address. Literal IPs skip the resolver.
pub(crate) async fn resolve(addr: &Address) -> Result<SocketAddr> {
    match addr {
        Address::Socket(socket_addr) => Ok(*socket_addr),
        Address::Domain(domain, port) => tokio::net::lookup_host((domain.as_str(), *port))
            .await?
            .next()
            .ok_or_else(|| Error::InvalidAddress(format!("{} did not resolve", addr))),
    }
}

fn unspecified_for(ip: IpAddr) -> SocketAddr {
    match ip {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Hands out unconnected OS sockets.
#[derive(Debug, Clone, Default)]
pub struct UdpListener;

impl UdpListener {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PacketListener for UdpListener {
    async fn listen_packet(&self) -> Result<Box<dyn PacketConn>> {
        // Prefer one dual-stack socket; fall back to IPv4 only.
        let (socket, dual_stack) = match UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)).await {
            Ok(socket) => (socket, true),
            Err(e) => {
                debug!("IPv6 UDP bind failed ({}), using IPv4 only", e);
                (UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?, false)
            }
        };
        Ok(Box::new(UdpPacketConn {
            socket,
            dual_stack,
            closed: CancellationToken::new(),
        }))
    }
}

struct UdpPacketConn {
    socket: UdpSocket,
    dual_stack: bool,
    closed: CancellationToken,
}

#[async_trait]
impl PacketConn for UdpPacketConn {
    async fn send_to(&self, buf: &[u8], dest: &Address) -> Result<usize> {
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }
        let mut target = resolve(dest).await?;
        if let (true, IpAddr::V4(v4)) = (self.dual_stack, target.ip()) {
            target = SocketAddr::new(IpAddr::V6(v4.to_ipv6_mapped()), target.port());
        }
        trace!("UDP send {} bytes to {}", buf.len(), target);
        Ok(self.socket.send_to(buf, target).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        tokio::select! {
            _ = self.closed.cancelled() => Err(Error::Closed),
            res = self.socket.recv_from(buf) => {
                let (n, from) = res?;
                let from = SocketAddr::new(from.ip().to_canonical(), from.port());
                Ok((n, Address::Socket(from)))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Connects an OS socket to a fixed address.
#[derive(Debug, Clone)]
pub struct UdpEndpoint {
    address: Address,
}

impl UdpEndpoint {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

#[async_trait]
impl PacketEndpoint for UdpEndpoint {
    async fn connect(&self) -> Result<Box<dyn DatagramConn>> {
        let target = resolve(&self.address).await?;
        let socket = UdpSocket::bind(unspecified_for(target.ip())).await?;
        socket.connect(target).await?;
        Ok(Box::new(UdpDatagram {
            socket,
            closed: CancellationToken::new(),
        }))
    }
}

struct UdpDatagram {
    socket: UdpSocket,
    closed: CancellationToken,
}

#[async_trait]
impl DatagramConn for UdpDatagram {
    async fn send(&self, buf: &[u8]) -> Result<usize> {
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }
        Ok(self.socket.send(buf).await?)
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        tokio::select! {
            _ = self.closed.cancelled() => Err(Error::Closed),
            res = self.socket.recv(buf) => Ok(res?),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_endpoint_roundtrip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint = UdpEndpoint::new(Address::from(server.local_addr().unwrap()));

        let conn = endpoint.connect().await.unwrap();
        conn.send(b"hello").await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        server.send_to(b"world", from).await.unwrap();

        let n = conn.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[tokio::test]
    async fn test_listener_roundtrip_reports_source() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let conn = UdpListener::new().listen_packet().await.unwrap();
        conn.send_to(b"ping", &Address::from(server_addr)).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        server.send_to(b"pong", from).await.unwrap();

        let (n, source) = conn.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
        assert_eq!(source, Address::from(server_addr));
    }

    #[tokio::test]
    async fn test_close_unblocks_recv() {
        let conn: Arc<dyn PacketConn> = Arc::from(UdpListener::new().listen_packet().await.unwrap());
        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                let mut buf = [0u8; 16];
                conn.recv_from(&mut buf).await
            })
        };
        conn.close().await.unwrap();
        assert!(matches!(reader.await.unwrap(), Err(Error::Closed)));
        assert!(conn.send_to(b"x", &Address::domain("localhost", 9)).await.is_err());
    }
}
