//! Endpoints bound to a fixed address through a dialer or listener

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::common::{Address, Result, Stream};

use super::{DatagramConn, PacketConn, PacketEndpoint, PacketListener, StreamDialer, StreamEndpoint};

/// Stream endpoint that dials `address` through `dialer`.
pub struct DialerEndpoint {
    address: Address,
    dialer: Arc<dyn StreamDialer>,
}

impl DialerEndpoint {
    pub fn new(address: Address, dialer: Arc<dyn StreamDialer>) -> Self {
        Self { address, dialer }
    }
}

#[async_trait]
impl StreamEndpoint for DialerEndpoint {
    async fn connect(&self) -> Result<Stream> {
        self.dialer.dial(&self.address).await
    }
}

/// Packet endpoint that opens a packet connection from `listener` and pins it to `address`.
pub struct ListenerEndpoint {
    address: Address,
    listener: Arc<dyn PacketListener>,
}

impl ListenerEndpoint {
    pub fn new(address: Address, listener: Arc<dyn PacketListener>) -> Self {
        Self { address, listener }
    }
}

#[async_trait]
impl PacketEndpoint for ListenerEndpoint {
    async fn connect(&self) -> Result<Box<dyn DatagramConn>> {
        let conn = self.listener.listen_packet().await?;
        Ok(Box::new(BoundDatagram {
            conn,
            remote: self.address.clone(),
        }))
    }
}

struct BoundDatagram {
    conn: Box<dyn PacketConn>,
    remote: Address,
}

#[async_trait]
impl DatagramConn for BoundDatagram {
    async fn send(&self, buf: &[u8]) -> Result<usize> {
        self.conn.send_to(buf, &self.remote).await
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let (n, from) = self.conn.recv_from(buf).await?;
            // Sources can only be compared once the remote is a literal address.
            if matches!(self.remote, Address::Domain(..)) || from == self.remote {
                return Ok(n);
            }
            trace!("Dropping datagram from unexpected source {}", from);
        }
    }

    async fn close(&self) -> Result<()> {
        self.conn.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TcpDialer, UdpListener};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, UdpSocket};

    #[tokio::test]
    async fn test_dialer_endpoint_connects_to_fixed_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = DialerEndpoint::new(
            Address::from(listener.local_addr().unwrap()),
            Arc::new(TcpDialer::new()),
        );

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"hi").await.unwrap();
        });

        let mut stream = endpoint.connect().await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_endpoint_filters_sources() {
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint = ListenerEndpoint::new(
            Address::from(remote.local_addr().unwrap()),
            Arc::new(UdpListener::new()),
        );

        let conn = endpoint.connect().await.unwrap();
        conn.send(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let (_, client) = remote.recv_from(&mut buf).await.unwrap();

        stranger.send_to(b"noise", client).await.unwrap();
        remote.send_to(b"reply", client).await.unwrap();

        let n = conn.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"reply");
    }
}
