//! Direct TCP dialer

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::trace;

use crate::common::{Address, Result, Stream};
use crate::error::Error;

use super::StreamDialer;

/// Dials the destination with an OS socket.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    connect_timeout: Option<Duration>,
}

impl TcpDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    async fn connect(addr: &Address) -> Result<TcpStream> {
        let stream = match addr {
            Address::Socket(socket_addr) => TcpStream::connect(socket_addr).await?,
            Address::Domain(domain, port) => TcpStream::connect((domain.as_str(), *port)).await?,
        };
        Ok(stream)
    }
}

#[async_trait]
impl StreamDialer for TcpDialer {
    async fn dial(&self, addr: &Address) -> Result<Stream> {
        trace!("TCP dial {}", addr);
        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, Self::connect(addr))
                .await
                .map_err(|_| Error::Timeout)??,
            None => Self::connect(addr).await?,
        };

        // Disable Nagle's algorithm for lower latency
        stream.set_nodelay(true)?;

        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = Address::from(listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let mut stream = TcpDialer::new().dial(&addr).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // Non-routable; the connect either hangs until the timeout or fails outright.
        let addr = Address::parse("10.255.255.1:9").unwrap();
        let dialer = TcpDialer::new().with_connect_timeout(Duration::from_millis(50));
        let err = dialer.dial(&addr).await.err().unwrap();
        assert!(matches!(err, Error::Timeout | Error::Io(_)), "{}", err);
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = Address::from(listener.local_addr().unwrap());
        drop(listener);

        assert!(TcpDialer::new().dial(&addr).await.is_err());
    }
}
