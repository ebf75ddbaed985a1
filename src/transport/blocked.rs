//! Blocked transports
//!
//! Every call fails with [`Error::Blocked`] before touching the network.

use async_trait::async_trait;
use tracing::debug;

use crate::common::{Address, Result, Stream};
use crate::error::Error;

use super::{PacketConn, PacketListener, StreamDialer};

/// Stream dialer that refuses every destination.
#[derive(Debug, Clone, Default)]
pub struct BlockedDialer;

#[async_trait]
impl StreamDialer for BlockedDialer {
    async fn dial(&self, addr: &Address) -> Result<Stream> {
        debug!("Refusing stream to {}: blocked by config", addr);
        Err(Error::Blocked)
    }
}

/// Packet listener that refuses to open sockets.
#[derive(Debug, Clone, Default)]
pub struct BlockedListener;

#[async_trait]
impl PacketListener for BlockedListener {
    async fn listen_packet(&self) -> Result<Box<dyn PacketConn>> {
        debug!("Refusing packet listener: blocked by config");
        Err(Error::Blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blocked_dialer_fails_without_io() {
        // An unroutable documentation address: any real connect attempt would hang.
        let addr = Address::parse("192.0.2.1:443").unwrap();
        let err = BlockedDialer.dial(&addr).await.err().unwrap();
        assert!(err.to_string().contains("blocked by config"));
    }

    #[tokio::test]
    async fn test_blocked_listener() {
        let err = BlockedListener.listen_packet().await.err().unwrap();
        assert!(matches!(err, Error::Blocked));
    }
}
