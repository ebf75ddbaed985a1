//! Shadowsocks client
//!
//! ```text
//! dial(target) ──▶ endpoint.connect() ──▶ ShadowsocksStream
//!                                          │ first chunk: socks(target)
//!                                          ▼
//!                                        payload
//! ```
//!
//! UDP goes through [`ShadowsocksPacketListener`], one sealed datagram per
//! packet.

mod cipher;
mod config;
mod packet;
mod stream;

pub use cipher::{CipherKind, EncryptionKey, SaltGenerator};
pub use config::ShadowsocksConfig;
pub use packet::{pack, unpack, ShadowsocksPacketListener};
pub use stream::ShadowsocksStream;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::common::{Address, Result, Stream};
use crate::transport::{StreamDialer, StreamEndpoint};

/// Stream dialer that reaches every destination through one Shadowsocks server.
pub struct ShadowsocksDialer {
    endpoint: Arc<dyn StreamEndpoint>,
    key: EncryptionKey,
    salt: SaltGenerator,
}

impl ShadowsocksDialer {
    pub fn new(endpoint: Arc<dyn StreamEndpoint>, key: EncryptionKey) -> Self {
        Self {
            endpoint,
            key,
            salt: SaltGenerator::random(),
        }
    }

    /// Start every connection salt with `prefix`, so the first bytes on the
    /// wire look like another protocol.
    pub fn with_salt_prefix(mut self, prefix: Vec<u8>) -> Self {
        self.salt = SaltGenerator::with_prefix(prefix);
        self
    }
}

#[async_trait]
impl StreamDialer for ShadowsocksDialer {
    async fn dial(&self, addr: &Address) -> Result<Stream> {
        let inner = self.endpoint.connect().await?;
        let mut stream = ShadowsocksStream::new(inner, self.key.clone(), self.salt.clone());

        let mut header = Vec::with_capacity(32);
        addr.write_socks(&mut header)?;
        stream.write_all(&header).await?;
        stream.flush().await?;

        debug!("Shadowsocks connection to {} ({})", addr, self.key.kind().name());
        Ok(Box::new(stream))
    }
}
