//! Shadowsocks AEAD datagrams
//!
//! Each datagram is sealed on its own under a fresh salt with a zero nonce:
//!
//! ```text
//! [salt][enc(socks address + payload) + tag]
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::common::{Address, Result};
use crate::error::Error;
use crate::transport::{DatagramConn, PacketConn, PacketEndpoint, PacketListener};

use super::cipher::{EncryptionKey, SaltGenerator, NONCE_SIZE, TAG_SIZE};

const ZERO_NONCE: [u8; NONCE_SIZE] = [0u8; NONCE_SIZE];

/// Largest datagram read from the proxy before decryption.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Seal one datagram addressed to `dest`.
pub fn pack(key: &EncryptionKey, salt: &SaltGenerator, dest: &Address, payload: &[u8]) -> Result<Vec<u8>> {
    let mut plain = Vec::with_capacity(payload.len() + 32);
    dest.write_socks(&mut plain)?;
    plain.extend_from_slice(payload);

    let salt = salt.generate(key.salt_size());
    let sealed = key.subkey(&salt)?.encrypt(&ZERO_NONCE, &plain)?;

    let mut out = salt;
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open one datagram, returning its source address and payload.
pub fn unpack(key: &EncryptionKey, packet: &[u8]) -> Result<(Address, Vec<u8>)> {
    let salt_size = key.salt_size();
    if packet.len() < salt_size + TAG_SIZE {
        return Err(Error::Protocol(format!("datagram of {} bytes is too short", packet.len())));
    }
    let (salt, sealed) = packet.split_at(salt_size);
    let mut plain = key.subkey(salt)?.decrypt(&ZERO_NONCE, sealed)?;
    let (source, used) = Address::read_socks(&plain)?;
    plain.drain(..used);
    Ok((source, plain))
}

/// Packet listener that tunnels every datagram through one Shadowsocks server.
pub struct ShadowsocksPacketListener {
    endpoint: Arc<dyn PacketEndpoint>,
    key: EncryptionKey,
}

impl ShadowsocksPacketListener {
    pub fn new(endpoint: Arc<dyn PacketEndpoint>, key: EncryptionKey) -> Self {
        Self { endpoint, key }
    }
}

#[async_trait]
impl PacketListener for ShadowsocksPacketListener {
    async fn listen_packet(&self) -> Result<Box<dyn PacketConn>> {
        let conn = self.endpoint.connect().await?;
        debug!("Shadowsocks packet session opened ({})", self.key.kind().name());
        Ok(Box::new(ShadowsocksPacketConn {
            conn,
            key: self.key.clone(),
            salt: SaltGenerator::random(),
        }))
    }
}

struct ShadowsocksPacketConn {
    conn: Box<dyn DatagramConn>,
    key: EncryptionKey,
    salt: SaltGenerator,
}

#[async_trait]
impl PacketConn for ShadowsocksPacketConn {
    async fn send_to(&self, buf: &[u8], dest: &Address) -> Result<usize> {
        let packet = pack(&self.key, &self.salt, dest, buf)?;
        self.conn.send(&packet).await?;
        trace!("Sent {} bytes to {} via Shadowsocks", buf.len(), dest);
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        let mut packet = vec![0u8; MAX_DATAGRAM];
        loop {
            let n = self.conn.recv(&mut packet).await?;
            match unpack(&self.key, &packet[..n]) {
                Ok((source, payload)) => {
                    let len = payload.len().min(buf.len());
                    buf[..len].copy_from_slice(&payload[..len]);
                    return Ok((len, source));
                }
                // Undecryptable datagrams are noise, not a reason to fail the socket.
                Err(e) => debug!("Dropping Shadowsocks datagram: {}", e),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.conn.close().await
    }
}
