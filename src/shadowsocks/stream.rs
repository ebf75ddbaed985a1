//! Shadowsocks AEAD stream
//!
//! Wire format, per direction:
//!
//! ```text
//! [salt][enc(len) + tag][enc(payload) + tag][enc(len) + tag][enc(payload) + tag]...
//! ```
//!
//! `len` is a big-endian u16 capped at 0x3FFF. Every seal or open advances a
//! little-endian nonce counter that starts at zero. The write salt is sent
//! lazily with the first chunk. The same type serves both ends of a
//! connection.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::trace;

use crate::common::Stream;

use super::cipher::{increment_nonce, AeadCipher, EncryptionKey, SaltGenerator, NONCE_SIZE, TAG_SIZE};

pub const MAX_PAYLOAD: usize = 0x3FFF;

// ============================================================================
// Incremental Buffer Reader
// ============================================================================

/// Reads exactly `buf.len()` bytes across polls.
struct Fill {
    buf: Vec<u8>,
    pos: usize,
}

impl Fill {
    fn new(len: usize) -> Self {
        Self { buf: vec![0u8; len], pos: 0 }
    }

    /// Ready(Ok(false)) means the peer closed before the first byte and
    /// `allow_eof` was set.
    fn poll_fill(&mut self, cx: &mut Context<'_>, inner: &mut Stream, allow_eof: bool) -> Poll<io::Result<bool>> {
        while self.pos < self.buf.len() {
            let mut temp = ReadBuf::new(&mut self.buf[self.pos..]);
            ready!(Pin::new(&mut *inner).poll_read(cx, &mut temp))?;
            let n = temp.filled().len();
            if n == 0 {
                if allow_eof && self.pos == 0 {
                    return Poll::Ready(Ok(false));
                }
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed in the middle of a chunk",
                )));
            }
            self.pos += n;
        }
        Poll::Ready(Ok(true))
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

// ============================================================================
// State Types
// ============================================================================

/// One direction's subkey plus its nonce counter.
struct Sealer {
    cipher: AeadCipher,
    nonce: [u8; NONCE_SIZE],
}

impl Sealer {
    fn new(cipher: AeadCipher) -> Self {
        Self { cipher, nonce: [0u8; NONCE_SIZE] }
    }

    fn seal(&mut self, plaintext: &[u8]) -> io::Result<Vec<u8>> {
        let sealed = self.cipher.encrypt(&self.nonce, plaintext).map_err(invalid_data)?;
        increment_nonce(&mut self.nonce);
        Ok(sealed)
    }

    fn open(&mut self, ciphertext: &[u8]) -> io::Result<Vec<u8>> {
        let opened = self.cipher.decrypt(&self.nonce, ciphertext).map_err(invalid_data)?;
        increment_nonce(&mut self.nonce);
        Ok(opened)
    }
}

enum ReadState {
    Salt(Fill),
    Length(Fill),
    Payload(Fill),
    Eof,
}

// ============================================================================
// ShadowsocksStream
// ============================================================================

/// Encrypted stream over any inner [`Stream`].
pub struct ShadowsocksStream {
    inner: Stream,
    key: EncryptionKey,
    salt: SaltGenerator,

    // Write state
    sealer: Option<Sealer>,
    write_buf: Vec<u8>,
    write_pos: usize,

    // Read state
    opener: Option<Sealer>,
    read_state: ReadState,
    read_buf: Vec<u8>,
    read_pos: usize,
}

impl ShadowsocksStream {
    pub fn new(inner: Stream, key: EncryptionKey, salt: SaltGenerator) -> Self {
        let salt_size = key.salt_size();
        Self {
            inner,
            key,
            salt,
            sealer: None,
            write_buf: Vec::new(),
            write_pos: 0,
            opener: None,
            read_state: ReadState::Salt(Fill::new(salt_size)),
            read_buf: Vec::new(),
            read_pos: 0,
        }
    }

    /// Encrypt one chunk into the write buffer, emitting the salt first if
    /// nothing has been written yet.
    fn encode_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        if self.sealer.is_none() {
            let salt = self.salt.generate(self.key.salt_size());
            let cipher = self.key.subkey(&salt).map_err(invalid_data)?;
            self.write_buf.extend_from_slice(&salt);
            self.sealer = Some(Sealer::new(cipher));
        }
        let Some(sealer) = self.sealer.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::Other, "stream cipher missing"));
        };
        let len = (data.len() as u16).to_be_bytes();
        let sealed_len = sealer.seal(&len)?;
        let sealed_payload = sealer.seal(data)?;
        self.write_buf.reserve(sealed_len.len() + sealed_payload.len());
        self.write_buf.extend_from_slice(&sealed_len);
        self.write_buf.extend_from_slice(&sealed_payload);
        Ok(())
    }

    /// Push buffered ciphertext into the inner stream.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.write_pos < self.write_buf.len() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.write_buf[self.write_pos..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::WriteZero, "inner stream closed")));
            }
            self.write_pos += n;
        }
        self.write_buf.clear();
        self.write_pos = 0;
        Poll::Ready(Ok(()))
    }

    /// Next decrypted chunk, or `None` at a clean end of stream.
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<Option<Vec<u8>>>> {
        loop {
            match &mut self.read_state {
                ReadState::Eof => return Poll::Ready(Ok(None)),

                ReadState::Salt(fill) => {
                    if !ready!(fill.poll_fill(cx, &mut self.inner, true))? {
                        self.read_state = ReadState::Eof;
                        continue;
                    }
                    let salt = fill.take();
                    let cipher = self.key.subkey(&salt).map_err(invalid_data)?;
                    self.opener = Some(Sealer::new(cipher));
                    self.read_state = ReadState::Length(Fill::new(2 + TAG_SIZE));
                }

                ReadState::Length(fill) => {
                    if !ready!(fill.poll_fill(cx, &mut self.inner, true))? {
                        self.read_state = ReadState::Eof;
                        continue;
                    }
                    let sealed = fill.take();
                    let opener = self.opener.as_mut().ok_or_else(|| invalid_data("missing read cipher"))?;
                    let raw = opener.open(&sealed)?;
                    let len = match raw.as_slice() {
                        [hi, lo] => usize::from(u16::from_be_bytes([*hi, *lo])),
                        _ => return Poll::Ready(Err(invalid_data("bad chunk length"))),
                    };
                    if len > MAX_PAYLOAD {
                        return Poll::Ready(Err(invalid_data(format!("chunk of {} bytes exceeds limit", len))));
                    }
                    self.read_state = ReadState::Payload(Fill::new(len + TAG_SIZE));
                }

                ReadState::Payload(fill) => {
                    ready!(fill.poll_fill(cx, &mut self.inner, false))?;
                    let sealed = fill.take();
                    let opener = self.opener.as_mut().ok_or_else(|| invalid_data("missing read cipher"))?;
                    let payload = opener.open(&sealed)?;
                    trace!("Shadowsocks chunk of {} bytes", payload.len());
                    self.read_state = ReadState::Length(Fill::new(2 + TAG_SIZE));
                    return Poll::Ready(Ok(Some(payload)));
                }
            }
        }
    }
}

// ============================================================================
// AsyncRead / AsyncWrite
// ============================================================================

impl AsyncRead for ShadowsocksStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.read_pos < this.read_buf.len() {
            let n = copy_to_buf(&this.read_buf[this.read_pos..], buf);
            this.read_pos += n;
            return Poll::Ready(Ok(()));
        }
        this.read_buf.clear();
        this.read_pos = 0;

        loop {
            match ready!(this.poll_chunk(cx))? {
                // Empty chunks carry nothing; keep reading rather than signal EOF.
                Some(data) if data.is_empty() => continue,
                Some(data) => {
                    let n = copy_to_buf(&data, buf);
                    if n < data.len() {
                        this.read_buf = data;
                        this.read_pos = n;
                    }
                    return Poll::Ready(Ok(()));
                }
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl AsyncWrite for ShadowsocksStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let size = buf.len().min(MAX_PAYLOAD);
        this.encode_chunk(&buf[..size])?;

        // The chunk is accepted; anything the inner stream did not take yet is
        // drained by the next write or flush.
        match this.poll_drain(cx) {
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            _ => Poll::Ready(Ok(size)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn invalid_data<E: ToString>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

fn copy_to_buf(src: &[u8], dst: &mut ReadBuf<'_>) -> usize {
    let n = src.len().min(dst.remaining());
    dst.put_slice(&src[..n]);
    n
}
