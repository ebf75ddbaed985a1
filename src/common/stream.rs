//! Stream abstraction
//!
//! Every stream dialer and stream endpoint hands out this one boxed type, so
//! wrappers (Shadowsocks, WebSocket, TLS) compose without knowing what they wrap.

use tokio::io::{AsyncRead, AsyncWrite};

/// The byte stream type produced by dialers and endpoints.
pub type Stream = Box<dyn AsyncReadWrite + Unpin + Send>;

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
