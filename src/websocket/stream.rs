//! Byte stream over WebSocket binary messages

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::{Sink, Stream as FuturesStream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::{tungstenite::protocol::Message, WebSocketStream};
use tracing::{debug, trace};

use crate::common::Stream;

/// Each write becomes one binary message; reads concatenate message payloads.
pub struct WebSocketByteStream {
    inner: WebSocketStream<Stream>,
    read_buf: Vec<u8>,
    read_pos: usize,
    closed: bool,
}

impl WebSocketByteStream {
    pub fn new(inner: WebSocketStream<Stream>) -> Self {
        Self {
            inner,
            read_buf: Vec::new(),
            read_pos: 0,
            closed: false,
        }
    }

    fn fail(&mut self, e: impl ToString) -> io::Error {
        self.closed = true;
        io::Error::new(io::ErrorKind::Other, e.to_string())
    }
}

impl AsyncRead for WebSocketByteStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.read_pos < this.read_buf.len() {
            let n = (this.read_buf.len() - this.read_pos).min(buf.remaining());
            buf.put_slice(&this.read_buf[this.read_pos..this.read_pos + n]);
            this.read_pos += n;
            return Poll::Ready(Ok(()));
        }
        this.read_buf.clear();
        this.read_pos = 0;

        loop {
            if this.closed {
                return Poll::Ready(Ok(()));
            }

            let data = match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                // Control frames are answered by tungstenite itself.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!("WebSocket closed by peer: {:?}", frame);
                    this.closed = true;
                    continue;
                }
                Some(Ok(Message::Frame(_))) => {
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::InvalidData, "unexpected raw frame")));
                }
                Some(Err(e)) => return Poll::Ready(Err(this.fail(e))),
                None => {
                    this.closed = true;
                    continue;
                }
            };

            if data.is_empty() {
                continue;
            }
            trace!("WebSocket received {} bytes", data.len());
            let n = data.len().min(buf.remaining());
            buf.put_slice(&data[..n]);
            if n < data.len() {
                this.read_buf = data;
                this.read_pos = n;
            }
            return Poll::Ready(Ok(()));
        }
    }
}

impl AsyncWrite for WebSocketByteStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "WebSocket connection closed")));
        }

        if let Err(e) = ready!(Pin::new(&mut this.inner).poll_ready(cx)) {
            return Poll::Ready(Err(this.fail(e)));
        }
        match Pin::new(&mut this.inner).start_send(Message::Binary(buf.to_vec())) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(e) => Poll::Ready(Err(this.fail(e))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Ok(()));
        }
        match ready!(Pin::new(&mut this.inner).poll_flush(cx)) {
            Ok(()) => Poll::Ready(Ok(())),
            Err(e) => Poll::Ready(Err(this.fail(e))),
        }
    }

    /// Sends a close frame. WebSocket has no half-close, so reads end too.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Ok(()));
        }
        let result = ready!(Pin::new(&mut this.inner).poll_close(cx));
        this.closed = true;
        Poll::Ready(result.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string())))
    }
}
