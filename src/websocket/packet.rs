//! Datagrams over WebSocket messages

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::{tungstenite::protocol::Message, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::common::{Result, Stream};
use crate::error::Error;
use crate::transport::DatagramConn;

type WsSink = SplitSink<WebSocketStream<Stream>, Message>;
type WsSource = SplitStream<WebSocketStream<Stream>>;

/// One binary message per datagram.
pub struct WebSocketDatagram {
    sink: Mutex<WsSink>,
    source: Mutex<WsSource>,
    closed: CancellationToken,
}

impl WebSocketDatagram {
    pub fn new(ws: WebSocketStream<Stream>) -> Self {
        let (sink, source) = ws.split();
        Self {
            sink: Mutex::new(sink),
            source: Mutex::new(source),
            closed: CancellationToken::new(),
        }
    }
}

fn ws_error(e: impl ToString) -> Error {
    Error::Protocol(format!("WebSocket error: {}", e.to_string()))
}

#[async_trait]
impl DatagramConn for WebSocketDatagram {
    async fn send(&self, buf: &[u8]) -> Result<usize> {
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(buf.to_vec())).await.map_err(ws_error)?;
        Ok(buf.len())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let mut source = tokio::select! {
            _ = self.closed.cancelled() => return Err(Error::Closed),
            source = self.source.lock() => source,
        };
        loop {
            let next = tokio::select! {
                _ = self.closed.cancelled() => return Err(Error::Closed),
                next = source.next() => next,
            };
            let data = match next {
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Close(_))) | None => return Err(Error::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ws_error(e)),
            };
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            if n < data.len() {
                trace!("Truncated {}-byte WebSocket datagram to {}", data.len(), n);
            }
            return Ok(n);
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        let mut sink = self.sink.lock().await;
        // The peer may already be gone; closing is best effort.
        if let Err(e) = sink.close().await {
            trace!("WebSocket close: {}", e);
        }
        Ok(())
    }
}
