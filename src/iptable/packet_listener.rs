//! Per-destination packet multiplexer
//!
//! One logical [`PacketConn`] fans out over lazily opened connections, one
//! per destination IP that matched a route, plus an optional default
//! connection:
//!
//! ```text
//!            send_to(dest) ──lookup──▶ conn for dest IP / default conn
//! recv_from ◀── mpsc(128) ◀── one forwarder task per underlying conn
//! ```

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use ipnet::IpNet;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::common::{Address, Result};
use crate::error::Error;
use crate::transport::{PacketConn, PacketListener};

use super::IpTable;

const PACKET_QUEUE_SIZE: usize = 128;
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Routes datagrams by destination IP across several packet listeners.
pub struct IpTablePacketListener {
    table: IpTable<usize>,
    routes: Vec<Arc<dyn PacketListener>>,
    default: Option<Arc<dyn PacketListener>>,
}

impl IpTablePacketListener {
    pub fn new() -> Self {
        Self {
            table: IpTable::new(),
            routes: Vec::new(),
            default: None,
        }
    }

    /// Send traffic for `prefixes` through `listener`. Each destination IP
    /// gets its own underlying connection, opened on first use.
    pub fn add_route(&mut self, prefixes: &[IpNet], listener: Arc<dyn PacketListener>) {
        let index = self.routes.len();
        self.routes.push(listener);
        for prefix in prefixes {
            self.table.add_prefix(*prefix, index);
        }
    }

    pub fn with_default(mut self, listener: Arc<dyn PacketListener>) -> Self {
        self.default = Some(listener);
        self
    }

    fn into_routing(self) -> Routing {
        Routing {
            table: self.table,
            routes: self.routes,
            default: self.default,
        }
    }
}

impl Default for IpTablePacketListener {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen routing state shared by every connection of one listener.
struct Routing {
    table: IpTable<usize>,
    routes: Vec<Arc<dyn PacketListener>>,
    default: Option<Arc<dyn PacketListener>>,
}

impl Routing {
    fn select(&self, dest: &Address) -> Option<(RouteKey, &Arc<dyn PacketListener>)> {
        if let Some(ip) = dest.ip() {
            if let Some(&index) = self.table.lookup(ip) {
                return Some((RouteKey::Ip(ip), &self.routes[index]));
            }
        }
        self.default.as_ref().map(|l| (RouteKey::Default, l))
    }
}

/// `listen_packet` needs an owned, shareable view of the routes.
pub struct SharedIpTablePacketListener {
    routing: Arc<Routing>,
}

impl From<IpTablePacketListener> for SharedIpTablePacketListener {
    fn from(listener: IpTablePacketListener) -> Self {
        Self {
            routing: Arc::new(listener.into_routing()),
        }
    }
}

#[async_trait]
impl PacketListener for SharedIpTablePacketListener {
    async fn listen_packet(&self) -> Result<Box<dyn PacketConn>> {
        let conn = MuxPacketConn::new(Arc::clone(&self.routing));
        if let Some(default) = &self.routing.default {
            match default.listen_packet().await {
                Ok(sub) => {
                    conn.adopt(RouteKey::Default, Arc::from(sub));
                }
                // Retried lazily on the first send that needs it.
                Err(e) => warn!("Failed to open default packet connection: {}", e),
            }
        }
        Ok(Box::new(conn))
    }
}

// ============================================================================
// MuxPacketConn
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RouteKey {
    Default,
    Ip(IpAddr),
}

struct Incoming {
    data: Bytes,
    from: Address,
}

struct Reader {
    rx: mpsc::Receiver<Incoming>,
    /// Unread tail of a datagram larger than the caller's buffer.
    pending: Option<Incoming>,
}

struct MuxPacketConn {
    routing: Arc<Routing>,
    /// `None` once closed.
    conns: Mutex<Option<HashMap<RouteKey, Arc<dyn PacketConn>>>>,
    forwarders: Mutex<JoinSet<()>>,
    tx: Mutex<Option<mpsc::Sender<Incoming>>>,
    reader: tokio::sync::Mutex<Reader>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl MuxPacketConn {
    fn new(routing: Arc<Routing>) -> Self {
        let (tx, rx) = mpsc::channel(PACKET_QUEUE_SIZE);
        Self {
            routing,
            conns: Mutex::new(Some(HashMap::new())),
            forwarders: Mutex::new(JoinSet::new()),
            tx: Mutex::new(Some(tx)),
            reader: tokio::sync::Mutex::new(Reader { rx, pending: None }),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Cache `sub` under `key` and start forwarding its packets. Returns the
    /// connection to use: `sub`, or the one another writer cached first.
    fn adopt(&self, key: RouteKey, sub: Arc<dyn PacketConn>) -> Option<Arc<dyn PacketConn>> {
        let mut conns = self.conns.lock();
        let map = conns.as_mut()?;
        if let Some(existing) = map.get(&key) {
            return Some(Arc::clone(existing));
        }
        let tx = self.tx.lock().clone()?;
        map.insert(key, Arc::clone(&sub));
        self.forwarders
            .lock()
            .spawn(forward(Arc::clone(&sub), tx, self.cancel.clone()));
        trace!("Opened packet connection for {:?}", key);
        Some(sub)
    }

    async fn connection_for(&self, dest: &Address) -> Result<Arc<dyn PacketConn>> {
        let (key, listener) = self
            .routing
            .select(dest)
            .ok_or_else(|| Error::NoRoute(dest.to_string()))?;

        let cached = match self.conns.lock().as_ref() {
            Some(map) => map.get(&key).cloned(),
            None => return Err(Error::Closed),
        };
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let sub: Arc<dyn PacketConn> = Arc::from(listener.listen_packet().await?);
        match self.adopt(key, Arc::clone(&sub)) {
            Some(conn) if Arc::ptr_eq(&conn, &sub) => Ok(conn),
            Some(winner) => {
                // Lost the race to another writer.
                if let Err(e) = sub.close().await {
                    debug!("Failed to close redundant packet connection: {}", e);
                }
                Ok(winner)
            }
            None => {
                let _ = sub.close().await;
                Err(Error::Closed)
            }
        }
    }
}

async fn forward(conn: Arc<dyn PacketConn>, tx: mpsc::Sender<Incoming>, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            r = conn.recv_from(&mut buf) => r,
        };
        let (n, from) = match received {
            Ok(r) => r,
            Err(Error::Closed) => break,
            Err(e) => {
                debug!("Packet forwarder stopping: {}", e);
                break;
            }
        };
        let packet = Incoming {
            data: Bytes::copy_from_slice(&buf[..n]),
            from,
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(packet) => if sent.is_err() { break },
        }
    }
}

fn copy_out(packet: &mut Incoming, buf: &mut [u8]) -> usize {
    let n = packet.data.len().min(buf.len());
    buf[..n].copy_from_slice(&packet.data[..n]);
    packet.data.advance(n);
    n
}

#[async_trait]
impl PacketConn for MuxPacketConn {
    async fn send_to(&self, buf: &[u8], dest: &Address) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let conn = self.connection_for(dest).await?;
        conn.send_to(buf, dest).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let mut reader = self.reader.lock().await;

        if let Some(mut packet) = reader.pending.take() {
            let n = copy_out(&mut packet, buf);
            let from = packet.from.clone();
            if packet.data.has_remaining() {
                reader.pending = Some(packet);
            }
            return Ok((n, from));
        }

        let next = tokio::select! {
            _ = self.cancel.cancelled() => None,
            p = reader.rx.recv() => p,
        };
        let mut packet = next.ok_or(Error::Closed)?;
        let n = copy_out(&mut packet, buf);
        let from = packet.from.clone();
        if packet.data.has_remaining() {
            reader.pending = Some(packet);
        }
        Ok((n, from))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();

        let (conns, mut forwarders) = {
            let mut conns = self.conns.lock();
            let taken = conns.take().unwrap_or_default();
            (taken, std::mem::take(&mut *self.forwarders.lock()))
        };

        let mut errors = Vec::new();
        for (key, conn) in conns {
            if let Err(e) = conn.close().await {
                warn!("Failed to close packet connection for {:?}: {}", key, e);
                errors.push(e);
            }
        }

        while let Some(joined) = forwarders.join_next().await {
            if let Err(e) = joined {
                warn!("Packet forwarder task failed: {}", e);
            }
        }

        // Every forwarder is gone, so this drops the last sender.
        self.tx.lock().take();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::CloseFailed(errors))
        }
    }
}

impl Drop for MuxPacketConn {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iptable::parse_prefix;
    use crate::transport::UdpListener;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Listener whose connections echo every datagram back, tagged with the
    /// listener name.
    #[derive(Default)]
    struct EchoListener {
        name: &'static str,
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    impl EchoListener {
        fn named(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, ..Default::default() })
        }
    }

    struct EchoConn {
        name: &'static str,
        tx: mpsc::UnboundedSender<(Vec<u8>, Address)>,
        rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, Address)>>,
        cancel: CancellationToken,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PacketListener for EchoListener {
        async fn listen_packet(&self) -> Result<Box<dyn PacketConn>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            Ok(Box::new(EchoConn {
                name: self.name,
                tx,
                rx: tokio::sync::Mutex::new(rx),
                cancel: CancellationToken::new(),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    #[async_trait]
    impl PacketConn for EchoConn {
        async fn send_to(&self, buf: &[u8], dest: &Address) -> Result<usize> {
            let mut tagged = format!("{}:", self.name).into_bytes();
            tagged.extend_from_slice(buf);
            self.tx.send((tagged, dest.clone())).map_err(|_| Error::Closed)?;
            Ok(buf.len())
        }

        async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
            let mut rx = self.rx.lock().await;
            let (data, from) = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Closed),
                item = rx.recv() => item.ok_or(Error::Closed)?,
            };
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            Ok((n, from))
        }

        async fn close(&self) -> Result<()> {
            self.cancel.cancel();
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    async fn recv_string(conn: &dyn PacketConn, size: usize) -> (String, Address) {
        let mut buf = vec![0u8; size];
        let (n, from) = tokio::time::timeout(Duration::from_secs(5), conn.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        (String::from_utf8_lossy(&buf[..n]).into_owned(), from)
    }

    #[tokio::test]
    async fn test_fans_out_by_destination() {
        let lan = EchoListener::named("lan");
        let default = EchoListener::named("default");
        let mut mux = IpTablePacketListener::new().with_default(default.clone());
        mux.add_route(&[parse_prefix("10.0.0.0/8").unwrap()], lan.clone());
        let listener = SharedIpTablePacketListener::from(mux);

        let conn = listener.listen_packet().await.unwrap();
        // The default connection is opened eagerly, route connections lazily.
        assert_eq!(default.opened.load(Ordering::SeqCst), 1);
        assert_eq!(lan.opened.load(Ordering::SeqCst), 0);

        conn.send_to(b"a", &addr("10.1.2.3:53")).await.unwrap();
        assert_eq!(recv_string(&*conn, 64).await, ("lan:a".to_string(), addr("10.1.2.3:53")));

        conn.send_to(b"b", &addr("1.1.1.1:53")).await.unwrap();
        assert_eq!(recv_string(&*conn, 64).await.0, "default:b");

        conn.send_to(b"c", &addr("10.9.9.9:53")).await.unwrap();
        assert_eq!(recv_string(&*conn, 64).await.0, "lan:c");
        // Same route, different IP: a second connection.
        assert_eq!(lan.opened.load(Ordering::SeqCst), 2);

        conn.close().await.unwrap();
        assert_eq!(lan.closed.load(Ordering::SeqCst), 2);
        assert_eq!(default.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connections_are_cached_per_destination_ip() {
        let lan = EchoListener::named("lan");
        let mut mux = IpTablePacketListener::new();
        mux.add_route(
            &[parse_prefix("10.0.0.0/8").unwrap(), parse_prefix("fd00::/8").unwrap()],
            lan.clone(),
        );
        let conn = SharedIpTablePacketListener::from(mux).listen_packet().await.unwrap();

        for port in [53, 123, 53] {
            let dest = addr(&format!("10.1.2.3:{}", port));
            conn.send_to(b"x", &dest).await.unwrap();
            assert_eq!(recv_string(&*conn, 64).await, ("lan:x".to_string(), dest));
        }
        // Ports do not matter, only the IP.
        assert_eq!(lan.opened.load(Ordering::SeqCst), 1);

        conn.send_to(b"y", &addr("10.9.9.9:53")).await.unwrap();
        assert_eq!(recv_string(&*conn, 64).await.0, "lan:y");
        conn.send_to(b"z", &addr("[fd00::1]:53")).await.unwrap();
        assert_eq!(recv_string(&*conn, 64).await.0, "lan:z");
        assert_eq!(lan.opened.load(Ordering::SeqCst), 3);

        conn.send_to(b"w", &addr("10.9.9.9:53")).await.unwrap();
        assert_eq!(recv_string(&*conn, 64).await.0, "lan:w");
        assert_eq!(lan.opened.load(Ordering::SeqCst), 3);

        conn.close().await.unwrap();
        assert_eq!(lan.closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_split_across_reads() {
        let listener =
            SharedIpTablePacketListener::from(IpTablePacketListener::new().with_default(EchoListener::named("d")));
        let conn = listener.listen_packet().await.unwrap();

        conn.send_to(b"0123456789", &addr("1.1.1.1:53")).await.unwrap();
        conn.send_to(b"xy", &addr("1.1.1.1:53")).await.unwrap();

        assert_eq!(recv_string(&*conn, 5).await.0, "d:012");
        assert_eq!(recv_string(&*conn, 5).await.0, "34567");
        // The tail of the first datagram is never merged with the next one.
        assert_eq!(recv_string(&*conn, 5).await.0, "89");
        assert_eq!(recv_string(&*conn, 5).await.0, "d:xy");
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_route_without_default() {
        let mut mux = IpTablePacketListener::new();
        mux.add_route(&[parse_prefix("10.0.0.0/8").unwrap()], EchoListener::named("lan"));
        let conn = SharedIpTablePacketListener::from(mux).listen_packet().await.unwrap();

        let err = conn.send_to(b"x", &addr("8.8.8.8:53")).await.unwrap_err();
        assert_eq!(err.to_string(), "no dialer available for address 8.8.8.8:53");
        let err = conn.send_to(b"x", &addr("example.com:53")).await.unwrap_err();
        assert!(matches!(err, Error::NoRoute(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_while_in_use() {
        let lan = EchoListener::named("lan");
        let default = EchoListener::named("default");
        let mut mux = IpTablePacketListener::new().with_default(default.clone());
        mux.add_route(&[parse_prefix("10.0.0.0/8").unwrap()], lan.clone());
        let conn: Arc<dyn PacketConn> =
            Arc::from(SharedIpTablePacketListener::from(mux).listen_packet().await.unwrap());

        let mut tasks = JoinSet::new();
        for i in 0..4 {
            let conn = Arc::clone(&conn);
            tasks.spawn(async move {
                let mut buf = [0u8; 8];
                loop {
                    let dest = if i % 2 == 0 { "10.0.0.1:53" } else { "9.9.9.9:53" };
                    if conn.send_to(b"spam", &addr(dest)).await.is_err() {
                        break;
                    }
                    if conn.recv_from(&mut buf).await.is_err() {
                        break;
                    }
                }
            });
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close().await.unwrap();

        // Every worker observes the close instead of hanging.
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(joined) = tasks.join_next().await {
                joined.unwrap();
            }
        })
        .await
        .unwrap();

        let opened = lan.opened.load(Ordering::SeqCst) + default.opened.load(Ordering::SeqCst);
        let closed = lan.closed.load(Ordering::SeqCst) + default.closed.load(Ordering::SeqCst);
        assert_eq!(opened, closed);

        assert!(matches!(conn.send_to(b"x", &addr("10.0.0.1:53")).await, Err(Error::Closed)));
        let mut buf = [0u8; 4];
        assert!(matches!(conn.recv_from(&mut buf).await, Err(Error::Closed)));
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_default_route_over_real_udp() {
        let server = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = Address::from(server.local_addr().unwrap());
        let listener = SharedIpTablePacketListener::from(
            IpTablePacketListener::new().with_default(Arc::new(UdpListener::new())),
        );
        let conn = listener.listen_packet().await.unwrap();

        conn.send_to(b"ping", &server_addr).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        server.send_to(b"pong", from).await.unwrap();

        assert_eq!(recv_string(&*conn, 16).await, ("pong".to_string(), server_addr));
        conn.close().await.unwrap();
    }
}
