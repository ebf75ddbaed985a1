//! HTTP reporter
//!
//! Sends one HTTP/1.1 request per report over a fresh stream, wrapped in TLS
//! for `https` URLs, and accepts any 2xx status.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};
use url::{Host, Url};

use crate::common::{Address, Result};
use crate::error::Error;
use crate::transport::{StreamDialer, TlsConnector};

use super::Reporter;

const REPORT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_STATUS_LINE: usize = 4096;
const DEFAULT_METHOD: &str = "POST";

/// Request sent on every report.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: Url,
    pub method: String,
    /// In sending order. A name may repeat.
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// Validate `url`, `method` and headers. An empty method means POST.
    pub fn new(url: &str, method: &str, headers: Vec<(String, String)>, body: Option<String>) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::schema("request.url", format!("{:?}: {}", url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::schema("request.url", format!("unsupported scheme {:?}", url.scheme())));
        }
        if url.host().is_none() {
            return Err(Error::schema("request.url", "missing host"));
        }

        let method = if method.is_empty() { DEFAULT_METHOD } else { method };
        if !method.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
            return Err(Error::schema("request.method", format!("{:?} is not a valid method", method)));
        }
        for (name, value) in &headers {
            let bad_name = name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace() || b == b':');
            if bad_name || value.contains(|c: char| c == '\r' || c == '\n') {
                return Err(Error::schema("request.headers", format!("invalid header {:?}", name)));
            }
        }

        Ok(Self {
            url,
            method: method.to_string(),
            headers,
            body,
        })
    }

    fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// `host:port` to dial, with the scheme's default port filled in.
    pub fn target(&self) -> Result<Address> {
        let port = self
            .url
            .port_or_known_default()
            .unwrap_or(if self.is_https() { 443 } else { 80 });
        match self.url.host() {
            Some(Host::Domain(domain)) => Ok(Address::domain(domain, port)),
            Some(Host::Ipv4(ip)) => Ok(Address::from(SocketAddr::new(ip.into(), port))),
            Some(Host::Ipv6(ip)) => Ok(Address::from(SocketAddr::new(ip.into(), port))),
            None => Err(Error::schema("request.url", "missing host")),
        }
    }

    /// Request bytes as written to the wire.
    pub fn encode(&self) -> Vec<u8> {
        let mut path = self.url.path().to_string();
        if let Some(query) = self.url.query() {
            path.push('?');
            path.push_str(query);
        }
        let host = match (self.url.host_str(), self.url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };

        let mut head = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", self.method, path, host);
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        let body = self.body.as_deref().unwrap_or_default();
        if !body.is_empty() || self.method != "GET" {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("Connection: close\r\n\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(body.as_bytes());
        out
    }
}

/// Reports by sending an [`HttpRequest`] through the tunnel.
pub struct HttpReporter {
    request: HttpRequest,
    interval: Duration,
    tls: Option<TlsConnector>,
}

impl HttpReporter {
    pub fn new(request: HttpRequest, interval: Duration) -> Self {
        let tls = request.is_https().then(|| TlsConnector::with_alpn(&["http/1.1"]));
        Self { request, interval, tls }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    async fn send(&self, dialer: &dyn StreamDialer) -> Result<u16> {
        let target = self.request.target()?;
        trace!("Reporting to {}", target);
        let mut stream = dialer.dial(&target).await?;
        if let Some(tls) = &self.tls {
            stream = tls.connect(&target.host(), stream).await?;
        }

        stream.write_all(&self.request.encode()).await?;
        stream.flush().await?;

        let mut head = Vec::with_capacity(256);
        let mut buf = [0u8; 512];
        while !head.windows(2).any(|w| w == b"\r\n") {
            if head.len() > MAX_STATUS_LINE {
                return Err(Error::Protocol("HTTP status line too long".into()));
            }
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::Protocol("connection closed before the HTTP status line".into()));
            }
            head.extend_from_slice(&buf[..n]);
        }
        parse_status(&head)
    }
}

impl std::fmt::Debug for HttpReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReporter")
            .field("request", &self.request)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Status code from the first line of an HTTP/1.x response.
fn parse_status(head: &[u8]) -> Result<u16> {
    let line = head.split(|&b| b == b'\n').next().unwrap_or_default();
    let line = String::from_utf8_lossy(line);
    let mut parts = line.trim_end().splitn(3, ' ');
    match (parts.next(), parts.next().map(str::parse::<u16>)) {
        (Some(version), Some(Ok(code))) if version.starts_with("HTTP/1.") => Ok(code),
        _ => Err(Error::Protocol(format!("malformed HTTP status line {:?}", line.trim_end()))),
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn report(&self, dialer: &dyn StreamDialer) -> Result<()> {
        let status = tokio::time::timeout(REPORT_TIMEOUT, self.send(dialer))
            .await
            .map_err(|_| Error::Timeout)??;
        if !(200..300).contains(&status) {
            return Err(Error::Protocol(format!("report rejected with HTTP status {}", status)));
        }
        debug!("Reported to {} ({})", self.request.url, status);
        Ok(())
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}
