//! TLS client wrapper, used under `wss://` WebSocket endpoints.

use std::sync::Arc;

use tokio_rustls::rustls::{pki_types::ServerName, ClientConfig, RootCertStore};

use crate::common::{Result, Stream};
use crate::error::Error;

/// Wraps streams in client-side TLS verified against the webpki roots.
#[derive(Clone)]
pub struct TlsConnector {
    connector: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    pub fn new() -> Self {
        Self::with_alpn(&[])
    }

    pub fn with_alpn(alpn: &[&str]) -> Self {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let mut tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        tls_config.alpn_protocols = alpn.iter().map(|s| s.as_bytes().to_vec()).collect();

        Self {
            connector: tokio_rustls::TlsConnector::from(Arc::new(tls_config)),
        }
    }

    /// Run the client handshake over `stream` for `server_name`.
    pub async fn connect(&self, server_name: &str, stream: Stream) -> Result<Stream> {
        let domain = ServerName::try_from(server_name.to_string())
            .map_err(|_| Error::Config(format!("Invalid server name: {}", server_name)))?;
        let tls_stream = self.connector.connect(domain, stream).await?;
        Ok(Box::new(tls_stream))
    }
}

impl Default for TlsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_invalid_server_name() {
        let (client, _server) = tokio::io::duplex(64);
        let err = TlsConnector::new()
            .connect("not a hostname!", Box::new(client))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
