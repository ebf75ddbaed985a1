//! Per-destination stream routing

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::common::{Address, Result, Stream};
use crate::error::Error;
use crate::transport::StreamDialer;

use super::IpTable;

/// Picks a dialer by destination IP. Domain destinations are not resolved and
/// go to the default dialer.
pub struct IpTableStreamDialer {
    table: IpTable<Arc<dyn StreamDialer>>,
    default: Option<Arc<dyn StreamDialer>>,
}

impl IpTableStreamDialer {
    pub fn new(table: IpTable<Arc<dyn StreamDialer>>) -> Self {
        Self { table, default: None }
    }

    pub fn with_default(mut self, dialer: Arc<dyn StreamDialer>) -> Self {
        self.default = Some(dialer);
        self
    }

    fn select(&self, addr: &Address) -> Option<&Arc<dyn StreamDialer>> {
        addr.ip()
            .and_then(|ip| self.table.lookup(ip))
            .or(self.default.as_ref())
    }
}

#[async_trait]
impl StreamDialer for IpTableStreamDialer {
    async fn dial(&self, addr: &Address) -> Result<Stream> {
        let dialer = self
            .select(addr)
            .ok_or_else(|| Error::NoRoute(addr.to_string()))?;
        trace!("Routing stream to {}", addr);
        dialer.dial(addr).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iptable::parse_prefix;
    use tokio::io::AsyncReadExt;

    /// Answers every dial with a stream that yields its name.
    struct Named(&'static str);

    #[async_trait]
    impl StreamDialer for Named {
        async fn dial(&self, _addr: &Address) -> Result<Stream> {
            let (client, mut server) = tokio::io::duplex(64);
            tokio::io::AsyncWriteExt::write_all(&mut server, self.0.as_bytes()).await?;
            Ok(Box::new(client))
        }
    }

    async fn dial_name(dialer: &IpTableStreamDialer, addr: &str) -> Result<String> {
        let mut stream = dialer.dial(&Address::parse(addr).unwrap()).await?;
        let mut buf = vec![0u8; 16];
        let n = stream.read(&mut buf).await?;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    fn routes() -> IpTable<Arc<dyn StreamDialer>> {
        let mut table: IpTable<Arc<dyn StreamDialer>> = IpTable::new();
        table.add_prefix(parse_prefix("10.0.0.0/8").unwrap(), Arc::new(Named("lan")));
        table.add_prefix(parse_prefix("10.9.9.9").unwrap(), Arc::new(Named("host")));
        table
    }

    #[tokio::test]
    async fn test_routes_by_prefix_then_default() {
        let dialer = IpTableStreamDialer::new(routes()).with_default(Arc::new(Named("default")));
        assert_eq!(dial_name(&dialer, "10.1.1.1:80").await.unwrap(), "lan");
        assert_eq!(dial_name(&dialer, "10.9.9.9:80").await.unwrap(), "host");
        assert_eq!(dial_name(&dialer, "8.8.8.8:53").await.unwrap(), "default");
        assert_eq!(dial_name(&dialer, "example.com:443").await.unwrap(), "default");
    }

    #[tokio::test]
    async fn test_no_route_without_default() {
        let dialer = IpTableStreamDialer::new(routes());
        let err = dial_name(&dialer, "8.8.8.8:53").await.unwrap_err();
        assert_eq!(err.to_string(), "no dialer available for address 8.8.8.8:53");
    }
}
