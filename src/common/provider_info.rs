//! Connection metadata carried by every compiled dialer, endpoint and listener.

use serde::Serialize;

/// How traffic leaves the device on a compiled path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnType {
    Direct,
    Tunneled,
    Blocked,
    /// Legs or routes disagree.
    Partial,
}

impl ConnType {
    /// Composite type of a set of routes: `Direct` if all are direct,
    /// `Tunneled` if all are tunneled, `Partial` otherwise.
    pub fn combine<I>(types: I) -> ConnType
    where
        I: IntoIterator<Item = ConnType>,
    {
        let mut all_direct = true;
        let mut all_tunneled = true;
        let mut any = false;
        for t in types {
            any = true;
            all_direct &= t == ConnType::Direct;
            all_tunneled &= t == ConnType::Tunneled;
        }
        match (any, all_direct, all_tunneled) {
            (true, true, _) => ConnType::Direct,
            (true, _, true) => ConnType::Tunneled,
            _ => ConnType::Partial,
        }
    }
}

impl std::fmt::Display for ConnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnType::Direct => "direct",
            ConnType::Tunneled => "tunneled",
            ConnType::Blocked => "blocked",
            ConnType::Partial => "partial",
        };
        f.write_str(name)
    }
}

/// Derived purely from configuration; never changes after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionProviderInfo {
    pub conn_type: ConnType,
    /// Literal address of the first network hop. Empty when it depends on
    /// the per-call destination.
    pub first_hop: String,
}

impl ConnectionProviderInfo {
    pub fn new(conn_type: ConnType, first_hop: impl Into<String>) -> Self {
        Self {
            conn_type,
            first_hop: first_hop.into(),
        }
    }

    pub fn direct() -> Self {
        Self::new(ConnType::Direct, "")
    }

    pub fn blocked() -> Self {
        Self::new(ConnType::Blocked, "")
    }

    /// Same conn type, different first hop.
    pub fn with_first_hop(mut self, first_hop: impl Into<String>) -> Self {
        self.first_hop = first_hop.into();
        self
    }

    /// Metadata for a wrapper that tunnels through `self`.
    pub fn tunneled(&self) -> Self {
        Self::new(ConnType::Tunneled, self.first_hop.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine() {
        use ConnType::*;
        assert_eq!(ConnType::combine([Direct, Direct]), Direct);
        assert_eq!(ConnType::combine([Tunneled, Tunneled, Tunneled]), Tunneled);
        assert_eq!(ConnType::combine([Direct, Tunneled]), Partial);
        assert_eq!(ConnType::combine([Tunneled, Blocked]), Partial);
        assert_eq!(ConnType::combine([]), Partial);
    }

    #[test]
    fn test_tunneled_keeps_first_hop() {
        let info = ConnectionProviderInfo::new(ConnType::Direct, "example.com:4321").tunneled();
        assert_eq!(info.conn_type, ConnType::Tunneled);
        assert_eq!(info.first_hop, "example.com:4321");
    }
}
