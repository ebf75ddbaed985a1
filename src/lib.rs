//! Hopwire - compile declarative outbound path configs
//!
//! # Architecture
//!
//! ```text
//! config text
//! → ConfigNode tree          (config)
//! → TypeRegistry dispatch    (registry, provider)
//! → StreamDialer + PacketListener with ConnectionProviderInfo
//! → Client                   (client)
//! → Session running the optional reporter (reporter)
//! ```
//!
//! ## Core Principles
//!
//! - Compilation is synchronous and does no I/O
//! - Every node is dispatched on `$type` through the same registries
//! - Produced objects only touch the network when dialed
//! - Connection metadata (direct, tunneled, first hop) is derived from config
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Core types: Stream, Address, ConnectionProviderInfo
//! ├── config/          # ConfigNode and text decoding
//! ├── registry/        # Discriminator parsing and type registries
//! ├── transport/       # Dialer/listener traits; TCP, UDP, TLS, block
//! ├── shadowsocks/     # AEAD stream and packet protocol
//! ├── websocket/       # WebSocket stream and datagram adapters
//! ├── iptable/         # Longest-prefix routing for dialers and listeners
//! ├── provider/        # Built-in config types
//! ├── reporter/        # Usage reporters run during a session
//! ├── client.rs        # Tunnel config parsing and Client
//! └── platform_error.rs
//! ```

// Core types
pub mod common;
pub mod error;

// Configuration
pub mod config;
pub mod registry;

// Building blocks
pub mod iptable;
pub mod shadowsocks;
pub mod transport;
pub mod websocket;

// Compilation
pub mod client;
pub mod platform_error;
pub mod provider;
pub mod reporter;

// Re-exports for convenience
pub use client::{compile_tunnel_config, parse_tunnel_config, Client, Session, TunnelConfigSummary};
pub use common::{Address, ConnType, ConnectionProviderInfo, Stream};
pub use config::ConfigNode;
pub use error::{Error, Result};
pub use platform_error::{ErrorCode, PlatformError};
pub use provider::{Provider, ProviderBuilder};
pub use transport::{PacketConn, PacketListener, StreamDialer, TransportPair};
