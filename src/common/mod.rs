//! Common types and abstractions
//!
//! - Stream: unified async I/O abstraction
//! - Address: `host:port` parsing and SOCKS-style encoding
//! - ConnectionProviderInfo: what a compiled path looks like from the outside

mod address;
mod provider_info;
mod stream;

pub use address::Address;
pub use provider_info::{ConnType, ConnectionProviderInfo};
pub use stream::{AsyncReadWrite, Stream};

// Re-export error types from crate root
pub use crate::error::{Error, Result};
