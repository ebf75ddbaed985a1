//! Destination-IP routing
//!
//! - [`IpTable`]: longest-prefix-match table, built once then read-only
//! - [`IpTableStreamDialer`]: picks a stream dialer per destination
//! - [`IpTablePacketListener`]: multiplexes one packet connection over
//!   per-route connections

mod packet_listener;
mod stream_dialer;
mod table;

pub use packet_listener::{IpTablePacketListener, SharedIpTablePacketListener};
pub use stream_dialer::IpTableStreamDialer;
pub use table::{parse_prefix, IpTable};
