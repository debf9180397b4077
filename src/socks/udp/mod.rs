//! UDP support for SOCKS5

mod associate;
mod packet;

pub use associate::{UdpAssociation, UdpSummary};
pub use packet::UdpPacket;
