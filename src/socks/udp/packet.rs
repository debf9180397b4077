//! UDP datagram encapsulation for SOCKS5
//!
//! # UDP Request/Response Format
//!
//! ```text
//! +----+------+------+----------+----------+----------+
//! |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +----+------+------+----------+----------+----------+
//! | 2  |  1   |  1   | Variable |    2     | Variable |
//! +----+------+------+----------+----------+----------+
//! ```

use crate::error::ProtocolError;
use crate::socks::consts::*;
use crate::socks::types::TargetAddr;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};

/// A SOCKS5-encapsulated UDP datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPacket {
    /// Fragment number (0 for standalone packets)
    pub frag: u8,
    /// Destination (client to server) or source (server to client)
    pub addr: TargetAddr,
    /// Payload
    pub data: Bytes,
}

impl UdpPacket {
    /// Create a standalone datagram
    pub fn new(addr: TargetAddr, data: Bytes) -> Self {
        UdpPacket {
            frag: 0,
            addr,
            data,
        }
    }

    /// Check if this is a fragment
    pub fn is_fragmented(&self) -> bool {
        self.frag != 0
    }

    /// Parse a datagram received from the client
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 4 {
            return Err(ProtocolError::InvalidDatagram(format!(
                "datagram too short: {} bytes",
                data.len()
            )));
        }

        let mut buf = data;
        let rsv = buf.get_u16();
        if rsv != 0 {
            return Err(ProtocolError::InvalidDatagram(format!(
                "non-zero RSV field: {}",
                rsv
            )));
        }
        let frag = buf.get_u8();
        let atyp = buf.get_u8();

        let (addr, payload) = parse_address(atyp, buf)?;

        Ok(UdpPacket {
            frag,
            addr,
            data: Bytes::copy_from_slice(payload),
        })
    }

    /// Encode the datagram for the client
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3 + self.addr.encoded_len() + self.data.len());
        buf.put_u16(0);
        buf.put_u8(self.frag);
        self.addr.encode(&mut buf);
        buf.extend_from_slice(&self.data);
        buf.freeze()
    }
}

fn too_short(what: &str) -> ProtocolError {
    ProtocolError::InvalidDatagram(format!("datagram too short for {}", what))
}

fn parse_address(atyp: u8, mut buf: &[u8]) -> Result<(TargetAddr, &[u8]), ProtocolError> {
    match atyp {
        SOCKS5_ADDR_TYPE_IPV4 => {
            if buf.len() < 6 {
                return Err(too_short("IPv4 address"));
            }
            let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            buf.advance(4);
            let port = buf.get_u16();
            Ok((TargetAddr::ipv4(ip, port), buf))
        }

        SOCKS5_ADDR_TYPE_DOMAIN => {
            if buf.is_empty() {
                return Err(too_short("domain length"));
            }
            let len = buf.get_u8() as usize;
            if len == 0 {
                return Err(ProtocolError::InvalidDomain("empty domain".to_string()));
            }
            if buf.len() < len + 2 {
                return Err(too_short("domain name"));
            }
            let domain = String::from_utf8(buf[..len].to_vec())
                .map_err(|_| ProtocolError::InvalidDomain("invalid UTF-8".to_string()))?;
            buf.advance(len);
            let port = buf.get_u16();
            Ok((TargetAddr::Domain(domain, port), buf))
        }

        SOCKS5_ADDR_TYPE_IPV6 => {
            if buf.len() < 18 {
                return Err(too_short("IPv6 address"));
            }
            let mut ip_bytes = [0u8; 16];
            ip_bytes.copy_from_slice(&buf[..16]);
            buf.advance(16);
            let port = buf.get_u16();
            Ok((TargetAddr::ipv6(Ipv6Addr::from(ip_bytes), port), buf))
        }

        other => Err(ProtocolError::AddressTypeNotSupported(other)),
    }
}
