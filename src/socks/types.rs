//! SOCKS5 type definitions
//!
//! Defines the command kinds and addresses carried by command requests,
//! command replies and UDP datagrams.

use super::consts::*;
use super::message::read_exact;
use crate::error::{ProtocolError, SocksError};
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::AsyncRead;

/// SOCKS5 command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksCommand {
    /// TCP CONNECT - establish a TCP connection to target
    Connect,
    /// TCP BIND - accept one inbound connection
    Bind,
    /// UDP ASSOCIATE - establish UDP relay
    UdpAssociate,
}

impl SocksCommand {
    /// Parse a command byte into SocksCommand
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_CMD_TCP_CONNECT => Some(SocksCommand::Connect),
            SOCKS5_CMD_TCP_BIND => Some(SocksCommand::Bind),
            SOCKS5_CMD_UDP_ASSOCIATE => Some(SocksCommand::UdpAssociate),
            _ => None,
        }
    }

    /// Convert SocksCommand to byte
    pub fn to_byte(self) -> u8 {
        match self {
            SocksCommand::Connect => SOCKS5_CMD_TCP_CONNECT,
            SocksCommand::Bind => SOCKS5_CMD_TCP_BIND,
            SocksCommand::UdpAssociate => SOCKS5_CMD_UDP_ASSOCIATE,
        }
    }
}

impl fmt::Display for SocksCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksCommand::Connect => write!(f, "CONNECT"),
            SocksCommand::Bind => write!(f, "BIND"),
            SocksCommand::UdpAssociate => write!(f, "UDP ASSOCIATE"),
        }
    }
}

/// Address carried in a request, reply or datagram header
///
/// Either a socket address (v4 or v6) or a domain name with a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl TargetAddr {
    /// Create a new TargetAddr from an IPv4 address and port
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
    }

    /// Create a new TargetAddr from an IPv6 address and port
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Create a new TargetAddr from a domain name and port
    ///
    /// Fails for an empty name or one longer than 255 bytes. Building the
    /// `Domain` variant directly skips this check.
    pub fn domain(domain: impl Into<String>, port: u16) -> Result<Self, ProtocolError> {
        let domain = domain.into();
        if domain.is_empty() {
            return Err(ProtocolError::InvalidDomain("empty domain".to_string()));
        }
        if domain.len() > MAX_DOMAIN_LEN {
            return Err(ProtocolError::FieldTooLong {
                field: "domain name",
                len: domain.len(),
            });
        }
        Ok(TargetAddr::Domain(domain, port))
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// Get the address type byte for SOCKS5 protocol
    pub fn addr_type(&self) -> u8 {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => SOCKS5_ADDR_TYPE_IPV4,
            TargetAddr::Ip(SocketAddr::V6(_)) => SOCKS5_ADDR_TYPE_IPV6,
            TargetAddr::Domain(_, _) => SOCKS5_ADDR_TYPE_DOMAIN,
        }
    }

    /// Encoded size including the ATYP byte and the port
    pub fn encoded_len(&self) -> usize {
        let addr_len = match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => 4,
            TargetAddr::Ip(SocketAddr::V6(_)) => 16,
            TargetAddr::Domain(domain, _) => 1 + domain.len(),
        };
        1 + addr_len + 2
    }

    /// Resolve the address to a SocketAddr
    ///
    /// For IP addresses, this returns immediately.
    /// For domain names, this performs DNS resolution and returns the first
    /// address found.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        self.resolve_all().await?.into_iter().next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("No addresses found for {}", self),
            )
        })
    }

    /// Resolve the address to every candidate SocketAddr, in resolver order
    ///
    /// Never returns an empty list.
    pub async fn resolve_all(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = match self {
            TargetAddr::Ip(addr) => vec![*addr],
            TargetAddr::Domain(domain, port) => {
                tokio::net::lookup_host((domain.as_str(), *port)).await?.collect()
            }
        };
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("No addresses found for domain: {}", self),
            ));
        }
        Ok(addrs)
    }

    /// Append `ATYP | ADDR | PORT` to the buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.addr_type());
        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => {
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            TargetAddr::Ip(SocketAddr::V6(addr)) => {
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            TargetAddr::Domain(domain, port) => {
                debug_assert!(domain.len() <= MAX_DOMAIN_LEN);
                buf.put_u8(domain.len() as u8);
                buf.put_slice(domain.as_bytes());
                buf.put_u16(*port);
            }
        }
    }

    /// Serialize the address to bytes for SOCKS5 protocol
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.to_vec()
    }

    /// Read `ADDR | PORT` for an already-consumed ATYP byte
    pub async fn read_from<R>(reader: &mut R, addr_type: u8) -> Result<Self, SocksError>
    where
        R: AsyncRead + Unpin,
    {
        let target = match addr_type {
            SOCKS5_ADDR_TYPE_IPV4 => {
                let mut buf = [0u8; 4 + 2];
                read_exact(reader, &mut buf, "IPv4 address").await?;
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                TargetAddr::ipv4(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]), port)
            }

            SOCKS5_ADDR_TYPE_DOMAIN => {
                let mut len = [0u8; 1];
                read_exact(reader, &mut len, "domain length").await?;
                let len = len[0] as usize;
                if len == 0 {
                    return Err(ProtocolError::InvalidDomain("empty domain".to_string()).into());
                }

                let mut buf = vec![0u8; len + 2];
                read_exact(reader, &mut buf, "domain name").await?;
                let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
                buf.truncate(len);
                let domain = String::from_utf8(buf).map_err(|e| {
                    ProtocolError::InvalidDomain(String::from_utf8_lossy(e.as_bytes()).into_owned())
                })?;
                TargetAddr::Domain(domain, port)
            }

            SOCKS5_ADDR_TYPE_IPV6 => {
                let mut buf = [0u8; 16 + 2];
                read_exact(reader, &mut buf, "IPv6 address").await?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[..16]);
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                TargetAddr::ipv6(Ipv6Addr::from(octets), port)
            }

            other => return Err(ProtocolError::AddressTypeNotSupported(other).into()),
        };

        Ok(target)
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}

impl Default for TargetAddr {
    fn default() -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
    }
}
