//! SOCKS5 authentication method identifiers

use super::consts::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authentication method negotiated during the greeting
///
/// `NoAcceptable` is only ever chosen by the server; a client offering the
/// 0xFF byte is decoded as `NoAcceptable` but the selector never matches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocksMethod {
    /// No authentication required
    NoAuth,
    /// GSSAPI (recognised, not implemented)
    Gssapi,
    /// Username/password (RFC 1929)
    UsernamePassword,
    /// No acceptable methods
    NoAcceptable,
    /// Any other IANA-assigned or private method byte
    Other(u8),
}

impl SocksMethod {
    /// Wire byte for this method
    pub fn to_byte(self) -> u8 {
        match self {
            SocksMethod::NoAuth => SOCKS5_AUTH_METHOD_NONE,
            SocksMethod::Gssapi => SOCKS5_AUTH_METHOD_GSSAPI,
            SocksMethod::UsernamePassword => SOCKS5_AUTH_METHOD_PASSWORD,
            SocksMethod::NoAcceptable => SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE,
            SocksMethod::Other(byte) => byte,
        }
    }

    /// Parse a wire byte
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            SOCKS5_AUTH_METHOD_NONE => SocksMethod::NoAuth,
            SOCKS5_AUTH_METHOD_GSSAPI => SocksMethod::Gssapi,
            SOCKS5_AUTH_METHOD_PASSWORD => SocksMethod::UsernamePassword,
            SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE => SocksMethod::NoAcceptable,
            other => SocksMethod::Other(other),
        }
    }

    /// Whether a sub-negotiation follows the method selection reply
    pub fn requires_authentication(self) -> bool {
        !matches!(self, SocksMethod::NoAuth | SocksMethod::NoAcceptable)
    }
}

impl From<u8> for SocksMethod {
    fn from(byte: u8) -> Self {
        SocksMethod::from_byte(byte)
    }
}

impl From<SocksMethod> for u8 {
    fn from(method: SocksMethod) -> Self {
        method.to_byte()
    }
}

impl fmt::Display for SocksMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksMethod::NoAuth => write!(f, "NO AUTHENTICATION REQUIRED"),
            SocksMethod::Gssapi => write!(f, "GSSAPI"),
            SocksMethod::UsernamePassword => write!(f, "USERNAME/PASSWORD"),
            SocksMethod::NoAcceptable => write!(f, "NO ACCEPTABLE METHODS"),
            SocksMethod::Other(byte) => write!(f, "METHOD 0x{:02X}", byte),
        }
    }
}
