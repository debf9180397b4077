//! Error types for Socksd
//!
//! This module defines all custom error types used throughout the server.

use crate::socks::{SessionState, SocksMethod};
use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for a SOCKS5 session
#[derive(Error, Debug)]
pub enum SocksError {
    /// IO error on the client or destination stream
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or unsupported message
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Method negotiation or credential check failed
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Command could not be carried out
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Handshake stalled
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Wire-level protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Unsupported SOCKS version
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// Unsupported username/password sub-negotiation version
    #[error("Unsupported sub-negotiation version: {0}")]
    UnsupportedSubnegotiationVersion(u8),

    /// Stream ended before the declared message length was read
    #[error("Truncated {0}: stream ended early")]
    Truncated(&'static str),

    /// Command byte not in CONNECT/BIND/UDP ASSOCIATE
    #[error("Command not supported: {0}")]
    CommandNotSupported(u8),

    /// Address type byte not in IPv4/domain/IPv6
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Domain name that is empty or not valid UTF-8
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    /// Username or password that is not valid UTF-8
    #[error("Invalid credentials encoding")]
    InvalidCredentials,

    /// Reply byte outside the known status table
    #[error("Unknown reply code: {0}")]
    UnknownReplyCode(u8),

    /// Variable-length field that does not fit its one-byte length prefix
    #[error("{field} is {len} bytes, at most 255 fit on the wire")]
    FieldTooLong {
        /// Field name
        field: &'static str,
        /// Actual length
        len: usize,
    },

    /// Malformed UDP datagram header
    #[error("Invalid UDP datagram: {0}")]
    InvalidDatagram(String),

    /// Session state machine moved backwards or skipped a step
    #[error("Illegal session transition from {from:?} to {to:?}")]
    IllegalTransition {
        /// Current state
        from: SessionState,
        /// Requested state
        to: SessionState,
    },

    /// Negotiated method set a second time
    #[error("Method already negotiated: {0:?}")]
    MethodAlreadySet(SocksMethod),
}

impl ProtocolError {
    /// Reply code owed to the client for a command request that was read but rejected
    pub fn reply_code(&self) -> Option<ReplyCode> {
        match self {
            ProtocolError::CommandNotSupported(_) => Some(ReplyCode::CommandNotSupported),
            ProtocolError::AddressTypeNotSupported(_) => Some(ReplyCode::AddressTypeNotSupported),
            _ => None,
        }
    }
}

/// Authentication errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No overlap between offered and supported methods
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// Selected method has no registered authenticator
    #[error("No authenticator registered for method {0:?}")]
    NoAuthenticator(SocksMethod),

    /// Credentials of the wrong kind for this authenticator
    #[error("{authenticator} authenticator does not accept {credentials} credentials")]
    UnsupportedCredentials {
        /// Authenticator name
        authenticator: &'static str,
        /// Credential kind received
        credentials: &'static str,
    },

    /// Verification rejected the credentials
    #[error("Authentication failed, client from {0}")]
    Rejected(String),

    /// Attempt arrived inside the lockout window of a previous failure
    #[error("Authentication locked out, client from {0}")]
    LockedOut(String),
}

/// Command failure tagged with the reply code sent to the client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reply}: {reason}")]
pub struct CommandError {
    reply: ReplyCode,
    reason: String,
}

impl CommandError {
    /// Create a new command error
    pub fn new(reply: ReplyCode, reason: impl Into<String>) -> Self {
        CommandError {
            reply,
            reason: reason.into(),
        }
    }

    /// Build from an IO error, mapping its kind to a reply code
    pub fn from_io(err: &io::Error, context: impl fmt::Display) -> Self {
        CommandError::new(ReplyCode::from(err), format!("{}: {}", context, err))
    }

    /// Reply code for the client
    pub fn reply(&self) -> ReplyCode {
        self.reply
    }

    /// Human-readable reason
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReplyCode::Succeeded => "succeeded",
            ReplyCode::GeneralFailure => "general SOCKS server failure",
            ReplyCode::ConnectionNotAllowed => "connection not allowed by ruleset",
            ReplyCode::NetworkUnreachable => "network unreachable",
            ReplyCode::HostUnreachable => "host unreachable",
            ReplyCode::ConnectionRefused => "connection refused",
            ReplyCode::TtlExpired => "TTL expired",
            ReplyCode::CommandNotSupported => "command not supported",
            ReplyCode::AddressTypeNotSupported => "address type not supported",
        };
        f.write_str(text)
    }
}

impl From<ReplyCode> for u8 {
    fn from(code: ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for ReplyCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ReplyCode::Succeeded),
            0x01 => Ok(ReplyCode::GeneralFailure),
            0x02 => Ok(ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(ReplyCode::NetworkUnreachable),
            0x04 => Ok(ReplyCode::HostUnreachable),
            0x05 => Ok(ReplyCode::ConnectionRefused),
            0x06 => Ok(ReplyCode::TtlExpired),
            0x07 => Ok(ReplyCode::CommandNotSupported),
            0x08 => Ok(ReplyCode::AddressTypeNotSupported),
            _ => Err(ProtocolError::UnknownReplyCode(value)),
        }
    }
}

impl From<&io::Error> for ReplyCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
            io::ErrorKind::NetworkUnreachable => ReplyCode::NetworkUnreachable,
            io::ErrorKind::HostUnreachable => ReplyCode::HostUnreachable,
            io::ErrorKind::TimedOut => ReplyCode::HostUnreachable,
            io::ErrorKind::AddrNotAvailable => ReplyCode::HostUnreachable,
            io::ErrorKind::PermissionDenied => ReplyCode::ConnectionNotAllowed,
            _ => ReplyCode::GeneralFailure,
        }
    }
}
