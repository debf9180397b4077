//! Server configuration types

use super::TcpConfig;
use crate::socks::consts::MAX_DOMAIN_LEN;
use crate::socks::SocksMethod;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Default listen address
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 1080))
}

/// Listener configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address the SOCKS5 listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Socket options for accepted and outbound TCP streams
    #[serde(default)]
    pub tcp: TcpConfig,

    /// SOCKS5 protocol configuration
    #[serde(default)]
    pub socks: SocksConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: default_listen_addr(),
            tcp: TcpConfig::default(),
            socks: SocksConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.socks.validate()
    }
}

fn default_methods() -> Vec<SocksMethod> {
    vec![SocksMethod::NoAuth]
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_bind_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_lockout_ms() -> u64 {
    1000
}

fn default_relay_buffer_size() -> usize {
    crate::socks::consts::DEFAULT_BUFFER_SIZE
}

fn default_half_close_timeout() -> u64 {
    5
}

/// SOCKS5 protocol configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SocksConfig {
    /// Supported methods in server preference order
    #[serde(default = "default_methods")]
    pub methods: Vec<SocksMethod>,

    /// Users seeded into the in-memory user store
    #[serde(default)]
    pub users: Vec<UserConfig>,

    /// Seconds allowed for each handshake read
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,

    /// Seconds allowed to open a CONNECT destination
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Seconds a BIND listener waits for its peer
    #[serde(default = "default_bind_timeout")]
    pub bind_timeout: u64,

    /// Accept BIND requests
    #[serde(default = "default_true")]
    pub allow_bind: bool,

    /// Accept UDP ASSOCIATE requests
    #[serde(default = "default_true")]
    pub allow_udp: bool,

    /// Milliseconds during which attempts are rejected after a failed login
    #[serde(default = "default_lockout_ms")]
    pub lockout_ms: u64,

    /// Per-direction relay buffer in bytes
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,

    /// Seconds the remaining direction may stay idle after the other hit EOF
    #[serde(default = "default_half_close_timeout")]
    pub half_close_timeout: u64,
}

impl Default for SocksConfig {
    fn default() -> Self {
        Self {
            methods: default_methods(),
            users: Vec::new(),
            handshake_timeout: default_handshake_timeout(),
            connect_timeout: default_connect_timeout(),
            bind_timeout: default_bind_timeout(),
            allow_bind: true,
            allow_udp: true,
            lockout_ms: default_lockout_ms(),
            relay_buffer_size: default_relay_buffer_size(),
            half_close_timeout: default_half_close_timeout(),
        }
    }
}

impl SocksConfig {
    /// Check if username/password authentication is offered
    pub fn requires_credentials(&self) -> bool {
        self.methods.contains(&SocksMethod::UsernamePassword)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.methods.is_empty() {
            return Err("At least one authentication method must be configured".to_string());
        }

        for method in &self.methods {
            match method {
                SocksMethod::NoAuth | SocksMethod::UsernamePassword => {}
                other => return Err(format!("No authenticator available for method {}", other)),
            }
        }

        if self.handshake_timeout == 0 || self.connect_timeout == 0 || self.bind_timeout == 0 {
            return Err("Timeouts must be greater than zero".to_string());
        }

        if self.half_close_timeout == 0 {
            return Err("half_close_timeout must be greater than zero".to_string());
        }

        if self.relay_buffer_size == 0 {
            return Err("relay_buffer_size must be greater than zero".to_string());
        }

        for user in &self.users {
            user.validate()?;
        }

        Ok(())
    }
}

/// A user entry seeded at startup
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserConfig {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl UserConfig {
    /// Validate that both fields fit the sub-negotiation length bytes
    pub fn validate(&self) -> Result<(), String> {
        if self.username.is_empty() {
            return Err("Username must not be empty".to_string());
        }
        if self.username.len() > MAX_DOMAIN_LEN {
            return Err(format!("Username {:?} exceeds 255 bytes", self.username));
        }
        if self.password.len() > MAX_DOMAIN_LEN {
            return Err(format!("Password for {:?} exceeds 255 bytes", self.username));
        }
        Ok(())
    }
}

impl std::fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
