//! Test utilities for socksd
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use socksd::config::{ServerConfig, SocksConfig, UserConfig};
use socksd::socks::SocksMethod;
use socksd::{SocksServer, SocksService};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;

/// Running server plus the handles a test needs
pub struct TestServer {
    pub addr: SocketAddr,
    pub service: SocksService,
    shutdown_tx: broadcast::Sender<bool>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Start a server on an ephemeral loopback port
pub async fn start_server(socks: SocksConfig) -> TestServer {
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        socks,
        ..Default::default()
    };
    let server = SocksServer::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let service = server.service().clone();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(server.run(shutdown_rx));

    TestServer {
        addr,
        service,
        shutdown_tx,
    }
}

/// Configuration builder for test servers
#[derive(Default)]
pub struct TestConfigBuilder {
    methods: Vec<SocksMethod>,
    users: Vec<UserConfig>,
    allow_udp: Option<bool>,
    allow_bind: Option<bool>,
    handshake_timeout: Option<u64>,
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a supported method
    pub fn method(mut self, method: SocksMethod) -> Self {
        self.methods.push(method);
        self
    }

    /// Seed a user
    pub fn user(mut self, username: &str, password: &str) -> Self {
        self.users.push(UserConfig {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    /// Allow UDP
    pub fn allow_udp(mut self, allow: bool) -> Self {
        self.allow_udp = Some(allow);
        self
    }

    /// Allow BIND
    pub fn allow_bind(mut self, allow: bool) -> Self {
        self.allow_bind = Some(allow);
        self
    }

    /// Handshake timeout in seconds
    pub fn handshake_timeout(mut self, secs: u64) -> Self {
        self.handshake_timeout = Some(secs);
        self
    }

    /// Build the configuration
    pub fn build(self) -> SocksConfig {
        let defaults = SocksConfig::default();
        SocksConfig {
            methods: if self.methods.is_empty() {
                defaults.methods.clone()
            } else {
                self.methods
            },
            users: self.users,
            allow_udp: self.allow_udp.unwrap_or(defaults.allow_udp),
            allow_bind: self.allow_bind.unwrap_or(defaults.allow_bind),
            handshake_timeout: self.handshake_timeout.unwrap_or(defaults.handshake_timeout),
            ..defaults
        }
    }
}

/// TCP server that echoes every byte back
pub async fn start_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// UDP server that echoes every datagram back to its sender
pub async fn start_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], peer).await;
        }
    });
    addr
}

/// Address that refuses connections
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Send a greeting and return the selected method byte
pub async fn negotiate(stream: &mut TcpStream, methods: &[u8]) -> u8 {
    stream
        .write_all(&socks5_mock::greeting(methods))
        .await
        .unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0x05);
    reply[1]
}

/// Read a command reply, returning the reply code and the bound address
pub async fn read_reply(stream: &mut TcpStream) -> (u8, SocketAddr) {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[0], 0x05);
    let addr = match head[3] {
        0x01 => {
            let mut body = [0u8; 6];
            stream.read_exact(&mut body).await.unwrap();
            SocketAddr::from((
                [body[0], body[1], body[2], body[3]],
                u16::from_be_bytes([body[4], body[5]]),
            ))
        }
        0x04 => {
            let mut body = [0u8; 18];
            stream.read_exact(&mut body).await.unwrap();
            let mut ip = [0u8; 16];
            ip.copy_from_slice(&body[..16]);
            SocketAddr::from((ip, u16::from_be_bytes([body[16], body[17]])))
        }
        other => panic!("unexpected address type {other}"),
    };
    (head[1], addr)
}

/// Raw SOCKS5 message builders
pub mod socks5_mock {
    use socksd::socks::consts::*;
    use std::net::SocketAddr;

    /// Method selection request
    pub fn greeting(methods: &[u8]) -> Vec<u8> {
        let mut msg = vec![SOCKS5_VERSION, methods.len() as u8];
        msg.extend_from_slice(methods);
        msg
    }

    /// RFC 1929 sub-negotiation request
    pub fn credentials(username: &str, password: &str) -> Vec<u8> {
        let mut msg = vec![SOCKS5_AUTH_VERSION, username.len() as u8];
        msg.extend_from_slice(username.as_bytes());
        msg.push(password.len() as u8);
        msg.extend_from_slice(password.as_bytes());
        msg
    }

    /// Command request to an IPv4 socket address
    pub fn command_ipv4(command: u8, addr: SocketAddr) -> Vec<u8> {
        let mut msg = vec![SOCKS5_VERSION, command, SOCKS5_RESERVED, SOCKS5_ADDR_TYPE_IPV4];
        match addr {
            SocketAddr::V4(v4) => msg.extend_from_slice(&v4.ip().octets()),
            SocketAddr::V6(_) => panic!("IPv4 address expected"),
        }
        msg.extend_from_slice(&addr.port().to_be_bytes());
        msg
    }

    /// CONNECT request to a domain
    pub fn connect_domain(domain: &str, port: u16) -> Vec<u8> {
        let mut msg = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_DOMAIN,
            domain.len() as u8,
        ];
        msg.extend_from_slice(domain.as_bytes());
        msg.extend_from_slice(&port.to_be_bytes());
        msg
    }

    /// UDP request header plus payload for an IPv4 destination
    pub fn udp_datagram(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
        let mut msg = vec![0x00, 0x00, 0x00, SOCKS5_ADDR_TYPE_IPV4];
        match addr {
            SocketAddr::V4(v4) => msg.extend_from_slice(&v4.ip().octets()),
            SocketAddr::V6(_) => panic!("IPv4 address expected"),
        }
        msg.extend_from_slice(&addr.port().to_be_bytes());
        msg.extend_from_slice(payload);
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks5_mock_greeting() {
        assert_eq!(socks5_mock::greeting(&[0x00, 0x02]), vec![5, 2, 0, 2]);
    }

    #[test]
    fn test_socks5_mock_credentials() {
        let msg = socks5_mock::credentials("ab", "xyz");
        assert_eq!(msg, vec![1, 2, b'a', b'b', 3, b'x', b'y', b'z']);
    }

    #[test]
    fn test_config_builder() {
        let config = TestConfigBuilder::new()
            .method(SocksMethod::UsernamePassword)
            .user("alice", "secret")
            .allow_udp(false)
            .build();

        assert_eq!(config.methods, vec![SocksMethod::UsernamePassword]);
        assert_eq!(config.users.len(), 1);
        assert!(!config.allow_udp);
        assert!(config.allow_bind);
    }
}
