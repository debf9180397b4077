//! UDP ASSOCIATE relay
//!
//! One UDP socket serves the whole association. Datagrams from the client
//! are unwrapped and forwarded to their destination; datagrams from any
//! other peer are wrapped and returned to the client. The association lives
//! as long as the TCP control connection that requested it.

use super::packet::UdpPacket;
use crate::error::SocksError;
use crate::socks::consts::MAX_UDP_PACKET;
use crate::socks::types::TargetAddr;
use bytes::Bytes;
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Counters reported when an association ends
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UdpSummary {
    /// Datagrams forwarded from the client to destinations
    pub forwarded: u64,
    /// Datagrams returned from destinations to the client
    pub returned: u64,
    /// Datagrams dropped (malformed, fragmented, unresolvable)
    pub dropped: u64,
}

/// An allocated UDP relay bound to one client
#[derive(Debug)]
pub struct UdpAssociation {
    socket: UdpSocket,
    client_ip: IpAddr,
    declared_port: u16,
    client: Option<SocketAddr>,
}

impl UdpAssociation {
    /// Bind the relay socket on `local_ip` for the client at `client_addr`
    ///
    /// `declared` is the DST.ADDR/DST.PORT of the request; only its port is
    /// used, and only when non-zero.
    pub async fn bind(
        local_ip: IpAddr,
        client_addr: SocketAddr,
        declared: &TargetAddr,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0)).await?;
        Ok(UdpAssociation {
            socket,
            client_ip: client_addr.ip(),
            declared_port: declared.port(),
            client: None,
        })
    }

    /// Address the client must send its datagrams to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn is_client(&self, from: SocketAddr) -> bool {
        match self.client {
            Some(client) => client == from,
            None => {
                from.ip() == self.client_ip
                    && (self.declared_port == 0 || from.port() == self.declared_port)
            }
        }
    }

    /// Relay datagrams until `control` reaches EOF or fails
    pub async fn run<S>(mut self, control: &mut S) -> Result<UdpSummary, SocksError>
    where
        S: AsyncRead + Unpin,
    {
        let mut summary = UdpSummary::default();
        let mut buf = vec![0u8; MAX_UDP_PACKET];
        let mut control_buf = [0u8; 1];

        info!(relay = ?self.socket.local_addr().ok(), "UDP association started");

        loop {
            tokio::select! {
                read = control.read(&mut control_buf) => match read {
                    Ok(0) => {
                        debug!("Control stream closed, terminating UDP association");
                        break;
                    }
                    Ok(_) => {
                        warn!("Unexpected data on UDP control stream");
                    }
                    Err(e) => {
                        debug!("Control stream error: {}", e);
                        break;
                    }
                },
                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    self.handle_datagram(&buf[..len], from, &mut summary).await;
                }
            }
        }

        info!(
            forwarded = summary.forwarded,
            returned = summary.returned,
            dropped = summary.dropped,
            "UDP association ended"
        );
        Ok(summary)
    }

    async fn handle_datagram(&mut self, data: &[u8], from: SocketAddr, summary: &mut UdpSummary) {
        if self.is_client(from) {
            self.client = Some(from);
            if self.forward(data).await {
                summary.forwarded += 1;
            } else {
                summary.dropped += 1;
            }
            return;
        }

        let Some(client) = self.client else {
            debug!(%from, "Dropping datagram before the client's first packet");
            summary.dropped += 1;
            return;
        };

        let packet = UdpPacket::new(TargetAddr::from(from), Bytes::copy_from_slice(data));
        match self.socket.send_to(&packet.encode(), client).await {
            Ok(_) => summary.returned += 1,
            Err(e) => {
                warn!(%client, "UDP send to client failed: {}", e);
                summary.dropped += 1;
            }
        }
    }

    async fn forward(&self, data: &[u8]) -> bool {
        let packet = match UdpPacket::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Invalid SOCKS5 UDP packet: {}", e);
                return false;
            }
        };

        if packet.is_fragmented() {
            debug!(frag = packet.frag, "Dropping fragmented UDP datagram");
            return false;
        }

        let target = match packet.addr.resolve().await {
            Ok(addr) => addr,
            Err(e) => {
                warn!(destination = %packet.addr, "Failed to resolve UDP target: {}", e);
                return false;
            }
        };

        match self.socket.send_to(&packet.data, target).await {
            Ok(_) => {
                debug!("UDP relay: sent {} bytes to {}", packet.data.len(), target);
                true
            }
            Err(e) => {
                warn!("UDP send to {} failed: {}", target, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn echo_socket() -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&buf[..len], from).await;
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_control_eof_ends_association() {
        let client: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let association = UdpAssociation::bind(LOCALHOST, client, &TargetAddr::default())
            .await
            .unwrap();

        let (control_client, mut control_server) = tokio::io::duplex(64);
        drop(control_client);

        let summary = association.run(&mut control_server).await.unwrap();
        assert_eq!(summary, UdpSummary::default());
    }

    #[tokio::test]
    async fn test_relay_round_trip() {
        let (echo_addr, echo) = echo_socket().await;
        let client_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client_socket.local_addr().unwrap();

        let association = UdpAssociation::bind(LOCALHOST, client_addr, &TargetAddr::from(client_addr))
            .await
            .unwrap();
        let relay_addr = association.local_addr().unwrap();

        let (control_client, mut control_server) = tokio::io::duplex(64);
        let relay = tokio::spawn(async move { association.run(&mut control_server).await });

        let request = UdpPacket::new(TargetAddr::from(echo_addr), Bytes::from_static(b"ping"));
        client_socket
            .send_to(&request.encode(), relay_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        let (len, from) = tokio::time::timeout(Duration::from_secs(5), client_socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, relay_addr);

        let response = UdpPacket::parse(&buf[..len]).unwrap();
        assert_eq!(response.addr, TargetAddr::from(echo_addr));
        assert_eq!(response.data, Bytes::from_static(b"ping"));

        drop(control_client);
        let summary = relay.await.unwrap().unwrap();
        assert_eq!(summary.forwarded, 1);
        assert_eq!(summary.returned, 1);
        echo.abort();
    }

    #[tokio::test]
    async fn test_fragmented_datagram_dropped() {
        let client_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client_socket.local_addr().unwrap();

        let association = UdpAssociation::bind(LOCALHOST, client_addr, &TargetAddr::default())
            .await
            .unwrap();
        let relay_addr = association.local_addr().unwrap();

        let (control_client, mut control_server) = tokio::io::duplex(64);
        let relay = tokio::spawn(async move { association.run(&mut control_server).await });

        let mut fragment = UdpPacket::new(
            TargetAddr::ipv4(Ipv4Addr::LOCALHOST, 9),
            Bytes::from_static(b"part"),
        );
        fragment.frag = 1;
        client_socket
            .send_to(&fragment.encode(), relay_addr)
            .await
            .unwrap();
        client_socket.send_to(&[0, 0], relay_addr).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(control_client);

        let summary = relay.await.unwrap().unwrap();
        assert_eq!(summary.forwarded, 0);
        assert_eq!(summary.dropped, 2);
    }

    #[tokio::test]
    async fn test_is_client_matching() {
        let client: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let declared = TargetAddr::ipv4(Ipv4Addr::UNSPECIFIED, 40000);
        let mut association = UdpAssociation::bind(LOCALHOST, client, &declared)
            .await
            .unwrap();

        assert!(association.is_client("127.0.0.1:40000".parse().unwrap()));
        assert!(!association.is_client("127.0.0.1:40001".parse().unwrap()));
        assert!(!association.is_client("10.0.0.1:40000".parse().unwrap()));

        association.client = Some(client);
        assert!(!association.is_client("127.0.0.1:40001".parse().unwrap()));
    }
}
