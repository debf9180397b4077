//! Command execution
//!
//! Runs CONNECT, BIND and UDP ASSOCIATE for an authenticated session and
//! writes the success replies. A failure is returned as a
//! [`CommandError`] carrying the reply code the driver must send.

use crate::config::SocksConfig;
use crate::error::{CommandError, ReplyCode, SocksError};
use crate::socks::message::{write_message, CommandMessage, CommandReply};
use crate::socks::session::Session;
use crate::socks::types::{SocksCommand, TargetAddr};
use crate::socks::udp::UdpAssociation;
use crate::transport::SocketOpts;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Resource allocated by a successful command
#[derive(Debug)]
pub enum CommandOutcome {
    /// Stream to relay with the client (CONNECT, BIND)
    Tunnel(TcpStream),
    /// UDP relay tied to the control connection (UDP ASSOCIATE)
    UdpAssociation(UdpAssociation),
}

/// Executes command requests
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    connect_timeout: Duration,
    bind_timeout: Duration,
    allow_bind: bool,
    allow_udp: bool,
    socket_opts: SocketOpts,
}

impl CommandExecutor {
    /// Create an executor from configuration
    pub fn new(config: &SocksConfig, socket_opts: SocketOpts) -> Self {
        CommandExecutor {
            connect_timeout: Duration::from_secs(config.connect_timeout),
            bind_timeout: Duration::from_secs(config.bind_timeout),
            allow_bind: config.allow_bind,
            allow_udp: config.allow_udp,
            socket_opts,
        }
    }

    /// Override the CONNECT timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the BIND accept timeout
    pub fn with_bind_timeout(mut self, timeout: Duration) -> Self {
        self.bind_timeout = timeout;
        self
    }

    /// Execute `request`, writing success replies to `client`
    ///
    /// BIND writes two replies: the listening address, then the peer address.
    pub async fn execute<S>(
        &self,
        request: &CommandMessage,
        session: &Session,
        client: &mut S,
    ) -> Result<CommandOutcome, SocksError>
    where
        S: AsyncWrite + Unpin + Send,
    {
        match request.command() {
            SocksCommand::Connect => {
                let stream = self.connect(request.target()).await?;
                let bound = stream.local_addr()?;
                write_message(client, &CommandReply::success(bound)).await?;
                Ok(CommandOutcome::Tunnel(stream))
            }
            SocksCommand::Bind => {
                if !self.allow_bind {
                    return Err(disabled(SocksCommand::Bind).into());
                }
                self.bind(request.target(), session, client).await
            }
            SocksCommand::UdpAssociate => {
                if !self.allow_udp {
                    return Err(disabled(SocksCommand::UdpAssociate).into());
                }
                let association = UdpAssociation::bind(
                    session.local_addr().ip(),
                    session.client_addr(),
                    request.target(),
                )
                .await
                .map_err(|e| CommandError::from_io(&e, "UDP relay bind"))?;
                let relay_addr = association.local_addr()?;
                write_message(client, &CommandReply::success(relay_addr)).await?;
                info!(%relay_addr, "UDP ASSOCIATE established");
                Ok(CommandOutcome::UdpAssociation(association))
            }
        }
    }

    /// Resolve and connect to a CONNECT destination
    ///
    /// Every resolved address is tried in turn within one `connect_timeout`.
    async fn connect(&self, target: &TargetAddr) -> Result<TcpStream, CommandError> {
        let addrs = target.resolve_all().await.map_err(|e| {
            CommandError::new(
                ReplyCode::HostUnreachable,
                format!("failed to resolve {}: {}", target, e),
            )
        })?;

        let (stream, addr) =
            match tokio::time::timeout(self.connect_timeout, connect_any(&addrs)).await {
                Ok(Ok(connected)) => connected,
                Ok(Err((addr, e))) => {
                    warn!("Failed to connect to {}: {}", target, e);
                    return Err(CommandError::from_io(
                        &e,
                        format_args!("connect to {}", addr),
                    ));
                }
                Err(_) => {
                    warn!("Connection timeout to {}", target);
                    return Err(CommandError::new(
                        ReplyCode::HostUnreachable,
                        format!("connect to {} timed out", target),
                    ));
                }
            };

        if let Err(e) = self.socket_opts.apply(&stream) {
            debug!("Failed to apply socket options to {}: {}", addr, e);
        }

        info!("Tunnel established to {} ({})", target, addr);
        Ok(stream)
    }

    /// Listen for one inbound connection on behalf of the client
    async fn bind<S>(
        &self,
        target: &TargetAddr,
        session: &Session,
        client: &mut S,
    ) -> Result<CommandOutcome, SocksError>
    where
        S: AsyncWrite + Unpin + Send,
    {
        let listener = TcpListener::bind(SocketAddr::new(session.local_addr().ip(), 0))
            .await
            .map_err(|e| CommandError::from_io(&e, "BIND listener"))?;
        let listen_addr = listener.local_addr()?;

        write_message(client, &CommandReply::success(listen_addr)).await?;
        info!(%listen_addr, expected = %target, "BIND listening");

        let (stream, peer) = match tokio::time::timeout(self.bind_timeout, listener.accept()).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => return Err(CommandError::from_io(&e, "BIND accept").into()),
            Err(_) => {
                return Err(CommandError::new(
                    ReplyCode::GeneralFailure,
                    format!("no inbound connection within {:?}", self.bind_timeout),
                )
                .into())
            }
        };

        if let Err(e) = self.socket_opts.apply(&stream) {
            debug!("Failed to apply socket options to {}: {}", peer, e);
        }

        write_message(client, &CommandReply::success(peer)).await?;
        info!(%peer, "BIND peer connected");
        Ok(CommandOutcome::Tunnel(stream))
    }
}

/// Connect to the first address that accepts, or return the last failure
async fn connect_any(
    addrs: &[SocketAddr],
) -> Result<(TcpStream, SocketAddr), (SocketAddr, std::io::Error)> {
    let mut last_error = None;
    for &addr in addrs {
        debug!("Connecting to target: {}", addr);
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok((stream, addr)),
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some((addr, e));
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        (
            SocketAddr::from(([0, 0, 0, 0], 0)),
            std::io::Error::new(std::io::ErrorKind::NotFound, "no address to connect to"),
        )
    }))
}

fn disabled(command: SocksCommand) -> CommandError {
    CommandError::new(
        ReplyCode::CommandNotSupported,
        format!("{} is disabled", command),
    )
}
