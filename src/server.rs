//! TCP listener and accept loop
//!
//! Accepts client connections and spawns one task per connection. The
//! loop only stops on the shutdown signal; accept errors are logged and
//! followed by a short pause.

use crate::config::ServerConfig;
use crate::error::SocksError;
use crate::socks::SocksService;
use crate::transport::SocketOpts;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Pause after a failed accept, e.g. when the process is out of descriptors
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// SOCKS5 server bound to a local address
#[derive(Debug)]
pub struct SocksServer {
    listener: TcpListener,
    service: SocksService,
}

impl SocksServer {
    /// Validate `config`, build the service and bind the listener
    pub async fn bind(config: &ServerConfig) -> Result<Self, SocksError> {
        config.validate().map_err(SocksError::Config)?;

        let service = SocksService::builder(config.socks.clone())
            .socket_opts(SocketOpts::from_tcp_config(&config.tcp))
            .build()?;

        Self::bind_with_service(config.listen_addr, service).await
    }

    /// Bind the listener for a service built by the caller
    pub async fn bind_with_service(
        addr: SocketAddr,
        service: SocksService,
    ) -> Result<Self, SocksError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(SocksServer { listener, service })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocksError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared service, for administrative operations while running
    pub fn service(&self) -> &SocksService {
        &self.service
    }

    /// Accept connections until a shutdown signal arrives
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<(), SocksError> {
        info!("SOCKS5 server listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, client_addr)) => {
                        debug!(%client_addr, "Accepted connection");
                        let service = self.service.clone();
                        tokio::spawn(async move {
                            service.handle_connection(stream, client_addr).await;
                        });
                    }
                    Err(e) => accept_failed(&e).await,
                },
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Log an accept error and back off so a persistent failure does not spin
async fn accept_failed(error: &std::io::Error) {
    error!("Failed to accept connection: {}", error);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}
