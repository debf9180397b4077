//! # socksd - SOCKS5 Proxy Server
//!
//! socksd accepts client connections, negotiates an authentication method,
//! authenticates the client, runs the requested command (CONNECT, BIND or
//! UDP ASSOCIATE) and relays bytes until either side closes.
//!
//! ## Features
//!
//! - **Pluggable Authentication**: method selection by server preference,
//!   no-auth and RFC 1929 username/password with a global lockout window
//! - **Runtime Administration**: users and supported methods can change
//!   while the server runs
//! - **All Three Commands**: CONNECT, BIND and UDP ASSOCIATE
//! - **Instrumentable Relay**: pipe initializers can wrap both streams
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socksd::config::load_config;
//! use socksd::SocksServer;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     let server = SocksServer::bind(&config.server).await?;
//!     server.run(shutdown_rx).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SOCKS5 Client -> SocksServer -> SocksService -> Session driver -> Pipe -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod server;
pub mod socks;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{AuthError, CommandError, ProtocolError, ReplyCode, SocksError};
pub use server::SocksServer;
pub use socks::SocksService;

/// Version of the socksd library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
