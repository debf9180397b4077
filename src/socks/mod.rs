//! SOCKS5 protocol engine
//!
//! Wire codec, method negotiation, authentication, session state machine,
//! command execution and the bidirectional relay. [`SocksService`] ties them
//! together for each accepted connection.

pub mod auth;
pub mod command;
pub mod consts;
mod handler;
pub mod message;
mod method;
pub mod pipe;
pub mod selector;
mod service;
mod session;
mod types;
pub mod udp;
pub mod user;

pub use auth::{Authenticator, AuthenticatorRegistry, Credentials};
pub use command::{CommandExecutor, CommandOutcome};
pub use handler::drive_session;
pub use message::Message;
pub use method::SocksMethod;
pub use pipe::{Pipe, PipeCloseCause, PipeInitializer, PipeSummary};
pub use selector::{MethodSelector, PreferenceMethodSelector};
pub use service::{SocksService, SocksServiceBuilder};
pub use session::{Session, SessionState, USER_KEY};
pub use types::{SocksCommand, TargetAddr};
pub use user::{MemoryUserManager, User, UserManager};
