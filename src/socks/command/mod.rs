//! SOCKS5 command handling

mod executor;

pub use executor::{CommandExecutor, CommandOutcome};
