//! SOCKS5 authentication
//!
//! An [`Authenticator`] consumes the [`Credentials`] produced by the method's
//! sub-negotiation and records the authenticated identity in the [`Session`].
//! Authenticators are looked up per method in an [`AuthenticatorRegistry`].

mod none;
mod password;

pub use none::NoAuthenticator;
pub use password::{UsernamePasswordAuthenticator, FAIL_LOCK};

use super::method::SocksMethod;
use super::session::Session;
use crate::error::AuthError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Identity presented by a client
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// No secret, used with `NO_AUTH`
    None,
    /// RFC 1929 username and password
    UsernamePassword {
        /// Principal name
        username: String,
        /// Plaintext password as sent by the client
        password: String,
    },
}

impl Credentials {
    /// Short name of the credential kind, used in errors and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::None => "none",
            Credentials::UsernamePassword { .. } => "username/password",
        }
    }

    /// Claimed principal, if the credentials carry one
    pub fn principal(&self) -> Option<&str> {
        match self {
            Credentials::None => None,
            Credentials::UsernamePassword { username, .. } => Some(username),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::None => f.write_str("None"),
            Credentials::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Authentication capability of one SOCKS5 method
///
/// On failure an implementation must leave the session untouched.
#[async_trait]
pub trait Authenticator: Send + Sync + Debug {
    /// Method this authenticator serves
    fn method(&self) -> SocksMethod;

    /// Verify `credentials`, recording the identity into `session` on success
    async fn authenticate(
        &self,
        credentials: &Credentials,
        session: &mut Session,
    ) -> Result<(), AuthError>;
}

/// Registry that maps methods to their authenticators
#[derive(Debug, Default, Clone)]
pub struct AuthenticatorRegistry {
    authenticators: HashMap<SocksMethod, Arc<dyn Authenticator>>,
}

impl AuthenticatorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            authenticators: HashMap::new(),
        }
    }

    /// Register an authenticator for a method, replacing any previous one
    pub fn register(&mut self, method: SocksMethod, authenticator: Arc<dyn Authenticator>) {
        self.authenticators.insert(method, authenticator);
    }

    /// Look up the authenticator for a method
    pub fn get(&self, method: SocksMethod) -> Option<Arc<dyn Authenticator>> {
        self.authenticators.get(&method).cloned()
    }

    /// All methods with a registered authenticator
    pub fn methods(&self) -> Vec<SocksMethod> {
        let mut methods: Vec<SocksMethod> = self.authenticators.keys().copied().collect();
        methods.sort_by_key(|m| m.to_byte());
        methods
    }

    /// Number of registered authenticators
    pub fn len(&self) -> usize {
        self.authenticators.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }
}
