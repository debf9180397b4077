//! Username/password authentication
//!
//! Implements the verification side of RFC 1929. A single failure timestamp
//! is shared by every session served by one authenticator: any attempt that
//! arrives within the lockout window after a failure is rejected without
//! consulting the [`UserManager`].

use super::{Authenticator, Credentials};
use crate::error::AuthError;
use crate::socks::method::SocksMethod;
use crate::socks::session::Session;
use crate::socks::user::{User, UserManager};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default lockout window after a failed attempt
pub const FAIL_LOCK: Duration = Duration::from_millis(1000);

/// Authenticator for the `USERNAME_PASSWORD` method
#[derive(Debug)]
pub struct UsernamePasswordAuthenticator {
    user_manager: Arc<dyn UserManager>,
    /// `None` until the first failure
    last_failure: Mutex<Option<Instant>>,
    lockout_window: Duration,
}

impl UsernamePasswordAuthenticator {
    /// Create an authenticator backed by `user_manager`
    pub fn new(user_manager: Arc<dyn UserManager>) -> Self {
        UsernamePasswordAuthenticator {
            user_manager,
            last_failure: Mutex::new(None),
            lockout_window: FAIL_LOCK,
        }
    }

    /// Override the lockout window
    pub fn with_lockout_window(mut self, window: Duration) -> Self {
        self.lockout_window = window;
        self
    }

    /// The user store consulted by this authenticator
    pub fn user_manager(&self) -> &Arc<dyn UserManager> {
        &self.user_manager
    }

    /// Add a user to the backing store
    pub async fn add_user(&self, username: &str, password: &str) {
        self.user_manager.add_user(username, password).await;
    }

    /// Delete a user from the backing store
    pub async fn delete_user(&self, username: &str) -> bool {
        self.user_manager.delete(username).await
    }

    fn is_locked_out(&self) -> bool {
        let last_failure = self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        matches!(*last_failure, Some(at) if at.elapsed() < self.lockout_window)
    }

    fn record_failure(&self) {
        let mut last_failure = self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *last_failure = Some(Instant::now());
    }

    async fn verify(&self, username: &str, password: &str) -> Option<User> {
        self.user_manager.check(username, password).await
    }
}

#[async_trait]
impl Authenticator for UsernamePasswordAuthenticator {
    fn method(&self) -> SocksMethod {
        SocksMethod::UsernamePassword
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        session: &mut Session,
    ) -> Result<(), AuthError> {
        let (username, password) = match credentials {
            Credentials::UsernamePassword { username, password } => (username, password),
            other => {
                return Err(AuthError::UnsupportedCredentials {
                    authenticator: "username/password",
                    credentials: other.kind(),
                })
            }
        };

        let client = session.client_addr().to_string();

        if self.is_locked_out() {
            warn!(%client, username = %username, "Authentication attempt inside lockout window");
            return Err(AuthError::LockedOut(client));
        }

        match self.verify(username, password).await {
            Some(user) => {
                debug!(%client, username = %username, "Username/password authentication succeeded");
                session.set_user(user);
                Ok(())
            }
            None => {
                self.record_failure();
                warn!(%client, username = %username, "Username/password authentication failed");
                Err(AuthError::Rejected(client))
            }
        }
    }
}
