//! No authentication
//!
//! Handles the case when no authentication is required.

use super::{Authenticator, Credentials};
use crate::error::AuthError;
use crate::socks::method::SocksMethod;
use crate::socks::session::Session;
use async_trait::async_trait;

/// Authenticator for the `NO_AUTH` method
///
/// Accepts only [`Credentials::None`] and records nothing in the session.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuthenticator;

#[async_trait]
impl Authenticator for NoAuthenticator {
    fn method(&self) -> SocksMethod {
        SocksMethod::NoAuth
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        _session: &mut Session,
    ) -> Result<(), AuthError> {
        match credentials {
            Credentials::None => Ok(()),
            other => Err(AuthError::UnsupportedCredentials {
                authenticator: "no-auth",
                credentials: other.kind(),
            }),
        }
    }
}
