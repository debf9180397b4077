//! User store consumed by the username/password authenticator
//!
//! The authenticator only depends on the [`UserManager`] contract; the
//! default backing store is [`MemoryUserManager`].

mod memory;

pub use memory::MemoryUserManager;

use async_trait::async_trait;
use sha2::{Digest as Sha2Digest, Sha256};
use std::fmt::Debug;

/// Width of a password digest in bytes
pub const DIGEST_LEN: usize = 32;

/// SHA-256 password digest
pub type PasswordDigest = [u8; DIGEST_LEN];

/// Compute the SHA-256 digest of a password
pub fn digest(data: &[u8]) -> PasswordDigest {
    let d = Sha256::new().chain_update(data).finalize();
    let mut result = [0u8; DIGEST_LEN];
    result.copy_from_slice(&d);
    result
}

/// Constant-time comparison of two byte slices
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// A proxy user; identity is the username
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    username: String,
    password_digest: PasswordDigest,
}

impl User {
    /// Create a user, keeping only the digest of the password
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        User {
            username: username.into(),
            password_digest: digest(password.as_bytes()),
        }
    }

    /// Username
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Check a candidate password against the stored digest
    pub fn verify(&self, password: &str) -> bool {
        constant_time_compare(&digest(password.as_bytes()), &self.password_digest)
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Pluggable credential store
///
/// Implementations must tolerate concurrent calls from many sessions. A
/// concurrent `add_user` does not have to be visible to an in-flight `check`.
#[async_trait]
pub trait UserManager: Send + Sync + Debug {
    /// Return the user when the name exists and the password matches
    async fn check(&self, username: &str, password: &str) -> Option<User>;

    /// Add a user, replacing any existing user of the same name
    async fn add_user(&self, username: &str, password: &str);

    /// Delete a user, returning whether it existed
    async fn delete(&self, username: &str) -> bool;

    /// All known users
    async fn list(&self) -> Vec<User>;
}
