//! In-memory user store

use super::{User, UserManager};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// User store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryUserManager {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserManager {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `(username, password)` pairs
    pub fn with_users<'a, I>(users: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let users = users
            .into_iter()
            .map(|(name, password)| (name.to_string(), User::new(name, password)))
            .collect();
        MemoryUserManager {
            users: RwLock::new(users),
        }
    }
}

#[async_trait]
impl UserManager for MemoryUserManager {
    async fn check(&self, username: &str, password: &str) -> Option<User> {
        let users = self.users.read().await;
        users
            .get(username)
            .filter(|user| user.verify(password))
            .cloned()
    }

    async fn add_user(&self, username: &str, password: &str) {
        let mut users = self.users.write().await;
        users.insert(username.to_string(), User::new(username, password));
    }

    async fn delete(&self, username: &str) -> bool {
        self.users.write().await.remove(username).is_some()
    }

    async fn list(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| a.username().cmp(b.username()));
        users
    }
}
