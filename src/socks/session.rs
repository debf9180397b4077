//! Per-connection session state
//!
//! A [`Session`] is owned by the driver of one client connection and moves
//! strictly forward through [`SessionState`]; any failure jumps straight to
//! [`SessionState::Closed`].

use super::method::SocksMethod;
use super::user::User;
use crate::error::ProtocolError;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Attribute key under which the authenticated username is mirrored
pub const USER_KEY: &str = "user";

/// Lifecycle of a SOCKS5 connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Waiting for the client greeting
    Greeting,
    /// Method chosen and sent to the client
    MethodSelected,
    /// Sub-negotiation in progress
    Authenticating,
    /// Client may send its command request
    Authenticated,
    /// Command request decoded
    CommandReceived,
    /// Pipe or UDP association running
    Relaying,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Greeting, MethodSelected) => true,
            (MethodSelected, Authenticating) | (MethodSelected, Authenticated) => true,
            (Authenticating, Authenticated) => true,
            (Authenticated, CommandReceived) => true,
            (CommandReceived, Relaying) => true,
            _ => false,
        }
    }
}

/// State of one client connection
#[derive(Debug)]
pub struct Session {
    id: u64,
    client_addr: SocketAddr,
    local_addr: SocketAddr,
    method: Option<SocksMethod>,
    user: Option<User>,
    attributes: HashMap<String, String>,
    state: SessionState,
}

impl Session {
    /// Create a session for a freshly accepted connection
    pub fn new(id: u64, client_addr: SocketAddr, local_addr: SocketAddr) -> Self {
        Session {
            id,
            client_addr,
            local_addr,
            method: None,
            user: None,
            attributes: HashMap::new(),
            state: SessionState::Greeting,
        }
    }

    /// Session id, unique per server
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address of the connected client
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Server-side address the client connected to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated method, if any
    pub fn method(&self) -> Option<SocksMethod> {
        self.method
    }

    /// Record the negotiated method and move to `MethodSelected`
    pub fn set_method(&mut self, method: SocksMethod) -> Result<(), ProtocolError> {
        if let Some(existing) = self.method {
            return Err(ProtocolError::MethodAlreadySet(existing));
        }
        self.advance(SessionState::MethodSelected)?;
        self.method = Some(method);
        Ok(())
    }

    /// Move to `next`, rejecting backward or skipping transitions
    pub fn advance(&mut self, next: SessionState) -> Result<(), ProtocolError> {
        if !self.state.can_transition_to(next) {
            return Err(ProtocolError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(session = self.id, from = ?self.state, to = ?next, "Session transition");
        self.state = next;
        Ok(())
    }

    /// Enter the terminal state
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Whether the session reached its terminal state
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Authenticated user, set by a successful username/password check
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Record the authenticated user
    pub fn set_user(&mut self, user: User) {
        self.attributes
            .insert(USER_KEY.to_string(), user.username().to_string());
        self.user = Some(user);
    }

    /// Read an attribute
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Set an attribute, returning the previous value
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.attributes.insert(key.into(), value.into())
    }

    /// Remove an attribute
    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        self.attributes.remove(key)
    }
}
