//! Shared per-server SOCKS5 state
//!
//! A [`SocksService`] is cloned into every connection task. It owns the
//! method selector, the authenticator registry, the user store, the command
//! executor and the pipe initializers, and exposes the administrative
//! operations that mutate them at runtime.

use super::auth::{
    Authenticator, AuthenticatorRegistry, NoAuthenticator, UsernamePasswordAuthenticator,
};
use super::command::CommandExecutor;
use super::handler::drive_session;
use super::method::SocksMethod;
use super::pipe::{Pipe, PipeInitializer};
use super::selector::{MethodSelector, PreferenceMethodSelector};
use super::session::Session;
use super::user::{MemoryUserManager, User, UserManager};
use crate::config::SocksConfig;
use crate::error::{AuthError, SocksError};
use crate::transport::SocketOpts;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, info_span, warn, Instrument};

/// Builder for [`SocksService`]
///
/// Every collaborator defaults to the in-process implementation derived
/// from the configuration.
#[derive(Debug)]
pub struct SocksServiceBuilder {
    config: SocksConfig,
    socket_opts: SocketOpts,
    user_manager: Option<Arc<dyn UserManager>>,
    selector: Option<Arc<dyn MethodSelector>>,
    authenticators: Vec<(SocksMethod, Arc<dyn Authenticator>)>,
    pipe_initializers: Vec<Arc<dyn PipeInitializer>>,
}

impl SocksServiceBuilder {
    /// Socket options applied to client and destination streams
    pub fn socket_opts(mut self, socket_opts: SocketOpts) -> Self {
        self.socket_opts = socket_opts;
        self
    }

    /// Replace the in-memory user store
    ///
    /// Users listed in the configuration are not seeded into a custom store.
    pub fn user_manager(mut self, user_manager: Arc<dyn UserManager>) -> Self {
        self.user_manager = Some(user_manager);
        self
    }

    /// Replace the preference-order selector
    pub fn selector(mut self, selector: Arc<dyn MethodSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Register an additional authenticator, replacing the default for its method
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators
            .push((authenticator.method(), authenticator));
        self
    }

    /// Append a pipe initializer; initializers run in registration order
    pub fn pipe_initializer(mut self, initializer: Arc<dyn PipeInitializer>) -> Self {
        self.pipe_initializers.push(initializer);
        self
    }

    /// Validate the configuration and build the service
    pub fn build(self) -> Result<SocksService, SocksError> {
        self.config.validate().map_err(SocksError::Config)?;

        let user_manager = match self.user_manager {
            Some(manager) => manager,
            None => Arc::new(MemoryUserManager::with_users(
                self.config
                    .users
                    .iter()
                    .map(|u| (u.username.as_str(), u.password.as_str())),
            )),
        };

        let mut authenticators = AuthenticatorRegistry::new();
        authenticators.register(SocksMethod::NoAuth, Arc::new(NoAuthenticator));
        authenticators.register(
            SocksMethod::UsernamePassword,
            Arc::new(
                UsernamePasswordAuthenticator::new(user_manager.clone())
                    .with_lockout_window(Duration::from_millis(self.config.lockout_ms)),
            ),
        );
        for (method, authenticator) in self.authenticators {
            authenticators.register(method, authenticator);
        }

        let selector = match self.selector {
            Some(selector) => {
                selector.set_supported_methods(self.config.methods.clone());
                selector
            }
            None => Arc::new(PreferenceMethodSelector::new(self.config.methods.clone())),
        };

        let executor = CommandExecutor::new(&self.config, self.socket_opts.clone());

        Ok(SocksService {
            inner: Arc::new(ServiceInner {
                handshake_timeout: Duration::from_secs(self.config.handshake_timeout),
                relay_buffer_size: self.config.relay_buffer_size,
                half_close_timeout: Duration::from_secs(self.config.half_close_timeout),
                socket_opts: self.socket_opts,
                selector,
                authenticators,
                user_manager,
                executor,
                pipe_initializers: self.pipe_initializers,
                next_session_id: AtomicU64::new(1),
            }),
        })
    }
}

#[derive(Debug)]
struct ServiceInner {
    handshake_timeout: Duration,
    relay_buffer_size: usize,
    half_close_timeout: Duration,
    socket_opts: SocketOpts,
    selector: Arc<dyn MethodSelector>,
    authenticators: AuthenticatorRegistry,
    user_manager: Arc<dyn UserManager>,
    executor: CommandExecutor,
    pipe_initializers: Vec<Arc<dyn PipeInitializer>>,
    next_session_id: AtomicU64,
}

/// Shared state handed to every session
#[derive(Debug, Clone)]
pub struct SocksService {
    inner: Arc<ServiceInner>,
}

impl SocksService {
    /// Start building a service from configuration
    pub fn builder(config: SocksConfig) -> SocksServiceBuilder {
        SocksServiceBuilder {
            config,
            socket_opts: SocketOpts::default(),
            user_manager: None,
            selector: None,
            authenticators: Vec::new(),
            pipe_initializers: Vec::new(),
        }
    }

    /// Build a service with default collaborators
    pub fn from_config(config: &SocksConfig) -> Result<Self, SocksError> {
        Self::builder(config.clone()).build()
    }

    /// Read timeout for each handshake message
    pub fn handshake_timeout(&self) -> Duration {
        self.inner.handshake_timeout
    }

    /// Method selector
    pub fn selector(&self) -> &Arc<dyn MethodSelector> {
        &self.inner.selector
    }

    /// Authenticators by method
    pub fn authenticators(&self) -> &AuthenticatorRegistry {
        &self.inner.authenticators
    }

    /// User store
    pub fn user_manager(&self) -> &Arc<dyn UserManager> {
        &self.inner.user_manager
    }

    /// Command executor
    pub fn executor(&self) -> &CommandExecutor {
        &self.inner.executor
    }

    /// Apply configuration and every registered initializer to a new pipe
    pub fn initialize_pipe(&self, pipe: Pipe) -> Pipe {
        let pipe = pipe
            .with_buffer_size(self.inner.relay_buffer_size)
            .with_half_close_timeout(self.inner.half_close_timeout);
        self.inner
            .pipe_initializers
            .iter()
            .fold(pipe, |pipe, initializer| initializer.initialize(pipe))
    }

    /// Allocate the next session id
    pub fn next_session_id(&self) -> u64 {
        self.inner.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Serve an accepted TCP connection
    pub async fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        if let Err(e) = self.inner.socket_opts.apply(&stream) {
            debug!(%client_addr, "Failed to apply socket options: {}", e);
        }
        let local_addr = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(%client_addr, "Failed to read local address: {}", e);
                return;
            }
        };
        self.serve(stream, client_addr, local_addr).await;
    }

    /// Serve a connection over any byte stream
    pub async fn serve<S>(&self, stream: S, client_addr: SocketAddr, local_addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut session = Session::new(self.next_session_id(), client_addr, local_addr);
        let span = info_span!("session", id = session.id(), client = %client_addr);

        async {
            debug!("Session started");
            match drive_session(self, &mut session, stream).await {
                Ok(()) => info!("Session finished"),
                Err(e) => warn!("Session failed: {}", e),
            }
        }
        .instrument(span)
        .await
    }

    /// Add or replace a user
    pub async fn add_user(&self, username: &str, password: &str) {
        self.inner.user_manager.add_user(username, password).await;
        info!(username = %username, "User added");
    }

    /// Delete a user, returning whether it existed
    pub async fn delete_user(&self, username: &str) -> bool {
        let removed = self.inner.user_manager.delete(username).await;
        if removed {
            info!(username = %username, "User deleted");
        }
        removed
    }

    /// All users known to the store
    pub async fn list_users(&self) -> Vec<User> {
        self.inner.user_manager.list().await
    }

    /// Supported methods in preference order
    pub fn supported_methods(&self) -> Vec<SocksMethod> {
        self.inner.selector.supported_methods()
    }

    fn ensure_authenticator(&self, method: SocksMethod) -> Result<(), SocksError> {
        if self.inner.authenticators.get(method).is_none() {
            return Err(AuthError::NoAuthenticator(method).into());
        }
        Ok(())
    }

    /// Append a supported method at the lowest preference
    pub fn add_supported_method(&self, method: SocksMethod) -> Result<(), SocksError> {
        self.ensure_authenticator(method)?;
        self.inner.selector.add_supported_method(method);
        info!(%method, "Supported method added");
        Ok(())
    }

    /// Remove a supported method, returning whether it was supported
    pub fn remove_supported_method(&self, method: SocksMethod) -> bool {
        self.inner.selector.remove_supported_method(method)
    }

    /// Replace the supported methods
    pub fn set_supported_methods(&self, methods: Vec<SocksMethod>) -> Result<(), SocksError> {
        for method in &methods {
            self.ensure_authenticator(*method)?;
        }
        self.inner.selector.set_supported_methods(methods);
        Ok(())
    }

    /// Remove every supported method; later greetings get 0xFF
    pub fn clear_supported_methods(&self) {
        self.inner.selector.clear_supported_methods();
    }
}
