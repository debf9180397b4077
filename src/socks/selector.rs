//! Method negotiation
//!
//! The server's supported methods are an ordered preference list. The
//! selector returns the first supported method the client also offers,
//! so server configuration decides ties.

use super::message::MethodSelectionMessage;
use super::method::SocksMethod;
use std::fmt::Debug;
use std::sync::{PoisonError, RwLock};

/// Picks the authentication method for a greeting
///
/// The supported set may be changed at runtime; changes apply to later
/// negotiations only.
pub trait MethodSelector: Send + Sync + Debug {
    /// Choose a method, or [`SocksMethod::NoAcceptable`] when nothing overlaps
    fn select(&self, message: &MethodSelectionMessage) -> SocksMethod;

    /// Snapshot of the supported methods in preference order
    fn supported_methods(&self) -> Vec<SocksMethod>;

    /// Replace the supported methods
    fn set_supported_methods(&self, methods: Vec<SocksMethod>);

    /// Remove every supported method
    fn clear_supported_methods(&self);

    /// Append a method at the lowest preference, if not already present
    fn add_supported_method(&self, method: SocksMethod);

    /// Remove a method, returning whether it was supported
    fn remove_supported_method(&self, method: SocksMethod) -> bool;
}

/// Selector that honours the server's preference order
#[derive(Debug, Default)]
pub struct PreferenceMethodSelector {
    methods: RwLock<Vec<SocksMethod>>,
}

impl PreferenceMethodSelector {
    /// Create a selector from an ordered preference list
    pub fn new(methods: impl IntoIterator<Item = SocksMethod>) -> Self {
        let selector = PreferenceMethodSelector::default();
        selector.set_supported_methods(methods.into_iter().collect());
        selector
    }
}

/// Drop the sentinel and duplicates while keeping the first occurrence
fn normalize(methods: Vec<SocksMethod>) -> Vec<SocksMethod> {
    let mut result = Vec::with_capacity(methods.len());
    for method in methods {
        if method != SocksMethod::NoAcceptable && !result.contains(&method) {
            result.push(method);
        }
    }
    result
}

impl MethodSelector for PreferenceMethodSelector {
    fn select(&self, message: &MethodSelectionMessage) -> SocksMethod {
        let methods = self.methods.read().unwrap_or_else(PoisonError::into_inner);
        methods
            .iter()
            .copied()
            .find(|m| message.offers(*m))
            .unwrap_or(SocksMethod::NoAcceptable)
    }

    fn supported_methods(&self) -> Vec<SocksMethod> {
        self.methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_supported_methods(&self, methods: Vec<SocksMethod>) {
        let methods = normalize(methods);
        *self.methods.write().unwrap_or_else(PoisonError::into_inner) = methods;
    }

    fn clear_supported_methods(&self) {
        self.methods
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn add_supported_method(&self, method: SocksMethod) {
        if method == SocksMethod::NoAcceptable {
            return;
        }
        let mut methods = self.methods.write().unwrap_or_else(PoisonError::into_inner);
        if !methods.contains(&method) {
            methods.push(method);
        }
    }

    fn remove_supported_method(&self, method: SocksMethod) -> bool {
        let mut methods = self.methods.write().unwrap_or_else(PoisonError::into_inner);
        let before = methods.len();
        methods.retain(|m| *m != method);
        methods.len() != before
    }
}
