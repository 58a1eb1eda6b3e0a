//! Credential access for the realtime handshake.
//!
//! The connection manager never parses or validates the bearer token. It reads the current
//! value from a [`CredentialSource`] once per [`crate::ws::ConnectionManager::connect`]
//! call and forwards it verbatim in the handshake frame.

use std::sync::{Arc, PoisonError, RwLock};

/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};

/// Read access to the bearer token owned by the calling application.
///
/// Implemented for [`CredentialStore`] and for any `Fn() -> Option<SecretString>` closure,
/// so an application can plug in whatever persistence it already has.
pub trait CredentialSource: Send + Sync + 'static {
    /// Returns the credential to present, or `None` when the user is signed out.
    fn current(&self) -> Option<SecretString>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<SecretString> + Send + Sync + 'static,
{
    fn current(&self) -> Option<SecretString> {
        self()
    }
}

/// In-memory token holder shared between the sign-in flow and realtime connections.
///
/// Clones share the same underlying slot.
#[derive(Clone, Debug, Default)]
pub struct CredentialStore {
    token: Arc<RwLock<Option<SecretString>>>,
}

impl CredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a token issued by the login endpoint. Empty tokens are treated as a sign-out.
    pub fn set<S: Into<String>>(&self, token: S) {
        let token = token.into();
        let value = (!token.is_empty()).then(|| SecretString::from(token));
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl CredentialSource for CredentialStore {
    fn current(&self) -> Option<SecretString> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
