//! Persisted session state: the login flag and session credential.
//!
//! The store itself is an external collaborator. This module defines the
//! key/value contract the auth flow relies on, plus two implementations:
//! [`MemorySessionStore`] for tests and short-lived processes, and
//! [`FileSessionStore`], which keeps a JSON document on disk so state
//! survives restarts.

mod file;
mod memory;

pub use file::{FileSessionStore, default_session_path};
pub use memory::MemorySessionStore;

use std::fmt;

use thiserror::Error;

/// Key of the persisted login flag.
pub const KEY_IS_USER_LOGGED_IN: &str = "isUserLoggedIn";

/// Key of the persisted session cookie.
pub const KEY_AUTH_COOKIE: &str = "getAuthCookie";

/// Errors for session store operations.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    /// No suitable user config directory is available.
    #[error("unable to determine config directory (set XDG_CONFIG_HOME or HOME)")]
    ConfigDirUnavailable,
    /// Filesystem I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The stored document could not be read or written as JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Key/value contract for durable session state.
///
/// Reads never fail: a missing or unreadable key reads as `false`/`None`.
/// Writes report failures so callers can decide whether they are fatal.
pub trait SessionStore: Send + Sync {
    /// Reads a boolean, defaulting to `false`.
    fn get_bool(&self, key: &str) -> bool;

    /// Writes a boolean.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] when persistence fails.
    fn put_bool(&self, key: &str, value: bool) -> Result<(), SessionStoreError>;

    /// Reads a string.
    fn get_string(&self, key: &str) -> Option<String>;

    /// Writes a string.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] when persistence fails.
    fn put_string(&self, key: &str, value: &str) -> Result<(), SessionStoreError>;

    /// Removes a key. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] when persistence fails.
    fn remove(&self, key: &str) -> Result<(), SessionStoreError>;
}

/// Snapshot of the persisted session.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Whether the last login attempt succeeded and no logout followed.
    pub is_logged_in: bool,
    /// `Cookie` header value captured after login (sensitive).
    pub auth_cookie: Option<String>,
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("is_logged_in", &self.is_logged_in)
            .field(
                "auth_cookie",
                &self.auth_cookie.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl SessionState {
    /// Reads the session from `store`.
    #[must_use]
    pub fn load(store: &dyn SessionStore) -> Self {
        Self {
            is_logged_in: store.get_bool(KEY_IS_USER_LOGGED_IN),
            auth_cookie: store
                .get_string(KEY_AUTH_COOKIE)
                .filter(|cookie| !cookie.is_empty()),
        }
    }

    /// Writes the session to `store`, removing the cookie key when absent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] when any write fails.
    pub fn save(&self, store: &dyn SessionStore) -> Result<(), SessionStoreError> {
        store.put_bool(KEY_IS_USER_LOGGED_IN, self.is_logged_in)?;
        match &self.auth_cookie {
            Some(cookie) => store.put_string(KEY_AUTH_COOKIE, cookie),
            None => store.remove(KEY_AUTH_COOKIE),
        }
    }

    /// The logged-out state.
    #[must_use]
    pub fn logged_out() -> Self {
        Self::default()
    }
}
