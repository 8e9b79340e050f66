//! Error types for MediaWiki API operations.
//!
//! Transport, timeout and HTTP-status failures are terminal for the single
//! operation that raised them. Missing response fields are never errors; see
//! [`ApiResult`](super::ApiResult).

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::session::SessionStoreError;

/// Errors that can occur while talking to a MediaWiki-family API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level failure (DNS, connection refused, TLS, body read).
    #[error("network error calling {url}: {source}")]
    Transport {
        /// Endpoint that failed.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The operation exceeded its fixed deadline.
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        /// Logical operation name.
        operation: &'static str,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} calling {url}")]
    HttpStatus {
        /// Endpoint that failed.
        url: String,
        /// Status code.
        status: u16,
    },

    /// The response body was not a parseable document.
    #[error("undecodable response from {url}: {reason}")]
    Decode {
        /// Endpoint that returned the body.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// The API answered with a top-level `error` object.
    #[error("API error {code}: {info}")]
    Api {
        /// Machine-readable error code (e.g. `badtoken`).
        code: String,
        /// Human-readable description.
        info: String,
    },

    /// Caller-supplied input was rejected before any request was made.
    #[error("invalid input '{input}': {reason}")]
    InvalidInput {
        /// The rejected value.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The operation is not valid in the current authentication state.
    #[error("operation requires state {expected}, but session is {actual}")]
    InvalidState {
        /// Required state.
        expected: &'static str,
        /// Actual state.
        actual: &'static str,
    },

    /// Persisting session state failed.
    #[error("session store error: {0}")]
    Session(#[from] SessionStoreError),

    /// The client configuration was rejected before any client was built.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The HTTP client could not be constructed.
    #[error("HTTP client construction failed: {0}")]
    Client(String),
}

impl ApiError {
    /// Creates a transport error from a reqwest error.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// Creates an invalid-input error.
    #[must_use]
    pub fn invalid_input(input: &str, reason: &str) -> Self {
        Self::InvalidInput {
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for transport-level failures (network or timeout).
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}
