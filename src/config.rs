//! Client configuration: endpoints, timeouts and worker pool sizing.
//!
//! [`ClientConfig`] has production defaults for Wikimedia Commons, can be
//! deserialized from any serde source, and can be overlaid from
//! `COMMONS_MWAPI_*` environment variables.

use std::env;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::dispatch::{MAX_WORKERS, MIN_WORKERS};

/// Default Commons `api.php` endpoint.
pub const DEFAULT_COMMONS_API_URL: &str = "https://commons.wikimedia.org/w/api.php";

/// Default Wikidata `api.php` endpoint.
pub const DEFAULT_WIKIDATA_API_URL: &str = "https://www.wikidata.org/w/api.php";

/// Default Wikidata Query Service SPARQL endpoint.
pub const DEFAULT_SPARQL_URL: &str = "https://query.wikidata.org/sparql";

/// Default base for Commons thumbnail URLs.
pub const DEFAULT_THUMBNAIL_BASE_URL: &str = "https://upload.wikimedia.org/wikipedia/commons/thumb";

/// Return URL sent with `clientlogin` requests.
pub const DEFAULT_LOGIN_RETURN_URL: &str = "https://commons.wikimedia.org";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Deadline for an image-statement (P18) thumbnail lookup, measured from the start of the call.
pub const DEFAULT_THUMBNAIL_TIMEOUT_SECS: u64 = 15;

/// Default number of concurrent in-flight I/O operations.
pub const DEFAULT_IO_WORKERS: usize = 4;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Offending value, rendered.
        value: String,
        /// Accepted range.
        expected: &'static str,
    },
}

/// Endpoint and timing configuration shared by all clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Commons `api.php` endpoint (login, queries, log events).
    pub commons_api_url: String,
    /// Wikidata `api.php` endpoint (entity search, claims).
    pub wikidata_api_url: String,
    /// SPARQL endpoint for parent/child class expansion.
    pub sparql_url: String,
    /// Base URL thumbnails are derived from.
    pub thumbnail_base_url: String,
    /// `loginreturnurl` for `clientlogin`.
    pub login_return_url: String,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: u64,
    /// Deadline for P18 thumbnail lookups in seconds.
    pub thumbnail_timeout_secs: u64,
    /// Bound on concurrent in-flight operations in the I/O pool.
    pub io_workers: usize,
    /// Overrides the default User-Agent.
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            commons_api_url: DEFAULT_COMMONS_API_URL.to_string(),
            wikidata_api_url: DEFAULT_WIKIDATA_API_URL.to_string(),
            sparql_url: DEFAULT_SPARQL_URL.to_string(),
            thumbnail_base_url: DEFAULT_THUMBNAIL_BASE_URL.to_string(),
            login_return_url: DEFAULT_LOGIN_RETURN_URL.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            thumbnail_timeout_secs: DEFAULT_THUMBNAIL_TIMEOUT_SECS,
            io_workers: DEFAULT_IO_WORKERS,
            user_agent: None,
        }
    }
}

impl ClientConfig {
    /// Builds a config that points every endpoint at a single base URL.
    ///
    /// Used by tests to route all traffic to one mock server.
    #[must_use]
    pub fn with_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            commons_api_url: format!("{base}/w/api.php"),
            wikidata_api_url: format!("{base}/wikidata/api.php"),
            sparql_url: format!("{base}/sparql"),
            ..Self::default()
        }
    }

    /// Returns defaults overlaid with `COMMONS_MWAPI_*` environment variables.
    ///
    /// Unparseable numeric values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        self.apply_overrides(|name| env::var(name).ok());
    }

    /// Overlays values returned by `lookup` for each `COMMONS_MWAPI_*` name.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let text = |name: &str| non_empty(lookup(name));
        let parsed = |name: &str| text(name).and_then(|raw| parse_override(name, &raw));

        if let Some(value) = text("COMMONS_MWAPI_COMMONS_API_URL") {
            self.commons_api_url = value;
        }
        if let Some(value) = text("COMMONS_MWAPI_WIKIDATA_API_URL") {
            self.wikidata_api_url = value;
        }
        if let Some(value) = text("COMMONS_MWAPI_SPARQL_URL") {
            self.sparql_url = value;
        }
        if let Some(value) = text("COMMONS_MWAPI_THUMBNAIL_BASE_URL") {
            self.thumbnail_base_url = value;
        }
        if let Some(value) = text("COMMONS_MWAPI_LOGIN_RETURN_URL") {
            self.login_return_url = value;
        }
        if let Some(value) = text("COMMONS_MWAPI_USER_AGENT") {
            self.user_agent = Some(value);
        }
        if let Some(value) = parsed("COMMONS_MWAPI_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = value;
        }
        if let Some(value) = parsed("COMMONS_MWAPI_READ_TIMEOUT_SECS") {
            self.read_timeout_secs = value;
        }
        if let Some(value) = parsed("COMMONS_MWAPI_THUMBNAIL_TIMEOUT_SECS") {
            self.thumbnail_timeout_secs = value;
        }
        if let Some(value) = text("COMMONS_MWAPI_IO_WORKERS")
            .and_then(|raw| parse_override("COMMONS_MWAPI_IO_WORKERS", &raw))
        {
            self.io_workers = value;
        }
    }

    /// Validates timeouts and pool size.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first out-of-range value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        validate_timeout_secs("thumbnail_timeout_secs", self.thumbnail_timeout_secs)?;
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.io_workers) {
            return Err(ConfigError::Invalid {
                field: "io_workers",
                value: self.io_workers.to_string(),
                expected: "1..=64",
            });
        }
        Ok(())
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout as a [`Duration`].
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// P18 lookup deadline as a [`Duration`].
    #[must_use]
    pub fn thumbnail_timeout(&self) -> Duration {
        Duration::from_secs(self.thumbnail_timeout_secs)
    }
}

fn validate_timeout_secs(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::Invalid {
            field,
            value: value.to_string(),
            expected: "1..=3600",
        });
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Option<T> {
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparseable config override");
            None
        }
    }
}
