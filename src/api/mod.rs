//! Request construction and transport for MediaWiki-family APIs.
//!
//! # Architecture
//!
//! - [`ApiTransport`] - Async trait that executes one flat-parameter API call
//! - [`MwApi`] - reqwest-backed transport bound to one `api.php` endpoint, with a cookie jar
//! - [`ApiRequest`] - Builder for a single action (`MwApi::action("query").param(..).get()`)
//! - [`ApiResult`] - Path-addressed view over the parsed response
//! - [`ApiError`] - Transport, timeout, status and API-level failures
//!
//! Every request is sent with `format=json&formatversion=2`. GET requests carry
//! parameters in the query string; POST requests send them form-encoded.
//!
//! # Example
//!
//! ```no_run
//! use commons_mwapi::api::MwApi;
//! use commons_mwapi::config::ClientConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::default();
//! let api = MwApi::new(&config.commons_api_url, &config)?;
//! let result = api
//!     .action("query")
//!     .param("meta", "tokens")
//!     .param("type", "login")
//!     .get()
//!     .await?;
//! println!("token: {}", result.get_string("/query/tokens/@logintoken"));
//! # Ok(())
//! # }
//! ```

mod error;
mod http_client;
mod result;

pub use error::ApiError;
pub use result::ApiResult;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use tracing::{debug, instrument};
use url::Url;

use crate::config::ClientConfig;

pub(crate) use http_client::build_api_http_client;

/// Flat request parameters. Ordered so request logs and bodies are stable.
pub type Params = BTreeMap<String, String>;

/// Parameter names whose values are never logged.
const SECRET_PARAMS: [&str; 4] = ["password", "logintoken", "token", "OATHToken"];

/// HTTP verb for an API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Parameters in the query string.
    Get,
    /// Parameters form-encoded in the body.
    Post,
}

/// Executes a single API call.
///
/// # Object Safety
///
/// Uses `async_trait` so clients can hold `Arc<dyn ApiTransport>`; tests
/// substitute scripted transports for the HTTP one.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Endpoint this transport talks to (for logs and errors).
    fn endpoint(&self) -> &str;

    /// Sends `params` with `method` and parses the response.
    async fn execute(&self, method: HttpMethod, params: &Params) -> Result<ApiResult, ApiError>;
}

/// reqwest-backed transport for one `api.php` endpoint.
///
/// Cookies set by the server (session, `centralauth_*`) are kept in the
/// jar and sent with every later request to the same host.
pub struct MwApi {
    client: Client,
    endpoint: String,
    endpoint_url: Url,
    cookie_jar: Arc<Jar>,
}

impl fmt::Debug for MwApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MwApi")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl MwApi {
    /// Creates a transport with a fresh cookie jar.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] when `config` fails validation,
    /// [`ApiError::InvalidInput`] for an unparseable endpoint and
    /// [`ApiError::Client`] when the HTTP client cannot be built.
    pub fn new(endpoint: &str, config: &ClientConfig) -> Result<Self, ApiError> {
        Self::with_cookie_jar(endpoint, config, Arc::new(Jar::default()))
    }

    /// Creates a transport sharing `cookie_jar` with other clients.
    ///
    /// # Errors
    ///
    /// Same as [`MwApi::new`].
    pub fn with_cookie_jar(
        endpoint: &str,
        config: &ClientConfig,
        cookie_jar: Arc<Jar>,
    ) -> Result<Self, ApiError> {
        config.validate()?;
        let endpoint_url = Url::parse(endpoint)
            .map_err(|e| ApiError::invalid_input(endpoint, &format!("invalid endpoint URL: {e}")))?;
        let client = build_api_http_client(endpoint, config, Arc::clone(&cookie_jar))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            endpoint_url,
            cookie_jar,
        })
    }

    /// Starts a request for `action`.
    #[must_use]
    pub fn action(&self, action: &str) -> ApiRequest<'_> {
        ApiRequest::new(self, action)
    }

    /// Returns the underlying HTTP client (shared connection pool).
    #[must_use]
    pub fn http_client(&self) -> &Client {
        &self.client
    }

    /// Returns the `Cookie` header value the jar would send to this endpoint.
    ///
    /// This is the session credential persisted after a successful login.
    #[must_use]
    pub fn auth_cookie(&self) -> Option<String> {
        self.cookie_jar
            .cookies(&self.endpoint_url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
            .filter(|value| !value.is_empty())
    }

    /// Seeds the jar from a previously persisted `Cookie` header value.
    pub fn restore_auth_cookie(&self, cookie_header: &str) {
        for pair in split_cookie_header(cookie_header) {
            self.cookie_jar.add_cookie_str(pair, &self.endpoint_url);
        }
    }

    /// Expires every cookie the jar holds for this endpoint.
    pub fn clear_auth_cookie(&self) {
        let Some(current) = self.auth_cookie() else {
            return;
        };
        for pair in split_cookie_header(&current) {
            if let Some((name, _)) = pair.split_once('=') {
                // Server cookies are usually scoped to `/`; restored ones to the endpoint directory.
                for expired in [
                    format!("{name}=; Max-Age=0; Path=/"),
                    format!("{name}=; Max-Age=0"),
                ] {
                    self.cookie_jar.add_cookie_str(&expired, &self.endpoint_url);
                }
            }
        }
    }
}

#[async_trait]
impl ApiTransport for MwApi {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[instrument(level = "debug", skip(self, params), fields(endpoint = %self.endpoint, action = params.get("action").map_or("", String::as_str)))]
    async fn execute(&self, method: HttpMethod, params: &Params) -> Result<ApiResult, ApiError> {
        let mut params = params.clone();
        params.insert("format".to_string(), "json".to_string());
        params.insert("formatversion".to_string(), "2".to_string());

        let request = match method {
            HttpMethod::Get => {
                let mut url = self.endpoint_url.clone();
                url.query_pairs_mut().extend_pairs(params.iter());
                self.client.get(url)
            }
            HttpMethod::Post => {
                let body = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(params.iter())
                    .finish();
                self.client
                    .post(self.endpoint_url.clone())
                    .header(
                        CONTENT_TYPE,
                        HeaderValue::from_static("application/x-www-form-urlencoded"),
                    )
                    .body(body)
            }
        };

        let result = send_for_document(request, &self.endpoint).await?;
        if let Some((code, info)) = result.error() {
            debug!(%code, "API returned error object");
            return Err(ApiError::Api { code, info });
        }
        Ok(result)
    }
}

/// Sends a prepared request and parses the JSON body.
pub(crate) async fn send_for_document(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<ApiResult, ApiError> {
    let response = request
        .send()
        .await
        .map_err(|e| ApiError::transport(url, e))?;

    let status = response.status();
    if !status.is_success() {
        debug!(status = status.as_u16(), "API call failed with HTTP status");
        return Err(ApiError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| ApiError::transport(url, e))?;
    ApiResult::parse(&body).map_err(|e| ApiError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

fn split_cookie_header(header: &str) -> impl Iterator<Item = &str> {
    header
        .split(';')
        .map(str::trim)
        .filter(|pair| pair.contains('='))
}

/// Builder for one API action.
pub struct ApiRequest<'a> {
    transport: &'a dyn ApiTransport,
    params: Params,
}

impl fmt::Debug for ApiRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted: BTreeMap<&str, &str> = self
            .params
            .iter()
            .map(|(key, value)| {
                if SECRET_PARAMS.contains(&key.as_str()) {
                    (key.as_str(), "[REDACTED]")
                } else {
                    (key.as_str(), value.as_str())
                }
            })
            .collect();
        f.debug_struct("ApiRequest")
            .field("endpoint", &self.transport.endpoint())
            .field("params", &redacted)
            .finish()
    }
}

impl<'a> ApiRequest<'a> {
    /// Starts a request for `action` on any transport.
    #[must_use]
    pub fn new(transport: &'a dyn ApiTransport, action: &str) -> Self {
        let mut params = Params::new();
        params.insert("action".to_string(), action.to_string());
        Self { transport, params }
    }

    /// Sets a parameter, replacing any previous value.
    #[must_use]
    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Sets a parameter only when `value` is present and non-empty.
    #[must_use]
    pub fn param_opt(self, key: &str, value: Option<&str>) -> Self {
        match value.filter(|value| !value.is_empty()) {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    /// Merges `extra` verbatim, replacing clashing keys.
    #[must_use]
    pub fn params<'p>(mut self, extra: impl IntoIterator<Item = (&'p String, &'p String)>) -> Self {
        for (key, value) in extra {
            self.params.insert(key.clone(), value.clone());
        }
        self
    }

    /// Returns the parameters built so far.
    #[must_use]
    pub fn as_params(&self) -> &Params {
        &self.params
    }

    /// Sends the request as GET.
    ///
    /// # Errors
    ///
    /// Propagates [`ApiError`] from the transport.
    pub async fn get(self) -> Result<ApiResult, ApiError> {
        debug!(request = ?self, "GET");
        self.transport.execute(HttpMethod::Get, &self.params).await
    }

    /// Sends the request as POST.
    ///
    /// # Errors
    ///
    /// Propagates [`ApiError`] from the transport.
    pub async fn post(self) -> Result<ApiResult, ApiError> {
        debug!(request = ?self, "POST");
        self.transport.execute(HttpMethod::Post, &self.params).await
    }
}
