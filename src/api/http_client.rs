//! HTTP client construction policy for API transports.
//!
//! Every transport built by this crate shares timeout, user-agent,
//! compression and cookie-jar settings from [`ClientConfig`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use reqwest::cookie::Jar;
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::warn;

use crate::config::ClientConfig;
use crate::user_agent;

use super::ApiError;

/// Builds an API HTTP client that stores cookies in `cookie_jar`.
///
/// `endpoint` is used only for logging.
///
/// # Errors
///
/// Returns [`ApiError::Client`] when client construction fails.
pub(crate) fn build_api_http_client(
    endpoint: &str,
    config: &ClientConfig,
    cookie_jar: Arc<Jar>,
) -> Result<Client, ApiError> {
    match try_build_client(config, Arc::clone(&cookie_jar), false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            // Sandboxed environments can panic while reading system proxy
            // settings; retry with environment proxies only.
            warn!(
                endpoint,
                "API client hit system proxy panic; using env-proxy fallback builder"
            );
            match try_build_client(config, cookie_jar, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Panic) => Err(ApiError::Client(
                    "client construction panicked while reading proxy settings".to_string(),
                )),
                Err(BuildClientFailure::Build(error)) => Err(ApiError::Client(error.to_string())),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(ApiError::Client(error.to_string())),
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

fn try_build_client(
    config: &ClientConfig,
    cookie_jar: Arc<Jar>,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = base_builder(config, cookie_jar);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn base_builder(config: &ClientConfig, cookie_jar: Arc<Jar>) -> ClientBuilder {
    let user_agent = config
        .user_agent
        .clone()
        .unwrap_or_else(user_agent::default_api_user_agent);
    Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.read_timeout())
        .user_agent(user_agent)
        .gzip(true)
        .cookie_provider(cookie_jar)
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"])
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"])
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
