//! Shared User-Agent string for MediaWiki, Wikidata and query-service traffic.
//!
//! Wikimedia's User-Agent policy requires a descriptive agent with contact
//! information, so every client built by this crate sends the same one.

/// Project URL for User-Agent identification (Wikimedia User-Agent policy).
const PROJECT_UA_URL: &str = "https://github.com/commons-app/commons-mwapi";

/// Default User-Agent for all API requests.
#[must_use]
pub(crate) fn default_api_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("commons-mwapi/{version} (commons-client; +{PROJECT_UA_URL})")
}
