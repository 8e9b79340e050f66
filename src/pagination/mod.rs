//! Continuation-token pagination for list-style API queries.
//!
//! MediaWiki list queries return a `continue` object when more results exist.
//! Its members must be sent back verbatim to get the next page. This module
//! tracks that token per logical query key inside one client instance and makes
//! the three outcomes explicit:
//!
//! - [`PageOutcome::Page`] - the result collection was present. `next` is the
//!   cursor for the following page, `None` on the last page.
//! - [`PageOutcome::EmptyButMore`] - the response had no result collection.
//!   The stored cursor is kept so the caller can retry the same page.
//! - [`PageOutcome::NoMore`] - the key was already exhausted. No request is made.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use commons_mwapi::api::MwApi;
//! use commons_mwapi::config::ClientConfig;
//! use commons_mwapi::pagination::{ListQuery, PageOutcome, PaginatedQuery};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::default();
//! let pager = PaginatedQuery::new(Arc::new(MwApi::new(&config.commons_api_url, &config)?));
//! let query = ListQuery::new("/query/logevents")
//!     .param("list", "logevents")
//!     .param("leuser", "Alice");
//! while let PageOutcome::Page(page) = pager.fetch_page("logevents:Alice", &query, None).await? {
//!     println!("{} events", page.items.len());
//!     if page.next.is_none() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, instrument};

use crate::api::{ApiError, ApiRequest, ApiResult, ApiTransport, Params};

/// Path of the continuation object in a response.
const CONTINUE_PATH: &str = "/continue";

/// Opaque server cursor; round-tripped verbatim into the next request.
pub type ContinuationToken = BTreeMap<String, String>;

/// Pagination progress for one query key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ContinuationState {
    /// No page has been fetched yet.
    #[default]
    NotStarted,
    /// More pages exist; the token fetches the next one.
    More(ContinuationToken),
    /// The last page has been fetched.
    Exhausted,
}

/// A list query: its parameters and where its result collection lives.
#[derive(Debug, Clone)]
pub struct ListQuery {
    action: String,
    params: Params,
    items_path: String,
}

impl ListQuery {
    /// Creates a `query` action whose items are found at `items_path`.
    #[must_use]
    pub fn new(items_path: &str) -> Self {
        Self::with_action("query", items_path)
    }

    /// Creates a query for another action (e.g. `wbsearchentities`).
    #[must_use]
    pub fn with_action(action: &str, items_path: &str) -> Self {
        Self {
            action: action.to_string(),
            params: Params::new(),
            items_path: items_path.to_string(),
        }
    }

    /// Sets a parameter.
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

    /// Parameters set so far, without `action`.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Path of the result collection.
    #[must_use]
    pub fn items_path(&self) -> &str {
        &self.items_path
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items in server order.
    pub items: Vec<T>,
    /// Cursor for the next page; `None` when this was the last page.
    pub next: Option<ContinuationToken>,
}

impl<T> Page<T> {
    /// Returns true when no further page exists.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

/// Result of a single page fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome<T> {
    /// The result collection was present.
    Page(Page<T>),
    /// No result collection in the response; the stored cursor was kept.
    EmptyButMore,
    /// The query was already exhausted; nothing was requested.
    NoMore,
}

impl<T> PageOutcome<T> {
    /// Maps page items, dropping those `f` rejects.
    pub fn filter_map<U>(self, f: impl FnMut(T) -> Option<U>) -> PageOutcome<U> {
        match self {
            Self::Page(page) => PageOutcome::Page(Page {
                items: page.items.into_iter().filter_map(f).collect(),
                next: page.next,
            }),
            Self::EmptyButMore => PageOutcome::EmptyButMore,
            Self::NoMore => PageOutcome::NoMore,
        }
    }

    /// Items of a page, or an empty vector for the other outcomes.
    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        match self {
            Self::Page(page) => page.items,
            Self::EmptyButMore | Self::NoMore => Vec::new(),
        }
    }
}

/// Executes list queries and threads continuation tokens per query key.
///
/// The token map is scoped to this instance and guarded by a mutex. The lock
/// is never held across a request.
pub struct PaginatedQuery {
    transport: Arc<dyn ApiTransport>,
    states: Mutex<HashMap<String, ContinuationState>>,
}

impl fmt::Debug for PaginatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginatedQuery")
            .field("endpoint", &self.transport.endpoint())
            .finish_non_exhaustive()
    }
}

impl PaginatedQuery {
    /// Creates a paginator over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn ApiTransport>) -> Self {
        Self {
            transport,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the stored progress for `query_key`.
    #[must_use]
    pub fn state(&self, query_key: &str) -> ContinuationState {
        self.lock_states()
            .get(query_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Forgets progress for `query_key` so the next fetch starts from page one.
    pub fn reset(&self, query_key: &str) {
        self.lock_states().remove(query_key);
    }

    /// Fetches the next page of `query` for `query_key`.
    ///
    /// `continuation`, when given, overrides the stored token.
    ///
    /// # Errors
    ///
    /// Propagates [`ApiError`] from the transport. The stored state is
    /// untouched on error.
    #[instrument(skip(self, query, continuation), fields(endpoint = %self.transport.endpoint()))]
    pub async fn fetch_page(
        &self,
        query_key: &str,
        query: &ListQuery,
        continuation: Option<&ContinuationToken>,
    ) -> Result<PageOutcome<ApiResult>, ApiError> {
        let token = match continuation {
            Some(token) => Some(token.clone()),
            None => match self.state(query_key) {
                ContinuationState::NotStarted => None,
                ContinuationState::More(token) => Some(token),
                ContinuationState::Exhausted => {
                    debug!(query_key, "Query exhausted; not requesting");
                    return Ok(PageOutcome::NoMore);
                }
            },
        };

        let mut request = ApiRequest::new(self.transport.as_ref(), &query.action).params(&query.params);
        if let Some(token) = &token {
            request = request.params(token);
        }
        let response = request.get().await?;

        if !response.has(&query.items_path) {
            debug!(query_key, items_path = %query.items_path, "No result collection; keeping cursor");
            return Ok(PageOutcome::EmptyButMore);
        }

        let next = response
            .get_string_map(CONTINUE_PATH)
            .map(|pairs| pairs.into_iter().collect::<ContinuationToken>())
            .filter(|token| !token.is_empty());
        let items = response.get_nodes(&query.items_path);
        debug!(query_key, items = items.len(), has_next = next.is_some(), "Fetched page");

        let new_state = match &next {
            Some(token) => ContinuationState::More(token.clone()),
            None => ContinuationState::Exhausted,
        };
        self.lock_states().insert(query_key.to_string(), new_state);

        Ok(PageOutcome::Page(Page { items, next }))
    }

    /// Fetches a page and maps each item with `map`, dropping `None`s.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_page`](Self::fetch_page).
    pub async fn fetch_page_with<T>(
        &self,
        query_key: &str,
        query: &ListQuery,
        continuation: Option<&ContinuationToken>,
        map: impl FnMut(ApiResult) -> Option<T>,
    ) -> Result<PageOutcome<T>, ApiError> {
        Ok(self
            .fetch_page(query_key, query, continuation)
            .await?
            .filter_map(map))
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, HashMap<String, ContinuationState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
