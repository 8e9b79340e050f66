//! Account and content queries against the Commons API.
//!
//! Upload history (`list=logevents`) is paginated through
//! [`PaginatedQuery`] under the key `logevents:<user>`. The block check
//! never fails: any error is logged and reported as "not blocked".

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::api::{ApiError, ApiRequest, ApiResult, ApiTransport, MwApi};
use crate::config::ClientConfig;
use crate::depicts::parse_mw_timestamp;
use crate::pagination::{ContinuationState, ContinuationToken, ListQuery, PageOutcome, PaginatedQuery};

const REVISION_CONTENT_PATH: &str = "/query/pages/revisions/slots/main/content";
const REVISION_PARSE_TREE_PATH: &str = "/query/pages/revisions/parsetree";
const LOG_EVENTS_PATH: &str = "/query/logevents";
const BLOCK_EXPIRY_PATH: &str = "/query/userinfo/@blockexpiry";
const PARSED_CONTENT_PATH: &str = "/flow-parsoid-utils/@content";

/// Expiry value of a permanent block.
const INFINITE_EXPIRY: &str = "infinite";

/// Latest revision of a file page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaResult {
    /// Page wikitext.
    pub wikitext: String,
    /// Preprocessor XML parse tree, when the server provides one.
    pub parse_tree: String,
}

/// One upload by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub page_id: String,
    pub title: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A page of upload events and the cursor for the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEventPage {
    pub events: Vec<LogEvent>,
    /// `None` once the user's history is exhausted.
    pub next: Option<ContinuationToken>,
}

impl LogEventPage {
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

/// Commons account and page-content queries.
pub struct CommonsClient {
    api: Arc<dyn ApiTransport>,
    pager: PaginatedQuery,
}

impl std::fmt::Debug for CommonsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommonsClient")
            .field("endpoint", &self.api.endpoint())
            .finish_non_exhaustive()
    }
}

impl CommonsClient {
    /// Builds a client for `config.commons_api_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] when `config` fails validation, and
    /// [`ApiError`] when the transport cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        Ok(Self::from_transport(Arc::new(MwApi::new(
            &config.commons_api_url,
            config,
        )?)))
    }

    /// Wraps an existing transport, e.g. the one shared with the auth controller.
    #[must_use]
    pub fn from_transport(api: Arc<dyn ApiTransport>) -> Self {
        Self {
            pager: PaginatedQuery::new(Arc::clone(&api)),
            api,
        }
    }

    /// Fetches the latest revision's wikitext and parse tree for `title`.
    ///
    /// # Errors
    ///
    /// Propagates [`ApiError`] from the transport.
    #[instrument(skip(self))]
    pub async fn fetch_media_by_filename(&self, title: &str) -> Result<MediaResult, ApiError> {
        let result = self
            .revision_request(title, "content")
            .param("rvlimit", 1)
            .param("rvgeneratexml", 1)
            .get()
            .await?;
        Ok(MediaResult {
            wikitext: result.get_string(REVISION_CONTENT_PATH),
            parse_tree: result.get_string(REVISION_PARSE_TREE_PATH),
        })
    }

    /// Returns the latest wikitext of `title`, or `None` for a missing page.
    ///
    /// # Errors
    ///
    /// Propagates [`ApiError`] from the transport.
    #[instrument(skip(self))]
    pub async fn revisions_by_filename(&self, title: &str) -> Result<Option<String>, ApiError> {
        let content = self
            .revision_request(title, "timestamp|content")
            .get()
            .await?
            .get_string(REVISION_CONTENT_PATH);
        Ok(Some(content).filter(|content| !content.is_empty()))
    }

    /// Returns one page of `user`'s uploads, newest first.
    ///
    /// `last_modified` bounds the listing to events newer than that timestamp.
    /// Without `continuation` the stored cursor for this user is used.
    ///
    /// # Errors
    ///
    /// Propagates [`ApiError`] from the transport.
    #[instrument(skip(self, continuation))]
    pub async fn log_events(
        &self,
        user: &str,
        last_modified: Option<&str>,
        continuation: Option<&ContinuationToken>,
        limit: u32,
    ) -> Result<LogEventPage, ApiError> {
        let key = log_events_key(user);
        let query = ListQuery::new(LOG_EVENTS_PATH)
            .param("list", "logevents")
            .param("letype", "upload")
            .param("leprop", "title|timestamp|ids")
            .param("leuser", user)
            .param("lelimit", limit)
            .param_opt("leend", last_modified);

        let outcome = self
            .pager
            .fetch_page_with(&key, &query, continuation, |event| Some(log_event(&event)))
            .await?;
        let page = match outcome {
            PageOutcome::Page(page) => LogEventPage {
                events: page.items,
                next: page.next,
            },
            PageOutcome::EmptyButMore => LogEventPage {
                events: Vec::new(),
                next: match self.pager.state(&key) {
                    ContinuationState::More(token) => Some(token),
                    ContinuationState::NotStarted | ContinuationState::Exhausted => {
                        continuation.cloned()
                    }
                },
            },
            PageOutcome::NoMore => LogEventPage::default(),
        };
        debug!(events = page.events.len(), last = page.is_last(), "Fetched upload log page");
        Ok(page)
    }

    /// Forgets the stored upload-log cursor for `user`.
    pub fn reset_log_events(&self, user: &str) {
        self.pager.reset(&log_events_key(user));
    }

    /// Whether the current session's user is blocked on Commons.
    ///
    /// A permanent block or an expiry in the future means blocked. Failures
    /// are logged and yield `false`.
    #[instrument(skip(self))]
    pub async fn is_user_blocked(&self) -> bool {
        let result = ApiRequest::new(self.api.as_ref(), "query")
            .param("meta", "userinfo")
            .param("uiprop", "blockinfo")
            .get()
            .await;
        match result {
            Ok(result) => is_blocked_at(&result.get_string(BLOCK_EXPIRY_PATH), Utc::now()),
            Err(error) => {
                warn!(%error, "Block check failed; assuming not blocked");
                false
            }
        }
    }

    /// Renders wikitext to HTML.
    ///
    /// # Errors
    ///
    /// Propagates [`ApiError`] from the transport.
    #[instrument(skip(self, source), fields(len = source.len()))]
    pub async fn parse_wikicode(&self, source: &str) -> Result<String, ApiError> {
        Ok(ApiRequest::new(self.api.as_ref(), "flow-parsoid-utils")
            .param("from", "wikitext")
            .param("to", "html")
            .param("content", source)
            .param("title", "Main_page")
            .post()
            .await?
            .get_string(PARSED_CONTENT_PATH))
    }

    fn revision_request(&self, title: &str, rvprop: &str) -> ApiRequest<'_> {
        ApiRequest::new(self.api.as_ref(), "query")
            .param("prop", "revisions")
            .param("titles", title)
            .param("rvprop", rvprop)
            .param("rvslots", "main")
    }
}

fn log_events_key(user: &str) -> String {
    format!("logevents:{user}")
}

fn log_event(node: &ApiResult) -> LogEvent {
    LogEvent {
        page_id: node.get_string("@pageid"),
        title: node.get_string("@title"),
        timestamp: parse_mw_timestamp(&node.get_string("@timestamp")),
    }
}

fn is_blocked_at(expiry: &str, now: DateTime<Utc>) -> bool {
    if expiry.is_empty() {
        return false;
    }
    if expiry == INFINITE_EXPIRY {
        return true;
    }
    match parse_mw_timestamp(expiry) {
        Some(end) => end > now,
        None => false,
    }
}
