//! Depiction search and media lookup across Wikidata and Commons.
//!
//! [`DepictsClient`] turns generic API results into [`DepictedItem`]s and
//! [`Media`] records. Thumbnail URLs are derived locally with the
//! [`ContentHasher`] instead of a server round trip.
//!
//! | Operation | Endpoint | Call |
//! |---|---|---|
//! | [`search_for_depictions`](DepictsClient::search_for_depictions) | Wikidata | `wbsearchentities` |
//! | [`fetch_images_for_depicted_item`](DepictsClient::fetch_images_for_depicted_item) | Commons | `list=search`, `haswbstatement:P180=<id>` |
//! | [`get_p18_for_item`](DepictsClient::get_p18_for_item) | Wikidata | `wbgetclaims`, `property=P18` |
//! | [`get_parent_qids`](DepictsClient::get_parent_qids) / [`get_child_qids`](DepictsClient::get_child_qids) | Query service | SPARQL `wdt:P279` |

mod listing;
mod model;
mod sparql;

pub use listing::{ClassListing, ListingUpdate};
pub use model::{DepictedItem, Media};
pub use sparql::{ClassRelation, SparqlClient};

pub(crate) use model::parse_mw_timestamp;

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, instrument};

use crate::api::{ApiError, ApiRequest, ApiResult, ApiTransport, MwApi};
use crate::config::ClientConfig;
use crate::hash::ContentHasher;
use crate::pagination::{ContinuationToken, ListQuery, PageOutcome, PaginatedQuery};

/// Wikidata entity id: an item (`Q…`) or property (`P…`).
#[allow(clippy::expect_used)]
static ENTITY_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[QP]\d+$").expect("entity id regex is valid")); // Static pattern, safe to panic

/// Commons `File:` namespace.
const FILE_NAMESPACE: u32 = 6;
const SEARCH_LANGUAGE: &str = "en";

const SEARCH_ENTITIES_PATH: &str = "/search";
const IMAGE_SEARCH_PATH: &str = "/query/search";
const P18_VALUE_PATH: &str = "/claims/P18/mainsnak/datavalue/value";

/// Fields of a search hit that are promoted out of [`Media::metadata`].
const PROMOTED_HIT_FIELDS: [&str; 2] = ["title", "timestamp"];

/// Rejects anything that is not a Wikidata entity id.
///
/// # Errors
///
/// Returns [`ApiError::InvalidInput`] when `entity_id` does not match `^[QP]\d+$`.
pub fn validate_entity_id(entity_id: &str) -> Result<(), ApiError> {
    if ENTITY_ID_PATTERN.is_match(entity_id) {
        Ok(())
    } else {
        Err(ApiError::invalid_input(
            entity_id,
            "expected a Wikidata entity id like Q42",
        ))
    }
}

/// Facade over the Wikidata, Commons and query-service endpoints.
pub struct DepictsClient {
    commons: Arc<dyn ApiTransport>,
    wikidata: Arc<dyn ApiTransport>,
    sparql: SparqlClient,
    hasher: ContentHasher,
    pager: PaginatedQuery,
    p18_timeout: Duration,
}

impl std::fmt::Debug for DepictsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepictsClient")
            .field("commons", &self.commons.endpoint())
            .field("wikidata", &self.wikidata.endpoint())
            .field("sparql", &self.sparql)
            .field("p18_timeout", &self.p18_timeout)
            .finish_non_exhaustive()
    }
}

impl DepictsClient {
    /// Builds HTTP transports for every endpoint in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] when `config` fails validation, and
    /// [`ApiError`] when an endpoint URL is invalid or an HTTP client cannot
    /// be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        config.validate()?;
        let commons: Arc<dyn ApiTransport> = Arc::new(MwApi::new(&config.commons_api_url, config)?);
        let wikidata: Arc<dyn ApiTransport> =
            Arc::new(MwApi::new(&config.wikidata_api_url, config)?);
        let sparql = SparqlClient::new(&config.sparql_url, config)?;
        Ok(Self::from_parts(commons, wikidata, sparql, config))
    }

    /// Assembles a client from existing transports.
    #[must_use]
    pub fn from_parts(
        commons: Arc<dyn ApiTransport>,
        wikidata: Arc<dyn ApiTransport>,
        sparql: SparqlClient,
        config: &ClientConfig,
    ) -> Self {
        Self {
            pager: PaginatedQuery::new(Arc::clone(&commons)),
            commons,
            wikidata,
            sparql,
            hasher: ContentHasher::new(config.thumbnail_base_url.clone()),
            p18_timeout: config.thumbnail_timeout(),
        }
    }

    /// Searches Wikidata for items matching `query`, in server order.
    ///
    /// # Errors
    ///
    /// Propagates [`ApiError`] from the Wikidata transport.
    #[instrument(skip(self))]
    pub async fn search_for_depictions(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<DepictedItem>, ApiError> {
        let result = ApiRequest::new(self.wikidata.as_ref(), "wbsearchentities")
            .param("search", query)
            .param("language", SEARCH_LANGUAGE)
            .param("uselang", SEARCH_LANGUAGE)
            .param("type", "item")
            .param("limit", limit)
            .get()
            .await?;
        let items: Vec<DepictedItem> = result
            .get_nodes(SEARCH_ENTITIES_PATH)
            .iter()
            .map(|hit| {
                DepictedItem::new(
                    hit.get_string("@label"),
                    hit.get_string("@description"),
                    hit.get_string("@id"),
                )
            })
            .collect();
        debug!(count = items.len(), "Depiction search finished");
        Ok(items)
    }

    /// Returns files whose structured data depicts `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidInput`] for a malformed id, otherwise
    /// propagates transport failures.
    #[instrument(skip(self))]
    pub async fn fetch_images_for_depicted_item(
        &self,
        entity_id: &str,
        limit: u32,
    ) -> Result<Vec<Media>, ApiError> {
        validate_entity_id(entity_id)?;
        let query = depicted_images_query(entity_id, limit);
        let result = ApiRequest::new(self.commons.as_ref(), "query")
            .params(query.params())
            .get()
            .await?;
        let media: Vec<Media> = result
            .get_nodes(IMAGE_SEARCH_PATH)
            .into_iter()
            .filter_map(|hit| self.media_from_hit(&hit))
            .collect();
        debug!(count = media.len(), "Depicted image search finished");
        Ok(media)
    }

    /// Paginated form of [`fetch_images_for_depicted_item`](Self::fetch_images_for_depicted_item).
    ///
    /// Progress is tracked under `depictedImages:<entity_id>`.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_images_for_depicted_item`](Self::fetch_images_for_depicted_item).
    #[instrument(skip(self, continuation))]
    pub async fn fetch_images_for_depicted_item_page(
        &self,
        entity_id: &str,
        limit: u32,
        continuation: Option<&ContinuationToken>,
    ) -> Result<PageOutcome<Media>, ApiError> {
        validate_entity_id(entity_id)?;
        let query = depicted_images_query(entity_id, limit);
        self.pager
            .fetch_page_with(
                &depicted_images_key(entity_id),
                &query,
                continuation,
                |hit| self.media_from_hit(&hit),
            )
            .await
    }

    /// Restarts pagination for [`fetch_images_for_depicted_item_page`](Self::fetch_images_for_depicted_item_page).
    pub fn reset_depicted_images(&self, entity_id: &str) {
        self.pager.reset(&depicted_images_key(entity_id));
    }

    /// Resolves the item's image (`P18`) to a thumbnail URL.
    ///
    /// Returns `Ok(None)` when the item has no image.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Timeout`] when the lookup exceeds the configured
    /// thumbnail timeout, [`ApiError::InvalidInput`] for a malformed id, or
    /// the transport failure.
    #[instrument(skip(self))]
    pub async fn get_p18_for_item(&self, entity_id: &str) -> Result<Option<String>, ApiError> {
        validate_entity_id(entity_id)?;
        let lookup = ApiRequest::new(self.wikidata.as_ref(), "wbgetclaims")
            .param("entity", entity_id)
            .param("property", "P18")
            .get();
        let result = tokio::time::timeout(self.p18_timeout, lookup)
            .await
            .map_err(|_| ApiError::timeout("get_p18_for_item", self.p18_timeout))??;

        let file_name = result.get_string(P18_VALUE_PATH);
        if file_name.is_empty() {
            debug!("Item has no P18 image");
            return Ok(None);
        }
        Ok(Some(self.hasher.url_for(&file_name)))
    }

    /// Classes that `entity_id` is a subclass of.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidInput`] for a malformed id, otherwise
    /// propagates query-service failures.
    #[instrument(skip(self))]
    pub async fn get_parent_qids(&self, entity_id: &str) -> Result<Vec<DepictedItem>, ApiError> {
        validate_entity_id(entity_id)?;
        self.sparql
            .related_classes(entity_id, ClassRelation::Parent)
            .await
    }

    /// Classes that are subclasses of `entity_id`.
    ///
    /// # Errors
    ///
    /// Same as [`get_parent_qids`](Self::get_parent_qids).
    #[instrument(skip(self))]
    pub async fn get_child_qids(&self, entity_id: &str) -> Result<Vec<DepictedItem>, ApiError> {
        validate_entity_id(entity_id)?;
        self.sparql
            .related_classes(entity_id, ClassRelation::Child)
            .await
    }

    /// Thumbnail URL for a file title.
    #[must_use]
    pub fn thumbnail_url(&self, title: &str) -> String {
        self.hasher.url_for(title)
    }

    fn media_from_hit(&self, hit: &ApiResult) -> Option<Media> {
        let title = hit.get_string("@title");
        if title.is_empty() {
            return None;
        }
        let timestamp = parse_mw_timestamp(&hit.get_string("@timestamp"));
        let metadata: HashMap<String, String> = hit
            .get_string_map("")
            .unwrap_or_default()
            .into_iter()
            .filter(|(key, _)| !PROMOTED_HIT_FIELDS.contains(&key.as_str()))
            .collect();
        Some(Media::new(
            title.clone(),
            self.hasher.url_for(&title),
            metadata,
            timestamp,
            timestamp,
        ))
    }
}

fn depicted_images_key(entity_id: &str) -> String {
    format!("depictedImages:{entity_id}")
}

fn depicted_images_query(entity_id: &str, limit: u32) -> ListQuery {
    ListQuery::new(IMAGE_SEARCH_PATH)
        .param("list", "search")
        .param("srsearch", format!("haswbstatement:P180={entity_id}"))
        .param("srnamespace", FILE_NAMESPACE)
        .param("srprop", "timestamp|size")
        .param("srlimit", limit)
}
