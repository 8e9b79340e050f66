//! Wikidata Query Service client for subclass-of (`P279`) expansion.

use std::sync::Arc;

use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, HeaderValue};
use tracing::{debug, instrument};
use url::Url;

use crate::api::{ApiError, ApiResult, build_api_http_client, send_for_document};
use crate::config::ClientConfig;

use super::DepictedItem;

const BINDINGS_PATH: &str = "/results/bindings";
const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// Direction of a subclass-of lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassRelation {
    /// Classes the entity is a subclass of.
    Parent,
    /// Classes that are subclasses of the entity.
    Child,
}

impl ClassRelation {
    fn triple(self, entity_id: &str) -> String {
        match self {
            Self::Parent => format!("wd:{entity_id} wdt:P279 ?item ."),
            Self::Child => format!("?item wdt:P279 wd:{entity_id} ."),
        }
    }
}

/// Builds the query for `relation` of an already-validated entity id.
pub(crate) fn class_query(entity_id: &str, relation: ClassRelation, language: &str) -> String {
    format!(
        "SELECT ?item ?itemLabel ?itemDescription WHERE {{\n  {}\n  SERVICE wikibase:label {{ bd:serviceParam wikibase:language \"{language},en\". }}\n}}",
        relation.triple(entity_id)
    )
}

/// Sends SPARQL queries to one endpoint.
#[derive(Debug, Clone)]
pub struct SparqlClient {
    client: Client,
    endpoint: Url,
}

impl SparqlClient {
    /// Creates a client for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] when `config` fails validation,
    /// [`ApiError::InvalidInput`] for an unparseable endpoint and
    /// [`ApiError::Client`] when the HTTP client cannot be built.
    pub fn new(endpoint: &str, config: &ClientConfig) -> Result<Self, ApiError> {
        config.validate()?;
        let endpoint_url = Url::parse(endpoint)
            .map_err(|e| ApiError::invalid_input(endpoint, &format!("invalid endpoint URL: {e}")))?;
        let client = build_api_http_client(endpoint, config, Arc::new(Jar::default()))?;
        Ok(Self {
            client,
            endpoint: endpoint_url,
        })
    }

    /// Runs `query` and returns the raw JSON results document.
    ///
    /// # Errors
    ///
    /// Propagates transport, status and decode failures.
    #[instrument(level = "debug", skip(self, query), fields(endpoint = %self.endpoint))]
    pub async fn select(&self, query: &str) -> Result<ApiResult, ApiError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("format", "json");
        let request = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static(SPARQL_RESULTS_JSON));
        send_for_document(request, self.endpoint.as_str()).await
    }

    /// Runs a subclass-of query and maps the bindings to items.
    ///
    /// # Errors
    ///
    /// See [`select`](Self::select).
    pub async fn related_classes(
        &self,
        entity_id: &str,
        relation: ClassRelation,
    ) -> Result<Vec<DepictedItem>, ApiError> {
        let result = self
            .select(&class_query(entity_id, relation, "en"))
            .await?;
        let items = items_from_bindings(&result);
        debug!(entity_id, ?relation, count = items.len(), "Resolved related classes");
        Ok(items)
    }
}

/// Maps `item`/`itemLabel`/`itemDescription` bindings to items, skipping rows
/// without an entity.
pub(crate) fn items_from_bindings(result: &ApiResult) -> Vec<DepictedItem> {
    result
        .get_nodes(BINDINGS_PATH)
        .iter()
        .filter_map(|binding| {
            let uri = binding.get_string("item/value");
            let entity_id = uri.rsplit('/').next().unwrap_or_default();
            if entity_id.is_empty() {
                return None;
            }
            Some(DepictedItem::new(
                binding.get_string("itemLabel/value"),
                binding.get_string("itemDescription/value"),
                entity_id,
            ))
        })
        .collect()
}
