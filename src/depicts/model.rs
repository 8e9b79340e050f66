//! Domain objects returned by the depiction client.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

/// MediaWiki's short ISO-8601 timestamp (`2019-04-01T12:00:00Z`).
const MW_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A Wikidata entity that a file can depict.
///
/// Two items are equal when their entity ids are equal; label, description,
/// thumbnail and selection state are ignored.
#[derive(Debug, Clone)]
pub struct DepictedItem {
    /// Display label.
    pub label: String,
    /// Short description, possibly empty.
    pub description: String,
    /// Thumbnail URL once resolved.
    pub image_url: Option<String>,
    /// Selection flag owned by the caller.
    pub is_selected: bool,
    /// Entity id, e.g. `Q146`.
    pub entity_id: String,
}

impl DepictedItem {
    /// Creates an unselected item without a thumbnail.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        description: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
            image_url: None,
            is_selected: false,
            entity_id: entity_id.into(),
        }
    }
}

impl PartialEq for DepictedItem {
    fn eq(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id
    }
}

impl Eq for DepictedItem {}

impl Hash for DepictedItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity_id.hash(state);
    }
}

/// A file on Commons as returned by search.
#[derive(Debug, Clone, PartialEq)]
pub struct Media {
    title: String,
    url: String,
    metadata: HashMap<String, String>,
    date_created: Option<DateTime<Utc>>,
    date_uploaded: Option<DateTime<Utc>>,
}

impl Media {
    /// Creates a media record.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        metadata: HashMap<String, String>,
        date_created: Option<DateTime<Utc>>,
        date_uploaded: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            metadata,
            date_created,
            date_uploaded,
        }
    }

    /// Page title, including the `File:` namespace.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Thumbnail URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Extra fields reported by the server for this hit.
    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    #[must_use]
    pub fn date_created(&self) -> Option<DateTime<Utc>> {
        self.date_created
    }

    #[must_use]
    pub fn date_uploaded(&self) -> Option<DateTime<Utc>> {
        self.date_uploaded
    }
}

/// Parses a MediaWiki timestamp; logs and returns `None` when malformed.
pub(crate) fn parse_mw_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    match NaiveDateTime::parse_from_str(raw, MW_TIMESTAMP_FORMAT) {
        Ok(naive) => Some(naive.and_utc()),
        Err(error) => {
            warn!(raw, %error, "Unparseable timestamp");
            None
        }
    }
}
