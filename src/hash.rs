//! Content-derived thumbnail paths for Commons files.
//!
//! Commons shards its upload store by the MD5 of the normalised file name:
//! `Foo_Bar.jpg` lives under `<h0>/<h0h1>/` where `h0h1` are the first two hex
//! digits of the digest. Thumbnails add the file name again as a directory
//! and prefix the rendered width.

use md5::{Digest, Md5};

use crate::config::DEFAULT_THUMBNAIL_BASE_URL;

/// Rendered thumbnail width used by list views.
pub const THUMBNAIL_WIDTH_PX: u32 = 640;

/// Sharded location of a file in the upload store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashPath {
    /// Normalised title (namespace stripped, spaces replaced by underscores).
    pub title: String,
    /// Full 32-digit lowercase MD5 of `title`.
    pub digest: String,
}

impl HashPath {
    /// First shard directory (`h0`).
    #[must_use]
    pub fn outer_shard(&self) -> &str {
        &self.digest[..1]
    }

    /// Second shard directory (`h0h1`).
    #[must_use]
    pub fn inner_shard(&self) -> &str {
        &self.digest[..2]
    }
}

/// Normalises `title` and hashes it.
///
/// Everything up to and including the first `:` is treated as a namespace
/// prefix and removed, so `File:Foo Bar.jpg` and `Foo Bar.jpg` share a path.
#[must_use]
pub fn hash_path(title: &str) -> HashPath {
    let stripped = match title.find(':') {
        Some(index) => &title[index + 1..],
        None => title,
    };
    let normalised = stripped.replace(' ', "_");
    let digest = hex::encode(Md5::digest(normalised.as_bytes()));
    HashPath {
        title: normalised,
        digest,
    }
}

/// Derives thumbnail URLs from file titles.
#[derive(Debug, Clone)]
pub struct ContentHasher {
    base_url: String,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(DEFAULT_THUMBNAIL_BASE_URL)
    }
}

impl ContentHasher {
    /// Creates a hasher rooted at `base_url` (trailing `/` ignored).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Returns the 640px thumbnail URL for `title`.
    #[must_use]
    pub fn url_for(&self, title: &str) -> String {
        let path = hash_path(title);
        format!(
            "{}/{}/{}/{}/{}px-{}",
            self.base_url,
            path.outer_shard(),
            path.inner_shard(),
            path.title,
            THUMBNAIL_WIDTH_PX,
            path.title
        )
    }
}
