//! Accumulates parent/child class batches and tells "last page" from "no results".

use super::DepictedItem;

/// What a new batch means for the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingUpdate {
    /// The batch was non-empty and was appended.
    Appended(Vec<DepictedItem>),
    /// Empty batch after earlier results: the list is complete.
    LastPage,
    /// Empty batch and nothing loaded before.
    NoResults,
}

/// Items loaded so far for one class listing.
#[derive(Debug, Clone, Default)]
pub struct ClassListing {
    loaded: Vec<DepictedItem>,
}

impl ClassListing {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `batch` into the listing.
    pub fn record(&mut self, batch: Vec<DepictedItem>) -> ListingUpdate {
        if !batch.is_empty() {
            self.loaded.extend(batch.iter().cloned());
            return ListingUpdate::Appended(batch);
        }
        if self.loaded.is_empty() {
            ListingUpdate::NoResults
        } else {
            ListingUpdate::LastPage
        }
    }

    /// Everything loaded so far, in arrival order.
    #[must_use]
    pub fn items(&self) -> &[DepictedItem] {
        &self.loaded
    }

    #[must_use]
    pub fn has_loaded_any(&self) -> bool {
        !self.loaded.is_empty()
    }

    /// Forgets loaded items, e.g. when switching to another entity.
    pub fn clear(&mut self) {
        self.loaded.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> DepictedItem {
        DepictedItem::new(id, "", id)
    }

    #[test]
    fn test_empty_first_batch_is_no_results() {
        let mut listing = ClassListing::new();
        assert_eq!(listing.record(Vec::new()), ListingUpdate::NoResults);
        assert!(!listing.has_loaded_any());
    }

    #[test]
    fn test_empty_batch_after_items_is_last_page() {
        let mut listing = ClassListing::new();
        let batch = vec![item("Q1"), item("Q2")];
        assert_eq!(
            listing.record(batch.clone()),
            ListingUpdate::Appended(batch)
        );
        assert_eq!(listing.record(Vec::new()), ListingUpdate::LastPage);
        assert_eq!(listing.items().len(), 2);
    }

    #[test]
    fn test_clear_resets_history() {
        let mut listing = ClassListing::new();
        listing.record(vec![item("Q1")]);
        listing.clear();
        assert_eq!(listing.record(Vec::new()), ListingUpdate::NoResults);
    }
}
