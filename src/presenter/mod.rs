//! Presenter for the parent/child class listing of a depicted item.
//!
//! The presenter starts lookups through a [`TaskScope`] and applies results
//! on the callback context. While no view is attached it talks to
//! [`DetachedView`], whose notifications do nothing. View notifications may
//! fail; those failures are logged and never reach the caller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, instrument, warn};

use crate::api::ApiError;
use crate::depicts::{ClassListing, DepictedItem, DepictsClient, ListingUpdate};
use crate::dispatch::{CallbackHandle, IoDispatcher, TaskScope};

/// What the class listing screen can be told.
///
/// Every method defaults to doing nothing.
pub trait SubDepictionView: Send {
    /// New items were loaded.
    fn on_success(&mut self, _items: &[DepictedItem]) -> anyhow::Result<()> {
        Ok(())
    }

    /// A thumbnail was resolved for the item at `position`.
    fn on_image_url_fetched(&mut self, _url: &str, _position: usize) -> anyhow::Result<()> {
        Ok(())
    }

    /// Show the "nothing here / something went wrong" state.
    fn init_error_view(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Show a transient error notice.
    fn show_snackbar(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Mark whether the listing is complete.
    fn set_is_last_page(&mut self, _is_last: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Stand-in used while no view is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedView;

impl SubDepictionView for DetachedView {}

struct PresenterState {
    view: Box<dyn SubDepictionView>,
    listing: ClassListing,
}

impl PresenterState {
    fn apply_batch(&mut self, items: Vec<DepictedItem>) {
        match self.listing.record(items) {
            ListingUpdate::Appended(items) => {
                notify("on_success", self.view.on_success(&items));
            }
            ListingUpdate::LastPage => {
                notify("set_is_last_page", self.view.set_is_last_page(true));
            }
            ListingUpdate::NoResults => {
                notify("init_error_view", self.view.init_error_view());
            }
        }
    }

    fn apply_error(&mut self, failure: &ApiError) {
        error!(error = %failure, "Error occurred while loading queried depictions");
        notify("init_error_view", self.view.init_error_view());
        notify("show_snackbar", self.view.show_snackbar());
    }
}

fn notify(what: &'static str, outcome: anyhow::Result<()>) {
    if let Err(failure) = outcome {
        warn!(notification = what, error = %failure, "View notification failed");
    }
}

/// Loads parent or child classes of an entity into a view.
pub struct SubDepictionPresenter {
    client: Arc<DepictsClient>,
    scope: TaskScope,
    state: Arc<Mutex<PresenterState>>,
}

impl std::fmt::Debug for SubDepictionPresenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubDepictionPresenter")
            .field("client", &self.client)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl SubDepictionPresenter {
    /// Creates a detached presenter whose work runs on `dispatcher` and whose
    /// results are applied on the context behind `callbacks`.
    #[must_use]
    pub fn new(
        client: Arc<DepictsClient>,
        dispatcher: Arc<IoDispatcher>,
        callbacks: CallbackHandle,
    ) -> Self {
        Self {
            client,
            scope: TaskScope::new(dispatcher, callbacks),
            state: Arc::new(Mutex::new(PresenterState {
                view: Box::new(DetachedView),
                listing: ClassListing::new(),
            })),
        }
    }

    /// Routes notifications to `view`.
    pub fn attach(&self, view: Box<dyn SubDepictionView>) {
        lock(&self.state).view = view;
    }

    /// Routes notifications back to [`DetachedView`]. In-flight work keeps
    /// running; its results are dropped on the floor.
    pub fn detach(&self) {
        lock(&self.state).view = Box::new(DetachedView);
    }

    /// Starts loading the parent (`is_parent`) or child classes of `qid`.
    #[instrument(skip(self))]
    pub fn init_sub_depiction_list(&self, qid: &str, is_parent: bool) {
        let client = Arc::clone(&self.client);
        let state = Arc::clone(&self.state);
        let qid = qid.to_string();
        self.scope.spawn(
            async move {
                if is_parent {
                    client.get_parent_qids(&qid).await
                } else {
                    client.get_child_qids(&qid).await
                }
            },
            move |result| {
                let mut state = lock(&state);
                match result {
                    Ok(items) => state.apply_batch(items),
                    Err(failure) => state.apply_error(&failure),
                }
            },
        );
    }

    /// Resolves the thumbnail for `entity_id` and reports it for `position`.
    #[instrument(skip(self))]
    pub fn fetch_thumbnail_for_entity(&self, entity_id: &str, position: usize) {
        let client = Arc::clone(&self.client);
        let state = Arc::clone(&self.state);
        let entity_id = entity_id.to_string();
        self.scope.spawn(
            async move { client.get_p18_for_item(&entity_id).await },
            move |result| match result {
                Ok(Some(url)) => {
                    notify(
                        "on_image_url_fetched",
                        lock(&state).view.on_image_url_fetched(&url, position),
                    );
                }
                Ok(None) => debug!(position, "Entity has no image"),
                Err(failure) => warn!(position, error = %failure, "Thumbnail lookup failed"),
            },
        );
    }

    /// Applies a loaded batch: appends it, or signals last page / no results.
    pub fn handle_success(&self, items: Vec<DepictedItem>) {
        lock(&self.state).apply_batch(items);
    }

    /// Shows the error state. Notification failures are swallowed.
    pub fn handle_error(&self, failure: &ApiError) {
        lock(&self.state).apply_error(failure);
    }

    /// Items loaded so far.
    #[must_use]
    pub fn loaded_items(&self) -> Vec<DepictedItem> {
        lock(&self.state).listing.items().to_vec()
    }

    /// Cancels outstanding lookups and forgets loaded items.
    pub fn reset(&self) {
        self.scope.cancel_all();
        lock(&self.state).listing.clear();
    }
}

fn lock(state: &Mutex<PresenterState>) -> MutexGuard<'_, PresenterState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
