//! Commons MediaWiki API Client Library
//!
//! This library is the API core of a Wikimedia Commons client: it logs users
//! in (including two-factor continuation), builds and sends MediaWiki API
//! requests, pages through list queries with continuation tokens, and turns
//! responses into depiction and media objects with locally derived
//! thumbnail URLs.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`api`] - Request builder, HTTP transport and path-addressed results
//! - [`auth`] - `clientlogin` flow and session persistence
//! - [`commons`] - Revisions, upload log, block status, wikitext rendering
//! - [`config`] - Endpoints, timeouts and pool size
//! - [`depicts`] - Depiction search, depicted images, class hierarchy
//! - [`dispatch`] - Bounded I/O pool, callback context, cancellation scopes
//! - [`hash`] - MD5-sharded thumbnail URLs
//! - [`pagination`] - Continuation-token paging per query key
//! - [`presenter`] - Class listing presenter and its view contract
//! - [`session`] - Session store contract and implementations

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod auth;
pub mod commons;
pub mod config;
pub mod depicts;
pub mod dispatch;
pub mod hash;
pub mod pagination;
pub mod presenter;
pub mod session;
mod user_agent;

// Re-export commonly used types
pub use api::{ApiError, ApiRequest, ApiResult, ApiTransport, MwApi};
pub use auth::{AuthController, AuthState, AuthStatus};
pub use commons::{CommonsClient, LogEvent, LogEventPage, MediaResult};
pub use config::{ClientConfig, ConfigError};
pub use depicts::{ClassListing, DepictedItem, DepictsClient, ListingUpdate, Media};
pub use dispatch::{CallbackContext, IoDispatcher, TaskScope};
pub use hash::ContentHasher;
pub use pagination::{ContinuationState, ContinuationToken, ListQuery, PageOutcome, PaginatedQuery};
pub use session::{FileSessionStore, MemorySessionStore, SessionState, SessionStore};
