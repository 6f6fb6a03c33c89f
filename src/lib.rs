//! Client-side cache for JSON:API resources.
//!
//! Records of each resource type live in a [`cache::ResourceCache`], which
//! deduplicates them by id, hands out stable [`record::RecordHandle`]s (lazily
//! materializing placeholders), supports reversible soft-deletion and
//! round-trips its whole state through a JSON snapshot. A
//! [`cache::SyncLayer`] reconciles caches with local snapshot storage and a
//! remote [`source::RestSource`].

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod record;
pub mod schema;
pub mod source;

pub use error::CacheError;
