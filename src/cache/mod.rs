//! Client-side cache of JSON:API resources.
//!
//! This module provides:
//! - [`ResourceCache`]: the canonical set of live records of one type, with
//!   soft-deletion, listing ids and snapshot round-trips
//! - [`CacheRegistry`]: one cache per resource type
//! - [`CacheStorage`]: local persistence of cache snapshots (SQLite)
//! - [`SyncLayer`]: a cache-first synchronization strategy with offline fallback

mod engine;
mod envelope;
mod layer;
mod registry;
mod storage;
mod traits;

pub use engine::{IndexEntry, IndexParams, ResourceCache};
pub use envelope::Envelope;
pub use layer::SyncLayer;
pub use registry::CacheRegistry;
pub use storage::{CacheStorage, CachedSnapshot, NoopStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource};
