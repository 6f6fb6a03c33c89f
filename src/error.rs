//! Error types for the cache engine.

use thiserror::Error;

/// Errors surfaced by [`ResourceCache`](crate::cache::ResourceCache) operations.
///
/// None of these are fatal to the cache: a failed operation leaves the cache
/// state untouched and the caller decides whether to log, skip or abort.
#[derive(Error, Debug)]
pub enum CacheError {
  /// `add_or_update` received resource data without an identifier.
  #[error("can't add {resource_type} data without id")]
  MissingIdentifier { resource_type: String },

  /// The cache state could not be encoded into its persisted form.
  #[error("failed to encode {resource_type} cache: {source}")]
  Encode {
    resource_type: String,
    #[source]
    source: serde_json::Error,
  },

  /// A persisted snapshot could not be decoded.
  #[error("malformed {resource_type} cache snapshot: {source}")]
  Decode {
    resource_type: String,
    #[source]
    source: serde_json::Error,
  },
}
