//! Lookup of caches by resource type.

use std::collections::HashMap;
use tracing::debug;

use super::engine::ResourceCache;
use crate::schema::Schema;

/// One [`ResourceCache`] per resource type, created once and reused.
#[derive(Debug, Default)]
pub struct CacheRegistry {
  caches: HashMap<String, ResourceCache>,
}

impl CacheRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Cache for `schema`'s type, creating it on first registration.
  ///
  /// Registering a type again returns the existing cache untouched.
  pub fn register(&mut self, schema: Schema) -> &mut ResourceCache {
    let resource_type = schema.resource_type.clone();
    self.caches.entry(resource_type).or_insert_with(|| {
      debug!(resource_type = %schema.resource_type, "Registering cache");
      ResourceCache::new(schema)
    })
  }

  pub fn get(&self, resource_type: &str) -> Option<&ResourceCache> {
    self.caches.get(resource_type)
  }

  pub fn get_mut(&mut self, resource_type: &str) -> Option<&mut ResourceCache> {
    self.caches.get_mut(resource_type)
  }

  /// Registered resource types, sorted.
  pub fn types(&self) -> Vec<&str> {
    let mut types: Vec<&str> = self.caches.keys().map(String::as_str).collect();
    types.sort_unstable();
    types
  }

  /// Reset every cache.
  pub fn clear_all(&mut self) {
    for cache in self.caches.values_mut() {
      cache.clear();
    }
  }
}
