//! In-memory cache of the records of one resource type.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::envelope::Envelope;
use crate::error::CacheError;
use crate::record::{Record, RecordHandle, RecordJson, ResourceData};
use crate::schema::Schema;

/// Listing parameters.
///
/// Accepted by [`ResourceCache::index`] but not interpreted there; filtering
/// and pagination belong to whoever fetches the listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexParams {
  pub filter: BTreeMap<String, String>,
}

impl IndexParams {
  pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.filter.insert(key.into(), value.into());
    self
  }
}

/// Element of an index listing: a bare id or a record carrying one.
#[derive(Debug, Clone)]
pub enum IndexEntry {
  Id(String),
  Record(RecordHandle),
}

impl IndexEntry {
  fn into_id(self) -> String {
    match self {
      Self::Id(id) => id,
      Self::Record(handle) => handle.id(),
    }
  }
}

impl From<String> for IndexEntry {
  fn from(id: String) -> Self {
    Self::Id(id)
  }
}

impl From<&str> for IndexEntry {
  fn from(id: &str) -> Self {
    Self::Id(id.to_string())
  }
}

impl From<RecordHandle> for IndexEntry {
  fn from(handle: RecordHandle) -> Self {
    Self::Record(handle)
  }
}

/// Canonical, deduplicated set of live records for one resource type.
///
/// Besides the live records the cache keeps soft-deleted ones (tombstones)
/// so a removal can be reverted, and the ids of the most recent listing.
#[derive(Debug)]
pub struct ResourceCache {
  schema: Arc<Schema>,
  data: BTreeMap<String, RecordHandle>,
  removed: HashMap<String, RecordHandle>,
  index_ids: Vec<String>,
  updated_at: Option<DateTime<Utc>>,
}

impl ResourceCache {
  pub fn new(schema: Schema) -> Self {
    Self {
      schema: Arc::new(schema),
      data: BTreeMap::new(),
      removed: HashMap::new(),
      index_ids: Vec::new(),
      updated_at: None,
    }
  }

  pub fn schema(&self) -> &Schema {
    &self.schema
  }

  pub fn resource_type(&self) -> &str {
    &self.schema.resource_type
  }

  /// Number of live records.
  pub fn size(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// Whether `id` is live. Does not materialize a placeholder.
  pub fn contains(&self, id: &str) -> bool {
    self.data.contains_key(id)
  }

  /// Whether `id` has a tombstone.
  pub fn is_removed(&self, id: &str) -> bool {
    self.removed.contains_key(id)
  }

  /// Live ids in key order.
  pub fn ids(&self) -> impl Iterator<Item = &str> {
    self.data.keys().map(String::as_str)
  }

  pub fn index_ids(&self) -> &[String] {
    &self.index_ids
  }

  /// Time of the last full sync, maintained by the synchronization layer.
  pub fn updated_at(&self) -> Option<DateTime<Utc>> {
    self.updated_at
  }

  pub fn set_updated_at(&mut self, updated_at: Option<DateTime<Utc>>) {
    self.updated_at = updated_at;
  }

  /// Create a record from `data`, or merge `data` into the existing one.
  ///
  /// An existing record is updated in place so every handle to it observes
  /// the new values. Data without an id is rejected and nothing changes.
  ///
  /// Confirmed data for a removed id supersedes the removal: the tombstone
  /// is dropped and `revert_remove` no longer applies to it.
  pub fn add_or_update(&mut self, data: ResourceData) -> Result<RecordHandle, CacheError> {
    let id = match data.id.as_deref() {
      Some(id) if !id.is_empty() => id.to_string(),
      _ => {
        return Err(CacheError::MissingIdentifier {
          resource_type: self.schema.resource_type.clone(),
        })
      }
    };

    if self.removed.remove(&id).is_some() {
      debug!(resource_type = %self.schema.resource_type, id = %id, "Dropping tombstone for re-added record");
    }

    if let Some(handle) = self.data.get(&id) {
      handle.write().update(&self.schema, data);
      return Ok(handle.clone());
    }

    let handle = RecordHandle::new(Record::new(id.clone(), &self.schema, data, false, false));
    self.data.insert(id, handle.clone());
    Ok(handle)
  }

  /// Create an optimistic record with a freshly generated id.
  ///
  /// Any id in `data` is replaced. The record stays marked as new until a
  /// source confirms it through [`add_or_update`](Self::add_or_update).
  pub fn create(&mut self, data: ResourceData) -> RecordHandle {
    let id = self.schema.id.generate();
    let handle = RecordHandle::new(Record::new(id.clone(), &self.schema, data, true, false));
    self.data.insert(id, handle.clone());
    handle
  }

  /// Record for `id`, materializing a placeholder if it is not live.
  ///
  /// Tombstones are not consulted, and nothing is fetched.
  pub fn get(&mut self, id: &str) -> RecordHandle {
    if let Some(handle) = self.data.get(id) {
      return handle.clone();
    }

    debug!(resource_type = %self.schema.resource_type, id = %id, "Creating placeholder");
    let handle = RecordHandle::new(Record::placeholder(id, &self.schema));
    self.data.insert(id.to_string(), handle.clone());
    handle
  }

  /// Records of the most recent listing, in listing order.
  pub fn index(&mut self, _params: &IndexParams) -> Vec<RecordHandle> {
    let ids = self.index_ids.clone();
    ids.iter().map(|id| self.get(id)).collect()
  }

  /// Replace the listing ids. Malformed ids are silently dropped.
  pub fn set_index_ids<I, E>(&mut self, entries: I)
  where
    I: IntoIterator<Item = E>,
    E: Into<IndexEntry>,
  {
    let strategy = self.schema.id;
    self.index_ids = entries
      .into_iter()
      .map(|entry| entry.into().into_id())
      .filter(|id| strategy.validate(id))
      .collect();
  }

  /// Soft-delete `id`, keeping its record as a tombstone.
  ///
  /// Returns the tombstone, which may be a stale one if `id` was not live.
  pub fn remove(&mut self, id: &str) -> Option<RecordHandle> {
    if let Some(handle) = self.data.remove(id) {
      self.removed.insert(id.to_string(), handle);
    }

    self.removed.get(id).cloned()
  }

  /// Undo [`remove`](Self::remove), restoring the exact record instance.
  ///
  /// A placeholder materialized for `id` in the meantime is replaced.
  pub fn revert_remove(&mut self, id: &str) -> Option<RecordHandle> {
    let handle = self.removed.remove(id)?;
    self.data.insert(id.to_string(), handle.clone());
    Some(handle)
  }

  /// Drop the tombstone for `id` for good.
  pub fn clear_removed(&mut self, id: &str) {
    self.removed.remove(id);
  }

  /// Drop all live records and tombstones.
  ///
  /// The listing ids and `updated_at` are kept.
  pub fn clear(&mut self) {
    self.data.clear();
    self.removed.clear();
  }

  /// Snapshot of the live records, listing ids and `updated_at`.
  pub fn to_envelope(&self) -> Result<Envelope, CacheError> {
    let data = self
      .data
      .iter()
      .map(|(id, handle)| {
        serde_json::to_value(handle.read().to_json())
          .map(|value| (id.clone(), value))
          .map_err(|source| CacheError::Encode {
            resource_type: self.schema.resource_type.clone(),
            source,
          })
      })
      .collect::<Result<BTreeMap<_, _>, _>>()?;

    Ok(Envelope {
      data: Some(data),
      updated_at: self.updated_at,
      index_ids: self.index_ids.clone(),
    })
  }

  /// Encode the cache as a JSON snapshot.
  pub fn to_json(&self) -> Result<String, CacheError> {
    serde_json::to_string(&self.to_envelope()?).map_err(|source| CacheError::Encode {
      resource_type: self.schema.resource_type.clone(),
      source,
    })
  }

  /// Restore a snapshot into this cache.
  ///
  /// `updated_at` and the listing ids are taken verbatim; every record entry
  /// goes through [`add_or_update`](Self::add_or_update), so records already
  /// in the cache are merged rather than replaced. Records new to the cache
  /// keep their own `updated_at` and flags. Entries that cannot be decoded
  /// or lack an id are logged and skipped.
  pub fn restore(&mut self, envelope: Envelope) {
    let Some(data) = envelope.data else {
      debug!(resource_type = %self.schema.resource_type, "Ignoring snapshot without data");
      return;
    };

    self.updated_at = envelope.updated_at;
    self.index_ids = envelope.index_ids;

    for (key, value) in data {
      let entry: RecordJson = match serde_json::from_value(value) {
        Ok(entry) => entry,
        Err(e) => {
          warn!(resource_type = %self.schema.resource_type, key = %key, "Skipping malformed record: {}", e);
          continue;
        }
      };

      if let Err(e) = self.restore_record(entry) {
        error!(key = %key, "{}", e);
      }
    }
  }

  /// Restore one snapshot entry.
  ///
  /// A record new to this cache takes the snapshot's `updated_at` and flags,
  /// so an old or unconfirmed entry is still treated as such once loaded. An
  /// entry for a record already held here is merged like any confirmed data.
  fn restore_record(&mut self, entry: RecordJson) -> Result<RecordHandle, CacheError> {
    let known = entry
      .data
      .id
      .as_deref()
      .is_some_and(|id| self.data.contains_key(id));

    let handle = self.add_or_update(entry.data)?;
    if !known {
      handle
        .write()
        .restore_state(entry.updated_at, entry.is_new, entry.is_placeholder);
    }
    Ok(handle)
  }

  /// Decode a JSON snapshot and restore it.
  pub fn from_json(&mut self, json: &str) -> Result<(), CacheError> {
    let envelope: Envelope = serde_json::from_str(json).map_err(|source| CacheError::Decode {
      resource_type: self.schema.resource_type.clone(),
      source,
    })?;
    self.restore(envelope);
    Ok(())
  }
}
