//! Persisted form of a cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Snapshot of a [`ResourceCache`](super::ResourceCache).
///
/// Each entry of `data` is a record's own serialized form, keyed by id, and
/// is passed through untouched. Tombstones are never part of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
  /// Absent in documents that are not cache snapshots
  pub data: Option<BTreeMap<String, Value>>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub index_ids: Vec<String>,
}
