//! Synchronization layer that reconciles a cache with local storage and a remote source.

use chrono::{Duration, Utc};
use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::engine::{IndexParams, ResourceCache};
use super::storage::CacheStorage;
use super::traits::CacheResult;
use crate::record::{RecordHandle, ResourceData};

/// Cache-first synchronization strategy.
///
/// Local storage is consulted before the network, fetched data is merged
/// into the cache with `add_or_update` and the result persisted. When the
/// network fails, whatever the cache holds is served instead (offline mode).
pub struct SyncLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// How long after a sync cached data is considered stale
  stale_time: Duration,
}

impl<S: CacheStorage> SyncLayer<S> {
  /// Create a new sync layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      stale_time: Duration::minutes(5),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Check if data synced at `synced_at` is stale. Never-synced data is.
  fn is_stale(&self, synced_at: Option<chrono::DateTime<Utc>>) -> bool {
    synced_at.map_or(true, |at| Utc::now() - at >= self.stale_time)
  }

  /// Load the stored snapshot of `cache`'s type into it.
  ///
  /// Returns whether a snapshot was found.
  pub fn restore(&self, cache: &mut ResourceCache) -> Result<bool> {
    match self.storage.load_snapshot(cache.resource_type())? {
      Some(snapshot) => {
        cache.from_json(&snapshot.json)?;
        debug!(
          resource_type = %cache.resource_type(),
          size = cache.size(),
          "Restored cache snapshot"
        );
        Ok(true)
      }
      None => Ok(false),
    }
  }

  /// Write the snapshot of `cache` to storage.
  pub fn persist(&self, cache: &ResourceCache) -> Result<()> {
    let json = cache.to_json()?;
    self
      .storage
      .store_snapshot(cache.resource_type(), &json, cache.updated_at())
  }

  /// The cached listing, without consulting any source.
  ///
  /// The result is `CacheStale` once the last sync is older than the stale
  /// time, or when the listing was never synced.
  pub fn cached_index(
    &self,
    cache: &mut ResourceCache,
    params: &IndexParams,
  ) -> CacheResult<Vec<RecordHandle>> {
    let records = cache.index(params);
    match cache.updated_at() {
      Some(at) => CacheResult::from_cache(records, at, self.is_stale(Some(at))),
      None => CacheResult::unsynced(records),
    }
  }

  /// The cached record for `id`, without consulting any source.
  ///
  /// Placeholders count as never synced.
  pub fn cached_one(&self, cache: &mut ResourceCache, id: &str) -> CacheResult<RecordHandle> {
    let handle = cache.get(id);
    let synced_at = {
      let record = handle.read();
      record.updated_at().filter(|_| !record.is_placeholder())
    };

    match synced_at {
      Some(at) => CacheResult::from_cache(handle, at, self.is_stale(Some(at))),
      None => CacheResult::unsynced(handle),
    }
  }

  /// Fetch a listing with cache-first strategy.
  ///
  /// 1. If the last sync is fresh, return the cached listing immediately
  /// 2. Otherwise fetch from the source and merge every resource
  /// 3. Replace the listing ids with the response order, stamp and persist
  /// 4. On network failure, serve the cached listing (offline mode)
  pub async fn fetch_index<F, Fut>(
    &self,
    cache: &mut ResourceCache,
    params: &IndexParams,
    fetcher: F,
  ) -> Result<CacheResult<Vec<RecordHandle>>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<ResourceData>>>,
  {
    if let Some(synced_at) = cache.updated_at() {
      if !self.is_stale(Some(synced_at)) {
        return Ok(CacheResult::from_cache(
          cache.index(params),
          synced_at,
          false,
        ));
      }
    }

    match fetcher().await {
      Ok(resources) => {
        let mut handles = Vec::with_capacity(resources.len());
        for resource in resources {
          match cache.add_or_update(resource) {
            Ok(handle) => handles.push(handle),
            Err(e) => error!("{}", e),
          }
        }

        cache.set_index_ids(handles);
        cache.set_updated_at(Some(Utc::now()));
        self.persist(cache)?;
        info!(
          resource_type = %cache.resource_type(),
          count = cache.index_ids().len(),
          "Synced listing"
        );

        Ok(CacheResult::from_network(cache.index(params)))
      }
      Err(e) => match cache.updated_at() {
        Some(synced_at) => {
          warn!(resource_type = %cache.resource_type(), "Serving cached listing: {}", e);
          Ok(CacheResult::offline(cache.index(params), synced_at))
        }
        None => Err(e),
      },
    }
  }

  /// Fetch a single record with caching.
  ///
  /// Placeholders and stale records are fetched; on network failure a
  /// record that already holds data is served offline.
  pub async fn fetch_one<F, Fut>(
    &self,
    cache: &mut ResourceCache,
    id: &str,
    fetcher: F,
  ) -> Result<CacheResult<RecordHandle>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ResourceData>>,
  {
    self.fetch_record(cache, id, fetcher, false).await
  }

  /// Fetch a single record even if the cached one is fresh.
  ///
  /// Falls back to the cached record offline, like [`fetch_one`](Self::fetch_one).
  pub async fn refetch_one<F, Fut>(
    &self,
    cache: &mut ResourceCache,
    id: &str,
    fetcher: F,
  ) -> Result<CacheResult<RecordHandle>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ResourceData>>,
  {
    self.fetch_record(cache, id, fetcher, true).await
  }

  async fn fetch_record<F, Fut>(
    &self,
    cache: &mut ResourceCache,
    id: &str,
    fetcher: F,
    force: bool,
  ) -> Result<CacheResult<RecordHandle>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ResourceData>>,
  {
    let handle = cache.get(id);
    let (is_placeholder, record_updated_at) = {
      let record = handle.read();
      (record.is_placeholder(), record.updated_at())
    };

    if let (false, false, Some(at)) = (force, is_placeholder, record_updated_at) {
      if !self.is_stale(Some(at)) {
        return Ok(CacheResult::from_cache(handle, at, false));
      }
    }

    match fetcher().await {
      Ok(mut resource) => {
        resource.id.get_or_insert_with(|| id.to_string());
        let handle = cache.add_or_update(resource)?;
        self.persist(cache)?;
        Ok(CacheResult::from_network(handle))
      }
      Err(e) => match (is_placeholder, record_updated_at) {
        (false, Some(at)) => {
          warn!(resource_type = %cache.resource_type(), id = %id, "Serving cached record: {}", e);
          Ok(CacheResult::offline(handle, at))
        }
        _ => Err(e),
      },
    }
  }

  /// Optimistically remove a record, reverting if the source rejects it.
  ///
  /// Returns `None` without calling the deleter if `id` is not live.
  pub async fn remove<F, Fut>(
    &self,
    cache: &mut ResourceCache,
    id: &str,
    deleter: F,
  ) -> Result<Option<RecordHandle>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    if !cache.contains(id) {
      return Ok(None);
    }
    let removed = cache.remove(id);

    match deleter().await {
      Ok(()) => {
        cache.clear_removed(id);
        self.persist(cache)?;
        Ok(removed)
      }
      Err(e) => {
        warn!(resource_type = %cache.resource_type(), id = %id, "Reverting removal: {}", e);
        cache.revert_remove(id);
        Err(e)
      }
    }
  }

  /// Optimistically create a record, confirming it with the source.
  ///
  /// The creator receives the optimistic resource (with its generated id)
  /// and returns the stored resource, which is merged into the same record.
  /// On failure the optimistic record is discarded.
  pub async fn create<F, Fut>(
    &self,
    cache: &mut ResourceCache,
    data: ResourceData,
    creator: F,
  ) -> Result<RecordHandle>
  where
    F: FnOnce(ResourceData) -> Fut,
    Fut: Future<Output = Result<ResourceData>>,
  {
    let handle = cache.create(data);
    let resource = handle.read().to_resource();
    let id = handle.id();

    match creator(resource).await {
      Ok(mut confirmed) => {
        // The source may omit the id it was given
        confirmed.id.get_or_insert_with(|| id.clone());
        cache.add_or_update(confirmed)?;
        self.persist(cache)?;
        Ok(handle)
      }
      Err(e) => {
        warn!(resource_type = %cache.resource_type(), id = %id, "Discarding optimistic record: {}", e);
        cache.remove(&id);
        cache.clear_removed(&id);
        Err(e)
      }
    }
  }
}

impl<S: CacheStorage> Clone for SyncLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      stale_time: self.stale_time,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, NoopStorage, SqliteStorage};
  use crate::schema::{AttributeType, Schema};
  use color_eyre::eyre::eyre;
  use serde_json::json;
  use uuid::Uuid;

  fn jobs() -> ResourceCache {
    ResourceCache::new(
      Schema::new("jobs")
        .with_attribute("name", AttributeType::String)
        .with_attribute("salary", AttributeType::Number),
    )
  }

  fn job(id: &str, name: &str) -> ResourceData {
    ResourceData::with_id(id).attribute("name", name)
  }

  fn sqlite_layer() -> SyncLayer<SqliteStorage> {
    SyncLayer::new(SqliteStorage::open_in_memory().unwrap())
  }

  #[tokio::test]
  async fn test_fetch_index_from_network_then_cache() {
    let layer = sqlite_layer();
    let mut cache = jobs();
    let (a, b) = (Uuid::new_v4().to_string(), Uuid::new_v4().to_string());
    let params = IndexParams::default();

    let response = vec![job(&a, "Engineer"), job(&b, "Pilot")];
    let result = layer
      .fetch_index(&mut cache, &params, || async { Ok(response) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    let ids: Vec<String> = result.data.iter().map(RecordHandle::id).collect();
    assert_eq!(ids, [a.clone(), b.clone()]);
    assert!(cache.updated_at().is_some());

    let result = layer
      .fetch_index(&mut cache, &params, || async {
        Err::<Vec<ResourceData>, _>(eyre!("should not be called"))
      })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(result.data.len(), 2);
  }

  #[tokio::test]
  async fn test_fetch_index_skips_resources_without_id() {
    let layer = SyncLayer::new(NoopStorage);
    let mut cache = jobs();
    let id = Uuid::new_v4().to_string();

    let response = vec![job(&id, "Engineer"), ResourceData::default().attribute("name", "x")];
    let result = layer
      .fetch_index(&mut cache, &IndexParams::default(), || async { Ok(response) })
      .await
      .unwrap();

    assert_eq!(result.data.len(), 1);
    assert_eq!(cache.size(), 1);
  }

  #[tokio::test]
  async fn test_fetch_index_offline_fallback() {
    let layer = SyncLayer::new(NoopStorage).with_stale_time(Duration::zero());
    let mut cache = jobs();
    let id = Uuid::new_v4().to_string();
    let params = IndexParams::default();

    let response = vec![job(&id, "Engineer")];
    layer
      .fetch_index(&mut cache, &params, || async { Ok(response) })
      .await
      .unwrap();

    let result = layer
      .fetch_index(&mut cache, &params, || async {
        Err::<Vec<ResourceData>, _>(eyre!("network down"))
      })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.len(), 1);
  }

  #[tokio::test]
  async fn test_fetch_index_fails_without_cache() {
    let layer = SyncLayer::new(NoopStorage);
    let mut cache = jobs();

    let result = layer
      .fetch_index(&mut cache, &IndexParams::default(), || async {
        Err::<Vec<ResourceData>, _>(eyre!("network down"))
      })
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_fetch_one_fills_placeholder() {
    let layer = SyncLayer::new(NoopStorage);
    let mut cache = jobs();
    let early = cache.get("u1");

    let result = layer
      .fetch_one(&mut cache, "u1", || async { Ok(job("u1", "Engineer")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert!(result.data.ptr_eq(&early));
    assert_eq!(early.read().attribute("name"), Some(&json!("Engineer")));

    let cached = layer
      .fetch_one(&mut cache, "u1", || async {
        Err::<ResourceData, _>(eyre!("should not be called"))
      })
      .await
      .unwrap();
    assert_eq!(cached.source, CacheSource::CacheFresh);
  }

  #[tokio::test]
  async fn test_fetch_one_refetches_restored_old_record() {
    let layer = sqlite_layer();
    let synced_at = Utc::now() - Duration::days(2);
    let snapshot = json!({
      "data": {
        "u1": {
          "data": {"id": "u1", "attributes": {"name": "Engineer"}},
          "updatedAt": synced_at
        }
      },
      "updatedAt": synced_at,
      "indexIds": []
    })
    .to_string();
    layer
      .storage()
      .store_snapshot("jobs", &snapshot, Some(synced_at))
      .unwrap();

    let mut cache = jobs();
    assert!(layer.restore(&mut cache).unwrap());
    let result = layer
      .fetch_one(&mut cache, "u1", || async { Ok(job("u1", "Pilot")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.read().attribute("name"), Some(&json!("Pilot")));
  }

  #[tokio::test]
  async fn test_restored_placeholder_is_fetched() {
    let layer = sqlite_layer();
    let mut cache = jobs();
    cache.get("u1");
    layer.persist(&cache).unwrap();

    let mut restored = jobs();
    layer.restore(&mut restored).unwrap();
    assert!(restored.get("u1").read().is_placeholder());

    let result = layer
      .fetch_one(&mut restored, "u1", || async { Ok(job("u1", "Engineer")) })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert!(!result.data.read().is_placeholder());
  }

  #[tokio::test]
  async fn test_refetch_one_ignores_freshness() {
    let layer = SyncLayer::new(NoopStorage);
    let mut cache = jobs();
    cache.add_or_update(job("u1", "Engineer")).unwrap();

    let result = layer
      .refetch_one(&mut cache, "u1", || async { Ok(job("u1", "Pilot")) })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.read().attribute("name"), Some(&json!("Pilot")));

    let offline = layer
      .refetch_one(&mut cache, "u1", || async {
        Err::<ResourceData, _>(eyre!("network down"))
      })
      .await
      .unwrap();
    assert_eq!(offline.source, CacheSource::Offline);
  }

  #[test]
  fn test_cached_reads_report_staleness() {
    let layer = SyncLayer::new(NoopStorage).with_stale_time(Duration::minutes(5));
    let mut cache = jobs();
    let id = Uuid::new_v4().to_string();

    let never = layer.cached_index(&mut cache, &IndexParams::default());
    assert_eq!(never.source, CacheSource::CacheStale);
    assert!(never.cached_at.is_none());

    cache.add_or_update(job(&id, "Engineer")).unwrap();
    cache.set_index_ids([id.clone()]);
    cache.set_updated_at(Some(Utc::now()));
    let fresh = layer.cached_index(&mut cache, &IndexParams::default());
    assert_eq!(fresh.source, CacheSource::CacheFresh);
    assert_eq!(fresh.data.len(), 1);

    cache.set_updated_at(Some(Utc::now() - Duration::hours(1)));
    let stale = layer.cached_index(&mut cache, &IndexParams::default());
    assert_eq!(stale.source, CacheSource::CacheStale);

    assert_eq!(layer.cached_one(&mut cache, &id).source, CacheSource::CacheFresh);
    let pending = layer.cached_one(&mut cache, "u2");
    assert_eq!(pending.source, CacheSource::CacheStale);
    assert!(pending.data.read().is_placeholder());
  }

  #[tokio::test]
  async fn test_fetch_one_placeholder_failure() {
    let layer = SyncLayer::new(NoopStorage);
    let mut cache = jobs();

    let result = layer
      .fetch_one(&mut cache, "u1", || async {
        Err::<ResourceData, _>(eyre!("not found"))
      })
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_remove_confirmed() {
    let layer = sqlite_layer();
    let mut cache = jobs();
    cache.add_or_update(job("u1", "Engineer")).unwrap();

    let removed = layer
      .remove(&mut cache, "u1", || async { Ok(()) })
      .await
      .unwrap();

    assert!(removed.is_some());
    assert!(!cache.contains("u1"));
    assert!(!cache.is_removed("u1"));

    let mut restored = jobs();
    layer.restore(&mut restored).unwrap();
    assert!(!restored.contains("u1"));
  }

  #[tokio::test]
  async fn test_remove_reverted_on_failure() {
    let layer = SyncLayer::new(NoopStorage);
    let mut cache = jobs();
    let original = cache.add_or_update(job("u1", "Engineer")).unwrap();

    let result = layer
      .remove(&mut cache, "u1", || async { Err(eyre!("server error")) })
      .await;

    assert!(result.is_err());
    assert!(cache.get("u1").ptr_eq(&original));
    assert!(!cache.is_removed("u1"));
    assert_eq!(cache.size(), 1);
  }

  #[tokio::test]
  async fn test_remove_absent_skips_deleter() {
    let layer = SyncLayer::new(NoopStorage);
    let mut cache = jobs();

    let removed = layer
      .remove(&mut cache, "u1", || async { Err(eyre!("should not be called")) })
      .await
      .unwrap();
    assert!(removed.is_none());
  }

  #[tokio::test]
  async fn test_create_confirmed() {
    let layer = SyncLayer::new(NoopStorage);
    let mut cache = jobs();

    let handle = layer
      .create(&mut cache, job("ignored", "Draft"), |resource| async move {
        Ok(ResourceData {
          id: resource.id,
          ..ResourceData::default().attribute("salary", 100)
        })
      })
      .await
      .unwrap();

    let record = handle.read();
    assert!(!record.is_new());
    assert_ne!(record.id(), "ignored");
    assert_eq!(record.attribute("name"), Some(&json!("Draft")));
    assert_eq!(record.attribute("salary"), Some(&json!(100)));
    assert_eq!(cache.size(), 1);
  }

  #[tokio::test]
  async fn test_create_discarded_on_failure() {
    let layer = SyncLayer::new(NoopStorage);
    let mut cache = jobs();

    let result = layer
      .create(&mut cache, job("x", "Draft"), |_| async {
        Err::<ResourceData, _>(eyre!("rejected"))
      })
      .await;

    assert!(result.is_err());
    assert_eq!(cache.size(), 0);
  }

  #[tokio::test]
  async fn test_restore_from_storage() {
    let layer = sqlite_layer();
    let mut cache = jobs();
    let id = Uuid::new_v4().to_string();
    let response = vec![job(&id, "Engineer")];
    layer
      .fetch_index(&mut cache, &IndexParams::default(), || async { Ok(response) })
      .await
      .unwrap();

    let mut fresh = jobs();
    assert!(layer.restore(&mut fresh).unwrap());
    assert_eq!(fresh.index_ids(), [id.clone()]);
    assert_eq!(fresh.updated_at(), cache.updated_at());
    assert_eq!(fresh.get(&id).read().attribute("name"), Some(&json!("Engineer")));

    let mut other = ResourceCache::new(Schema::new("robots"));
    assert!(!layer.restore(&mut other).unwrap());
  }
}
