use color_eyre::{eyre::eyre, Result};
use jsonapi_cache::cache::{
  CacheRegistry, CacheResult, CacheSource, CacheStorage, IndexParams, NoopStorage,
  ResourceCache, SqliteStorage, SyncLayer,
};
use jsonapi_cache::config::Config;
use jsonapi_cache::record::{RecordHandle, ResourceData};
use jsonapi_cache::source::RestSource;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Command-line application state
pub struct App {
  config: Config,
  registry: CacheRegistry,
  layer: SyncLayer<Box<dyn CacheStorage>>,
  /// Resource types whose snapshot has been loaded
  restored: HashSet<String>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let storage: Box<dyn CacheStorage> = if config.storage.disabled {
      Box::new(NoopStorage)
    } else if let Some(ref path) = config.storage.path {
      Box::new(SqliteStorage::open_at(path)?)
    } else {
      Box::new(SqliteStorage::open()?)
    };

    let layer = SyncLayer::new(storage).with_stale_time(config.storage.stale_time()?);

    Ok(Self {
      config,
      registry: CacheRegistry::new(),
      layer,
      restored: HashSet::new(),
    })
  }

  /// Register the cache for `resource_type` and load its snapshot once.
  ///
  /// Returns the sync layer alongside so callers can reconcile the cache.
  fn open_synced(
    &mut self,
    resource_type: &str,
  ) -> Result<(&mut ResourceCache, &SyncLayer<Box<dyn CacheStorage>>)> {
    let schema = self.config.resource(resource_type)?.schema.clone();
    let cache = self.registry.register(schema);

    if self.restored.insert(resource_type.to_string()) && self.layer.restore(cache)? {
      debug!(resource_type = %resource_type, size = cache.size(), "Loaded snapshot");
    }

    Ok((cache, &self.layer))
  }

  fn open(&mut self, resource_type: &str) -> Result<&mut ResourceCache> {
    Ok(self.open_synced(resource_type)?.0)
  }

  fn source(&self, resource_type: &str) -> Result<Option<RestSource>> {
    let resource = self.config.resource(resource_type)?;
    resource
      .url
      .as_deref()
      .map(|url| {
        RestSource::new(url)
          .map(|source| source.with_include(resource.schema.included_relationships()))
      })
      .transpose()
  }

  /// Print configured resource types with their snapshot state.
  pub fn types(&self) -> Result<()> {
    for resource in &self.config.resources {
      let kind = &resource.schema.resource_type;
      match self.layer.storage().load_snapshot(kind)? {
        Some(snapshot) => println!("{}\tsaved {}", kind, snapshot.cached_at),
        None => println!("{}\tnot cached", kind),
      }
    }
    Ok(())
  }

  /// Refresh the listing of `resource_type` from its source.
  pub async fn sync(&mut self, resource_type: &str, params: IndexParams, force: bool) -> Result<()> {
    let source = self
      .source(resource_type)?
      .ok_or_else(|| eyre!("Resource type {} has no url", resource_type))?;

    let (cache, layer) = self.open_synced(resource_type)?;
    if force {
      cache.set_updated_at(None);
    }

    let (source, params) = (&source, &params);
    let result = layer
      .fetch_index(cache, params, move || async move { source.index(params).await })
      .await?;

    print_source(&result);
    print_records(cache, &result.data);
    Ok(())
  }

  /// Print the cached listing of `resource_type`.
  pub fn list(&mut self, resource_type: &str) -> Result<()> {
    let (cache, layer) = self.open_synced(resource_type)?;
    let result = layer.cached_index(cache, &IndexParams::default());
    print_source(&result);
    print_records(cache, &result.data);
    Ok(())
  }

  /// Print a single record.
  ///
  /// With a source the record is fetched when missing or stale, or always
  /// when `refresh` is set. Without one the cached record is printed.
  pub async fn show(&mut self, resource_type: &str, id: &str, refresh: bool) -> Result<()> {
    let source = self.source(resource_type)?;
    let (cache, layer) = self.open_synced(resource_type)?;

    let result = match source {
      Some(ref source) if refresh => {
        layer
          .refetch_one(cache, id, move || async move { source.get(id).await })
          .await?
      }
      Some(ref source) => {
        layer
          .fetch_one(cache, id, move || async move { source.get(id).await })
          .await?
      }
      None => layer.cached_one(cache, id),
    };
    print_source(&result);

    let json = serde_json::to_string_pretty(&result.data.read().to_json())?;
    println!("{}", json);
    Ok(())
  }

  /// Create a record from `key=value` attribute pairs.
  pub async fn create(&mut self, resource_type: &str, attributes: &[String]) -> Result<()> {
    let data = parse_attributes(attributes)?;
    let source = self.source(resource_type)?;
    let (cache, layer) = self.open_synced(resource_type)?;

    let handle = match source {
      Some(source) => {
        layer
          .create(cache, data, |resource| async move { source.create(resource).await })
          .await?
      }
      None => {
        let handle = cache.create(data);
        layer.persist(cache)?;
        handle
      }
    };

    info!(resource_type = %resource_type, id = %handle.id(), "Created record");
    println!("{}", handle.id());
    Ok(())
  }

  /// Delete a record, remotely first when the type has a source.
  pub async fn delete(&mut self, resource_type: &str, id: &str) -> Result<()> {
    let source = self.source(resource_type)?;
    let (cache, layer) = self.open_synced(resource_type)?;

    let removed = match source {
      Some(source) => {
        let source = &source;
        layer
          .remove(cache, id, move || async move { source.delete(id).await })
          .await?
      }
      None => {
        let removed = if cache.contains(id) {
          cache.remove(id)
        } else {
          None
        };
        cache.clear_removed(id);
        layer.persist(cache)?;
        removed
      }
    };

    match removed {
      Some(_) => println!("Deleted {} {}", resource_type, id),
      None => println!("No {} with id {}", resource_type, id),
    }
    Ok(())
  }

  /// Print the snapshot of `resource_type`.
  pub fn export(&mut self, resource_type: &str) -> Result<()> {
    let json = self.open(resource_type)?.to_json()?;
    println!("{}", json);
    Ok(())
  }

  /// Merge a snapshot file into the cache of `resource_type`.
  pub fn import(&mut self, resource_type: &str, path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;

    let (cache, layer) = self.open_synced(resource_type)?;

    cache.from_json(&json)?;
    layer.persist(cache)?;
    println!("{} {} records", cache.size(), resource_type);
    Ok(())
  }

  /// Drop everything cached for `resource_type`.
  pub fn clear(&mut self, resource_type: &str) -> Result<()> {
    let cache = self.open(resource_type)?;
    cache.clear();
    cache.set_index_ids(Vec::<String>::new());
    cache.set_updated_at(None);

    self.layer.storage().delete_snapshot(resource_type)?;
    println!("Cleared {}", resource_type);
    Ok(())
  }

  /// Drop everything cached for every configured type.
  pub fn clear_all(&mut self) -> Result<()> {
    for resource in &self.config.resources {
      self.registry.register(resource.schema.clone());
    }
    self.registry.clear_all();

    let kinds: Vec<String> = self.registry.types().into_iter().map(String::from).collect();
    for kind in &kinds {
      if let Some(cache) = self.registry.get_mut(kind) {
        cache.set_index_ids(Vec::<String>::new());
        cache.set_updated_at(None);
      }
      self.layer.storage().delete_snapshot(kind)?;
      // Nothing left to load for this type
      self.restored.insert(kind.clone());
    }

    info!(count = kinds.len(), "Cleared all caches");
    println!("Cleared {}", kinds.join(", "));
    Ok(())
  }
}

/// Parse `key=value` pairs; values that are valid JSON keep their type.
pub fn parse_attributes(pairs: &[String]) -> Result<ResourceData> {
  pairs.iter().try_fold(ResourceData::default(), |data, pair| {
    let (key, raw) = pair
      .split_once('=')
      .ok_or_else(|| eyre!("Expected key=value, got {}", pair))?;
    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok(data.attribute(key, value))
  })
}

/// Parse `key=value` pairs into listing filters.
pub fn parse_filters(pairs: &[String]) -> Result<IndexParams> {
  pairs.iter().try_fold(IndexParams::default(), |params, pair| {
    let (key, value) = pair
      .split_once('=')
      .ok_or_else(|| eyre!("Expected key=value, got {}", pair))?;
    Ok(params.filter(key, value))
  })
}

fn print_source<T>(result: &CacheResult<T>) {
  let source = match result.source {
    CacheSource::Network => "network",
    CacheSource::CacheFresh => "cache",
    CacheSource::CacheStale => "stale cache",
    CacheSource::Offline => "offline cache",
  };
  match result.cached_at {
    Some(at) => eprintln!("from {} (synced {})", source, at),
    None => eprintln!("from {}", source),
  }
}

fn print_records(cache: &ResourceCache, records: &[RecordHandle]) {
  for handle in records {
    let record = handle.read();
    let marker = if record.is_placeholder() { " (pending)" } else { "" };
    println!("{}\t{}{}", record.id(), record.label(cache.schema()), marker);
  }
}
