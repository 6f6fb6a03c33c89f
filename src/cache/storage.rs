//! Snapshot storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// A stored cache snapshot.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
  /// Snapshot JSON as produced by `ResourceCache::to_json`
  pub json: String,
  /// When the snapshot was written
  pub cached_at: DateTime<Utc>,
  /// The cache's `updated_at` at the time of writing
  pub updated_at: Option<DateTime<Utc>>,
}

/// Trait for snapshot storage backends.
pub trait CacheStorage: Send + Sync {
  /// Store the snapshot of a resource type, replacing any previous one.
  fn store_snapshot(
    &self,
    resource_type: &str,
    json: &str,
    updated_at: Option<DateTime<Utc>>,
  ) -> Result<()>;

  /// Get the snapshot of a resource type.
  fn load_snapshot(&self, resource_type: &str) -> Result<Option<CachedSnapshot>>;

  /// Delete the snapshot of a resource type.
  fn delete_snapshot(&self, resource_type: &str) -> Result<()>;
}

impl<T: CacheStorage + ?Sized> CacheStorage for Box<T> {
  fn store_snapshot(
    &self,
    resource_type: &str,
    json: &str,
    updated_at: Option<DateTime<Utc>>,
  ) -> Result<()> {
    (**self).store_snapshot(resource_type, json, updated_at)
  }

  fn load_snapshot(&self, resource_type: &str) -> Result<Option<CachedSnapshot>> {
    (**self).load_snapshot(resource_type)
  }

  fn delete_snapshot(&self, resource_type: &str) -> Result<()> {
    (**self).delete_snapshot(resource_type)
  }
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn store_snapshot(
    &self,
    _resource_type: &str,
    _json: &str,
    _updated_at: Option<DateTime<Utc>>,
  ) -> Result<()> {
    Ok(()) // Discard
  }

  fn load_snapshot(&self, _resource_type: &str) -> Result<Option<CachedSnapshot>> {
    Ok(None) // Always miss
  }

  fn delete_snapshot(&self, _resource_type: &str) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based snapshot storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open storage at `path`, creating parent directories as needed.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("jcache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One snapshot per resource type (stores the serialized envelope)
CREATE TABLE IF NOT EXISTS cache_snapshot (
    resource_type TEXT PRIMARY KEY,
    envelope TEXT NOT NULL,
    checksum TEXT NOT NULL,
    updated_at TEXT,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl CacheStorage for SqliteStorage {
  fn store_snapshot(
    &self,
    resource_type: &str,
    json: &str,
    updated_at: Option<DateTime<Utc>>,
  ) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_snapshot (resource_type, envelope, checksum, updated_at, cached_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![
          resource_type,
          json,
          checksum(json),
          updated_at.map(|t| t.to_rfc3339())
        ],
      )
      .map_err(|e| eyre!("Failed to store {} snapshot: {}", resource_type, e))?;

    Ok(())
  }

  fn load_snapshot(&self, resource_type: &str) -> Result<Option<CachedSnapshot>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT envelope, checksum, updated_at, cached_at FROM cache_snapshot
         WHERE resource_type = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, String, Option<String>, String)> = stmt
      .query_row(params![resource_type], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to load {} snapshot: {}", resource_type, e))?;

    let Some((json, stored_checksum, updated_at, cached_at)) = row else {
      return Ok(None);
    };

    if checksum(&json) != stored_checksum {
      warn!(resource_type = %resource_type, "Snapshot checksum mismatch, ignoring");
      return Ok(None);
    }

    let updated_at = updated_at
      .map(|s| {
        DateTime::parse_from_rfc3339(&s)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
      })
      .transpose()?;

    Ok(Some(CachedSnapshot {
      json,
      cached_at: parse_datetime(&cached_at)?,
      updated_at,
    }))
  }

  fn delete_snapshot(&self, resource_type: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_snapshot WHERE resource_type = ?",
        params![resource_type],
      )
      .map_err(|e| eyre!("Failed to delete {} snapshot: {}", resource_type, e))?;

    Ok(())
  }
}

/// Hex SHA-256 of a snapshot body.
fn checksum(json: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(json.as_bytes());
  hex::encode(hasher.finalize())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
