use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::schema::Schema;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
  /// Snapshot database path (defaults to $XDG_DATA_HOME/jcache/cache.db)
  pub path: Option<PathBuf>,
  /// Minutes after a sync before cached listings are refetched
  #[serde(default = "default_stale_minutes")]
  pub stale_minutes: i64,
  /// Disable snapshot persistence entirely
  #[serde(default)]
  pub disabled: bool,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      path: None,
      stale_minutes: default_stale_minutes(),
      disabled: false,
    }
  }
}

fn default_stale_minutes() -> i64 {
  5
}

impl StorageConfig {
  /// `stale_minutes` as a duration. Negative or out of range values are errors.
  pub fn stale_time(&self) -> Result<Duration> {
    if self.stale_minutes < 0 {
      return Err(eyre!(
        "storage.stale_minutes must not be negative, got {}",
        self.stale_minutes
      ));
    }
    Duration::try_minutes(self.stale_minutes)
      .ok_or_else(|| eyre!("storage.stale_minutes is out of range: {}", self.stale_minutes))
  }
}

/// A resource type together with where to fetch it from.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
  #[serde(flatten)]
  pub schema: Schema,
  /// Remote collection URL
  pub url: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./jcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/jcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/jcache/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("jcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("jcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse and check a YAML config document.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.storage.stale_time()?;

    let mut seen = std::collections::HashSet::new();
    for resource in &config.resources {
      if !seen.insert(resource.schema.resource_type.as_str()) {
        return Err(eyre!(
          "Resource type {} is declared twice",
          resource.schema.resource_type
        ));
      }
    }

    Ok(config)
  }

  /// Look up a resource by type name.
  pub fn resource(&self, resource_type: &str) -> Result<&ResourceConfig> {
    self
      .resources
      .iter()
      .find(|r| r.schema.resource_type == resource_type)
      .ok_or_else(|| eyre!("Unknown resource type: {}", resource_type))
  }
}
