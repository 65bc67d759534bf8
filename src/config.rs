use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::SqliteStorage;
use crate::worker::Manifest;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Site origin, e.g. "https://example.org/"
  pub origin: Option<String>,
  /// Generation name and asset list
  #[serde(flatten)]
  pub manifest: Manifest,
  /// Cache database path (defaults to $XDG_DATA_HOME/sitecache/cache.db)
  pub database: Option<PathBuf>,
  /// Network timeout; requests wait indefinitely when unset
  pub request_timeout_secs: Option<u64>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./sitecache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/sitecache/config.yaml
  ///
  /// Without any file the built-in defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("sitecache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("sitecache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// The site origin as a URL.
  pub fn origin_url(&self) -> Result<Url> {
    let origin = self.origin.as_deref().ok_or_else(|| {
      eyre!("No site origin configured. Pass --origin or set `origin` in sitecache.yaml.")
    })?;

    let url = Url::parse(origin).map_err(|e| eyre!("Invalid origin '{}': {}", origin, e))?;
    if url.cannot_be_a_base() {
      return Err(eyre!("Origin '{}' cannot be used as a base URL", origin));
    }
    Ok(url)
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }

  pub fn request_timeout(&self) -> Option<Duration> {
    self.request_timeout_secs.map(Duration::from_secs)
  }
}
