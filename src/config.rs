use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Name of the current cache generation, e.g. "static-v3"
  pub generation: String,
  /// Every asset that must be available offline
  pub manifest: Vec<Url>,
  /// Activate a freshly installed generation immediately instead of
  /// waiting for an explicit activation
  #[serde(default = "default_skip_waiting")]
  pub skip_waiting: bool,
  /// Cache database path (default: platform data dir)
  pub store: Option<PathBuf>,
  /// Keep the cache in memory only; nothing survives the process
  #[serde(default)]
  pub ephemeral: bool,
}

fn default_skip_waiting() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./rdx.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/rdx/config.yaml
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
        "No configuration file found. Create one at ~/.config/rdx/config.yaml\n\
                 with a cache generation name and an asset manifest."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("rdx.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("rdx").join("config.yaml");
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

    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.cache.generation.trim().is_empty() {
      return Err(eyre!("cache.generation must not be empty"));
    }
    if self.cache.manifest.is_empty() {
      return Err(eyre!("cache.manifest must list at least one asset"));
    }
    Ok(())
  }
}
