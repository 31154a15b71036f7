use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::sync::MutationKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the worker controls, e.g. "https://app.ansury.com"
  pub origin: String,
  #[serde(default)]
  pub generations: GenerationsConfig,
  /// Critical assets pre-populated into the static generation at install
  #[serde(default = "default_static_assets")]
  pub static_assets: Vec<String>,
  /// Path fragment marking API requests (network-first)
  #[serde(default = "default_api_marker")]
  pub api_marker: String,
  /// Path fragment marking immutable assets (cache-first)
  #[serde(default = "default_asset_marker")]
  pub asset_marker: String,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Database file (default: $XDG_DATA_HOME/ansury-sw/worker.db)
  pub database: Option<PathBuf>,
  /// Per-request network timeout in seconds; unset means wait indefinitely
  pub network_timeout_secs: Option<u64>,
  #[serde(default)]
  pub logging: LoggingConfig,
}

/// Names of the cache generations this build recognizes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GenerationsConfig {
  #[serde(default = "default_shell_generation")]
  pub shell: String,
  #[serde(default = "default_static_generation", rename = "static")]
  pub static_assets: String,
  #[serde(default = "default_api_generation")]
  pub api: String,
}

impl Default for GenerationsConfig {
  fn default() -> Self {
    Self {
      shell: default_shell_generation(),
      static_assets: default_static_generation(),
      api: default_api_generation(),
    }
  }
}

impl GenerationsConfig {
  /// Every generation name that survives activation cleanup.
  pub fn recognized(&self) -> [&str; 3] {
    [
      self.shell.as_str(),
      self.static_assets.as_str(),
      self.api.as_str(),
    ]
  }

  pub fn is_recognized(&self, name: &str) -> bool {
    self.recognized().contains(&name)
  }

  /// Worker version identity. Changing any generation name makes a new version.
  pub fn version(&self) -> String {
    self.recognized().join("+")
  }
}

/// Origin paths that queued mutations are replayed against.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
  #[serde(default = "default_habit_endpoint")]
  pub habit_completion: String,
  #[serde(default = "default_journal_endpoint")]
  pub journal_entry: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      habit_completion: default_habit_endpoint(),
      journal_entry: default_journal_endpoint(),
    }
  }
}

impl SyncConfig {
  pub fn endpoint(&self, kind: MutationKind) -> &str {
    match kind {
      MutationKind::HabitCompletion => &self.habit_completion,
      MutationKind::JournalEntry => &self.journal_entry,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  /// Default filter when RUST_LOG is unset
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Daily-rolling log file; stderr only when unset
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: None,
    }
  }
}

fn default_shell_generation() -> String {
  "ansury-x-v1".to_string()
}

fn default_static_generation() -> String {
  "ansury-x-static-v1".to_string()
}

fn default_api_generation() -> String {
  "ansury-x-api-v1".to_string()
}

fn default_static_assets() -> Vec<String> {
  ["/", "/index.html", "/manifest.json", "/assets/hero-banner.jpg"]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_api_marker() -> String {
  "/api/".to_string()
}

fn default_asset_marker() -> String {
  "/assets/".to_string()
}

fn default_habit_endpoint() -> String {
  "/api/habits/complete".to_string()
}

fn default_journal_endpoint() -> String {
  "/api/journal".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Configuration with every default filled in for the given origin.
  pub fn for_origin(origin: &str) -> Self {
    Self {
      origin: origin.to_string(),
      generations: GenerationsConfig::default(),
      static_assets: default_static_assets(),
      api_marker: default_api_marker(),
      asset_marker: default_asset_marker(),
      sync: SyncConfig::default(),
      database: None,
      network_timeout_secs: None,
      logging: LoggingConfig::default(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ansury-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ansury-sw/config.yaml
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
        "No configuration file found. Create one at ~/.config/ansury-sw/config.yaml\n\
                 See ansury-sw.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("ansury-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ansury-sw").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.origin_url()?;
    Ok(config)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a path such as "/api/journal" against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }
}
