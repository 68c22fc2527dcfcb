use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub platform: PlatformConfig,
  /// Collection ids within the platform database
  #[serde(default)]
  pub collections: CollectionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
  /// Base endpoint of the hosted platform, e.g. "https://cloud.example.com/v1"
  pub endpoint: String,
  /// Project identifier sent with every request
  pub project: String,
  /// Database identifier for the document store
  pub database_id: String,
  /// Bucket identifier for the object store
  pub bucket_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionsConfig {
  pub users: String,
  pub posts: String,
  pub comments: String,
  pub saves: String,
}

impl Default for CollectionsConfig {
  fn default() -> Self {
    Self {
      users: "users".to_string(),
      posts: "posts".to_string(),
      comments: "comments".to_string(),
      saves: "saves".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./gramsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/gramsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::Config(format!(
          "Config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(Error::Config(
        "No configuration file found. Create one at ~/.config/gramsync/config.yaml".to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("gramsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("gramsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      Error::Config(format!(
        "Failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;

    let config: Config = serde_yaml::from_str(&contents).map_err(|e| {
      Error::Config(format!(
        "Failed to parse config file {}: {}",
        path.display(),
        e
      ))
    })?;

    Ok(config)
  }

  /// Get the platform API key from environment variables.
  ///
  /// Only needed for server-side usage; browser-style session auth does not
  /// require it. Checks GRAMSYNC_API_KEY.
  pub fn get_api_key() -> Result<String> {
    std::env::var("GRAMSYNC_API_KEY").map_err(|_| {
      Error::Config(
        "Platform API key not found. Set GRAMSYNC_API_KEY environment variable.".to_string(),
      )
    })
  }

  /// Default location of the local session marker.
  ///
  /// The marker records that a prior session exists so the gate can skip the
  /// sign-in redirect; no profile fields are ever persisted.
  pub fn default_session_marker_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("gramsync").join("session"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn parses_minimal_config_with_default_collections() {
    let yaml = r#"
platform:
  endpoint: "https://cloud.example.com/v1"
  project: "demo"
  database_id: "main"
  bucket_id: "media"
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.platform.project, "demo");
    assert_eq!(config.collections.posts, "posts");
    assert_eq!(config.collections.saves, "saves");
  }

  #[test]
  fn explicit_missing_path_is_a_config_error() {
    let err = Config::load(Some(Path::new("/nonexistent/gramsync.yaml"))).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
  }

  #[test]
  fn loads_from_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
      file,
      "platform:\n  endpoint: e\n  project: p\n  database_id: d\n  bucket_id: b\n"
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.platform.database_id, "d");
  }
}
