use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::db;
use crate::worker::WorkerSettings;

/// Environment variable that overrides `api_origin`.
const API_ORIGIN_ENV: &str = "MEDCACHE_API_ORIGIN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin serving pages and static assets
  pub app_origin: String,
  /// Origin of the REST API; its requests get the structured-store fallback
  pub api_origin: String,
  /// Deployed version, part of every cache generation name
  pub cache_version: String,
  /// Optional generation name prefix (e.g. "hospital" → "hospital-static-v2")
  pub cache_prefix: Option<String>,
  /// Paths pre-cached at install, relative to `app_origin`
  pub warm_set: Vec<String>,
  /// Page served to HTML requests when offline
  pub offline_page: String,
  /// Where databases and logs live (defaults to $XDG_DATA_HOME/medcache)
  pub data_dir: Option<PathBuf>,
  pub request_timeout_secs: u64,
  pub update: UpdateConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      app_origin: "http://localhost:5173".to_string(),
      api_origin: "http://localhost:5000".to_string(),
      cache_version: "v2".to_string(),
      cache_prefix: None,
      warm_set: [
        "/",
        "/index.html",
        "/manifest.json",
        "/offline.html",
        "/icons/icon-192x192.svg",
        "/icons/icon-512x512.svg",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      offline_page: "/offline.html".to_string(),
      data_dir: None,
      request_timeout_secs: 30,
      update: UpdateConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
  /// Endpoint answering the deployed version; update checks are off without it
  pub url: Option<String>,
  pub interval_secs: u64,
}

impl Default for UpdateConfig {
  fn default() -> Self {
    Self {
      url: None,
      interval_secs: 60 * 60,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./medcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/medcache/config.yaml
  ///
  /// Without any file the defaults apply.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    Ok(config.with_env_overrides(|name| std::env::var(name).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("medcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("medcache").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes to null rather than an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
    if let Some(origin) = lookup(API_ORIGIN_ENV).filter(|v| !v.is_empty()) {
      self.api_origin = origin;
    }
    self
  }

  fn app_origin_url(&self) -> Result<Url> {
    Url::parse(&self.app_origin).map_err(|e| eyre!("Invalid app_origin {}: {}", self.app_origin, e))
  }

  /// Resolve a path or absolute URL against the app origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .app_origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid URL {}: {}", path, e))
  }

  pub fn data_dir(&self) -> Result<PathBuf> {
    match &self.data_dir {
      Some(dir) => Ok(dir.clone()),
      None => db::default_dir(),
    }
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn update_url(&self) -> Result<Option<Url>> {
    self.update.url.as_deref().map(|u| self.resolve(u)).transpose()
  }

  pub fn update_interval(&self) -> Duration {
    Duration::from_secs(self.update.interval_secs.max(1))
  }

  /// Everything the worker needs, with URLs resolved.
  pub fn worker_settings(&self) -> Result<WorkerSettings> {
    if self.cache_version.trim().is_empty() {
      return Err(eyre!("cache_version must not be empty"));
    }

    let api_origin = Url::parse(&self.api_origin)
      .map_err(|e| eyre!("Invalid api_origin {}: {}", self.api_origin, e))?;
    let warm_set = self
      .warm_set
      .iter()
      .map(|path| self.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    Ok(WorkerSettings {
      api_origin,
      warm_set,
      offline_page: self.resolve(&self.offline_page)?,
      cache_prefix: self.cache_prefix.clone(),
      version: self.cache_version.trim().to_string(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.cache_version, "v2");
    assert_eq!(config.warm_set.len(), 6);
    assert_eq!(config.update.interval_secs, 3600);
  }

  #[test]
  fn test_partial_file_keeps_other_defaults() {
    let config = Config::parse(
      r#"
cache_version: v3
cache_prefix: hospital
update:
  url: /version.json
"#,
    )
    .unwrap();

    assert_eq!(config.cache_version, "v3");
    assert_eq!(config.cache_prefix.as_deref(), Some("hospital"));
    assert_eq!(config.api_origin, "http://localhost:5000");
    assert_eq!(config.update.interval_secs, 3600);
    assert_eq!(
      config.update_url().unwrap().unwrap().as_str(),
      "http://localhost:5173/version.json"
    );
  }

  #[test]
  fn test_worker_settings_resolve_paths() {
    let settings = Config::default().worker_settings().unwrap();
    assert_eq!(settings.warm_set[0].as_str(), "http://localhost:5173/");
    assert_eq!(
      settings.offline_page.as_str(),
      "http://localhost:5173/offline.html"
    );
    assert_eq!(settings.api_origin.as_str(), "http://localhost:5000/");
  }

  #[test]
  fn test_absolute_warm_set_entries_are_kept() {
    let config = Config {
      warm_set: vec!["https://cdn.example.com/app.css".into()],
      ..Config::default()
    };
    let settings = config.worker_settings().unwrap();
    assert_eq!(
      settings.warm_set[0].as_str(),
      "https://cdn.example.com/app.css"
    );
  }

  #[test]
  fn test_env_overrides_api_origin() {
    let config = Config::default().with_env_overrides(|name| {
      (name == API_ORIGIN_ENV).then(|| "https://api.hospital.example".to_string())
    });
    assert_eq!(config.api_origin, "https://api.hospital.example");

    let untouched = Config::default().with_env_overrides(|_| Some(String::new()));
    assert_eq!(untouched.api_origin, "http://localhost:5000");
  }

  #[test]
  fn test_invalid_values_are_rejected() {
    let config = Config {
      api_origin: "not a url".into(),
      ..Config::default()
    };
    assert!(config.worker_settings().is_err());

    let config = Config {
      cache_version: " ".into(),
      ..Config::default()
    };
    assert!(config.worker_settings().is_err());
  }

  #[test]
  fn test_unknown_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/definitely/not/here.yaml"))).is_err());
  }
}
