//! Loading configuration (API tokens, sync-client settings, exercise catalog) from TOML.
//!
//! See `AppConfig` for the expected schema:
//!
//! ```toml
//! [server]
//! port = 3000
//!
//! [[users]]
//! token = "dev-token"
//! username = "alice"
//!
//! [sync]
//! base_url = "http://localhost:3000/api"
//! cache_ttl_secs = 30
//!
//! [[exercises]]
//! id = "stash"
//! title = "Stashing"
//! tasks = [{ id = "save", steps = [{ instruction = "git stash" }] }]
//! ```

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::Exercise;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub server: ServerSettings,
  #[serde(default)]
  pub users: Vec<UserCfg>,
  #[serde(default)]
  pub sync: SyncSettings,
  /// Optional catalog; the built-in seeds are used when empty.
  #[serde(default)]
  pub exercises: Vec<Exercise>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerSettings {
  #[serde(default = "default_port")]
  pub port: u16,
  #[serde(default)]
  pub static_dir: Option<String>,
}

impl Default for ServerSettings {
  fn default() -> Self {
    Self { port: default_port(), static_dir: None }
  }
}

fn default_port() -> u16 {
  3000
}

/// Bearer token entry. Without an explicit id one is minted at startup.
#[derive(Clone, Debug, Deserialize)]
pub struct UserCfg {
  pub token: String,
  #[serde(default)]
  pub id: Option<String>,
  pub username: String,
}

/// Settings of the progress sync client.
#[derive(Clone, Debug, Deserialize)]
pub struct SyncSettings {
  #[serde(default = "default_base_url")]
  pub base_url: String,
  #[serde(default = "default_cache_ttl")]
  pub cache_ttl_secs: u64,
  #[serde(default = "default_refresh_interval")]
  pub refresh_interval_secs: u64,
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  #[serde(default = "default_backoff_base")]
  pub backoff_base_ms: u64,
  #[serde(default = "default_request_timeout")]
  pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      cache_ttl_secs: default_cache_ttl(),
      refresh_interval_secs: default_refresh_interval(),
      max_attempts: default_max_attempts(),
      backoff_base_ms: default_backoff_base(),
      request_timeout_secs: default_request_timeout(),
    }
  }
}

impl SyncSettings {
  pub fn cache_ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.cache_ttl_secs.min(u64::from(u32::MAX)) as i64)
  }

  pub fn refresh_interval(&self) -> Duration {
    Duration::from_secs(self.refresh_interval_secs.max(1))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs.max(1))
  }
}

fn default_base_url() -> String {
  "http://localhost:3000/api".into()
}
fn default_cache_ttl() -> u64 {
  30
}
fn default_refresh_interval() -> u64 {
  10
}
fn default_max_attempts() -> u32 {
  3
}
fn default_backoff_base() -> u64 {
  250
}
fn default_request_timeout() -> u64 {
  20
}

impl AppConfig {
  pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
    toml::from_str::<AppConfig>(s)
  }
}

/// Attempt to load `AppConfig` from PROGRESS_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("PROGRESS_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match AppConfig::from_toml_str(&s) {
      Ok(cfg) => {
        info!(target: "progress_backend", %path, users = cfg.users.len(), exercises = cfg.exercises.len(), "Loaded config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "progress_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "progress_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_full_config() {
    let cfg = AppConfig::from_toml_str(
      r#"
        [server]
        port = 8080

        [[users]]
        token = "t-alice"
        username = "alice"

        [[users]]
        token = "t-bob"
        id = "bob-1"
        username = "bob"

        [sync]
        cache_ttl_secs = 5
        max_attempts = 1

        [[exercises]]
        id = "stash"
        title = "Stashing"
        estimated_time = "5 minutes"
        tasks = [{ id = "save", steps = [{ instruction = "git stash" }] }]
      "#,
    )
    .unwrap();

    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.users.len(), 2);
    assert_eq!(cfg.users[1].id.as_deref(), Some("bob-1"));
    assert_eq!(cfg.sync.cache_ttl_secs, 5);
    assert_eq!(cfg.sync.refresh_interval_secs, 10);
    assert_eq!(cfg.exercises[0].estimated_time, "5 minutes");
    assert_eq!(cfg.exercises[0].tasks[0].steps.len(), 1);
  }

  #[test]
  fn empty_config_uses_defaults() {
    let cfg = AppConfig::from_toml_str("").unwrap();
    assert_eq!(cfg.server.port, 3000);
    assert_eq!(cfg.sync.cache_ttl(), chrono::Duration::seconds(30));
    assert!(cfg.exercises.is_empty());
  }
}
