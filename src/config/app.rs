// src/config/app.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::pull_events::RawPullEventsConfig;

pub const ENV_CONFIG_PATH: &str = "INAT_SYNC_CONFIG";
pub const ENV_GUNDI_API_KEY: &str = "GUNDI_API_KEY";

fn default_action_id() -> String {
    "pull_events".to_string()
}
fn default_source_url() -> String {
    "https://api.inaturalist.org/v2".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_state_path() -> PathBuf {
    PathBuf::from("state/inat_sync_state.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationSection {
    pub id: String,
    #[serde(default = "default_action_id")]
    pub action_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    #[serde(default = "default_source_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            base_url: default_source_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSection {
    pub base_url: String,
    /// "ENV" means: read from GUNDI_API_KEY
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSection {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

/// Everything the binary needs for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub integration: IntegrationSection,
    #[serde(default)]
    pub source: SourceSection,
    pub destination: DestinationSection,
    #[serde(default)]
    pub state: StateSection,
    #[serde(default)]
    pub pull_events: RawPullEventsConfig,
}

impl AppConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_secs)
    }

    pub fn destination_timeout(&self) -> Duration {
        Duration::from_secs(self.destination.timeout_secs)
    }

    fn resolve_secrets(mut self) -> Result<Self> {
        if self.destination.api_key.trim().eq_ignore_ascii_case("env") {
            self.destination.api_key = std::env::var(ENV_GUNDI_API_KEY)
                .map_err(|_| anyhow!("Missing {ENV_GUNDI_API_KEY} env var"))?;
        }
        if self.integration.id.trim().is_empty() {
            return Err(anyhow!("integration.id must not be empty"));
        }
        Ok(self)
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_from(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing config {}", path.display()))?
        .resolve_secrets()
}

/// Load config using env var + fallbacks:
/// 1) $INAT_SYNC_CONFIG
/// 2) config/inat_sync.toml
/// 3) config/inat_sync.json
pub fn load_default() -> Result<AppConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/inat_sync.toml");
    if toml_p.exists() {
        return load_from(&toml_p);
    }
    let json_p = PathBuf::from("config/inat_sync.json");
    if json_p.exists() {
        return load_from(&json_p);
    }
    Err(anyhow!(
        "no config found: set {ENV_CONFIG_PATH} or create config/inat_sync.toml"
    ))
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AppConfig> {
    // JSON documents start with '{'; everything else is treated as TOML first.
    let looks_json = hint_ext == "json" || s.trim_start().starts_with('{');
    if looks_json {
        return serde_json::from_str(s).context("invalid JSON config");
    }
    match toml::from_str(s) {
        Ok(cfg) => Ok(cfg),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!(toml_err))
            .context("invalid TOML config"),
    }
}
