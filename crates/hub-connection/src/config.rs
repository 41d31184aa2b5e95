//! Hub connection configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/cowork/realtime.toml`
//! - Windows: `%APPDATA%/cowork/realtime.toml`
//!
//! The base endpoint can be overridden with `COWORK_REALTIME_URL`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HubError;
use crate::types::{ReconnectPolicy, RetryConfig};

/// Environment variable overriding [`HubConfig::base_url`].
pub const BASE_URL_ENV: &str = "COWORK_REALTIME_URL";

/// Static hub configuration: endpoint, hub paths and retry tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Base real-time endpoint, e.g. `https://api.example.com/hubs`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Hub identifier → URL path segment.
    #[serde(default = "default_hubs")]
    pub hubs: BTreeMap<String, String>,

    /// Initial-connect retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Automatic reconnect backoff after a drop.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_base_url() -> String {
    "http://localhost:5000/hubs".into()
}

fn default_hubs() -> BTreeMap<String, String> {
    ["blogHub", "reportHub", "bookingHub"]
        .into_iter()
        .map(|h| (h.to_string(), h.to_string()))
        .collect()
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            hubs: default_hubs(),
            retry: RetryConfig::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl HubConfig {
    /// Creates a configuration with the given endpoint and hubs, default tuning.
    pub fn new<I, K, V>(base_url: impl Into<String>, hubs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            base_url: base_url.into(),
            hubs: hubs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::default()
        }
    }

    /// Loads configuration from the default path, or creates a default if
    /// not found. Applies the environment override afterwards.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path()?;

        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            let config = HubConfig::default();
            config.save_to(&path)?;
            config
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a specific file.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HubConfig = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), hubs = config.hubs.len(), "configuration loaded");
        Ok(config)
    }

    /// Saves the configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&config_path()?)
    }

    /// Saves the configuration to a specific file.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Replaces `base_url` with the environment override when set.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(BASE_URL_ENV)
            && !url.trim().is_empty()
        {
            self.base_url = url.trim().to_string();
        }
    }

    /// Checks the configuration for values that can never connect.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_url.trim().is_empty() {
            anyhow::bail!("base_url must not be empty");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if let Some((hub, _)) = self.hubs.iter().find(|(_, p)| p.trim_matches('/').is_empty()) {
            anyhow::bail!("hub '{hub}' has an empty path");
        }
        Ok(())
    }

    /// Returns `true` if `hub` is configured.
    pub fn is_known(&self, hub: &str) -> bool {
        self.hubs.contains_key(hub)
    }

    /// Returns the path segment configured for `hub`.
    pub fn hub_path(&self, hub: &str) -> Result<&str, HubError> {
        self.hubs
            .get(hub)
            .map(String::as_str)
            .ok_or_else(|| HubError::Configuration { hub: hub.into() })
    }

    /// Full hub URL: base endpoint + "/" + hub path.
    pub fn hub_url(&self, hub: &str) -> Result<String, HubError> {
        let path = self.hub_path(hub)?;
        Ok(format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("cowork").join("realtime.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("cowork")
            .join("realtime.toml"))
    }
}
