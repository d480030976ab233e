//! Configuration loading and persistence.
//!
//! Settings live in `config.json` in the config directory and can be
//! overridden from the environment. The token is never written to disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::ConnectionOptions;
use crate::constants;

const CONFIG_FILE: &str = "config.json";

/// Configuration for the slack-rtm client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Negotiation endpoint (`rtm.start`).
    pub api_url: String,
    /// Bot token - NOT serialized to disk.
    #[serde(skip)]
    pub token: String,
    /// Outbound queue capacity.
    pub outbound_capacity: usize,
    /// Inbound queue capacity.
    pub inbound_capacity: usize,
    /// First reconnection delay in milliseconds.
    pub reconnect_initial_ms: u64,
    /// Reconnection delay cap in milliseconds.
    pub reconnect_max_ms: u64,
    /// Negotiation request timeout in seconds.
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: constants::DEFAULT_API_URL.to_string(),
            token: String::new(),
            outbound_capacity: constants::OUTBOUND_QUEUE_CAPACITY,
            inbound_capacity: constants::INBOUND_QUEUE_CAPACITY,
            reconnect_initial_ms: duration_ms(constants::RECONNECT_INITIAL_DELAY),
            reconnect_max_ms: duration_ms(constants::RECONNECT_MAX_DELAY),
            http_timeout_secs: constants::HTTP_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// `SLACK_RTM_CONFIG_DIR` wins; otherwise the platform config dir
    /// (e.g. `~/.config/slack-rtm`).
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("SLACK_RTM_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("slack-rtm"))
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_dir()?)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads `config.json` from `dir`, or defaults if there is none.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Apply overrides from `lookup` (the process environment in [`Self::load`]).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_url) = lookup("SLACK_API_URL") {
            self.api_url = api_url;
        }

        if let Some(token) = lookup("SLACK_TOKEN") {
            self.token = token;
        }

        if let Some(capacity) = lookup("SLACK_RTM_OUTBOUND_CAPACITY") {
            if let Ok(capacity) = capacity.parse::<usize>() {
                self.outbound_capacity = capacity;
            }
        }

        if let Some(capacity) = lookup("SLACK_RTM_INBOUND_CAPACITY") {
            if let Ok(capacity) = capacity.parse::<usize>() {
                self.inbound_capacity = capacity;
            }
        }
    }

    /// Persists the configuration to `dir`, creating it if needed.
    /// Note: the token is NOT saved.
    pub fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(path)
    }

    /// Check if a token is configured.
    pub fn has_token(&self) -> bool {
        !self.token.trim().is_empty()
    }

    /// Negotiation request timeout.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Queue and reconnection settings for the transport.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            outbound_capacity: self.outbound_capacity,
            inbound_capacity: self.inbound_capacity,
            reconnect_initial: Duration::from_millis(self.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(self.reconnect_max_ms),
        }
    }
}
