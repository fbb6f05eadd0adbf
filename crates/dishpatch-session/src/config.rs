//! Session configuration.
//!
//! Configuration is read from `~/.config/dishpatch/session.json` when present,
//! and can be overridden from the environment (a `.env` file is honoured).
//! Durable and staged storage default to `~/.local/share/dishpatch/`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Application name used for config/storage directory paths
const APP_NAME: &str = "dishpatch";

/// Config file name
const CONFIG_FILE: &str = "session.json";

/// Durable session store file name
const SESSION_STORE_FILE: &str = "session.json";

/// Staged one-shot store file name
const STAGED_STORE_FILE: &str = "staged.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL the `token/refresh/` and `token/verify/` paths hang off
    pub api_base: String,
    pub login_path: String,
    pub expiry_buffer_secs: u64,
    pub refresh_interval_secs: u64,
    pub refresh_threshold_secs: u64,
    pub request_timeout_secs: u64,
    pub storage_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/api".to_string(),
            login_path: crate::auth::termination::DEFAULT_LOGIN_PATH.to_string(),
            expiry_buffer_secs: crate::auth::expiry::DEFAULT_EXPIRY_BUFFER_SECS as u64,
            refresh_interval_secs: crate::auth::scheduler::DEFAULT_REFRESH_INTERVAL.as_secs(),
            refresh_threshold_secs: crate::auth::scheduler::DEFAULT_REFRESH_THRESHOLD.as_secs(),
            request_timeout_secs: crate::api::client::REQUEST_TIMEOUT_SECS,
            storage_dir: None,
        }
    }
}

impl SessionConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Self = serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// `load()` followed by environment overrides.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (silently ignore if not found)
        let _ = dotenvy::dotenv();
        let mut config = Self::load()?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_base) = var("DISHPATCH_API_BASE") {
            self.api_base = api_base;
        }
        if let Some(login_path) = var("DISHPATCH_LOGIN_PATH") {
            self.login_path = login_path;
        }
        if let Some(timeout) = var("DISHPATCH_REQUEST_TIMEOUT_SECS") {
            match timeout.parse() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(e) => warn!(value = %timeout, error = %e, "Ignoring invalid DISHPATCH_REQUEST_TIMEOUT_SECS"),
            }
        }
        if let Some(dir) = var("DISHPATCH_STORAGE_DIR") {
            self.storage_dir = Some(PathBuf::from(dir));
        }
        debug!(api_base = %self.api_base, "Session config resolved");
    }

    /// Reject values the session components cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_secs == 0 {
            bail!("refresh_interval_secs must be at least 1");
        }
        self.expiry_buffer()?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn storage_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.storage_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn session_store_path(&self) -> Result<PathBuf> {
        Ok(self.storage_dir()?.join(SESSION_STORE_FILE))
    }

    pub fn staged_store_path(&self) -> Result<PathBuf> {
        Ok(self.storage_dir()?.join(STAGED_STORE_FILE))
    }

    pub fn expiry_buffer(&self) -> Result<chrono::Duration> {
        i64::try_from(self.expiry_buffer_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .with_context(|| format!("expiry_buffer_secs out of range: {}", self.expiry_buffer_secs))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
