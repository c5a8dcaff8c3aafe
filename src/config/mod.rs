//! Agent configuration.
//!
//! Tunables come from an optional `config.toml` in the per-user config
//! directory, then `PCCTL_*` environment overrides. Backend endpoints come from
//! the credential bundle shipped next to the executable.

use crate::error::ConfigError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_STATUS_INTERVAL_SECS: u64 = 5;
const DEFAULT_RECONNECT_BACKOFF_SECS: u64 = 10;
const DEFAULT_FRESHNESS_WINDOW_MS: i64 = 300_000;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
const DEFAULT_RESUBSCRIBE_ATTEMPTS: u32 = 3;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 15;
const DEFAULT_IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const DEFAULT_STORAGE_URL: &str = "https://firebasestorage.googleapis.com/v0";
const CREDENTIALS_FILE: &str = "credentials.json";
const CONFIG_FILE: &str = "config.toml";
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between status publishes.
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
    /// Fixed wait before the supervisor re-enters Active after a channel failure.
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,
    /// Commands older than this (relative to dispatch time) are discarded.
    #[serde(default = "default_freshness_window_ms")]
    pub freshness_window_ms: i64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Consecutive failed resubscriptions tolerated before the channel gives up.
    #[serde(default = "default_resubscribe_attempts")]
    pub resubscribe_attempts: u32,
    /// Upper bound for any single OS tool invocation.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Abort a subscription that produced nothing (not even keep-alives) for
    /// this long. Off unless set.
    #[serde(default)]
    pub stream_idle_timeout_secs: Option<u64>,
    #[serde(skip)]
    pub session_path: PathBuf,
    #[serde(skip)]
    pub credentials_path: PathBuf,
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_status_interval_secs() -> u64 {
    DEFAULT_STATUS_INTERVAL_SECS
}
fn default_reconnect_backoff_secs() -> u64 {
    DEFAULT_RECONNECT_BACKOFF_SECS
}
fn default_freshness_window_ms() -> i64 {
    DEFAULT_FRESHNESS_WINDOW_MS
}
fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}
fn default_resubscribe_attempts() -> u32 {
    DEFAULT_RESUBSCRIBE_ATTEMPTS
}
fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status_interval_secs: DEFAULT_STATUS_INTERVAL_SECS,
            reconnect_backoff_secs: DEFAULT_RECONNECT_BACKOFF_SECS,
            freshness_window_ms: DEFAULT_FRESHNESS_WINDOW_MS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            resubscribe_attempts: DEFAULT_RESUBSCRIBE_ATTEMPTS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            stream_idle_timeout_secs: None,
            session_path: PathBuf::from(SESSION_FILE),
            credentials_path: PathBuf::from(CREDENTIALS_FILE),
            config_path: PathBuf::from(CONFIG_FILE),
        }
    }
}

impl Config {
    /// Resolve paths, read `config.toml` if present, apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("", "", "pcctl").ok_or(ConfigError::NoDataDir)?;
        let config_path = dirs.config_dir().join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            Self::from_toml_file(&config_path)?
        } else {
            Self::default()
        };
        config.config_path = config_path;
        config.session_path = env_path("PCCTL_SESSION_FILE")
            .unwrap_or_else(|| dirs.data_dir().join(SESSION_FILE));
        config.credentials_path =
            env_path("PCCTL_CREDENTIALS").unwrap_or_else(default_credentials_path);
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u64("PCCTL_STATUS_INTERVAL_SECS").filter(|v| *v >= 1) {
            self.status_interval_secs = v;
        }
        if let Some(v) = env_u64("PCCTL_RECONNECT_BACKOFF_SECS") {
            self.reconnect_backoff_secs = v;
        }
        if let Some(v) = env_u64("PCCTL_FRESHNESS_WINDOW_MS") {
            self.freshness_window_ms = i64::try_from(v).unwrap_or(i64::MAX);
        }
        if let Some(v) = env_u64("PCCTL_SHUTDOWN_GRACE_SECS") {
            self.shutdown_grace_secs = v;
        }
        if let Some(v) = env_u64("PCCTL_RESUBSCRIBE_ATTEMPTS") {
            self.resubscribe_attempts = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = env_u64("PCCTL_COMMAND_TIMEOUT_SECS").filter(|v| *v >= 1) {
            self.command_timeout_secs = v;
        }
        if let Some(v) = env_u64("PCCTL_STREAM_IDLE_TIMEOUT_SECS").filter(|v| *v > 0) {
            self.stream_idle_timeout_secs = Some(v);
        }
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_secs.map(Duration::from_secs)
    }
}

/// Backend endpoints and secrets bundled alongside the executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub database_url: String,
    pub storage_bucket: String,
    pub api_key: String,
    /// Sent as the `auth` query parameter on realtime requests.
    #[serde(default)]
    pub database_auth: Option<String>,
    /// Bearer token for object storage uploads.
    #[serde(default)]
    pub storage_token: Option<String>,
    #[serde(default = "default_identity_url")]
    pub identity_url: String,
    #[serde(default = "default_storage_url")]
    pub storage_url: String,
}

fn default_identity_url() -> String {
    DEFAULT_IDENTITY_URL.to_string()
}
fn default_storage_url() -> String {
    DEFAULT_STORAGE_URL.to_string()
}

impl CredentialBundle {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let bundle: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        bundle.normalized()
    }

    /// Trim URLs and drop blank secrets; reject bundles missing required fields.
    pub fn normalized(mut self) -> Result<Self, ConfigError> {
        self.database_url = self.database_url.trim().trim_end_matches('/').to_string();
        self.identity_url = self.identity_url.trim().trim_end_matches('/').to_string();
        self.storage_url = self.storage_url.trim().trim_end_matches('/').to_string();
        self.storage_bucket = self.storage_bucket.trim().to_string();
        self.api_key = self.api_key.trim().to_string();
        if self.database_url.is_empty() {
            return Err(ConfigError::MissingField("database_url"));
        }
        if self.storage_bucket.is_empty() {
            return Err(ConfigError::MissingField("storage_bucket"));
        }
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingField("api_key"));
        }
        self.database_auth = self
            .database_auth
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        self.storage_token = self
            .storage_token
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Ok(self)
    }
}

fn default_credentials_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(CREDENTIALS_FILE)))
        .unwrap_or_else(|| PathBuf::from(CREDENTIALS_FILE))
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}
