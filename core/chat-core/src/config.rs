//! Configuration loading.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, then the
//! environment (after `.env` in the working directory has been loaded).
//! Credentials normally come from the environment only.

use crate::error::{ChatError, Result};
use crate::presence::DEFAULT_PRESENCE_TTL_SECS;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const URL_ENV: &str = "UPSTASH_REDIS_REST_URL";
pub const TOKEN_ENV: &str = "UPSTASH_REDIS_REST_TOKEN";
pub const CONFIG_ENV: &str = "REDIS_CHAT_CONFIG";

const DATA_DIR_NAME: &str = ".redis-chat";
const CONFIG_FILE_NAME: &str = "config.toml";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_FAILURE_BACKOFF_MS: u64 = 2_000;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: i64 = 5;
const DEFAULT_CLEANUP_INTERVAL_SECS: i64 = 5;
const DEFAULT_HISTORY_COUNT: u64 = 20;

// ═══════════════════════════════════════════════════════════════════════════════
// File Layout
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub ui: UiSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    pub url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSection {
    pub poll_interval_ms: Option<u64>,
    pub failure_backoff_ms: Option<u64>,
    pub heartbeat_interval_secs: Option<i64>,
    pub cleanup_interval_secs: Option<i64>,
    pub presence_ttl_secs: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UiSection {
    pub history_count: Option<u64>,
    pub notifications: Option<bool>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resolved Settings
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct StoreSettings {
    pub url: String,
    pub token: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSettings")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub failure_backoff: Duration,
    pub heartbeat_interval_secs: i64,
    pub cleanup_interval_secs: i64,
    pub presence_ttl_secs: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            failure_backoff: Duration::from_millis(DEFAULT_FAILURE_BACKOFF_MS),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            presence_ttl_secs: DEFAULT_PRESENCE_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiSettings {
    pub history_count: u64,
    pub notifications: bool,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            history_count: DEFAULT_HISTORY_COUNT,
            notifications: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub store: StoreSettings,
    pub sync: SyncSettings,
    pub ui: UiSettings,
}

impl ChatConfig {
    /// Merges a parsed file with environment lookups and validates the result.
    pub fn resolve<F>(file: FileConfig, lookup_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let url = non_empty(lookup_env(URL_ENV))
            .or_else(|| non_empty(file.store.url.clone()))
            .ok_or(ChatError::ConfigMissing(URL_ENV))?;
        let token = non_empty(lookup_env(TOKEN_ENV)).ok_or(ChatError::ConfigMissing(TOKEN_ENV))?;

        let defaults = SyncSettings::default();
        let sync = SyncSettings {
            poll_interval: file
                .sync
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            failure_backoff: file
                .sync
                .failure_backoff_ms
                .map_or(defaults.failure_backoff, Duration::from_millis),
            heartbeat_interval_secs: file
                .sync
                .heartbeat_interval_secs
                .unwrap_or(defaults.heartbeat_interval_secs),
            cleanup_interval_secs: file
                .sync
                .cleanup_interval_secs
                .unwrap_or(defaults.cleanup_interval_secs),
            presence_ttl_secs: file
                .sync
                .presence_ttl_secs
                .unwrap_or(defaults.presence_ttl_secs),
        };

        let ui_defaults = UiSettings::default();
        let ui = UiSettings {
            history_count: file.ui.history_count.unwrap_or(ui_defaults.history_count),
            notifications: file.ui.notifications.unwrap_or(ui_defaults.notifications),
        };

        let config = Self {
            store: StoreSettings {
                url,
                token,
                request_timeout: Duration::from_secs(
                    file.store
                        .request_timeout_secs
                        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
                ),
            },
            sync,
            ui,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.request_timeout.is_zero() {
            return Err(invalid("store.request_timeout_secs must be positive"));
        }
        if self.sync.poll_interval.is_zero() {
            return Err(invalid("sync.poll_interval_ms must be positive"));
        }
        if self.sync.presence_ttl_secs <= 0 {
            return Err(invalid("sync.presence_ttl_secs must be positive"));
        }
        if self.sync.heartbeat_interval_secs < 0 || self.sync.cleanup_interval_secs < 0 {
            return Err(invalid("sync intervals must not be negative"));
        }
        if self.sync.heartbeat_interval_secs >= self.sync.presence_ttl_secs {
            return Err(invalid(format!(
                "sync.heartbeat_interval_secs ({}) must be shorter than sync.presence_ttl_secs ({})",
                self.sync.heartbeat_interval_secs, self.sync.presence_ttl_secs
            )));
        }
        if self.ui.history_count == 0 {
            return Err(invalid("ui.history_count must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ChatError {
    ChatError::ConfigInvalid(message.into())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Paths & Loading
// ═══════════════════════════════════════════════════════════════════════════════

/// Returns `~/.redis-chat`, home of the config file and logs.
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DATA_DIR_NAME))
}

pub fn default_config_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Reads a TOML config file. A missing file yields defaults.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|source| ChatError::Io {
        context: format!("Failed to read config {}", path.display()),
        source,
    })?;
    toml::from_str::<FileConfig>(&content).map_err(|err| ChatError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

/// Full load used by binaries: `.env`, config file, environment.
pub fn load(explicit_path: Option<PathBuf>) -> Result<ChatConfig> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
        Err(err) if err.not_found() => {}
        Err(err) => tracing::warn!(error = %err, "Failed to load .env"),
    }

    let path = explicit_path
        .or_else(|| env::var(CONFIG_ENV).ok().map(PathBuf::from))
        .or_else(default_config_path);
    let file = match &path {
        Some(path) => load_file_config(path)?,
        None => FileConfig::default(),
    };

    ChatConfig::resolve(file, |key| env::var(key).ok())
}
