//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MOSTRADOR_SYNC_MODE=manual                                         │
//! │     MOSTRADOR_REMOTE_URL=postgres://pos@server/mostrador               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/pos/sync.toml (Linux)                                    │
//! │     ~/Library/Application Support/com.mostrador.pos/sync.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     SyncMode::Auto, 10 per batch, every 10 s, 3 attempts               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [database]
//! path = "/var/lib/mostrador/mostrador.db"
//! max_connections = 5
//!
//! [remote]
//! url = "postgres://pos@192.168.1.10/mostrador"
//! connect_timeout_secs = 5
//!
//! [sync]
//! mode = "auto"  # auto | manual | offline
//! batch_size = 10
//! poll_interval_secs = 10
//! max_attempts = 3
//! remote_timeout_secs = 5
//! initial_backoff_secs = 10
//! max_backoff_secs = 30
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use mostrador_core::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_ATTEMPTS};
use mostrador_db::DbConfig;

use crate::dispatcher::DispatcherConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::Dialect;

// =============================================================================
// Sync Mode
// =============================================================================

/// How the dispatcher is driven.
///
/// ```text
/// AUTO     background loop drains every poll interval, plus force_sync
/// MANUAL   drains only on force_sync (operator "sync now")
/// OFFLINE  queue only, nothing is ever sent
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Auto,
    Manual,
    Offline,
}

impl SyncMode {
    /// Returns true if sync is enabled at all.
    pub fn is_sync_enabled(&self) -> bool {
        !matches!(self, SyncMode::Offline)
    }

    /// Returns true if the dispatcher drains on its own timer.
    pub fn is_periodic(&self) -> bool {
        matches!(self, SyncMode::Auto)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Auto => write!(f, "auto"),
            SyncMode::Manual => write!(f, "manual"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(SyncMode::Auto),
            "manual" | "on_demand" => Ok(SyncMode::Manual),
            "offline" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: auto, manual, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Local store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits for the SQLite lock (seconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Remote authoritative store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// `postgres://...` or `sqlite:...`. Required unless mode is offline.
    #[serde(default)]
    pub url: Option<String>,

    /// Connection acquire timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            url: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Dispatcher behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub mode: SyncMode,

    /// Operations drained per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Interval between drain cycles (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Attempts before an operation is parked as failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Time bound for one remote call (seconds).
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_secs: u64,

    /// First wait after a transient failure (seconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    /// Longest wait between attempts while the remote is down (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Growth factor between consecutive backoff waits.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}
fn default_poll_interval() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_remote_timeout() -> u64 {
    5
}
fn default_initial_backoff() -> u64 {
    10
}
fn default_max_backoff() -> u64 {
    30
}
fn default_backoff_multiplier() -> f64 {
    3.0
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval(),
            max_attempts: default_max_attempts(),
            remote_timeout_secs: default_remote_timeout(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let config = Self::read(config_path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads file and environment without validating. Operator tools use
    /// this to inspect the local queue when no remote is configured.
    pub fn read(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration, including the remote URL.
    pub fn validate(&self) -> SyncResult<()> {
        self.validate_settings()?;

        match self.remote.url.as_deref() {
            Some(url) => {
                Dialect::from_url(url)?;
            }
            None if self.sync.mode.is_sync_enabled() => {
                return Err(SyncError::InvalidConfig(format!(
                    "remote.url is required in {} mode",
                    self.sync.mode
                )));
            }
            None => {}
        }

        Ok(())
    }

    /// Validates everything except the remote URL. Used when the remote
    /// store is supplied directly instead of through configuration.
    pub fn validate_settings(&self) -> SyncResult<()> {
        let sync = &self.sync;

        if sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig("batch_size must be greater than 0".into()));
        }
        if sync.max_attempts == 0 {
            return Err(SyncError::InvalidConfig("max_attempts must be greater than 0".into()));
        }
        if sync.poll_interval_secs == 0 || sync.remote_timeout_secs == 0 || sync.initial_backoff_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs, remote_timeout_secs and initial_backoff_secs must be greater than 0"
                    .into(),
            ));
        }
        if sync.max_backoff_secs < sync.initial_backoff_secs {
            return Err(SyncError::InvalidConfig(format!(
                "max_backoff_secs ({}) is below initial_backoff_secs ({})",
                sync.max_backoff_secs, sync.initial_backoff_secs
            )));
        }
        if sync.backoff_multiplier.is_nan() || sync.backoff_multiplier < 1.0 {
            return Err(SyncError::InvalidConfig("backoff_multiplier must be at least 1".into()));
        }
        if self.database.max_connections == 0 {
            return Err(SyncError::InvalidConfig("database.max_connections must be greater than 0".into()));
        }

        Ok(())
    }

    /// Applies `MOSTRADOR_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("MOSTRADOR_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(url) = lookup("MOSTRADOR_REMOTE_URL") {
            debug!("Overriding remote URL from environment");
            self.remote.url = Some(url);
        }

        if let Some(mode) = lookup("MOSTRADOR_SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding sync mode from environment");
                    self.sync.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        override_number(&lookup, "MOSTRADOR_BATCH_SIZE", &mut self.sync.batch_size);
        override_number(&lookup, "MOSTRADOR_POLL_INTERVAL_SECS", &mut self.sync.poll_interval_secs);
        override_number(&lookup, "MOSTRADOR_MAX_ATTEMPTS", &mut self.sync.max_attempts);
        override_number(&lookup, "MOSTRADOR_REMOTE_TIMEOUT_SECS", &mut self.sync.remote_timeout_secs);
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "mostrador", "pos")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    /// Local database file: configured path, else the platform data dir.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .or_else(|| {
                directories::ProjectDirs::from("com", "mostrador", "pos")
                    .map(|dirs| dirs.data_dir().join("mostrador.db"))
            })
            .unwrap_or_else(|| PathBuf::from("mostrador.db"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.sync.mode.is_sync_enabled()
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote.url.as_deref()
    }

    pub fn remote_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.connect_timeout_secs)
    }

    /// Local store configuration.
    pub fn db_config(&self) -> DbConfig {
        let mut config = DbConfig::new(self.database_path())
            .max_connections(self.database.max_connections)
            .queue_max_attempts(self.sync.max_attempts);
        config.busy_timeout = Duration::from_secs(self.database.busy_timeout_secs);
        config
    }

    /// Dispatcher timing and batch settings.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            batch_size: self.sync.batch_size,
            poll_interval: Duration::from_secs(self.sync.poll_interval_secs),
            remote_timeout: Duration::from_secs(self.sync.remote_timeout_secs),
            initial_backoff: Duration::from_secs(self.sync.initial_backoff_secs),
            max_backoff: Duration::from_secs(self.sync.max_backoff_secs),
            backoff_multiplier: self.sync.backoff_multiplier,
        }
    }
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => warn!(key, value = %raw, "Ignoring non-numeric override"),
        }
    }
}
