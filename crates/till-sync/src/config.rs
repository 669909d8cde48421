//! # Sync Configuration
//!
//! Configuration management for the outbox drain.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TILL_SYNC_MODE=offline                                             │
//! │     TILL_ENDPOINT_URL=https://sync.example.com/outbox                  │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/till/sync.toml (Linux)                                   │
//! │     ~/Library/Application Support/com.till.pos/sync.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     SyncMode::Online, auto-generated device id                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Counter 1"
//!
//! [remote]
//! endpoint_url = "https://sync.example.com/outbox"
//! request_timeout_secs = 15
//!
//! [sync]
//! mode = "online"  # online | offline
//! batch_size = 50
//! poll_interval_secs = 30
//! max_retries = 0  # 0 = retry forever
//!
//! [storage]
//! data_dir = "/var/lib/till"
//! snapshot_key = "till.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "TILL_";

// =============================================================================
// Sync Mode
// =============================================================================

/// Whether the worker talks to the remote at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Drain the outbox to the configured endpoint.
    #[default]
    Online,

    /// Keep queuing locally; never push.
    Offline,
}

impl SyncMode {
    /// Returns true if sync is enabled at all.
    pub fn is_sync_enabled(&self) -> bool {
        matches!(self, SyncMode::Online)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Online => write!(f, "online"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" | "on" | "enabled" => Ok(SyncMode::Online),
            "offline" | "off" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: online, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier, sent with every delivery.
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Counter 1").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Till".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Where and how outbox entries are delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Endpoint receiving one POST per outbox entry. Required when online.
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            endpoint_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl RemoteSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Sync Behavior Settings
// =============================================================================

/// Drain loop behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub mode: SyncMode,

    /// Entries fetched per pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Seconds between passes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Attempts before an entry is parked as a dead letter (0 = infinite).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First delay (milliseconds) after a pass with failures.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound (seconds) for that delay.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_batch_size() -> u32 {
    50
}
fn default_poll_interval() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    0 // Infinite
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    300
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl SyncSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Where the ledger snapshot lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_snapshot_key")]
    pub snapshot_key: String,
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "till", "pos")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./till_data"))
}

fn default_snapshot_key() -> String {
    till_db::DEFAULT_SNAPSHOT_KEY.to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            data_dir: default_data_dir(),
            snapshot_key: default_snapshot_key(),
        }
    }
}

impl StorageSettings {
    /// Scratch directory for the working database, inside `data_dir`.
    pub fn work_dir(&self) -> PathBuf {
        self.data_dir.join("work")
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
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

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

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

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        match self.remote.endpoint_url.as_deref() {
            Some(raw) => {
                self.endpoint()?;
                debug!(endpoint = %raw, "Endpoint validated");
            }
            None if self.sync.mode.is_sync_enabled() => {
                return Err(SyncError::InvalidConfig(
                    "remote.endpoint_url is required when sync mode is online".into(),
                ));
            }
            None => {}
        }

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        if self.remote.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// The parsed endpoint. Only `http` and `https` are accepted.
    pub fn endpoint(&self) -> SyncResult<Url> {
        let raw = self
            .remote
            .endpoint_url
            .as_deref()
            .ok_or_else(|| SyncError::InvalidUrl("no endpoint configured".into()))?;

        let url = Url::parse(raw)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(SyncError::InvalidUrl(format!(
                "Endpoint must use http:// or https://, got: {}",
                other
            ))),
        }
    }

    /// Applies `TILL_*` overrides read through `lookup`.
    ///
    /// Unparseable numbers are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(id) = var("DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(name) = var("DEVICE_NAME") {
            self.device.name = name;
        }

        if let Some(mode) = var("SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding sync mode from environment");
                    self.sync.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        if let Some(url) = var("ENDPOINT_URL") {
            debug!(url = %url, "Overriding endpoint from environment");
            self.remote.endpoint_url = Some(url);
        }

        if let Some(secs) = parse_var(&var, "REQUEST_TIMEOUT_SECS") {
            self.remote.request_timeout_secs = secs;
        }

        if let Some(size) = parse_var(&var, "BATCH_SIZE") {
            self.sync.batch_size = size;
        }

        if let Some(secs) = parse_var(&var, "POLL_INTERVAL_SECS") {
            self.sync.poll_interval_secs = secs;
        }

        if let Some(retries) = parse_var(&var, "MAX_RETRIES") {
            self.sync.max_retries = retries;
        }

        if let Some(dir) = var("DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }

        if let Some(key) = var("SNAPSHOT_KEY") {
            self.storage.snapshot_key = key;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "till", "pos").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("sync.toml")
        })
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the sync mode.
    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    /// Returns true if sync is enabled.
    pub fn is_sync_enabled(&self) -> bool {
        self.sync.mode.is_sync_enabled()
    }
}

fn parse_var<T, F>(var: &F, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = var(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            let key = format!("{ENV_PREFIX}{name}");
            warn!(var = %key, value = %raw, "Ignoring unparseable override");
            None
        }
    }
}
