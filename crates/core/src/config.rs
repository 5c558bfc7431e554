//! ClassSync Configuration
//!
//! Configuration structures with defaults supplied through serde attributes.
//! The retry bound and staleness windows live here rather than as constants.

use crate::error::ClassSyncError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default retry bound before an action is dropped
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default first backoff delay (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
/// Default backoff ceiling (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
/// Default heartbeat interval (seconds)
pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 30;
/// Default presence freshness window (seconds)
pub const DEFAULT_STALE_AFTER: u64 = 300;
/// Default reaper pass interval (seconds)
pub const DEFAULT_REAPER_INTERVAL: u64 = 60;
/// Default idle time before an abandoned session is ended (seconds)
pub const DEFAULT_SESSION_STALE_AFTER: u64 = 7200;
/// Default reaper enumeration page size
pub const DEFAULT_PAGE_SIZE: usize = 100;

// ============================================================================
// Helper functions for paths (required for serde defaults)
// ============================================================================

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_classsync_dir() -> PathBuf {
    home_dir().join(".classsync")
}

// ============================================================================
// Main Config
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Offline action queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Presence heartbeat configuration
    #[serde(default)]
    pub presence: PresenceConfig,
    /// Staleness reaper configuration
    #[serde(default)]
    pub reaper: ReaperConfig,
}

// ============================================================================
// Queue Config
// ============================================================================

/// Offline action queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// SQLite file holding pending actions
    #[serde(default = "QueueConfig::default_db_path")]
    pub db_path: PathBuf,
    /// Retries after the first failed attempt before the action is dropped
    #[serde(default = "QueueConfig::default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay in milliseconds
    #[serde(default = "QueueConfig::default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff ceiling in milliseconds
    #[serde(default = "QueueConfig::default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl QueueConfig {
    fn default_db_path() -> PathBuf {
        default_classsync_dir().join("queue.db")
    }
    fn default_max_retries() -> u32 {
        DEFAULT_MAX_RETRIES
    }
    fn default_backoff_base_ms() -> u64 {
        DEFAULT_BACKOFF_BASE_MS
    }
    fn default_backoff_max_ms() -> u64 {
        DEFAULT_BACKOFF_MAX_MS
    }

    /// Delay before retrying an action that has failed `retry_count` times
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 1u64.checked_shl(retry_count.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: Self::default_db_path(),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

// ============================================================================
// Presence Config
// ============================================================================

/// Presence heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Seconds between heartbeats while visible
    #[serde(default = "PresenceConfig::default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Freshness window: `online` requires `lastSeen` within this many seconds
    #[serde(default = "PresenceConfig::default_stale_after")]
    pub stale_after_secs: u64,
}

impl PresenceConfig {
    fn default_heartbeat_interval() -> u64 {
        DEFAULT_HEARTBEAT_INTERVAL
    }
    fn default_stale_after() -> u64 {
        DEFAULT_STALE_AFTER
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL,
            stale_after_secs: DEFAULT_STALE_AFTER,
        }
    }
}

// ============================================================================
// Reaper Config
// ============================================================================

/// Staleness reaper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Seconds between periodic passes
    #[serde(default = "ReaperConfig::default_interval")]
    pub interval_secs: u64,
    /// Presence records older than this are forced offline
    #[serde(default = "ReaperConfig::default_presence_stale_after")]
    pub presence_stale_after_secs: u64,
    /// Active sessions idle longer than this are ended
    #[serde(default = "ReaperConfig::default_session_stale_after")]
    pub session_stale_after_secs: u64,
    /// Records fetched per enumeration page
    #[serde(default = "ReaperConfig::default_page_size")]
    pub page_size: usize,
}

impl ReaperConfig {
    fn default_interval() -> u64 {
        DEFAULT_REAPER_INTERVAL
    }
    fn default_presence_stale_after() -> u64 {
        DEFAULT_STALE_AFTER
    }
    fn default_session_stale_after() -> u64 {
        DEFAULT_SESSION_STALE_AFTER
    }
    fn default_page_size() -> usize {
        DEFAULT_PAGE_SIZE
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn presence_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.presence_stale_after_secs as i64)
    }

    pub fn session_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_stale_after_secs as i64)
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_REAPER_INTERVAL,
            presence_stale_after_secs: DEFAULT_STALE_AFTER,
            session_stale_after_secs: DEFAULT_SESSION_STALE_AFTER,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

// ============================================================================
// Config Loading and Validation
// ============================================================================

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&str>) -> Result<Config, ClassSyncError> {
        let config_path = Self::resolve_config_path(path)?;
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ClassSyncError::config_parse_error(format!("Failed to read: {}", e)))?;
        let config: Config = serde_yml::from_str(&content)
            .map_err(|e| ClassSyncError::config_parse_error(format!("Failed to parse: {}", e)))?;
        ConfigValidator::validate(&config)?;
        tracing::debug!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Resolve configuration file path
    fn resolve_config_path(path: Option<&str>) -> Result<PathBuf, ClassSyncError> {
        if let Some(p) = path {
            return Ok(PathBuf::from(p));
        }

        let default_paths = [
            default_classsync_dir().join("config.yaml"),
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("classsync.yaml"),
            PathBuf::from("./classsync.yaml"),
        ];

        default_paths
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| {
                ClassSyncError::config_not_found(
                    "Config not found. Run `classsync config-sample` or create ~/.classsync/config.yaml",
                )
            })
    }
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<(), ClassSyncError> {
        if config.queue.max_retries == 0 {
            return Err(ClassSyncError::config_invalid(
                "queue.max_retries",
                "must be at least 1",
            ));
        }
        if config.queue.backoff_base_ms > config.queue.backoff_max_ms {
            return Err(ClassSyncError::config_invalid(
                "queue.backoff_base_ms",
                format!(
                    "must not exceed queue.backoff_max_ms ({})",
                    config.queue.backoff_max_ms
                ),
            ));
        }
        if config.presence.heartbeat_interval_secs == 0 {
            return Err(ClassSyncError::config_invalid(
                "presence.heartbeat_interval_secs",
                "must be at least 1",
            ));
        }
        if config.presence.stale_after_secs <= config.presence.heartbeat_interval_secs {
            return Err(ClassSyncError::config_invalid(
                "presence.stale_after_secs",
                "must be longer than the heartbeat interval",
            ));
        }
        if config.reaper.presence_stale_after_secs <= config.presence.heartbeat_interval_secs {
            return Err(ClassSyncError::config_invalid(
                "reaper.presence_stale_after_secs",
                "must be longer than the heartbeat interval",
            ));
        }
        if config.reaper.page_size == 0 {
            return Err(ClassSyncError::config_invalid(
                "reaper.page_size",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration
    pub fn load(path: &Option<String>) -> Result<Self, ClassSyncError> {
        ConfigLoader::load(path.as_deref())
    }

    /// Save configuration as YAML
    pub fn save(&self, path: &Path) -> Result<(), ClassSyncError> {
        let content = serde_yml::to_string(self)
            .map_err(|e| ClassSyncError::config_parse_error(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Sample configuration with every section spelled out
    pub fn sample() -> Self {
        Self::default()
    }
}
