//! Nudge configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{NudgeError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NudgeConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl NudgeConfig {
    /// Load config from the default path (~/.nudge/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NudgeError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| NudgeError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| NudgeError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Nudge home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".nudge")
    }
}

/// Telegram boundary configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// The one chat id allowed to trigger administrative commands.
    #[serde(default)]
    pub admin_chat_id: i64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    1
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            admin_chat_id: 0,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-checks. Ticks never overlap; an overrunning tick
    /// delays the next one.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Seconds between maintenance sweeps (correlation GC, cache sweep,
    /// idle rate-limit bucket eviction).
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,
}

fn default_tick_secs() -> u64 {
    60
}
fn default_sweep_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            sweep_secs: default_sweep_secs(),
        }
    }
}

/// Reply-correlation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// How long a reply can still be attributed to the prompt that caused
    /// it. Product default: 3 months.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
}

fn default_ttl_days() -> i64 {
    90
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
        }
    }
}

/// Broadcast dispatch configuration. The batch size × concurrency bound is
/// backpressure protecting the outbound channel, not a performance knob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Bounded wait for a single platform call; longer is a Timeout failure.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Page size for reading the enabled-user set.
    #[serde(default = "default_fetch_page_size")]
    pub fetch_page_size: usize,
}

fn default_batch_size() -> usize {
    10
}
fn default_max_concurrent_batches() -> usize {
    5
}
fn default_batch_delay_ms() -> u64 {
    500
}
fn default_send_timeout_secs() -> u64 {
    30
}
fn default_fetch_page_size() -> usize {
    500
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            batch_delay_ms: default_batch_delay_ms(),
            send_timeout_secs: default_send_timeout_secs(),
            fetch_page_size: default_fetch_page_size(),
        }
    }
}

/// Settings cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_cache_max_entries() -> usize {
    10_000
}
fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            default_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Persistent store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database. Empty means ~/.nudge/nudge.db.
    #[serde(default)]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: String::new(),
        }
    }
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        if self.db_path.is_empty() {
            NudgeConfig::home_dir().join("nudge.db")
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}
