//! Configuration management for luahost
//!
//! Handles loading and validation of `luahost.toml`. Every field has a
//! default, so an empty file (or no file at all) yields a working bridge.

use crate::error::{ConfigError, Result};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-read capacity of the message channel, in bytes.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,

    /// Message channel settings
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Event multiplexer settings
    #[serde(default)]
    pub looper: LooperConfig,

    /// Script environment settings
    #[serde(default)]
    pub script: ScriptConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

/// How posted script text travels to the UI thread
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Raw bytes through the pipe; one read per readiness, no framing.
    /// Writes arriving together are concatenated. A read that fills the
    /// buffer is truncated there and the rest of the pipe is dropped.
    #[default]
    Chunk,
    /// One queued message per post; the pipe only carries wake-ups.
    Queued,
}

/// Message channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelConfig {
    #[serde(default)]
    pub mode: ChannelMode,

    /// Maximum bytes consumed from the pipe per readiness
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Queued mode: maximum number of pending messages
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Queued mode: largest message `post` accepts
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            mode: ChannelMode::default(),
            read_buffer_size: default_read_buffer_size(),
            queue_capacity: default_queue_capacity(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

/// Event multiplexer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LooperConfig {
    /// Sleep applied by a poll with no registered sources
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,

    /// Upper bound on zero-timeout passes in one `drain_ready`
    #[serde(default = "default_max_drain_passes")]
    pub max_drain_passes: usize,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            idle_sleep_ms: default_idle_sleep_ms(),
            max_drain_passes: default_max_drain_passes(),
        }
    }
}

impl LooperConfig {
    #[must_use]
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

fn default_idle_sleep_ms() -> u64 {
    10
}

fn default_max_drain_passes() -> usize {
    64
}

/// Script environment configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptConfig {
    /// Entry script loaded from the asset source before `onCreate`
    #[serde(default = "default_entry")]
    pub entry: String,

    /// Fall back to global functions named after lifecycle callbacks
    #[serde(default = "default_true")]
    pub global_fallback: bool,

    /// Extra global names bound to the `post` function
    #[serde(default = "default_post_aliases")]
    pub post_aliases: Vec<String>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            entry: default_entry(),
            global_fallback: true,
            post_aliases: default_post_aliases(),
        }
    }
}

fn default_entry() -> String {
    "init.lua".to_string()
}

fn default_true() -> bool {
    true
}

fn default_post_aliases() -> Vec<String> {
    vec!["uipost".to_string()]
}

impl Config {
    /// Default config file location: `<config dir>/luahost/luahost.toml`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("luahost").join("luahost.toml"))
    }

    /// Load configuration from the default location, falling back to
    /// defaults when no file exists there.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse and validate configuration text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("channel.read_buffer_size must be > 0".into()).into());
        }
        if self.channel.mode == ChannelMode::Queued {
            if self.channel.queue_capacity == 0 {
                return Err(
                    ConfigError::Invalid("channel.queue_capacity must be > 0".into()).into(),
                );
            }
            if self.channel.max_message_bytes == 0 {
                return Err(
                    ConfigError::Invalid("channel.max_message_bytes must be > 0".into()).into(),
                );
            }
        }
        if self.looper.max_drain_passes == 0 {
            return Err(ConfigError::Invalid("looper.max_drain_passes must be > 0".into()).into());
        }
        if self.script.entry.trim().is_empty() {
            return Err(ConfigError::Invalid("script.entry must not be empty".into()).into());
        }
        Ok(())
    }
}
