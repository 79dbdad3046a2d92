//! # frz-config
//!
//! Configuration for frz, plus the shared logging, progress, and test-tree
//! helpers used across the workspace.
//!
//! Configuration is loaded from `~/.frz/config.toml` and then overridden by
//! `FRZ_*` environment variables. Repository behaviour never depends on the
//! environment; only performance knobs live here.

pub mod logging;
pub mod progress;
pub mod testing;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
}

/// Streamer performance knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// Run the source on a worker thread, pipelined against hashing/writing.
    pub multithreaded: bool,
    /// Buffer budget of the primary queue.
    pub num_buffers: usize,
    /// Size of each pipeline buffer, in bytes.
    pub bytes_per_buffer: usize,
    /// Buffer budget of the secondary queue used by forked streaming.
    pub num_buffers_secondary: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            multithreaded: true,
            num_buffers: 4,
            bytes_per_buffer: 1 << 20,
            num_buffers_secondary: 4,
        }
    }
}

impl Config {
    /// Load from the global config file, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(path) = Self::global_config_path() {
            if path.exists() {
                debug!("loading config from {:?}", path);
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            }
        }
        config.apply_env_overrides();
        Ok(config)
    }

    /// Global config path: `~/.frz/config.toml`.
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".frz/config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("FRZ_MULTITHREADED") {
            self.stream.multithreaded = value != "0";
        }
        if let Ok(value) = std::env::var("FRZ_NUM_BUFFERS") {
            if let Ok(n) = value.parse() {
                self.stream.num_buffers = n;
            }
        }
        if let Ok(value) = std::env::var("FRZ_BYTES_PER_BUFFER") {
            if let Ok(n) = value.parse() {
                self.stream.bytes_per_buffer = n;
            }
        }
        if let Ok(value) = std::env::var("FRZ_NUM_BUFFERS_SECONDARY") {
            if let Ok(n) = value.parse() {
                self.stream.num_buffers_secondary = n;
            }
        }
    }
}
