//! Configuration structs with defaults and RON persistence.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the persisted config inside the config directory.
pub const CONFIG_FILE: &str = "config.ron";

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// World storage and chunk cache settings.
    pub world: WorldConfig,
    /// Shard scheduling settings.
    pub shard: ShardConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// World storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// Directory holding the chunk files.
    pub path: PathBuf,
    /// Radius in chunks of the square loaded around a viewer.
    pub view_radius: i32,
    /// Resident chunk limit for the cache (0 = unbounded).
    pub cache_max_chunks: usize,
}

/// Shard scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShardConfig {
    /// Milliseconds between world ticks.
    pub tick_interval_ms: u64,
    /// Ticks between dirty-chunk saves (0 = only at shutdown).
    pub save_interval_ticks: u64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log filter (e.g., "debug", "info,strata_world=trace").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("world"),
            view_radius: 10,
            cache_max_chunks: 0,
        }
    }
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            save_interval_ticks: 1200,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Loads `config.ron` from `config_dir`, writing a default one if absent.
    /// The loaded settings are validated before they are returned.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let config = Self::parse(&text)?;
                log::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let config = Config::default();
                config.save(config_dir)?;
                log::info!("Wrote default config to {}", path.display());
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadError(e)),
        }
    }

    /// Writes the config to `config_dir/config.ron`, creating the directory.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;
        let text = ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::new()
                .depth_limit(2)
                .enumerate_arrays(false),
        )
        .map_err(ConfigError::SerializeError)?;
        std::fs::write(config_dir.join(CONFIG_FILE), text).map_err(ConfigError::WriteError)
    }

    /// Re-reads the file. Returns `Some(new_config)` if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let text = std::fs::read_to_string(config_dir.join(CONFIG_FILE))
            .map_err(ConfigError::ReadError)?;
        let fresh = Self::parse(&text)?;
        if fresh == *self {
            return Ok(None);
        }
        log::info!("Config changed on disk");
        Ok(Some(fresh))
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.world.view_radius < 0 {
            return Err(ConfigError::Invalid {
                field: "world.view_radius",
                reason: "must not be negative",
            });
        }
        if self.shard.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "shard.tick_interval_ms",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = ron::from_str(text).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }
}
