//! Runtime configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::block::BlockRegistry;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which store implementation to open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded single-writer database.
    #[default]
    Lmdb,
    /// Volatile in-process store.
    Memory,
}

/// Per-kind capture switches consulted by the recorder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tracking {
    pub block_place: bool,
    pub block_break: bool,
    pub player_interactions: bool,
    pub item_transactions: bool,
    pub buckets: bool,
    pub entity_spawns: bool,
    pub entity_kills: bool,
    pub liquid_flow: bool,
}

impl Default for Tracking {
    fn default() -> Self {
        Self {
            block_place: true,
            block_break: true,
            player_interactions: true,
            item_transactions: true,
            buckets: true,
            entity_spawns: true,
            entity_kills: true,
            liquid_flow: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendKind,
    pub database_path: PathBuf,
    pub map_size_mb: usize,
    pub default_radius: u32,
    pub max_radius: u32,
    pub lookup_page_size: usize,
    pub transaction_interval_ms: u64,
    /// Worlds to record; empty records every world.
    pub enabled_worlds: Vec<String>,
    /// Block names added on top of the built-in table.
    pub extra_blocks: BTreeMap<String, u16>,
    pub tracking: Tracking,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            database_path: PathBuf::from("worldlog-data"),
            map_size_mb: 1024,
            default_radius: 5,
            max_radius: 100,
            lookup_page_size: 4,
            transaction_interval_ms: 1000,
            enabled_worlds: Vec::new(),
            extra_blocks: BTreeMap::new(),
            tracking: Tracking::default(),
        }
    }
}

impl Config {
    /// Read, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_radius == 0 {
            return Err(ConfigError::Invalid("max_radius must be positive".into()));
        }
        if self.default_radius == 0 || self.default_radius > self.max_radius {
            return Err(ConfigError::Invalid(format!(
                "default_radius must be between 1 and {}",
                self.max_radius
            )));
        }
        if self.lookup_page_size == 0 {
            return Err(ConfigError::Invalid(
                "lookup_page_size must be positive".into(),
            ));
        }
        if self.transaction_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "transaction_interval_ms must be positive".into(),
            ));
        }
        if self.map_size_mb == 0 {
            return Err(ConfigError::Invalid("map_size_mb must be positive".into()));
        }
        if self.map_size_bytes().is_none() {
            return Err(ConfigError::Invalid(format!(
                "map_size_mb {} is too large",
                self.map_size_mb
            )));
        }
        Ok(())
    }

    /// `map_size_mb` in bytes, `None` on overflow.
    #[must_use]
    pub const fn map_size_bytes(&self) -> Option<usize> {
        self.map_size_mb.checked_mul(1024 * 1024)
    }

    #[must_use]
    pub fn transaction_interval(&self) -> Duration {
        Duration::from_millis(self.transaction_interval_ms)
    }

    #[must_use]
    pub fn is_world_enabled(&self, world: &str) -> bool {
        self.enabled_worlds.is_empty() || self.enabled_worlds.iter().any(|w| w == world)
    }

    /// Built-in block table plus `extra_blocks`.
    #[must_use]
    pub fn block_registry(&self) -> BlockRegistry {
        let mut registry = BlockRegistry::with_defaults();
        for (name, id) in &self.extra_blocks {
            registry.register(name, *id);
        }
        registry
    }
}
