//! Session configuration.

use std::path::Path;

use minimap_state::Millis;
use serde::Deserialize;
use thiserror::Error;

pub use minimap_state::{DEFAULT_WORLD_SIZE, ENTITY_TTL_MS};

/// Eviction sweep cadence (1 Hz).
pub const SWEEP_INTERVAL_MS: Millis = 1_000;

/// Relay address used when the host has none persisted.
pub const DEFAULT_RELAY_ADDRESS: &str = "ws://127.0.0.1:34343";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunables for one [`Session`](crate::Session). Every field is optional in
/// TOML; missing ones take the defaults below.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// An entity is stale once `now - last_update` exceeds this.
    pub entity_ttl_ms: Millis,
    pub sweep_interval_ms: Millis,
    /// World size per axis until opposite edges refine it.
    pub default_world_size: f64,
    pub relay_address: String,
    /// While the relay is down, mirror every local cell into the party
    /// registry instead of only owned ones.
    pub relay_local_cells: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            entity_ttl_ms: ENTITY_TTL_MS,
            sweep_interval_ms: SWEEP_INTERVAL_MS,
            default_world_size: DEFAULT_WORLD_SIZE,
            relay_address: DEFAULT_RELAY_ADDRESS.to_string(),
            relay_local_cells: true,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.as_ref().display(), "loaded session config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.entity_ttl_ms, 10_000);
        assert_eq!(config.sweep_interval_ms, 1_000);
        assert_eq!(config.default_world_size, 14000.0);
        assert_eq!(config.relay_address, "ws://127.0.0.1:34343");
        assert!(config.relay_local_cells);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(
            SessionConfig::from_toml_str("").unwrap(),
            SessionConfig::default()
        );
    }

    #[test]
    fn test_partial_toml() {
        let config = SessionConfig::from_toml_str(
            r#"
            entity_ttl_ms = 5000
            relay_address = "ws://relay.local:9000"
            relay_local_cells = false
            "#,
        )
        .unwrap();
        assert_eq!(config.entity_ttl_ms, 5000);
        assert_eq!(config.relay_address, "ws://relay.local:9000");
        assert!(!config.relay_local_cells);
        assert_eq!(config.sweep_interval_ms, SWEEP_INTERVAL_MS);
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            SessionConfig::from_toml_str("entity_ttl_ms = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            SessionConfig::load("/nonexistent/minimap.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
