use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SEARCH_LIMIT: usize = 512;
pub const DEFAULT_SPAWN_ID_OFFSET: u32 = 1000;
pub const DEFAULT_DASH_SPEED_BONUS: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagonalConfig {
    pub enabled: bool,
    /// Require both L-shaped routes around the corner to be open.
    pub strict: bool,
    /// Slide direction when a refused diagonal leaves both cardinals open.
    pub prefer_horizontal: bool,
}

impl Default for DiagonalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strict: false,
            prefer_horizontal: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathfindingConfig {
    /// Maximum node expansions per search.
    pub search_limit: usize,
}

impl Default for PathfindingConfig {
    fn default() -> Self {
        Self {
            search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// Runtime ids start this far above the highest database event id.
    pub id_offset: u32,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            id_offset: DEFAULT_SPAWN_ID_OFFSET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    pub diagonal: DiagonalConfig,
    pub pathfinding: PathfindingConfig,
    pub spawn: SpawnConfig,
    pub dash_speed_bonus: u8,
    /// Emit a debug log line for every failed route instruction.
    pub route_debug: bool,
    /// Fixed seed for random moves and spawn placement; entropy when absent.
    pub random_seed: Option<u64>,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            diagonal: DiagonalConfig::default(),
            pathfinding: PathfindingConfig::default(),
            spawn: SpawnConfig::default(),
            dash_speed_bonus: DEFAULT_DASH_SPEED_BONUS,
            route_debug: false,
            random_seed: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config json{}: {message}", at_path(.path))]
    Parse { path: String, message: String },
}

fn at_path(path: &str) -> String {
    if path.is_empty() || path == "." {
        String::new()
    } else {
        format!(" at {path}")
    }
}

impl MovementConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        serde_path_to_error::deserialize::<_, MovementConfig>(&mut deserializer).map_err(|error| {
            let path = error.path().to_string();
            ConfigError::Parse {
                path,
                message: error.into_inner().to_string(),
            }
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = MovementConfig::from_json_str("{}").expect("config");
        assert_eq!(config, MovementConfig::default());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config =
            MovementConfig::from_json_str(r#"{"diagonal":{"enabled":true},"random_seed":7}"#)
                .expect("config");
        assert!(config.diagonal.enabled);
        assert!(!config.diagonal.strict);
        assert!(config.diagonal.prefer_horizontal);
        assert_eq!(config.random_seed, Some(7));
        assert_eq!(config.pathfinding.search_limit, DEFAULT_SEARCH_LIMIT);
    }

    #[test]
    fn parse_errors_report_the_field_path() {
        let error = MovementConfig::from_json_str(r#"{"pathfinding":{"search_limit":"many"}}"#)
            .expect_err("bad type");
        let text = error.to_string();
        assert!(text.contains("pathfinding.search_limit"), "{text}");
    }
}
