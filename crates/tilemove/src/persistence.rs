//! Saved kernel state: self state plus the per-map lifecycle records.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::content::atomic_io::write_bytes_atomic;
use crate::grid::Direction;
use crate::state::SelfStateStore;

pub const SAVE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("read save '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write save '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encode save json: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("parse save json{}: {message}", at_path(.path))]
    Parse { path: String, message: String },
    #[error("validation failed at {path}: {message}")]
    Validation { path: String, message: String },
}

fn at_path(path: &str) -> String {
    if path.is_empty() || path == "." {
        String::new()
    } else {
        format!(" at {path}")
    }
}

/// A spawned event as it must be re-created when its map is entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnedEventRecord {
    pub template_map: u32,
    pub template_event: u32,
    pub map_id: u32,
    pub runtime_id: u32,
    pub x: i32,
    pub y: i32,
    pub direction: Direction,
    pub preserved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedLocation {
    pub x: i32,
    pub y: i32,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MorphRecord {
    pub source_map: u32,
    pub source_event: u32,
    pub preserved: bool,
}

/// Lifecycle state keyed by map id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleRecords {
    pub spawned: BTreeMap<u32, Vec<SpawnedEventRecord>>,
    pub saved_locations: BTreeMap<u32, BTreeMap<u32, SavedLocation>>,
    /// Morphed event id to its template, per map.
    pub morphs: BTreeMap<u32, BTreeMap<u32, MorphRecord>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub self_state: SelfStateStore,
    #[serde(default)]
    pub records: LifecycleRecords,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: SAVE_VERSION,
            self_state: SelfStateStore::default(),
            records: LifecycleRecords::default(),
        }
    }
}

fn validation_err(path: &str, message: impl Into<String>) -> PersistenceError {
    PersistenceError::Validation {
        path: path.to_string(),
        message: message.into(),
    }
}

fn expected_actual(path: &str, expected: impl Display, actual: impl Display) -> PersistenceError {
    validation_err(path, format!("expected {expected}, got {actual}"))
}

impl PersistedState {
    pub fn to_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, PersistenceError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        let state = serde_path_to_error::deserialize::<_, PersistedState>(&mut deserializer)
            .map_err(|error| {
                let path = error.path().to_string();
                PersistenceError::Parse {
                    path,
                    message: error.into_inner().to_string(),
                }
            })?;
        state.validate()?;
        Ok(state)
    }

    pub fn validate(&self) -> Result<(), PersistenceError> {
        if self.version != SAVE_VERSION {
            return Err(expected_actual("version", SAVE_VERSION, self.version));
        }
        for (map_id, records) in &self.records.spawned {
            let mut seen = BTreeSet::new();
            for (index, record) in records.iter().enumerate() {
                let path = format!("records.spawned.{map_id}[{index}]");
                if record.map_id != *map_id {
                    return Err(expected_actual(
                        &format!("{path}.map_id"),
                        map_id,
                        record.map_id,
                    ));
                }
                if record.runtime_id == 0 {
                    return Err(validation_err(
                        &format!("{path}.runtime_id"),
                        "id 0 is reserved for the player",
                    ));
                }
                if !seen.insert(record.runtime_id) {
                    return Err(validation_err(
                        &format!("{path}.runtime_id"),
                        format!("duplicate runtime id {}", record.runtime_id),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let json = self.to_json()?;
        write_bytes_atomic(path, json.as_bytes()).map_err(|source| PersistenceError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            path = %path.display(),
            self_entries = self.self_state.len(),
            "state_saved"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let raw = fs::read_to_string(path).map_err(|source| PersistenceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let state = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            self_entries = state.self_state.len(),
            "state_loaded"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SwitchSlot;

    fn sample() -> PersistedState {
        let mut state = PersistedState::default();
        state.self_state.set_switch(3, 2, SwitchSlot::A, true);
        state.self_state.set_variable(3, 2, 5, -4);
        state.records.spawned.insert(
            3,
            vec![SpawnedEventRecord {
                template_map: 9,
                template_event: 1,
                map_id: 3,
                runtime_id: 1012,
                x: 4,
                y: 1,
                direction: Direction::Left,
                preserved: true,
            }],
        );
        state.records.saved_locations.entry(3).or_default().insert(
            2,
            SavedLocation {
                x: 1,
                y: 1,
                direction: Direction::Up,
            },
        );
        state
    }

    #[test]
    fn file_round_trip_keeps_self_state_and_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("saves").join("slot1.json");
        let state = sample();
        state.save(&path).expect("save");
        let loaded = PersistedState::load(&path).expect("load");
        assert_eq!(loaded, state);
        assert!(loaded.self_state.switch(3, 2, SwitchSlot::A));
    }

    #[test]
    fn self_state_keys_are_written_in_their_documented_form() {
        let json: serde_json::Value =
            serde_json::from_str(&sample().to_json().expect("json")).expect("value");
        assert_eq!(json["self_state"]["3,2,A"], serde_json::json!(true));
        assert_eq!(json["self_state"]["3,2,Self Vr 5"], serde_json::json!(-4));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut state = sample();
        state.version = SAVE_VERSION + 1;
        let raw = serde_json::to_string(&state).expect("json");
        let error = PersistedState::from_json(&raw).expect_err("version");
        assert_eq!(
            error.to_string(),
            format!(
                "validation failed at version: expected {SAVE_VERSION}, got {}",
                SAVE_VERSION + 1
            )
        );
    }

    #[test]
    fn duplicate_runtime_ids_are_rejected() {
        let mut state = sample();
        let copy = state.records.spawned[&3][0].clone();
        state.records.spawned.entry(3).or_default().push(copy);
        let raw = serde_json::to_string(&state).expect("json");
        assert!(matches!(
            PersistedState::from_json(&raw),
            Err(PersistenceError::Validation { .. })
        ));
    }

    #[test]
    fn parse_errors_carry_the_json_path() {
        let raw = r#"{"version":1,"self_state":{},"records":{"spawned":{"3":[{"template_map":"x"}]}}}"#;
        let error = PersistedState::from_json(raw).expect_err("bad record");
        let text = error.to_string();
        assert!(text.contains("records.spawned"), "{text}");
    }
}
