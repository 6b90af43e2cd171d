//! Map documents on disk and their runtime form.

pub(crate) mod atomic_io;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::grid::{MapGrid, MapGridError};
use crate::rules::RegionRuleSet;
use crate::world::EventDefinition;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("read map '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse map json{}: {message}", at_path(.path))]
    Parse { path: String, message: String },
    #[error("map {map_id} has invalid tile layers: {source}")]
    Grid {
        map_id: u32,
        #[source]
        source: MapGridError,
    },
    #[error("map {map_id} declares event {event_id} more than once")]
    DuplicateEvent { map_id: u32, event_id: u32 },
    #[error("map {map_id} declares an event with id 0, which is reserved for the player")]
    ReservedEventId { map_id: u32 },
}

fn at_path(path: &str) -> String {
    if path.is_empty() || path == "." {
        String::new()
    } else {
        format!(" at {path}")
    }
}

/// Serialized map document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapFile {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub loop_x: bool,
    #[serde(default)]
    pub loop_y: bool,
    #[serde(default)]
    pub regions: Vec<u8>,
    #[serde(default)]
    pub terrain_tags: Vec<u8>,
    /// Per-tile blocked-direction bits.
    #[serde(default)]
    pub passage: Vec<u8>,
    #[serde(default)]
    pub vehicle: Vec<u8>,
    #[serde(default)]
    pub rules: RegionRuleSet,
    #[serde(default)]
    pub events: Vec<EventDefinition>,
    /// Morphs on this map survive leaving and re-entering it.
    #[serde(default)]
    pub preserve_morphs: bool,
}

/// A validated map ready to be entered or used as a template source.
#[derive(Debug, Clone)]
pub struct MapData {
    pub id: u32,
    pub name: String,
    pub grid: MapGrid,
    pub rules: RegionRuleSet,
    pub events: BTreeMap<u32, EventDefinition>,
    pub preserve_morphs: bool,
}

impl MapData {
    pub fn from_file(file: MapFile) -> Result<Self, ContentError> {
        let grid = MapGrid::from_layers(
            file.width,
            file.height,
            file.regions,
            file.terrain_tags,
            file.passage,
            file.vehicle,
        )
        .map_err(|source| ContentError::Grid {
            map_id: file.id,
            source,
        })?
        .with_loops(file.loop_x, file.loop_y);

        let mut events = BTreeMap::new();
        for event in file.events {
            if event.id == 0 {
                return Err(ContentError::ReservedEventId { map_id: file.id });
            }
            let event_id = event.id;
            if events.insert(event_id, event).is_some() {
                return Err(ContentError::DuplicateEvent {
                    map_id: file.id,
                    event_id,
                });
            }
        }

        Ok(Self {
            id: file.id,
            name: file.name,
            grid,
            rules: file.rules,
            events,
            preserve_morphs: file.preserve_morphs,
        })
    }

    /// A bare map with no events, mostly for tests and tools.
    pub fn with_grid(id: u32, grid: MapGrid) -> Self {
        Self {
            id,
            name: String::new(),
            grid,
            rules: RegionRuleSet::default(),
            events: BTreeMap::new(),
            preserve_morphs: false,
        }
    }

    pub fn max_event_id(&self) -> u32 {
        self.events.keys().next_back().copied().unwrap_or(0)
    }
}

pub fn parse_map_json(raw: &str) -> Result<MapData, ContentError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    let file = serde_path_to_error::deserialize::<_, MapFile>(&mut deserializer).map_err(
        |error| {
            let path = error.path().to_string();
            ContentError::Parse {
                path,
                message: error.into_inner().to_string(),
            }
        },
    )?;
    MapData::from_file(file)
}

pub fn load_map_file(path: &Path) -> Result<MapData, ContentError> {
    let raw = fs::read_to_string(path).map_err(|source| ContentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let map = parse_map_json(&raw)?;
    info!(
        map_id = map.id,
        events = map.events.len(),
        width = map.grid.width(),
        height = map.grid.height(),
        "map_loaded"
    );
    Ok(map)
}

/// Directory of `map{id:03}.json` documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDirectory {
    root: PathBuf,
}

impl MapDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, map_id: u32) -> PathBuf {
        self.root.join(format!("map{map_id:03}.json"))
    }

    pub fn load(&self, map_id: u32) -> Result<MapData, ContentError> {
        load_map_file(&self.path_for(map_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TileCoord;

    fn sample_map() -> serde_json::Value {
        serde_json::json!({
            "id": 3,
            "name": "Harbor",
            "width": 4,
            "height": 3,
            "regions": [0,0,0,0, 0,5,0,0, 0,0,0,0],
            "rules": {"forbid": {"event": [5]}},
            "events": [
                {"id": 1, "x": 0, "y": 0},
                {"id": 7, "x": 3, "y": 2, "pages": [{"move_type": "random"}]}
            ]
        })
    }

    #[test]
    fn parses_layers_rules_and_events() {
        let map = parse_map_json(&sample_map().to_string()).expect("map");
        assert_eq!(map.id, 3);
        assert_eq!(map.grid.region_at(TileCoord::new(1, 1)), 5);
        assert!(map.rules.forbids(crate::rules::UnitType::Event, 5));
        assert_eq!(map.events.len(), 2);
        assert_eq!(map.max_event_id(), 7);
    }

    #[test]
    fn parse_errors_carry_the_json_path() {
        let mut doc = sample_map();
        doc["events"][1]["x"] = serde_json::json!("far");
        let error = parse_map_json(&doc.to_string()).expect_err("bad x");
        let text = error.to_string();
        assert!(text.contains("events[1].x"), "{text}");
    }

    #[test]
    fn layer_size_mismatches_are_rejected() {
        let mut doc = sample_map();
        doc["regions"] = serde_json::json!([1, 2, 3]);
        assert!(matches!(
            parse_map_json(&doc.to_string()),
            Err(ContentError::Grid { map_id: 3, .. })
        ));
    }

    #[test]
    fn duplicate_and_reserved_event_ids_are_rejected() {
        let mut doc = sample_map();
        doc["events"][1]["id"] = serde_json::json!(1);
        assert!(matches!(
            parse_map_json(&doc.to_string()),
            Err(ContentError::DuplicateEvent { event_id: 1, .. })
        ));

        doc["events"][1]["id"] = serde_json::json!(0);
        assert!(matches!(
            parse_map_json(&doc.to_string()),
            Err(ContentError::ReservedEventId { map_id: 3 })
        ));
    }

    #[test]
    fn directory_loads_numbered_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let maps = MapDirectory::new(dir.path());
        fs::write(maps.path_for(3), sample_map().to_string()).expect("write");
        let map = maps.load(3).expect("load");
        assert_eq!(map.name, "Harbor");
        assert!(matches!(maps.load(4), Err(ContentError::Read { .. })));
    }
}
