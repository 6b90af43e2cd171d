//! Tile movement kernel: passability, move routes, followers, pathfinding
//! and the runtime lifecycle of map events.

pub mod config;
pub mod content;
pub mod grid;
pub mod nav;
pub mod persistence;
pub mod route;
pub mod rules;
pub mod state;
pub mod sync;
pub mod world;

pub use config::{ConfigError, DiagonalConfig, MovementConfig, PathfindingConfig, SpawnConfig};
pub use content::{load_map_file, parse_map_json, ContentError, MapData, MapDirectory, MapFile};
pub use grid::{Direction, MapGrid, MapGridError, TileCoord};
pub use persistence::{
    LifecycleRecords, MorphRecord, PersistedState, PersistenceError, SavedLocation,
    SpawnedEventRecord, SAVE_VERSION,
};
pub use route::{
    compile_lines, compile_route, MoveRoute, MoveRouteDef, NullScriptHost, RouteError,
    ScriptError, ScriptHost,
};
pub use rules::{RegionRuleSet, RuleKey, UnitType, VehicleKind};
pub use state::{GameState, SelfContext, SelfStateStore, SwitchSlot};
pub use sync::{SyncLink, SyncPolicy};
pub use world::{
    Character, CharacterId, EventDefinition, EventPage, HookPhase, KernelCue, LifecycleCue,
    MapWorld, MoveType, PlacementTarget, SpawnPlacement, TemplateLibrary, TemplatePreload,
    TemplateRegistry, TemplateSource,
};
