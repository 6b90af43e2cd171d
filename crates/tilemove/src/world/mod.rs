//! Runtime map: characters, events, lifecycle and the per-tick update.

mod character;
mod event;
mod game_map;
mod lifecycle;
mod movement;
mod templates;

pub use character::{
    Character, CharacterId, EntityOrigin, Hitbox, LastMove, MoveType, Priority,
    DEFAULT_MOVE_FREQUENCY, DEFAULT_MOVE_SPEED, MAX_MOVE_FREQUENCY, MAX_MOVE_SPEED,
};
pub use event::{EventDefinition, EventPage, PageConditions, VariableCondition};
pub use game_map::MapWorld;
pub use lifecycle::{PlacementTarget, SpawnPlacement, TemplateSource};
pub use templates::{
    MapSource, PreloadStatus, TemplateEntry, TemplateLibrary, TemplatePreload, TemplateRegistry,
};

/// Which side of a lifecycle operation a hook runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleCue {
    /// Host-side hook (a common event id) named by a template entry.
    Hook {
        hook_id: u32,
        phase: HookPhase,
        target: CharacterId,
    },
    Copied(CharacterId),
    Morphed(CharacterId),
    MorphRemoved(CharacterId),
    Spawned(CharacterId),
    Despawned(CharacterId),
}

/// Host-facing notifications queued during a tick and drained by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelCue {
    Animation {
        character: CharacterId,
        animation_id: i64,
    },
    Balloon {
        character: CharacterId,
        name: String,
    },
    Pose {
        character: CharacterId,
        name: String,
    },
    /// A crash move reached the player.
    Touch {
        character: CharacterId,
        other: CharacterId,
    },
    Lifecycle(LifecycleCue),
}
