//! Copy, morph, spawn and despawn of events from template definitions.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::grid::{Direction, TileCoord};
use crate::persistence::{MorphRecord, SpawnedEventRecord};
use crate::rules::{CollisionMode, Mover, UnitType};

use super::character::{Character, CharacterId, EntityOrigin};
use super::event::{character_for, EventDefinition};
use super::{HookPhase, KernelCue, LifecycleCue, MapWorld};

/// Where a template definition comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// An entry in the template registry.
    Named(String),
    Event { map_id: u32, event_id: u32 },
}

impl TemplateSource {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn event(map_id: u32, event_id: u32) -> Self {
        Self::Event { map_id, event_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementTarget {
    Point(TileCoord),
    /// Any tile whose region is in the set.
    Regions(BTreeSet<u8>),
    TerrainTags(BTreeSet<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnPlacement {
    pub target: PlacementTarget,
    /// Refuse tiles a blocking character already covers.
    pub check_collision: bool,
    /// Refuse tiles an event could not stand on.
    pub check_passability: bool,
}

impl SpawnPlacement {
    pub fn at(position: TileCoord) -> Self {
        Self {
            target: PlacementTarget::Point(position),
            check_collision: true,
            check_passability: true,
        }
    }

    pub fn in_regions(regions: impl IntoIterator<Item = u8>) -> Self {
        Self {
            target: PlacementTarget::Regions(regions.into_iter().collect()),
            check_collision: true,
            check_passability: true,
        }
    }

    pub fn on_terrain_tags(tags: impl IntoIterator<Item = u8>) -> Self {
        Self {
            target: PlacementTarget::TerrainTags(tags.into_iter().collect()),
            check_collision: true,
            check_passability: true,
        }
    }

    pub fn with_collision_check(mut self, enabled: bool) -> Self {
        self.check_collision = enabled;
        self
    }

    pub fn with_passability_check(mut self, enabled: bool) -> Self {
        self.check_passability = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct ResolvedTemplate {
    map_id: u32,
    event_id: u32,
    pre_hook: Option<u32>,
    post_hook: Option<u32>,
}

impl MapWorld {
    fn resolve_template(&self, source: &TemplateSource) -> Option<ResolvedTemplate> {
        match source {
            TemplateSource::Named(name) => {
                let Some(entry) = self.registry.get(name) else {
                    warn!(template = %name, "template_not_registered");
                    return None;
                };
                Some(ResolvedTemplate {
                    map_id: entry.map_id,
                    event_id: entry.event_id,
                    pre_hook: entry.pre_hook,
                    post_hook: entry.post_hook,
                })
            }
            TemplateSource::Event { map_id, event_id } => Some(ResolvedTemplate {
                map_id: *map_id,
                event_id: *event_id,
                pre_hook: None,
                post_hook: None,
            }),
        }
    }

    /// The template event, from the current map or a preloaded one.
    fn template_definition(&self, map_id: u32, event_id: u32) -> Option<EventDefinition> {
        if map_id == self.map.id {
            let found = self.map.events.get(&event_id).cloned();
            if found.is_none() {
                warn!(map_id, event_id, "template_event_missing");
            }
            return found;
        }
        if !self.templates.is_loaded(map_id) {
            warn!(map_id, event_id, "template_map_not_loaded");
            return None;
        }
        let found = self.templates.event(map_id, event_id).cloned();
        if found.is_none() {
            warn!(map_id, event_id, "template_event_missing");
        }
        found
    }

    fn emit_hook(&mut self, hook_id: Option<u32>, phase: HookPhase, target: CharacterId) {
        if let Some(hook_id) = hook_id {
            self.push_cue(KernelCue::Lifecycle(LifecycleCue::Hook {
                hook_id,
                phase,
                target,
            }));
        }
    }

    fn is_map_event(&self, target: CharacterId) -> bool {
        if target.is_player() || !self.definitions.contains_key(&target.0) {
            warn!(target = target.0, "lifecycle_target_missing");
            return false;
        }
        true
    }

    /// Swaps in `template` as the definition of `target`, keeping its id and
    /// where it stands.
    fn replace_definition(&mut self, target: u32, template: &EventDefinition) {
        let Some(current) = self.definitions.get(&target) else {
            return;
        };
        let mut definition = template.clone();
        definition.id = target;
        definition.x = current.x;
        definition.y = current.y;
        if let Some(index) = self.index_of(CharacterId(target)) {
            let character = &mut self.characters[index];
            character.hitbox = definition.hitbox;
            character.save_location = definition.save_location;
            character.move_only_regions = definition.move_only_regions.clone();
            self.definitions.insert(target, definition);
            self.refresh_page_at(index, true);
        } else {
            self.definitions.insert(target, definition);
        }
    }

    /// Permanently replaces `target`'s definition for this visit of the map.
    pub fn copy_event(&mut self, target: CharacterId, source: &TemplateSource) -> bool {
        let Some(template) = self.resolve_template(source) else {
            return false;
        };
        let Some(definition) = self.template_definition(template.map_id, template.event_id)
        else {
            return false;
        };
        if !self.is_map_event(target) {
            return false;
        }
        self.emit_hook(template.pre_hook, HookPhase::Before, target);
        self.replace_definition(target.0, &definition);
        self.morph_backups.remove(&target.0);
        let map_id = self.map.id;
        if let Some(morphs) = self.records.morphs.get_mut(&map_id) {
            morphs.remove(&target.0);
        }
        if let Some(character) = self.character_mut(target) {
            character.origin = None;
        }
        self.push_cue(KernelCue::Lifecycle(LifecycleCue::Copied(target)));
        self.emit_hook(template.post_hook, HookPhase::After, target);
        info!(
            target = target.0,
            source_map = template.map_id,
            source_event = template.event_id,
            "event_copied"
        );
        true
    }

    /// Replaces `target`'s definition until `remove_morph`. A preserved
    /// morph, or any morph on a map that keeps morphs, is re-applied when
    /// the map is entered again.
    pub fn morph_event(
        &mut self,
        target: CharacterId,
        source: &TemplateSource,
        preserve: bool,
    ) -> bool {
        let Some(template) = self.resolve_template(source) else {
            return false;
        };
        let Some(definition) = self.template_definition(template.map_id, template.event_id)
        else {
            return false;
        };
        if !self.is_map_event(target) {
            return false;
        }
        self.emit_hook(template.pre_hook, HookPhase::Before, target);
        self.apply_morph(target.0, &definition, template.map_id, template.event_id, preserve);
        self.records.morphs.entry(self.map.id).or_default().insert(
            target.0,
            MorphRecord {
                source_map: template.map_id,
                source_event: template.event_id,
                preserved: preserve,
            },
        );
        self.push_cue(KernelCue::Lifecycle(LifecycleCue::Morphed(target)));
        self.emit_hook(template.post_hook, HookPhase::After, target);
        info!(
            target = target.0,
            source_map = template.map_id,
            source_event = template.event_id,
            preserve,
            "event_morphed"
        );
        true
    }

    fn apply_morph(
        &mut self,
        target: u32,
        definition: &EventDefinition,
        source_map: u32,
        source_event: u32,
        preserved: bool,
    ) {
        if let Some(original) = self.definitions.get(&target) {
            self.morph_backups
                .entry(target)
                .or_insert_with(|| original.clone());
        }
        self.replace_definition(target, definition);
        if let Some(character) = self.character_mut(CharacterId(target)) {
            character.origin = Some(EntityOrigin::Morphed {
                source_map,
                source_event,
                preserved,
            });
        }
    }

    pub(crate) fn restore_morph(&mut self, target: u32, record: &MorphRecord) {
        if !self.definitions.contains_key(&target) {
            return;
        }
        let Some(definition) = self.template_definition(record.source_map, record.source_event)
        else {
            return;
        };
        self.apply_morph(
            target,
            &definition,
            record.source_map,
            record.source_event,
            record.preserved,
        );
    }

    /// Restores the definition a morph replaced.
    pub fn remove_morph(&mut self, target: CharacterId) -> bool {
        let Some(original) = self.morph_backups.remove(&target.0) else {
            return false;
        };
        self.replace_definition(target.0, &original);
        if let Some(character) = self.character_mut(target) {
            character.origin = None;
        }
        if let Some(morphs) = self.records.morphs.get_mut(&self.map.id) {
            morphs.remove(&target.0);
        }
        self.push_cue(KernelCue::Lifecycle(LifecycleCue::MorphRemoved(target)));
        true
    }

    /// Places a new event built from a template. Returns `None` when the
    /// template is unknown or no candidate tile qualifies.
    pub fn spawn_event(
        &mut self,
        source: &TemplateSource,
        placement: &SpawnPlacement,
        preserve: bool,
    ) -> Option<CharacterId> {
        let template = self.resolve_template(source)?;
        let definition = self.template_definition(template.map_id, template.event_id)?;
        let Some(position) = self.pick_spawn_tile(&definition, placement) else {
            debug!(
                source_map = template.map_id,
                source_event = template.event_id,
                "spawn_placement_failed"
            );
            return None;
        };
        let id = self.allocate_spawn_id();
        let character_id = CharacterId(id);
        self.emit_hook(template.pre_hook, HookPhase::Before, character_id);
        self.insert_spawn(
            id,
            &definition,
            position,
            None,
            EntityOrigin::Spawned {
                template_map: template.map_id,
                template_event: template.event_id,
                preserved: preserve,
            },
        );
        let direction = self
            .character(character_id)
            .map_or(Direction::Down, |character| character.direction);
        self.records
            .spawned
            .entry(self.map.id)
            .or_default()
            .push(SpawnedEventRecord {
                template_map: template.map_id,
                template_event: template.event_id,
                map_id: self.map.id,
                runtime_id: id,
                x: position.x,
                y: position.y,
                direction,
                preserved: preserve,
            });
        self.push_cue(KernelCue::Lifecycle(LifecycleCue::Spawned(character_id)));
        self.emit_hook(template.post_hook, HookPhase::After, character_id);
        info!(
            event_id = id,
            x = position.x,
            y = position.y,
            preserve,
            "event_spawned"
        );
        Some(character_id)
    }

    fn pick_spawn_tile(
        &mut self,
        definition: &EventDefinition,
        placement: &SpawnPlacement,
    ) -> Option<TileCoord> {
        let grid = &self.map.grid;
        let mut candidates: Vec<TileCoord> = match &placement.target {
            PlacementTarget::Point(position) => grid.normalize(*position).into_iter().collect(),
            PlacementTarget::Regions(regions) => grid
                .coords()
                .filter(|coord| regions.contains(&grid.region_at(*coord)))
                .collect(),
            PlacementTarget::TerrainTags(tags) => grid
                .coords()
                .filter(|coord| tags.contains(&grid.terrain_tag_at(*coord)))
                .collect(),
        };
        candidates.shuffle(&mut self.rng);

        let occupants = self.occupants();
        let engine = self.engine(&occupants);
        let newcomer = Mover {
            id: None,
            unit: UnitType::Event,
            hitbox: definition.hitbox,
            through: false,
            move_only_regions: None,
        };
        let grid = &self.map.grid;
        let rules = &self.map.rules;
        candidates.into_iter().find(|coord| {
            let region = grid.region_at(*coord);
            let standable = rules.allows(UnitType::Event, region)
                || (!rules.forbids(UnitType::Event, region) && grid.is_walkable(*coord));
            (!placement.check_passability || standable)
                && (!placement.check_collision
                    || engine.blocker_at(&newcomer, *coord, CollisionMode::All).is_none())
        })
    }

    /// Runtime ids count up from the highest database event id plus the
    /// configured offset, skipping ids already in use.
    fn allocate_spawn_id(&mut self) -> u32 {
        let base = self
            .map
            .max_event_id()
            .saturating_add(self.config.spawn.id_offset);
        loop {
            let id = base.saturating_add(self.next_spawn_index);
            self.next_spawn_index = self.next_spawn_index.saturating_add(1);
            let taken =
                self.definitions.contains_key(&id) || self.index_of(CharacterId(id)).is_some();
            if !taken || id == u32::MAX {
                return id;
            }
        }
    }

    fn insert_spawn(
        &mut self,
        id: u32,
        template: &EventDefinition,
        position: TileCoord,
        direction: Option<Direction>,
        origin: EntityOrigin,
    ) {
        let mut definition = template.clone();
        definition.id = id;
        definition.x = position.x;
        definition.y = position.y;
        let mut character = character_for(id, &definition);
        character.origin = Some(origin);
        self.definitions.insert(id, definition);
        self.characters.push(character);
        let index = self.characters.len() - 1;
        self.refresh_page_at(index, true);
        if let Some(direction) = direction {
            self.characters[index].direction = direction;
        }
    }

    pub(crate) fn restore_spawn(&mut self, record: &SpawnedEventRecord) {
        let Some(definition) = self.template_definition(record.template_map, record.template_event)
        else {
            return;
        };
        if self.definitions.contains_key(&record.runtime_id) {
            warn!(event_id = record.runtime_id, "spawn_record_id_in_use");
            return;
        }
        self.insert_spawn(
            record.runtime_id,
            &definition,
            TileCoord::new(record.x, record.y),
            Some(record.direction),
            EntityOrigin::Spawned {
                template_map: record.template_map,
                template_event: record.template_event,
                preserved: record.preserved,
            },
        );
    }

    fn spawned_where(&self, predicate: impl Fn(&Character) -> bool) -> Vec<CharacterId> {
        self.characters
            .iter()
            .filter(|character| matches!(character.origin, Some(EntityOrigin::Spawned { .. })))
            .filter(|character| predicate(character))
            .map(|character| character.id)
            .collect()
    }

    fn remove_spawns(&mut self, ids: &[CharacterId]) -> usize {
        let map_id = self.map.id;
        for id in ids {
            self.characters.retain(|character| character.id != *id);
            self.definitions.remove(&id.0);
            if let Some(records) = self.records.spawned.get_mut(&map_id) {
                records.retain(|record| record.runtime_id != id.0);
            }
            self.state.self_state_mut().clear_event(map_id, id.0);
            self.push_cue(KernelCue::Lifecycle(LifecycleCue::Despawned(*id)));
            debug!(event_id = id.0, "event_despawned");
        }
        ids.len()
    }

    /// Removes one spawned event. Map events cannot be despawned.
    pub fn despawn_event(&mut self, id: CharacterId) -> bool {
        let ids = self.spawned_where(|character| character.id == id);
        self.remove_spawns(&ids) > 0
    }

    pub fn despawn_in_regions(&mut self, regions: &BTreeSet<u8>) -> usize {
        let grid = &self.map.grid;
        let ids =
            self.spawned_where(|character| regions.contains(&grid.region_at(character.position)));
        self.remove_spawns(&ids)
    }

    pub fn despawn_on_terrain_tags(&mut self, tags: &BTreeSet<u8>) -> usize {
        let grid = &self.map.grid;
        let ids =
            self.spawned_where(|character| tags.contains(&grid.terrain_tag_at(character.position)));
        self.remove_spawns(&ids)
    }

    /// Removes spawned events whose footprint covers `position`.
    pub fn despawn_at(&mut self, position: TileCoord) -> usize {
        let ids =
            self.spawned_where(|character| character.hitbox.contains(character.position, position));
        self.remove_spawns(&ids)
    }

    pub fn despawn_all(&mut self) -> usize {
        let ids = self.spawned_where(|_| true);
        self.remove_spawns(&ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MovementConfig;
    use crate::content::MapData;
    use crate::grid::MapGrid;
    use crate::state::SwitchSlot;
    use crate::world::{EventPage, MoveType, TemplateEntry, TemplateRegistry};

    fn template_map() -> MapData {
        let mut map = MapData::with_grid(50, MapGrid::open(3, 3).expect("grid"));
        map.events.insert(
            1,
            EventDefinition {
                id: 1,
                name: "Slime".to_string(),
                x: 0,
                y: 0,
                pages: vec![EventPage {
                    move_type: MoveType::Random,
                    ..EventPage::default()
                }],
                hitbox: Default::default(),
                save_location: false,
                move_only_regions: None,
            },
        );
        map
    }

    fn home_map() -> MapData {
        let mut grid = MapGrid::open(5, 5).expect("grid");
        grid.set_region(TileCoord::new(4, 4), 7);
        grid.set_region(TileCoord::new(3, 4), 7);
        let mut map = MapData::with_grid(1, grid);
        map.events.insert(
            2,
            EventDefinition {
                id: 2,
                name: "Statue".to_string(),
                x: 1,
                y: 1,
                pages: vec![EventPage::default()],
                hitbox: Default::default(),
                save_location: false,
                move_only_regions: None,
            },
        );
        map
    }

    fn world() -> MapWorld {
        let config = MovementConfig {
            random_seed: Some(5),
            ..MovementConfig::default()
        };
        let mut world = MapWorld::new(config, home_map());
        world.templates_mut().insert(template_map());
        let mut registry = TemplateRegistry::default();
        registry.insert(
            "Slime",
            TemplateEntry {
                map_id: 50,
                event_id: 1,
                pre_hook: Some(11),
                post_hook: Some(12),
            },
        );
        world.set_registry(registry);
        world
    }

    #[test]
    fn spawn_ids_start_above_the_database_ids_plus_offset() {
        let mut world = world();
        let slime = TemplateSource::named("Slime");
        let first = world.spawn_event(&slime, &SpawnPlacement::at(TileCoord::new(3, 3)), false);
        let second = world.spawn_event(&slime, &SpawnPlacement::at(TileCoord::new(2, 3)), false);
        assert_eq!(first, Some(CharacterId(1003)));
        assert_eq!(second, Some(CharacterId(1004)));
        let spawned = world.character(CharacterId(1003)).expect("spawned");
        assert_eq!(spawned.move_type, MoveType::Random);
        assert_eq!(spawned.position, TileCoord::new(3, 3));
    }

    #[test]
    fn hooks_wrap_the_spawn_cue() {
        let mut world = world();
        let id = world
            .spawn_event(
                &TemplateSource::named("Slime"),
                &SpawnPlacement::at(TileCoord::new(0, 4)),
                false,
            )
            .expect("spawn");
        let cues = world.drain_cues();
        assert_eq!(
            cues,
            vec![
                KernelCue::Lifecycle(LifecycleCue::Hook {
                    hook_id: 11,
                    phase: HookPhase::Before,
                    target: id,
                }),
                KernelCue::Lifecycle(LifecycleCue::Spawned(id)),
                KernelCue::Lifecycle(LifecycleCue::Hook {
                    hook_id: 12,
                    phase: HookPhase::After,
                    target: id,
                }),
            ]
        );
    }

    #[test]
    fn occupied_points_refuse_a_checked_spawn() {
        let mut world = world();
        let slime = TemplateSource::event(50, 1);
        let on_statue = SpawnPlacement::at(TileCoord::new(1, 1));
        assert_eq!(world.spawn_event(&slime, &on_statue, false), None);
        let unchecked = on_statue.with_collision_check(false);
        assert!(world.spawn_event(&slime, &unchecked, false).is_some());
    }

    #[test]
    fn region_placement_only_uses_matching_tiles() {
        let mut world = world();
        let slime = TemplateSource::event(50, 1);
        let placement = SpawnPlacement::in_regions([7]);
        let a = world.spawn_event(&slime, &placement, false).expect("first");
        let b = world.spawn_event(&slime, &placement, false).expect("second");
        let mut spots = vec![
            world.character(a).expect("a").position,
            world.character(b).expect("b").position,
        ];
        spots.sort_by_key(|coord| coord.x);
        assert_eq!(spots, vec![TileCoord::new(3, 4), TileCoord::new(4, 4)]);
        assert_eq!(world.spawn_event(&slime, &placement, false), None);
    }

    #[test]
    fn unloaded_template_maps_are_a_no_op() {
        let mut world = world();
        let missing = TemplateSource::event(77, 1);
        assert_eq!(
            world.spawn_event(&missing, &SpawnPlacement::at(TileCoord::new(0, 0)), false),
            None
        );
        assert!(!world.copy_event(CharacterId(2), &missing));
        assert_eq!(world.characters().len(), 2);
    }

    #[test]
    fn despawn_removes_only_spawned_events() {
        let mut world = world();
        let slime = TemplateSource::event(50, 1);
        let id = world
            .spawn_event(&slime, &SpawnPlacement::at(TileCoord::new(4, 4)), false)
            .expect("spawn");
        world
            .state_mut()
            .self_state_mut()
            .set_switch(1, id.0, SwitchSlot::A, true);
        assert!(!world.despawn_event(CharacterId(2)));
        assert_eq!(world.despawn_in_regions(&BTreeSet::from([7])), 1);
        assert!(world.character(id).is_none());
        assert!(world.state().self_state().is_empty());
        assert_eq!(world.despawn_all(), 0);
    }

    #[test]
    fn morphs_can_be_undone() {
        let mut world = world();
        assert!(world.morph_event(CharacterId(2), &TemplateSource::named("Slime"), false));
        let morphed = world.character(CharacterId(2)).expect("event");
        assert_eq!(morphed.move_type, MoveType::Random);
        assert_eq!(morphed.position, TileCoord::new(1, 1));
        assert!(matches!(morphed.origin, Some(EntityOrigin::Morphed { .. })));

        assert!(world.remove_morph(CharacterId(2)));
        let restored = world.character(CharacterId(2)).expect("event");
        assert_eq!(restored.move_type, MoveType::Fixed);
        assert_eq!(restored.origin, None);
        assert!(!world.remove_morph(CharacterId(2)));
    }

    #[test]
    fn preserved_morphs_return_with_the_map() {
        let mut world = world();
        assert!(world.morph_event(CharacterId(2), &TemplateSource::event(50, 1), true));
        world.enter_map(MapData::with_grid(9, MapGrid::open(2, 2).expect("grid")));
        world.enter_map(home_map());
        let event = world.character(CharacterId(2)).expect("event");
        assert_eq!(event.move_type, MoveType::Random);

        assert!(world.morph_event(CharacterId(2), &TemplateSource::event(50, 1), false));
        world.enter_map(MapData::with_grid(9, MapGrid::open(2, 2).expect("grid")));
        world.enter_map(home_map());
        let event = world.character(CharacterId(2)).expect("event");
        assert_eq!(event.move_type, MoveType::Fixed);
    }

    #[test]
    fn copies_keep_the_id_and_tile() {
        let mut world = world();
        assert!(world.copy_event(CharacterId(2), &TemplateSource::named("Slime")));
        let copied = world.character(CharacterId(2)).expect("event");
        assert_eq!(copied.position, TileCoord::new(1, 1));
        assert_eq!(copied.move_type, MoveType::Random);
        assert_eq!(world.event_definition(2).map(|d| d.name.as_str()), Some("Slime"));
        assert!(!world.copy_event(CharacterId::PLAYER, &TemplateSource::named("Slime")));
    }

    #[test]
    fn copying_over_a_preserved_morph_drops_its_record() {
        let mut world = world();
        let mut chasers = MapData::with_grid(51, MapGrid::open(2, 2).expect("grid"));
        chasers.events.insert(
            1,
            EventDefinition {
                id: 1,
                name: "Hound".to_string(),
                x: 0,
                y: 0,
                pages: vec![EventPage {
                    move_type: MoveType::TowardPlayer,
                    ..EventPage::default()
                }],
                hitbox: Default::default(),
                save_location: false,
                move_only_regions: None,
            },
        );
        world.templates_mut().insert(chasers);

        assert!(world.morph_event(CharacterId(2), &TemplateSource::event(50, 1), true));
        assert!(world.copy_event(CharacterId(2), &TemplateSource::event(51, 1)));
        assert_eq!(
            world.character(CharacterId(2)).map(|c| c.move_type),
            Some(MoveType::TowardPlayer)
        );
        assert!(world.records.morphs.get(&1).map_or(true, |m| m.is_empty()));

        world.enter_map(MapData::with_grid(9, MapGrid::open(2, 2).expect("grid")));
        world.enter_map(home_map());
        let event = world.character(CharacterId(2)).expect("event");
        assert_eq!(event.move_type, MoveType::Fixed);
        assert_eq!(world.event_definition(2).map(|d| d.name.as_str()), Some("Statue"));
    }
}
