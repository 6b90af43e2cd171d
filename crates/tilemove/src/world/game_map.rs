use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::config::MovementConfig;
use crate::content::MapData;
use crate::grid::{Direction, MapGrid, TileCoord};
use crate::persistence::{
    LifecycleRecords, MorphRecord, PersistedState, SavedLocation, SAVE_VERSION,
};
use crate::route::{step_once, MoveRoute, RouteSlot, ScriptHost, StepOutcome};
use crate::rules::{Mover, Occupant, PassabilityEngine, RegionRuleSet, UnitType};
use crate::state::{GameState, SelfContext, SwitchSlot};
use crate::sync::{self, SyncLink, SyncPolicy};

use super::character::{Character, CharacterId, EntityOrigin, LastMove, MoveType};
use super::event::{apply_page, character_for, EventDefinition};
use super::templates::{TemplateLibrary, TemplateRegistry};
use super::KernelCue;

/// The map currently being played: its characters in insertion order, the
/// game state they read and write, and the per-tick update.
///
/// The player is always the first character.
#[derive(Debug)]
pub struct MapWorld {
    pub(crate) config: MovementConfig,
    pub(crate) map: MapData,
    pub(crate) characters: Vec<Character>,
    /// Live definitions by event id, including spawned and morphed ones.
    pub(crate) definitions: BTreeMap<u32, EventDefinition>,
    pub(crate) state: GameState,
    pub(crate) rng: SmallRng,
    pub(crate) cues: Vec<KernelCue>,
    pub(crate) tick: u64,
    pub(crate) templates: TemplateLibrary,
    pub(crate) registry: TemplateRegistry,
    pub(crate) records: LifecycleRecords,
    pub(crate) next_spawn_index: u32,
    /// Definitions replaced by a morph, restored by `remove_morph`.
    pub(crate) morph_backups: BTreeMap<u32, EventDefinition>,
}

impl MapWorld {
    pub fn new(config: MovementConfig, map: MapData) -> Self {
        let rng = match config.random_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let mut world = Self {
            config,
            map,
            characters: vec![Character::new(CharacterId::PLAYER, TileCoord::new(0, 0))],
            definitions: BTreeMap::new(),
            state: GameState::default(),
            rng,
            cues: Vec::new(),
            tick: 0,
            templates: TemplateLibrary::default(),
            registry: TemplateRegistry::default(),
            records: LifecycleRecords::default(),
            next_spawn_index: 1,
            morph_backups: BTreeMap::new(),
        };
        world.populate();
        world
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    pub fn map_id(&self) -> u32 {
        self.map.id
    }

    pub fn map(&self) -> &MapData {
        &self.map
    }

    pub fn grid(&self) -> &MapGrid {
        &self.map.grid
    }

    pub fn rules(&self) -> &RegionRuleSet {
        &self.map.rules
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut GameState {
        &mut self.state
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn templates(&self) -> &TemplateLibrary {
        &self.templates
    }

    pub fn templates_mut(&mut self) -> &mut TemplateLibrary {
        &mut self.templates
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn set_registry(&mut self, registry: TemplateRegistry) {
        self.registry = registry;
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn character(&self, id: CharacterId) -> Option<&Character> {
        self.characters.iter().find(|character| character.id == id)
    }

    pub fn character_mut(&mut self, id: CharacterId) -> Option<&mut Character> {
        self.characters.iter_mut().find(|character| character.id == id)
    }

    pub fn player(&self) -> &Character {
        &self.characters[0]
    }

    pub fn player_mut(&mut self) -> &mut Character {
        &mut self.characters[0]
    }

    pub fn event_definition(&self, event_id: u32) -> Option<&EventDefinition> {
        self.definitions.get(&event_id)
    }

    pub(crate) fn index_of(&self, id: CharacterId) -> Option<usize> {
        self.characters.iter().position(|character| character.id == id)
    }

    pub(crate) fn rng_mut(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    /// Self-state address of a character on this map.
    pub fn self_context(&self, id: CharacterId) -> SelfContext {
        SelfContext::new(self.map.id, id.0)
    }

    /// Reads a self switch. Zero for `map_id` or `event_id` means the
    /// current map or the caller.
    pub fn self_switch(
        &self,
        caller: CharacterId,
        map_id: u32,
        event_id: u32,
        slot: SwitchSlot,
    ) -> bool {
        let (map_id, event_id) = self.self_context(caller).resolve(map_id, event_id);
        self.state.self_state().switch(map_id, event_id, slot)
    }

    pub fn set_self_switch(
        &mut self,
        caller: CharacterId,
        map_id: u32,
        event_id: u32,
        slot: SwitchSlot,
        value: bool,
    ) {
        let (map_id, event_id) = self.self_context(caller).resolve(map_id, event_id);
        self.state
            .self_state_mut()
            .set_switch(map_id, event_id, slot, value);
    }

    /// Reads a self variable, resolving zero ids like [`Self::self_switch`].
    pub fn self_variable(&self, caller: CharacterId, map_id: u32, event_id: u32, id: u32) -> i64 {
        let (map_id, event_id) = self.self_context(caller).resolve(map_id, event_id);
        self.state.self_state().variable(map_id, event_id, id)
    }

    pub fn set_self_variable(
        &mut self,
        caller: CharacterId,
        map_id: u32,
        event_id: u32,
        id: u32,
        value: i64,
    ) {
        let (map_id, event_id) = self.self_context(caller).resolve(map_id, event_id);
        self.state
            .self_state_mut()
            .set_variable(map_id, event_id, id, value);
    }

    pub fn place_player(&mut self, position: TileCoord, direction: Direction) {
        let position = self.map.grid.normalize(position).unwrap_or(position);
        let player = self.player_mut();
        player.position = position;
        player.home = position;
        player.direction = direction;
        player.busy_ticks = 0;
    }

    /// Adds a host-managed character such as a vehicle. Returns `false` when
    /// the id is already taken.
    pub fn add_character(&mut self, character: Character) -> bool {
        if self.index_of(character.id).is_some() {
            return false;
        }
        self.characters.push(character);
        true
    }

    /// Installs a forced route, replacing whatever was running.
    pub fn set_route(&mut self, id: CharacterId, route: MoveRoute) -> bool {
        let Some(character) = self.character_mut(id) else {
            return false;
        };
        character.route.start(route);
        true
    }

    pub fn attach_sync(
        &mut self,
        follower: CharacterId,
        target: CharacterId,
        policy: SyncPolicy,
        delay: u32,
    ) -> bool {
        if follower == target {
            return false;
        }
        let Some(serial) = self.character(target).map(Character::move_serial) else {
            return false;
        };
        let Some(character) = self.character_mut(follower) else {
            return false;
        };
        let mut link = SyncLink::new(target, policy, delay);
        link.mark_seen(serial);
        character.sync = Some(link);
        true
    }

    pub fn detach_sync(&mut self, follower: CharacterId) {
        if let Some(character) = self.character_mut(follower) {
            character.sync = None;
        }
    }

    pub fn drain_cues(&mut self) -> Vec<KernelCue> {
        std::mem::take(&mut self.cues)
    }

    pub(crate) fn push_cue(&mut self, cue: KernelCue) {
        self.cues.push(cue);
    }

    pub(crate) fn occupants(&self) -> Vec<Occupant> {
        self.characters
            .iter()
            .map(|character| Occupant {
                id: character.id,
                position: character.position,
                hitbox: character.hitbox,
                blocking: character.is_blocking(),
            })
            .collect()
    }

    pub(crate) fn engine<'a>(&'a self, occupants: &'a [Occupant]) -> PassabilityEngine<'a> {
        PassabilityEngine::new(
            &self.map.grid,
            &self.map.rules,
            self.config.diagonal,
            occupants,
        )
    }

    /// Bare tile query against this map, counting every blocking character.
    pub fn can_pass_tile(&self, x: i32, y: i32, direction: Direction, unit: UnitType) -> bool {
        let occupants = self.occupants();
        self.engine(&occupants).can_pass_tile(x, y, direction, unit)
    }

    /// Runs one tick: page refresh, then every character in insertion order.
    pub fn update(&mut self, host: &mut dyn ScriptHost) {
        self.tick += 1;
        self.refresh_pages();
        let ids: Vec<CharacterId> = self.characters.iter().map(|character| character.id).collect();
        for id in ids {
            self.update_character(id, host);
        }
    }

    fn update_character(&mut self, id: CharacterId, host: &mut dyn ScriptHost) {
        let Some(index) = self.index_of(id) else {
            return;
        };
        let sync_move = self.observe_sync(index);

        let character = &mut self.characters[index];
        if character.busy_ticks > 0 {
            character.busy_ticks -= 1;
            return;
        }
        if character.route.is_running() {
            step_once(self, id, RouteSlot::Forced, host);
            return;
        }
        if let Some((link, movement)) = sync_move {
            sync::perform(self, id, link, movement, host);
            return;
        }
        if character.sync.is_some() || id.is_player() || character.page.is_none() {
            return;
        }

        character.stop_count = character.stop_count.saturating_add(1);
        if character.stop_count <= character.stop_threshold() {
            return;
        }
        let move_type = character.move_type;
        match move_type {
            MoveType::Fixed => {
                character.stop_count = 0;
            }
            MoveType::Random => {
                self.move_random(id);
            }
            MoveType::TowardPlayer => {
                let player = self.player().position;
                self.move_toward(id, player);
            }
            MoveType::Custom => {
                if step_once(self, id, RouteSlot::Custom, host) != StepOutcome::Waiting {
                    if let Some(character) = self.character_mut(id) {
                        character.stop_count = 0;
                    }
                }
            }
        }
    }

    /// Feeds the target's latest move into the follower's link and returns
    /// the move to perform this tick, if any.
    fn observe_sync(&mut self, index: usize) -> Option<(SyncLink, LastMove)> {
        let link = self.characters[index].sync?;
        let Some(target) = self.character(link.target) else {
            debug!(
                follower = self.characters[index].id.0,
                target = link.target.0,
                "sync_target_missing"
            );
            self.characters[index].sync = None;
            return None;
        };
        let (serial, last_move) = (target.move_serial(), target.last_move());
        let character = &mut self.characters[index];
        let ready = !character.is_busy() && !character.route.is_running();
        let link = character.sync.as_mut()?;
        link.observe(serial, last_move);
        let movement = link.tick(ready)?;
        Some((*link, movement))
    }

    /// Re-evaluates every event's page conditions and applies changed pages.
    pub fn refresh_pages(&mut self) {
        for index in 0..self.characters.len() {
            self.refresh_page_at(index, false);
        }
    }

    pub(crate) fn refresh_page_at(&mut self, index: usize, force: bool) {
        let character = &self.characters[index];
        if character.id.is_player() {
            return;
        }
        let Some(definition) = self.definitions.get(&character.id.0) else {
            return;
        };
        let context = SelfContext::new(self.map.id, character.id.0);
        let page = definition.active_page(&self.state, context);
        if !force && page == character.page {
            return;
        }
        let page = page.and_then(|index| definition.pages.get(index).map(|page| (index, page)));
        apply_page(&mut self.characters[index], page);
    }

    /// Leaves the current map and sets up `map`.
    pub fn enter_map(&mut self, map: MapData) {
        self.leave_map();
        info!(from = self.map.id, to = map.id, "map_transfer");
        self.map = map;
        self.populate();
    }

    fn leave_map(&mut self) {
        let map_id = self.map.id;
        let keep_morphs = self.map.preserve_morphs;
        self.capture_positions();
        if let Some(records) = self.records.spawned.get_mut(&map_id) {
            let before = records.len();
            records.retain(|record| record.preserved);
            let dropped = before - records.len();
            if dropped > 0 {
                debug!(map_id, dropped, "spawns_dropped_on_leave");
            }
        }
        let spawned_ids: Vec<u32> = self
            .characters
            .iter()
            .filter(|character| {
                matches!(
                    character.origin,
                    Some(EntityOrigin::Spawned { preserved: false, .. })
                )
            })
            .map(|character| character.id.0)
            .collect();
        for event_id in spawned_ids {
            self.state.self_state_mut().clear_event(map_id, event_id);
        }
        if let Some(morphs) = self.records.morphs.get_mut(&map_id) {
            morphs.retain(|_, record| keep_morphs || record.preserved);
        }
    }

    /// Copies live positions into the saved-location and spawn records.
    pub(crate) fn capture_positions(&mut self) {
        let map_id = self.map.id;
        for character in &self.characters {
            if character.id.is_player() {
                continue;
            }
            if character.save_location {
                self.records
                    .saved_locations
                    .entry(map_id)
                    .or_default()
                    .insert(
                        character.id.0,
                        SavedLocation {
                            x: character.position.x,
                            y: character.position.y,
                            direction: character.direction,
                        },
                    );
            }
            if let Some(records) = self.records.spawned.get_mut(&map_id) {
                if let Some(record) = records
                    .iter_mut()
                    .find(|record| record.runtime_id == character.id.0)
                {
                    record.x = character.position.x;
                    record.y = character.position.y;
                    record.direction = character.direction;
                }
            }
        }
    }

    /// Builds the character list for the current map from its events and
    /// the lifecycle records kept for it.
    fn populate(&mut self) {
        let map_id = self.map.id;
        self.characters.truncate(1);
        self.characters[0].sync = None;

        self.definitions = self.map.events.clone();
        self.morph_backups.clear();
        for (id, definition) in &self.definitions {
            self.characters.push(character_for(*id, definition));
        }

        let morphs: Vec<(u32, MorphRecord)> = self
            .records
            .morphs
            .get(&map_id)
            .map(|morphs| morphs.iter().map(|(id, record)| (*id, record.clone())).collect())
            .unwrap_or_default();
        for (target, record) in morphs {
            self.restore_morph(target, &record);
        }

        if let Some(locations) = self.records.saved_locations.get(&map_id) {
            for character in &mut self.characters {
                if !character.save_location {
                    continue;
                }
                if let Some(saved) = locations.get(&character.id.0) {
                    character.position = TileCoord::new(saved.x, saved.y);
                    character.direction = saved.direction;
                }
            }
        }

        let base = self.map.max_event_id() + self.config.spawn.id_offset;
        let spawns = self.records.spawned.get(&map_id).cloned().unwrap_or_default();
        self.next_spawn_index = spawns
            .iter()
            .map(|record| record.runtime_id.saturating_sub(base))
            .max()
            .map_or(1, |index| index + 1);
        for record in &spawns {
            self.restore_spawn(record);
        }

        for index in 0..self.characters.len() {
            self.refresh_page_at(index, true);
        }
        info!(
            map_id,
            events = self.definitions.len(),
            spawned = spawns.len(),
            "map_populated"
        );
    }

    /// Drops self state of events the current map no longer has. Nothing
    /// calls this implicitly; hosts run it after editing map data.
    pub fn purge_self_state(&mut self) -> usize {
        let live: BTreeSet<u32> = self
            .definitions
            .keys()
            .copied()
            .chain(self.characters.iter().map(|character| character.id.0))
            .collect();
        self.state
            .self_state_mut()
            .purge_missing_events(self.map.id, &live)
    }

    /// State worth keeping across sessions.
    pub fn snapshot(&mut self) -> PersistedState {
        self.capture_positions();
        PersistedState {
            version: SAVE_VERSION,
            self_state: self.state.self_state().clone(),
            records: self.records.clone(),
        }
    }

    /// Replaces self state and lifecycle records, then rebuilds the current
    /// map from them.
    pub fn restore(&mut self, saved: PersistedState) {
        self.state.replace_self_state(saved.self_state);
        self.records = saved.records;
        self.populate();
    }

    pub(crate) fn mover_at(&self, index: usize) -> Mover<'_> {
        let character = &self.characters[index];
        Mover {
            id: Some(character.id),
            unit: character.unit,
            hitbox: character.hitbox,
            through: character.through,
            move_only_regions: character.move_only_regions.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{compile_lines, NullScriptHost};
    use crate::state::SwitchSlot;
    use crate::world::{EventPage, PageConditions};

    fn open_map(id: u32) -> MapData {
        MapData::with_grid(id, MapGrid::open(6, 6).expect("grid"))
    }

    fn config() -> MovementConfig {
        MovementConfig {
            random_seed: Some(7),
            ..MovementConfig::default()
        }
    }

    fn event(id: u32, x: i32, y: i32) -> EventDefinition {
        EventDefinition {
            id,
            name: format!("EV{id:03}"),
            x,
            y,
            pages: vec![EventPage::default()],
            hitbox: Default::default(),
            save_location: false,
            move_only_regions: None,
        }
    }

    #[test]
    fn player_comes_first_then_events_in_id_order() {
        let mut map = open_map(1);
        map.events.insert(5, event(5, 1, 1));
        map.events.insert(2, event(2, 3, 3));
        let world = MapWorld::new(config(), map);
        let ids: Vec<u32> = world.characters().iter().map(|c| c.id.0).collect();
        assert_eq!(ids, vec![0, 2, 5]);
        assert_eq!(world.character(CharacterId(2)).and_then(|c| c.page), Some(0));
    }

    #[test]
    fn forced_routes_run_one_instruction_per_idle_tick() {
        let mut world = MapWorld::new(config(), open_map(1));
        world.set_route(
            CharacterId::PLAYER,
            compile_lines(["Move Right: 2"], false),
        );
        let mut host = NullScriptHost;
        world.update(&mut host);
        assert_eq!(world.player().position, TileCoord::new(1, 0));
        assert!(world.player().is_busy());

        while world.player().route.is_running() {
            world.update(&mut host);
        }
        assert_eq!(world.player().position, TileCoord::new(2, 0));
    }

    #[test]
    fn pages_follow_self_switches() {
        let mut map = open_map(1);
        let mut definition = event(3, 2, 2);
        definition.pages.push(EventPage {
            conditions: PageConditions {
                self_switch: Some(SwitchSlot::A),
                ..PageConditions::default()
            },
            through: true,
            ..EventPage::default()
        });
        map.events.insert(3, definition);
        let mut world = MapWorld::new(config(), map);
        world
            .state_mut()
            .self_state_mut()
            .set_switch(1, 3, SwitchSlot::A, true);
        world.update(&mut NullScriptHost);
        let character = world.character(CharacterId(3)).expect("event");
        assert_eq!(character.page, Some(1));
        assert!(character.through);
    }

    #[test]
    fn saved_locations_survive_a_round_trip_between_maps() {
        let mut map = open_map(1);
        let mut definition = event(4, 0, 5);
        definition.save_location = true;
        map.events.insert(4, definition);
        let first = map.clone();
        let mut world = MapWorld::new(config(), map);
        world.set_route(CharacterId(4), compile_lines(["Move Right: 1"], false));
        world.update(&mut NullScriptHost);

        world.enter_map(open_map(2));
        assert!(world.character(CharacterId(4)).is_none());
        world.enter_map(first);
        assert_eq!(
            world.character(CharacterId(4)).map(|c| c.position),
            Some(TileCoord::new(1, 5))
        );
    }

    #[test]
    fn followers_repeat_the_targets_step() {
        let mut map = open_map(1);
        map.events.insert(1, event(1, 3, 3));
        let mut world = MapWorld::new(config(), map);
        world.place_player(TileCoord::new(0, 0), Direction::Down);
        assert!(world.attach_sync(CharacterId(1), CharacterId::PLAYER, SyncPolicy::Mimic, 0));
        assert!(!world.attach_sync(CharacterId(1), CharacterId(1), SyncPolicy::Mimic, 0));

        world.set_route(CharacterId::PLAYER, compile_lines(["Move Down: 1"], false));
        world.update(&mut NullScriptHost);
        world.update(&mut NullScriptHost);
        assert_eq!(
            world.character(CharacterId(1)).map(|c| c.position),
            Some(TileCoord::new(3, 4))
        );
    }

    #[test]
    fn restoring_keeps_self_state_of_events_the_map_lacks() {
        let mut world = MapWorld::new(config(), open_map(3));
        assert!(world.event_definition(7).is_none());
        world
            .state_mut()
            .self_state_mut()
            .set_switch(3, 7, SwitchSlot::A, true);

        let raw = world.snapshot().to_json().expect("encode");
        let saved = PersistedState::from_json(&raw).expect("decode");
        world.restore(saved);
        assert!(world.state().self_state().switch(3, 7, SwitchSlot::A));

        world.enter_map(open_map(4));
        world.enter_map(open_map(3));
        assert!(world.state().self_state().switch(3, 7, SwitchSlot::A));

        assert_eq!(world.purge_self_state(), 1);
        assert!(!world.state().self_state().switch(3, 7, SwitchSlot::A));
    }

    #[test]
    fn zero_ids_resolve_to_the_current_map_and_caller() {
        let mut map = open_map(6);
        map.events.insert(2, event(2, 1, 1));
        let mut world = MapWorld::new(config(), map);
        let caller = CharacterId(2);

        world.set_self_switch(caller, 0, 0, SwitchSlot::B, true);
        assert!(world.state().self_state().switch(6, 2, SwitchSlot::B));
        assert!(world.self_switch(caller, 6, 2, SwitchSlot::B));
        assert!(!world.self_switch(caller, 0, 5, SwitchSlot::B));

        world.set_self_variable(caller, 9, 0, 3, -12);
        assert_eq!(world.state().self_state().variable(9, 2, 3), -12);
        assert_eq!(world.self_variable(caller, 9, 0, 3), -12);
        assert_eq!(world.self_variable(caller, 0, 0, 3), 0);
    }
}
