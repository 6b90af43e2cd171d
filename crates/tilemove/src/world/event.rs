use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::grid::{Direction, TileCoord};
use crate::route::MoveRouteDef;
use crate::state::{GameState, SelfContext, SwitchSlot};

use super::character::{
    Character, Hitbox, MoveType, Priority, DEFAULT_MOVE_FREQUENCY, DEFAULT_MOVE_SPEED,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableCondition {
    pub id: u32,
    pub at_least: i64,
}

/// All set conditions must hold for a page to be active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConditions {
    pub self_switch: Option<SwitchSlot>,
    pub switches: Vec<u32>,
    pub variable: Option<VariableCondition>,
}

impl PageConditions {
    pub fn met(&self, state: &GameState, context: SelfContext) -> bool {
        if let Some(slot) = self.self_switch {
            if !state
                .self_state()
                .switch(context.map_id, context.event_id, slot)
            {
                return false;
            }
        }
        if !self.switches.iter().all(|id| state.switch(*id, context)) {
            return false;
        }
        self.variable
            .map_or(true, |cond| state.variable(cond.id, context) >= cond.at_least)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPage {
    pub conditions: PageConditions,
    pub direction: Option<Direction>,
    pub move_type: MoveType,
    pub speed: u8,
    pub frequency: u8,
    pub route: MoveRouteDef,
    pub priority: Priority,
    pub through: bool,
    pub direction_fix: bool,
    pub always_active: bool,
    pub click_trigger: bool,
}

impl Default for EventPage {
    fn default() -> Self {
        Self {
            conditions: PageConditions::default(),
            direction: None,
            move_type: MoveType::Fixed,
            speed: DEFAULT_MOVE_SPEED,
            frequency: DEFAULT_MOVE_FREQUENCY,
            route: MoveRouteDef::default(),
            priority: Priority::SameAsCharacters,
            through: false,
            direction_fix: false,
            always_active: false,
            click_trigger: false,
        }
    }
}

/// An event as declared in a map file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub pages: Vec<EventPage>,
    #[serde(default)]
    pub hitbox: Hitbox,
    #[serde(default)]
    pub save_location: bool,
    #[serde(default)]
    pub move_only_regions: Option<BTreeSet<u8>>,
}

impl EventDefinition {
    pub fn position(&self) -> TileCoord {
        TileCoord::new(self.x, self.y)
    }

    /// Index of the last page whose conditions hold.
    pub fn active_page(&self, state: &GameState, context: SelfContext) -> Option<usize> {
        self.pages
            .iter()
            .rposition(|page| page.conditions.met(state, context))
    }
}

/// Applies a page's settings to a character. Passing `None` clears the
/// page: the character stops blocking and stops moving on its own.
pub(crate) fn apply_page(character: &mut Character, page: Option<(usize, &EventPage)>) {
    character.custom_route.clear();
    character.stop_count = 0;
    let Some((index, page)) = page else {
        character.page = None;
        character.move_type = MoveType::Fixed;
        character.through = true;
        character.always_active = false;
        character.click_trigger = false;
        return;
    };
    character.page = Some(index);
    if let Some(direction) = page.direction {
        character.direction = direction;
    }
    character.move_type = page.move_type;
    character.set_speed(page.speed);
    character.set_frequency(page.frequency);
    character.priority = page.priority;
    character.through = page.through;
    character.direction_fix = page.direction_fix;
    character.always_active = page.always_active;
    character.click_trigger = page.click_trigger;
    if page.move_type == MoveType::Custom {
        character
            .custom_route
            .start(crate::route::compile_route(&page.route));
    }
}

/// Builds a fresh character for `definition` placed at its declared tile.
pub(crate) fn character_for(id: u32, definition: &EventDefinition) -> Character {
    let mut character = Character::new(super::CharacterId(id), definition.position());
    character.hitbox = definition.hitbox;
    character.save_location = definition.save_location;
    character.move_only_regions = definition.move_only_regions.clone();
    character
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paged_event() -> EventDefinition {
        serde_json::from_value(serde_json::json!({
            "id": 4,
            "x": 1,
            "y": 2,
            "pages": [
                {},
                {"conditions": {"self_switch": "A"}, "move_type": "random"},
                {"conditions": {"switches": [3], "variable": {"id": 2, "at_least": 5}}}
            ]
        }))
        .expect("event")
    }

    #[test]
    fn last_matching_page_wins() {
        let event = paged_event();
        let mut state = GameState::default();
        let context = SelfContext::new(1, 4);
        assert_eq!(event.active_page(&state, context), Some(0));

        state.self_state_mut().set_switch(1, 4, SwitchSlot::A, true);
        assert_eq!(event.active_page(&state, context), Some(1));

        state.set_switch(3, true, context);
        state.set_variable(2, 4, context);
        assert_eq!(event.active_page(&state, context), Some(1));
        state.set_variable(2, 5, context);
        assert_eq!(event.active_page(&state, context), Some(2));
    }

    #[test]
    fn self_switch_conditions_are_per_event() {
        let event = paged_event();
        let mut state = GameState::default();
        state.self_state_mut().set_switch(1, 5, SwitchSlot::A, true);
        assert_eq!(event.active_page(&state, SelfContext::new(1, 4)), Some(0));
    }

    #[test]
    fn applying_a_page_copies_its_settings() {
        let event = paged_event();
        let mut character = character_for(event.id, &event);
        apply_page(&mut character, Some((1, &event.pages[1])));
        assert_eq!(character.page, Some(1));
        assert_eq!(character.move_type, MoveType::Random);
        assert!(character.is_blocking());

        apply_page(&mut character, None);
        assert_eq!(character.page, None);
        assert!(!character.is_blocking());
        assert_eq!(character.move_type, MoveType::Fixed);
    }
}
