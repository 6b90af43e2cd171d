use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::grid::{Direction, TileCoord};
use crate::route::RouteRunner;
use crate::rules::UnitType;
use crate::sync::SyncLink;

pub const DEFAULT_MOVE_SPEED: u8 = 4;
pub const DEFAULT_MOVE_FREQUENCY: u8 = 3;
pub const MAX_MOVE_SPEED: u8 = 6;
pub const MAX_MOVE_FREQUENCY: u8 = 5;

/// Runtime character id. The player is always 0; events use their
/// database or spawn id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub u32);

impl CharacterId {
    pub const PLAYER: Self = Self(0);

    pub fn is_player(self) -> bool {
        self == Self::PLAYER
    }
}

/// Footprint extension in tiles around the character's own tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hitbox {
    pub up: u8,
    pub down: u8,
    pub left: u8,
    pub right: u8,
}

impl Hitbox {
    fn span(self, at: TileCoord) -> (i32, i32, i32, i32) {
        (
            at.x - i32::from(self.left),
            at.x + i32::from(self.right),
            at.y - i32::from(self.up),
            at.y + i32::from(self.down),
        )
    }

    pub fn overlaps(self, at: TileCoord, other: &Hitbox, other_at: TileCoord) -> bool {
        let (left, right, top, bottom) = self.span(at);
        let (other_left, other_right, other_top, other_bottom) = other.span(other_at);
        left <= other_right && other_left <= right && top <= other_bottom && other_top <= bottom
    }

    pub fn contains(self, at: TileCoord, point: TileCoord) -> bool {
        self.overlaps(at, &Hitbox::default(), point)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    BelowCharacters,
    #[default]
    SameAsCharacters,
    AboveCharacters,
}

/// Autonomous movement when no forced route is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveType {
    #[default]
    Fixed,
    Random,
    TowardPlayer,
    Custom,
}

/// The most recent realized movement, read by followers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastMove {
    Step(Direction),
    Jump { dx: i32, dy: i32 },
    Teleport,
}

/// Where a character's current definition came from, when it is not the
/// map's own event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityOrigin {
    Spawned {
        template_map: u32,
        template_event: u32,
        preserved: bool,
    },
    Morphed {
        source_map: u32,
        source_event: u32,
        preserved: bool,
    },
}

#[derive(Debug, Clone)]
pub struct Character {
    pub id: CharacterId,
    pub position: TileCoord,
    /// Placement when the map was set up; the `Home` route target.
    pub home: TileCoord,
    pub direction: Direction,
    pub speed: u8,
    pub frequency: u8,
    pub hitbox: Hitbox,
    pub priority: Priority,
    pub unit: UnitType,
    pub move_type: MoveType,
    pub through: bool,
    /// Animate while stepping; presentation only.
    pub walk_anime: bool,
    pub direction_fix: bool,
    pub always_active: bool,
    pub click_trigger: bool,
    pub save_location: bool,
    pub transparent: bool,
    pub opacity: u8,
    pub pose: Option<String>,
    pub pattern_lock: Option<i64>,
    pub force_dash: bool,
    pub force_carry: bool,
    pub move_only_regions: Option<BTreeSet<u8>>,
    /// Forced route; runs every tick before anything autonomous.
    pub route: RouteRunner,
    /// Page route used by [`MoveType::Custom`] and custom sync policies.
    pub custom_route: RouteRunner,
    pub sync: Option<SyncLink>,
    pub origin: Option<EntityOrigin>,
    /// Active event page, `None` for the player or an event with no
    /// matching page.
    pub page: Option<usize>,
    pub(crate) busy_ticks: u32,
    pub(crate) stop_count: u32,
    pub(crate) move_serial: u64,
    pub(crate) last_move: Option<LastMove>,
}

impl Character {
    pub fn new(id: CharacterId, position: TileCoord) -> Self {
        Self {
            id,
            position,
            home: position,
            direction: Direction::Down,
            speed: DEFAULT_MOVE_SPEED,
            frequency: DEFAULT_MOVE_FREQUENCY,
            hitbox: Hitbox::default(),
            priority: Priority::default(),
            unit: if id.is_player() {
                UnitType::Player
            } else {
                UnitType::Event
            },
            move_type: MoveType::default(),
            through: false,
            walk_anime: true,
            direction_fix: false,
            always_active: false,
            click_trigger: false,
            save_location: false,
            transparent: false,
            opacity: u8::MAX,
            pose: None,
            pattern_lock: None,
            force_dash: false,
            force_carry: false,
            move_only_regions: None,
            route: RouteRunner::default(),
            custom_route: RouteRunner::default(),
            sync: None,
            origin: None,
            page: None,
            busy_ticks: 0,
            stop_count: 0,
            move_serial: 0,
            last_move: None,
        }
    }

    /// Blocks other characters of the same priority.
    pub fn is_blocking(&self) -> bool {
        self.priority == Priority::SameAsCharacters && !self.through
    }

    /// Still finishing a step, jump or other timed motion.
    pub fn is_busy(&self) -> bool {
        self.busy_ticks > 0
    }

    pub fn move_serial(&self) -> u64 {
        self.move_serial
    }

    pub fn last_move(&self) -> Option<LastMove> {
        self.last_move
    }

    /// Faces `direction` unless the direction is fixed.
    pub fn face(&mut self, direction: Direction) {
        if !self.direction_fix {
            self.direction = direction;
        }
    }

    pub fn set_speed(&mut self, speed: u8) {
        self.speed = speed.clamp(1, MAX_MOVE_SPEED);
    }

    pub fn set_frequency(&mut self, frequency: u8) {
        self.frequency = frequency.clamp(1, MAX_MOVE_FREQUENCY);
    }

    /// Ticks one tile step occupies: `2^(8 - speed)`, one speed level
    /// faster while dashing.
    pub fn step_ticks(&self, dash_bonus: u8) -> u32 {
        let bonus = if self.force_dash { dash_bonus } else { 0 };
        let speed = self.speed.saturating_add(bonus).clamp(1, 8);
        1 << (8 - u32::from(speed))
    }

    /// Idle ticks between autonomous moves.
    pub fn stop_threshold(&self) -> u32 {
        30 * u32::from(MAX_MOVE_FREQUENCY.saturating_sub(self.frequency))
    }

    /// Jump apex height for a jump of `distance` tiles; the jump lasts
    /// twice this many ticks.
    pub fn jump_peak(&self, distance: u32) -> u32 {
        10u32
            .saturating_add(distance)
            .saturating_sub(u32::from(self.speed))
            .max(1)
    }

    pub(crate) fn record_move(&mut self, movement: LastMove, busy_ticks: u32) {
        self.move_serial = self.move_serial.wrapping_add(1);
        self.last_move = Some(movement);
        self.busy_ticks = busy_ticks.saturating_sub(1);
        self.stop_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hitboxes_overlap_only_on_the_same_tile() {
        let single = Hitbox::default();
        assert!(single.overlaps(TileCoord::new(2, 2), &single, TileCoord::new(2, 2)));
        assert!(!single.overlaps(TileCoord::new(2, 2), &single, TileCoord::new(3, 2)));
    }

    #[test]
    fn extended_hitboxes_reach_neighbouring_tiles() {
        let wide = Hitbox {
            left: 1,
            right: 1,
            ..Hitbox::default()
        };
        let single = Hitbox::default();
        assert!(wide.overlaps(TileCoord::new(2, 2), &single, TileCoord::new(3, 2)));
        assert!(wide.overlaps(TileCoord::new(2, 2), &single, TileCoord::new(1, 2)));
        assert!(!wide.overlaps(TileCoord::new(2, 2), &single, TileCoord::new(2, 3)));
        assert!(single.overlaps(TileCoord::new(3, 2), &wide, TileCoord::new(2, 2)));
        assert!(wide.contains(TileCoord::new(2, 2), TileCoord::new(1, 2)));
    }

    #[test]
    fn step_duration_halves_per_speed_level() {
        let mut character = Character::new(CharacterId(1), TileCoord::new(0, 0));
        assert_eq!(character.step_ticks(1), 16);
        character.set_speed(6);
        assert_eq!(character.step_ticks(1), 4);
        character.force_dash = true;
        assert_eq!(character.step_ticks(1), 2);
        character.set_speed(0);
        assert_eq!(character.speed, 1);
    }

    #[test]
    fn frequency_sets_the_autonomous_pause() {
        let mut character = Character::new(CharacterId(1), TileCoord::new(0, 0));
        assert_eq!(character.stop_threshold(), 60);
        character.set_frequency(5);
        assert_eq!(character.stop_threshold(), 0);
    }

    #[test]
    fn direction_fix_keeps_facing() {
        let mut character = Character::new(CharacterId(3), TileCoord::new(0, 0));
        character.face(Direction::Left);
        assert_eq!(character.direction, Direction::Left);
        character.direction_fix = true;
        character.face(Direction::Up);
        assert_eq!(character.direction, Direction::Left);
    }

    #[test]
    fn player_id_is_zero() {
        assert!(CharacterId::PLAYER.is_player());
        assert!(!CharacterId(5).is_player());
        let player = Character::new(CharacterId::PLAYER, TileCoord::new(1, 1));
        assert_eq!(player.unit, UnitType::Player);
    }
}
