use rand::seq::SliceRandom;

use crate::grid::{Direction, TileCoord, CARDINALS};
use crate::nav::Pathfinder;
use crate::rules::{CollisionMode, DiagonalMove, VehicleKind};

use super::character::{CharacterId, LastMove};
use super::MapWorld;

impl MapWorld {
    /// Whether `id` could take one step toward `direction` right now.
    pub fn can_move(&self, id: CharacterId, direction: Direction) -> bool {
        self.plan_step(id, direction, CollisionMode::All) == Some(direction)
    }

    /// One step in any of the eight directions. A refused diagonal slides
    /// along one component when that side is open.
    pub fn move_in_direction(&mut self, id: CharacterId, direction: Direction) -> bool {
        self.step_with(id, direction, CollisionMode::All)
    }

    fn plan_step(
        &self,
        id: CharacterId,
        direction: Direction,
        collision: CollisionMode,
    ) -> Option<Direction> {
        let index = self.index_of(id)?;
        let occupants = self.occupants();
        let engine = self.engine(&occupants);
        let mover = self.mover_at(index);
        let from = self.characters[index].position;
        if direction.is_diagonal() {
            return match engine.resolve_diagonal(&mover, from, direction, collision) {
                DiagonalMove::Diagonal => Some(direction),
                DiagonalMove::Slide(slide) => Some(slide),
                DiagonalMove::Blocked => None,
            };
        }
        engine
            .can_pass(&mover, from, direction, collision)
            .then_some(direction)
    }

    /// One tile step. A refused straight step still turns the character.
    pub(crate) fn step_with(
        &mut self,
        id: CharacterId,
        direction: Direction,
        collision: CollisionMode,
    ) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let planned = self.plan_step(id, direction, collision);
        let from = self.characters[index].position;
        let Some((step, to)) =
            planned.and_then(|step| Some((step, self.map.grid.neighbor(from, step)?)))
        else {
            if !direction.is_diagonal() {
                self.characters[index].face(direction);
            }
            return false;
        };

        let dash_bonus = self.config.dash_speed_bonus;
        let character = &mut self.characters[index];
        match step.components() {
            Some((horizontal, vertical)) => {
                if character.direction == horizontal.reverse() {
                    character.face(horizontal);
                }
                if character.direction == vertical.reverse() {
                    character.face(vertical);
                }
            }
            None => character.face(step),
        }
        character.position = to;
        let ticks = character.step_ticks(dash_bonus);
        character.record_move(LastMove::Step(step), ticks);
        true
    }

    /// Steps toward `target`: the diagonal first when enabled, then the
    /// longer axis, then the other axis.
    pub fn move_toward(&mut self, id: CharacterId, target: TileCoord) -> bool {
        let Some((dx, dy)) = self.offset_to(id, target) else {
            return false;
        };
        let horizontal = if dx > 0 { Direction::Left } else { Direction::Right };
        let vertical = if dy > 0 { Direction::Up } else { Direction::Down };
        self.approach(id, dx, dy, horizontal, vertical)
    }

    pub fn move_away_from(&mut self, id: CharacterId, target: TileCoord) -> bool {
        let Some((dx, dy)) = self.offset_to(id, target) else {
            return false;
        };
        let horizontal = if dx > 0 { Direction::Right } else { Direction::Left };
        let vertical = if dy > 0 { Direction::Down } else { Direction::Up };
        self.approach(id, dx, dy, horizontal, vertical)
    }

    fn approach(
        &mut self,
        id: CharacterId,
        dx: i32,
        dy: i32,
        horizontal: Direction,
        vertical: Direction,
    ) -> bool {
        if self.config.diagonal.enabled && dx != 0 && dy != 0 {
            if let Some(diagonal) = Direction::from_delta(horizontal.dx(), vertical.dy()) {
                if self.can_move(id, diagonal) {
                    return self.move_in_direction(id, diagonal);
                }
            }
        }
        if dx.abs() > dy.abs() {
            self.move_in_direction(id, horizontal)
                || (dy != 0 && self.move_in_direction(id, vertical))
        } else if dy != 0 {
            self.move_in_direction(id, vertical)
                || (dx != 0 && self.move_in_direction(id, horizontal))
        } else {
            false
        }
    }

    pub fn turn_toward(&mut self, id: CharacterId, target: TileCoord) {
        if let Some((dx, dy)) = self.offset_to(id, target) {
            let horizontal = if dx > 0 { Direction::Left } else { Direction::Right };
            let vertical = if dy > 0 { Direction::Up } else { Direction::Down };
            self.turn_by_offset(id, dx, dy, horizontal, vertical);
        }
    }

    pub fn turn_away_from(&mut self, id: CharacterId, target: TileCoord) {
        if let Some((dx, dy)) = self.offset_to(id, target) {
            let horizontal = if dx > 0 { Direction::Right } else { Direction::Left };
            let vertical = if dy > 0 { Direction::Down } else { Direction::Up };
            self.turn_by_offset(id, dx, dy, horizontal, vertical);
        }
    }

    fn turn_by_offset(
        &mut self,
        id: CharacterId,
        dx: i32,
        dy: i32,
        horizontal: Direction,
        vertical: Direction,
    ) {
        let Some(character) = self.character_mut(id) else {
            return;
        };
        if dx.abs() > dy.abs() {
            character.face(horizontal);
        } else if dy != 0 {
            character.face(vertical);
        }
    }

    /// `position - target` along each axis, the short way round on looping
    /// maps.
    fn offset_to(&self, id: CharacterId, target: TileCoord) -> Option<(i32, i32)> {
        let from = self.character(id)?.position;
        let grid = &self.map.grid;
        Some((grid.delta_x(from.x, target.x), grid.delta_y(from.y, target.y)))
    }

    /// Tries one random cardinal step; a blocked pick does not turn.
    pub fn move_random(&mut self, id: CharacterId) -> bool {
        let Some(direction) = CARDINALS.choose(&mut self.rng).copied() else {
            return false;
        };
        self.can_move(id, direction) && self.move_in_direction(id, direction)
    }

    /// Jumps by `(dx, dy)` tiles. Only the landing tile must be on the map.
    pub fn jump(&mut self, id: CharacterId, dx: i32, dy: i32) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let from = self.characters[index].position;
        let Some(to) = self
            .map
            .grid
            .normalize(TileCoord::new(from.x.saturating_add(dx), from.y.saturating_add(dy)))
        else {
            return false;
        };

        let character = &mut self.characters[index];
        if dx.unsigned_abs() > dy.unsigned_abs() {
            character.face(if dx < 0 { Direction::Left } else { Direction::Right });
        } else if dy != 0 {
            character.face(if dy < 0 { Direction::Up } else { Direction::Down });
        }
        let distance = f64::from(dx).hypot(f64::from(dy)).round() as u32;
        let peak = character.jump_peak(distance);
        character.position = to;
        character.record_move(LastMove::Jump { dx, dy }, peak.saturating_mul(2));
        true
    }

    /// Places the character without a move; followers do not react.
    pub fn locate(&mut self, id: CharacterId, position: TileCoord) -> bool {
        let Some(position) = self.map.grid.normalize(position) else {
            return false;
        };
        let Some(character) = self.character_mut(id) else {
            return false;
        };
        character.position = position;
        character.busy_ticks = 0;
        character.stop_count = 0;
        true
    }

    /// Next direction on a shortest path from the character to `goal`.
    pub fn find_direction_to(&self, id: CharacterId, goal: TileCoord) -> Option<Direction> {
        let index = self.index_of(id)?;
        let occupants = self.occupants();
        let engine = self.engine(&occupants);
        let pathfinder = Pathfinder::new(
            &engine,
            self.mover_at(index),
            self.config.pathfinding.search_limit,
        );
        pathfinder.find_direction_to(self.characters[index].position, goal)
    }

    pub fn can_dock(&self, vehicle: VehicleKind, position: TileCoord, facing: Direction) -> bool {
        let occupants = self.occupants();
        self.engine(&occupants).can_dock(vehicle, position, facing)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::MovementConfig;
    use crate::content::MapData;
    use crate::grid::{Direction, MapGrid, TileCoord};
    use crate::world::{Character, CharacterId, LastMove, MapWorld};

    fn world_with(config: MovementConfig) -> MapWorld {
        let grid = MapGrid::open(8, 8).expect("grid");
        let mut world = MapWorld::new(config, MapData::with_grid(1, grid));
        world.place_player(TileCoord::new(4, 4), Direction::Down);
        world
    }

    fn seeded() -> MovementConfig {
        MovementConfig {
            random_seed: Some(11),
            ..MovementConfig::default()
        }
    }

    #[test]
    fn blocked_straight_steps_still_turn() {
        let mut world = world_with(seeded());
        world.place_player(TileCoord::new(0, 0), Direction::Down);
        assert!(!world.move_in_direction(CharacterId::PLAYER, Direction::Left));
        assert_eq!(world.player().direction, Direction::Left);
        assert_eq!(world.player().position, TileCoord::new(0, 0));
    }

    #[test]
    fn steps_record_the_move_and_its_duration() {
        let mut world = world_with(seeded());
        assert!(world.move_in_direction(CharacterId::PLAYER, Direction::Right));
        let player = world.player();
        assert_eq!(player.position, TileCoord::new(5, 4));
        assert_eq!(player.last_move(), Some(LastMove::Step(Direction::Right)));
        assert_eq!(player.move_serial(), 1);
        assert!(player.is_busy());
    }

    #[test]
    fn diagonal_requests_slide_when_diagonals_are_off() {
        let mut world = world_with(seeded());
        assert!(world.move_in_direction(CharacterId::PLAYER, Direction::UpLeft));
        assert_eq!(world.player().position, TileCoord::new(3, 4));
    }

    #[test]
    fn diagonal_steps_when_enabled() {
        let mut config = seeded();
        config.diagonal.enabled = true;
        let mut world = world_with(config);
        assert!(world.move_in_direction(CharacterId::PLAYER, Direction::DownRight));
        assert_eq!(world.player().position, TileCoord::new(5, 5));
    }

    #[test]
    fn approach_prefers_the_longer_axis_and_falls_back() {
        let mut world = world_with(seeded());
        let blocker = Character::new(CharacterId(9), TileCoord::new(3, 4));
        assert!(world.add_character(blocker));

        assert!(world.move_toward(CharacterId::PLAYER, TileCoord::new(0, 3)));
        assert_eq!(world.player().position, TileCoord::new(4, 3));
    }

    #[test]
    fn turning_faces_the_dominant_axis() {
        let mut world = world_with(seeded());
        world.turn_toward(CharacterId::PLAYER, TileCoord::new(4, 0));
        assert_eq!(world.player().direction, Direction::Up);
        world.turn_away_from(CharacterId::PLAYER, TileCoord::new(7, 5));
        assert_eq!(world.player().direction, Direction::Left);
    }

    #[test]
    fn jumps_need_an_on_map_landing_and_last_twice_the_peak() {
        let mut world = world_with(seeded());
        assert!(!world.jump(CharacterId::PLAYER, 10, 0));
        assert!(world.jump(CharacterId::PLAYER, -2, 0));
        let player = world.player();
        assert_eq!(player.position, TileCoord::new(2, 4));
        assert_eq!(player.direction, Direction::Left);
        // speed 4, distance 2: peak 8, sixteen ticks in the air.
        assert_eq!(player.busy_ticks, 15);
    }

    #[test]
    fn locate_moves_without_telling_followers() {
        let mut world = world_with(seeded());
        assert!(world.locate(CharacterId::PLAYER, TileCoord::new(1, 1)));
        assert_eq!(world.player().move_serial(), 0);
        assert!(!world.locate(CharacterId::PLAYER, TileCoord::new(9, 9)));
    }

    #[test]
    fn path_direction_comes_from_the_pathfinder() {
        let world = world_with(seeded());
        assert_eq!(
            world.find_direction_to(CharacterId::PLAYER, TileCoord::new(4, 7)),
            Some(Direction::Down)
        );
        assert_eq!(
            world.find_direction_to(CharacterId::PLAYER, TileCoord::new(4, 4)),
            None
        );
    }
}
