use std::collections::BTreeSet;

use crate::config::DiagonalConfig;
use crate::grid::{Direction, MapGrid, TileCoord};
use crate::world::{CharacterId, Hitbox};

use super::{RegionRuleSet, UnitType, VehicleKind};

/// A character as seen by other movers' collision checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupant {
    pub id: CharacterId,
    pub position: TileCoord,
    pub hitbox: Hitbox,
    /// Same-as-characters priority and not passing through.
    pub blocking: bool,
}

/// The body asking to move.
#[derive(Debug, Clone, Copy)]
pub struct Mover<'a> {
    pub id: Option<CharacterId>,
    pub unit: UnitType,
    pub hitbox: Hitbox,
    pub through: bool,
    pub move_only_regions: Option<&'a BTreeSet<u8>>,
}

impl Mover<'_> {
    /// A footprint-less unit with no identity, used for bare tile queries.
    pub fn bare(unit: UnitType) -> Self {
        Self {
            id: None,
            unit,
            hitbox: Hitbox::default(),
            through: false,
            move_only_regions: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionMode {
    /// Every blocking character counts.
    All,
    /// The player never blocks; used by crash moves.
    IgnorePlayer,
    /// Terrain and region rules only; used by pathfinding lookahead.
    Suppressed,
}

/// Outcome of asking for a diagonal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagonalMove {
    Diagonal,
    Slide(Direction),
    Blocked,
}

/// Stateless passability oracle over one map's tiles, rules and occupants.
#[derive(Debug, Clone, Copy)]
pub struct PassabilityEngine<'a> {
    grid: &'a MapGrid,
    rules: &'a RegionRuleSet,
    diagonal: DiagonalConfig,
    occupants: &'a [Occupant],
}

impl<'a> PassabilityEngine<'a> {
    pub fn new(
        grid: &'a MapGrid,
        rules: &'a RegionRuleSet,
        diagonal: DiagonalConfig,
        occupants: &'a [Occupant],
    ) -> Self {
        Self {
            grid,
            rules,
            diagonal,
            occupants,
        }
    }

    pub fn grid(&self) -> &'a MapGrid {
        self.grid
    }

    pub fn diagonal_config(&self) -> DiagonalConfig {
        self.diagonal
    }

    /// Bare tile query: can a unit of this type leave `(x, y)` toward
    /// `direction`, counting every blocking character.
    pub fn can_pass_tile(&self, x: i32, y: i32, direction: Direction, unit: UnitType) -> bool {
        self.can_pass(
            &Mover::bare(unit),
            TileCoord::new(x, y),
            direction,
            CollisionMode::All,
        )
    }

    pub fn can_pass(
        &self,
        mover: &Mover<'_>,
        from: TileCoord,
        direction: Direction,
        collision: CollisionMode,
    ) -> bool {
        if direction.is_diagonal() {
            return matches!(
                self.resolve_diagonal(mover, from, direction, collision),
                DiagonalMove::Diagonal
            );
        }
        self.can_pass_straight(mover, from, direction, collision)
    }

    fn can_pass_straight(
        &self,
        mover: &Mover<'_>,
        from: TileCoord,
        direction: Direction,
        collision: CollisionMode,
    ) -> bool {
        let Some(to) = self.grid.neighbor(from, direction) else {
            return false;
        };
        if mover.through {
            return true;
        }
        let region = self.grid.region_at(to);
        if let Some(only) = mover.move_only_regions {
            return only.contains(&region) && self.blocker_at(mover, to, collision).is_none();
        }
        if self.rules.allows(mover.unit, region) {
            return true;
        }
        if self.rules.forbids(mover.unit, region) {
            return false;
        }
        if !self.terrain_passable(mover.unit, from, to, direction) {
            return false;
        }
        self.blocker_at(mover, to, collision).is_none()
    }

    /// Decides a diagonal request: the diagonal itself, a slide along one
    /// cardinal component, or nothing.
    pub fn resolve_diagonal(
        &self,
        mover: &Mover<'_>,
        from: TileCoord,
        direction: Direction,
        collision: CollisionMode,
    ) -> DiagonalMove {
        let Some((horizontal, vertical)) = direction.components() else {
            return if self.can_pass_straight(mover, from, direction, collision) {
                DiagonalMove::Slide(direction)
            } else {
                DiagonalMove::Blocked
            };
        };
        let Some(to) = self.grid.neighbor(from, direction) else {
            return DiagonalMove::Blocked;
        };

        if self.diagonal.enabled {
            if mover.through {
                return DiagonalMove::Diagonal;
            }
            let region = self.grid.region_at(to);
            let region_decided = mover.move_only_regions.is_none()
                && (self.rules.allows(mover.unit, region) || self.rules.forbids(mover.unit, region));
            if region_decided {
                if self.rules.allows(mover.unit, region) {
                    return DiagonalMove::Diagonal;
                }
                return self.slide(mover, from, horizontal, vertical, collision);
            }
            if self.diagonal_legal(mover, from, horizontal, vertical, collision) {
                return DiagonalMove::Diagonal;
            }
        }
        self.slide(mover, from, horizontal, vertical, collision)
    }

    fn diagonal_legal(
        &self,
        mover: &Mover<'_>,
        from: TileCoord,
        horizontal: Direction,
        vertical: Direction,
        collision: CollisionMode,
    ) -> bool {
        let via_vertical = self.grid.neighbor(from, vertical).is_some_and(|corner| {
            self.can_pass_straight(mover, from, vertical, collision)
                && self.can_pass_straight(mover, corner, horizontal, collision)
        });
        let via_horizontal = self.grid.neighbor(from, horizontal).is_some_and(|corner| {
            self.can_pass_straight(mover, from, horizontal, collision)
                && self.can_pass_straight(mover, corner, vertical, collision)
        });
        if self.diagonal.strict {
            via_vertical && via_horizontal
        } else {
            via_vertical || via_horizontal
        }
    }

    fn slide(
        &self,
        mover: &Mover<'_>,
        from: TileCoord,
        horizontal: Direction,
        vertical: Direction,
        collision: CollisionMode,
    ) -> DiagonalMove {
        if self.diagonal.enabled && self.diagonal.strict {
            return DiagonalMove::Blocked;
        }
        let horizontal_ok = self.can_pass_straight(mover, from, horizontal, collision);
        let vertical_ok = self.can_pass_straight(mover, from, vertical, collision);
        match (horizontal_ok, vertical_ok) {
            (true, true) if self.diagonal.prefer_horizontal => DiagonalMove::Slide(horizontal),
            (true, true) => DiagonalMove::Slide(vertical),
            (true, false) => DiagonalMove::Slide(horizontal),
            (false, true) => DiagonalMove::Slide(vertical),
            (false, false) => DiagonalMove::Blocked,
        }
    }

    fn terrain_passable(
        &self,
        unit: UnitType,
        from: TileCoord,
        to: TileCoord,
        direction: Direction,
    ) -> bool {
        match unit {
            UnitType::Walk | UnitType::Player | UnitType::Event => {
                self.grid.is_passable(from, direction)
                    && self.grid.is_passable(to, direction.reverse())
            }
            UnitType::Boat => self.grid.is_boat_passable(to),
            UnitType::Ship => self.grid.is_ship_passable(to),
            UnitType::Vehicle => self.grid.is_boat_passable(to) || self.grid.is_ship_passable(to),
            UnitType::Airship => true,
        }
    }

    /// First blocking character whose footprint would overlap the mover's
    /// footprint at `destination`.
    pub fn blocker_at(
        &self,
        mover: &Mover<'_>,
        destination: TileCoord,
        collision: CollisionMode,
    ) -> Option<CharacterId> {
        if collision == CollisionMode::Suppressed || mover.unit == UnitType::Airship {
            return None;
        }
        self.occupants
            .iter()
            .filter(|occupant| occupant.blocking)
            .filter(|occupant| Some(occupant.id) != mover.id)
            .filter(|occupant| !(collision == CollisionMode::IgnorePlayer && occupant.id.is_player()))
            .find(|occupant| {
                mover
                    .hitbox
                    .overlaps(destination, &occupant.hitbox, occupant.position)
            })
            .map(|occupant| occupant.id)
    }

    /// Whether a vehicle at `position` facing `facing` may stop and let its
    /// passengers off. Dock regions are read from the vehicle's own tile.
    pub fn can_dock(&self, vehicle: VehicleKind, position: TileCoord, facing: Direction) -> bool {
        let region = self.grid.region_at(position);
        if let Some(rule) = self.rules.dock_rule(vehicle) {
            if rule.regions.contains(&region) {
                return true;
            }
            if rule.region_only {
                return false;
            }
        }
        match vehicle {
            VehicleKind::Airship => {
                self.grid.is_airship_land_ok(position)
                    && !self
                        .occupants
                        .iter()
                        .any(|occupant| !occupant.id.is_player() && occupant.position == position)
            }
            VehicleKind::Boat | VehicleKind::Ship => {
                let Some(shore) = self.grid.neighbor(position, facing) else {
                    return false;
                };
                let walker = Mover::bare(UnitType::Player);
                self.grid.is_passable(shore, facing.reverse())
                    && self.blocker_at(&walker, shore, CollisionMode::IgnorePlayer).is_none()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleKey;

    fn open_grid() -> MapGrid {
        MapGrid::open(6, 6).expect("grid")
    }

    fn engine<'a>(
        grid: &'a MapGrid,
        rules: &'a RegionRuleSet,
        occupants: &'a [Occupant],
        diagonal: DiagonalConfig,
    ) -> PassabilityEngine<'a> {
        PassabilityEngine::new(grid, rules, diagonal, occupants)
    }

    fn blocking_occupant(id: u32, x: i32, y: i32) -> Occupant {
        Occupant {
            id: CharacterId(id),
            position: TileCoord::new(x, y),
            hitbox: Hitbox::default(),
            blocking: true,
        }
    }

    #[test]
    fn repeated_queries_agree() {
        let mut grid = open_grid();
        grid.block(TileCoord::new(2, 1));
        let rules = RegionRuleSet::default();
        let engine = engine(&grid, &rules, &[], DiagonalConfig::default());
        for direction in crate::grid::CARDINALS {
            let first = engine.can_pass_tile(2, 2, direction, UnitType::Player);
            let second = engine.can_pass_tile(2, 2, direction, UnitType::Player);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn allow_wins_over_forbid_for_the_same_region() {
        let mut grid = open_grid();
        grid.set_region(TileCoord::new(3, 2), 4);
        grid.block(TileCoord::new(3, 2));
        let rules = RegionRuleSet::default()
            .with_allow(RuleKey::Player, [4])
            .with_forbid(RuleKey::Player, [4]);
        let engine = engine(&grid, &rules, &[], DiagonalConfig::default());
        assert!(engine.can_pass_tile(2, 2, Direction::Right, UnitType::Player));
    }

    #[test]
    fn allow_skips_character_collision() {
        let mut grid = open_grid();
        grid.set_region(TileCoord::new(3, 2), 4);
        let rules = RegionRuleSet::default().with_allow(RuleKey::All, [4]);
        let occupants = [blocking_occupant(5, 3, 2)];
        let engine = engine(&grid, &rules, &occupants, DiagonalConfig::default());
        assert!(engine.can_pass_tile(2, 2, Direction::Right, UnitType::Event));
    }

    #[test]
    fn forbid_overrides_passable_terrain() {
        let mut grid = open_grid();
        grid.set_region(TileCoord::new(3, 2), 6);
        let rules = RegionRuleSet::default().with_forbid(RuleKey::Walk, [6]);
        let engine = engine(&grid, &rules, &[], DiagonalConfig::default());
        assert!(!engine.can_pass_tile(2, 2, Direction::Right, UnitType::Event));
        assert!(engine.can_pass_tile(2, 2, Direction::Down, UnitType::Event));
    }

    #[test]
    fn one_sided_passage_is_checked_on_both_tiles() {
        let mut grid = open_grid();
        grid.set_passage(TileCoord::new(3, 2), crate::grid::PASSAGE_BLOCK_LEFT);
        let rules = RegionRuleSet::default();
        let engine = engine(&grid, &rules, &[], DiagonalConfig::default());
        assert!(!engine.can_pass_tile(2, 2, Direction::Right, UnitType::Player));
        assert!(engine.can_pass_tile(4, 2, Direction::Left, UnitType::Player));
    }

    #[test]
    fn hitbox_extension_collides_with_neighbours() {
        let grid = open_grid();
        let rules = RegionRuleSet::default();
        let occupants = [blocking_occupant(9, 4, 2)];
        let engine = engine(&grid, &rules, &occupants, DiagonalConfig::default());
        let wide = Mover {
            id: Some(CharacterId(1)),
            unit: UnitType::Event,
            hitbox: Hitbox {
                right: 1,
                ..Hitbox::default()
            },
            through: false,
            move_only_regions: None,
        };
        assert!(!engine.can_pass(&wide, TileCoord::new(2, 2), Direction::Right, CollisionMode::All));
        assert!(engine.can_pass(
            &wide,
            TileCoord::new(2, 2),
            Direction::Right,
            CollisionMode::Suppressed
        ));
    }

    #[test]
    fn move_only_regions_bypass_terrain_but_not_collision() {
        let mut grid = open_grid();
        grid.set_region(TileCoord::new(3, 2), 2);
        grid.block(TileCoord::new(3, 2));
        let rules = RegionRuleSet::default();
        let only: BTreeSet<u8> = [2].into_iter().collect();
        let mover = Mover {
            id: Some(CharacterId(1)),
            unit: UnitType::Event,
            hitbox: Hitbox::default(),
            through: false,
            move_only_regions: Some(&only),
        };
        let engine_free = engine(&grid, &rules, &[], DiagonalConfig::default());
        assert!(engine_free.can_pass(&mover, TileCoord::new(2, 2), Direction::Right, CollisionMode::All));
        assert!(!engine_free.can_pass(&mover, TileCoord::new(2, 2), Direction::Down, CollisionMode::All));

        let occupants = [blocking_occupant(7, 3, 2)];
        let engine_busy = engine(&grid, &rules, &occupants, DiagonalConfig::default());
        assert!(!engine_busy.can_pass(&mover, TileCoord::new(2, 2), Direction::Right, CollisionMode::All));
    }

    #[test]
    fn diagonal_requires_the_feature_flag() {
        let grid = open_grid();
        let rules = RegionRuleSet::default();
        let disabled = engine(&grid, &rules, &[], DiagonalConfig::default());
        assert!(!disabled.can_pass_tile(2, 2, Direction::DownRight, UnitType::Player));

        let enabled = engine(
            &grid,
            &rules,
            &[],
            DiagonalConfig {
                enabled: true,
                ..DiagonalConfig::default()
            },
        );
        assert!(enabled.can_pass_tile(2, 2, Direction::DownRight, UnitType::Player));
    }

    #[test]
    fn strict_diagonal_needs_both_corners_open() {
        let mut grid = open_grid();
        grid.block(TileCoord::new(3, 2));
        let rules = RegionRuleSet::default();
        let lenient = engine(
            &grid,
            &rules,
            &[],
            DiagonalConfig {
                enabled: true,
                strict: false,
                prefer_horizontal: true,
            },
        );
        assert!(lenient.can_pass_tile(2, 2, Direction::DownRight, UnitType::Player));

        let strict = engine(
            &grid,
            &rules,
            &[],
            DiagonalConfig {
                enabled: true,
                strict: true,
                prefer_horizontal: true,
            },
        );
        assert!(!strict.can_pass_tile(2, 2, Direction::DownRight, UnitType::Player));
        assert_eq!(
            strict.resolve_diagonal(
                &Mover::bare(UnitType::Player),
                TileCoord::new(2, 2),
                Direction::DownRight,
                CollisionMode::All
            ),
            DiagonalMove::Blocked
        );
    }

    #[test]
    fn refused_diagonal_slides_by_preference() {
        let mut grid = open_grid();
        grid.block(TileCoord::new(3, 3));
        let rules = RegionRuleSet::default();
        let prefer_vertical = engine(
            &grid,
            &rules,
            &[],
            DiagonalConfig {
                enabled: false,
                strict: false,
                prefer_horizontal: false,
            },
        );
        assert_eq!(
            prefer_vertical.resolve_diagonal(
                &Mover::bare(UnitType::Player),
                TileCoord::new(2, 2),
                Direction::DownRight,
                CollisionMode::All
            ),
            DiagonalMove::Slide(Direction::Down)
        );
    }

    #[test]
    fn boats_need_boat_tiles() {
        let mut grid = open_grid();
        grid.set_vehicle_flags(TileCoord::new(3, 2), crate::grid::VEHICLE_BOAT_PASSABLE);
        let rules = RegionRuleSet::default();
        let engine = engine(&grid, &rules, &[], DiagonalConfig::default());
        assert!(engine.can_pass_tile(2, 2, Direction::Right, UnitType::Boat));
        assert!(!engine.can_pass_tile(2, 2, Direction::Down, UnitType::Boat));
        assert!(!engine.can_pass_tile(2, 2, Direction::Right, UnitType::Ship));
        assert!(engine.can_pass_tile(2, 2, Direction::Down, UnitType::Airship));
    }

    #[test]
    fn dock_regions_decide_before_the_default_land_check() {
        let mut grid = open_grid();
        let boat_tile = TileCoord::new(2, 2);
        grid.set_region(boat_tile, 8);
        grid.block(TileCoord::new(3, 2));
        let rules = RegionRuleSet::default().with_dock(VehicleKind::Boat, [8], true);
        let engine = engine(&grid, &rules, &[], DiagonalConfig::default());
        assert!(engine.can_dock(VehicleKind::Boat, boat_tile, Direction::Right));
        assert!(!engine.can_dock(VehicleKind::Boat, TileCoord::new(1, 1), Direction::Left));

        let open_rules = RegionRuleSet::default();
        let fallback = PassabilityEngine::new(&grid, &open_rules, DiagonalConfig::default(), &[]);
        assert!(!fallback.can_dock(VehicleKind::Boat, boat_tile, Direction::Right));
        assert!(fallback.can_dock(VehicleKind::Boat, boat_tile, Direction::Down));
    }
}
