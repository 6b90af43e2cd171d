mod direction;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use direction::{Direction, CARDINALS, DIRECTION_ORDER};

/// Passage bit set on a tile when leaving/entering through that side is blocked.
pub const PASSAGE_BLOCK_DOWN: u8 = 0x01;
pub const PASSAGE_BLOCK_LEFT: u8 = 0x02;
pub const PASSAGE_BLOCK_RIGHT: u8 = 0x04;
pub const PASSAGE_BLOCK_UP: u8 = 0x08;
pub const PASSAGE_BLOCK_ALL: u8 = 0x0f;

pub const VEHICLE_BOAT_PASSABLE: u8 = 0x01;
pub const VEHICLE_SHIP_PASSABLE: u8 = 0x02;
pub const VEHICLE_AIRSHIP_LAND_OK: u8 = 0x04;

pub const MAX_TERRAIN_TAG: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MapGridError {
    #[error("map dimensions must be non-zero, got {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
    #[error("{layer} layer tile count mismatch: expected {expected}, got {actual}")]
    TileCountMismatch {
        layer: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("terrain tag {tag} at index {index} exceeds {max}", max = MAX_TERRAIN_TAG)]
    TerrainTagOutOfRange { index: usize, tag: u8 },
}

/// Read-only tile layers a movement query needs.
///
/// Tile (0,0) is the top-left corner; `y` grows downward. When a loop flag is
/// set, coordinates on that axis wrap instead of leaving the map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapGrid {
    width: u32,
    height: u32,
    loop_x: bool,
    loop_y: bool,
    regions: Vec<u8>,
    terrain_tags: Vec<u8>,
    passage: Vec<u8>,
    vehicle: Vec<u8>,
}

impl MapGrid {
    /// Fully walkable grid with no regions, terrain tags or water.
    pub fn open(width: u32, height: u32) -> Result<Self, MapGridError> {
        let count = tile_count(width, height)?;
        Ok(Self {
            width,
            height,
            loop_x: false,
            loop_y: false,
            regions: vec![0; count],
            terrain_tags: vec![0; count],
            passage: vec![0; count],
            vehicle: vec![0; count],
        })
    }

    /// Builds a grid from flat row-major layers. Empty optional layers are
    /// filled with zeroes.
    pub fn from_layers(
        width: u32,
        height: u32,
        regions: Vec<u8>,
        terrain_tags: Vec<u8>,
        passage: Vec<u8>,
        vehicle: Vec<u8>,
    ) -> Result<Self, MapGridError> {
        let count = tile_count(width, height)?;
        let regions = fill_or_check("regions", regions, count)?;
        let terrain_tags = fill_or_check("terrain_tags", terrain_tags, count)?;
        let passage = fill_or_check("passage", passage, count)?;
        let vehicle = fill_or_check("vehicle", vehicle, count)?;
        if let Some((index, tag)) = terrain_tags
            .iter()
            .copied()
            .enumerate()
            .find(|(_, tag)| *tag > MAX_TERRAIN_TAG)
        {
            return Err(MapGridError::TerrainTagOutOfRange { index, tag });
        }
        Ok(Self {
            width,
            height,
            loop_x: false,
            loop_y: false,
            regions,
            terrain_tags,
            passage,
            vehicle,
        })
    }

    pub fn with_loops(mut self, loop_x: bool, loop_y: bool) -> Self {
        self.loop_x = loop_x;
        self.loop_y = loop_y;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn loops_horizontally(&self) -> bool {
        self.loop_x
    }

    pub fn loops_vertically(&self) -> bool {
        self.loop_y
    }

    pub fn is_valid(&self, coord: TileCoord) -> bool {
        coord.x >= 0
            && coord.y >= 0
            && (coord.x as u32) < self.width
            && (coord.y as u32) < self.height
    }

    /// Wraps looping axes; returns `None` when the coordinate is off-map.
    pub fn normalize(&self, coord: TileCoord) -> Option<TileCoord> {
        let x = if self.loop_x {
            coord.x.rem_euclid(self.width as i32)
        } else {
            coord.x
        };
        let y = if self.loop_y {
            coord.y.rem_euclid(self.height as i32)
        } else {
            coord.y
        };
        let wrapped = TileCoord { x, y };
        self.is_valid(wrapped).then_some(wrapped)
    }

    pub fn neighbor(&self, coord: TileCoord, direction: Direction) -> Option<TileCoord> {
        self.normalize(TileCoord {
            x: coord.x + direction.dx(),
            y: coord.y + direction.dy(),
        })
    }

    fn index_of(&self, coord: TileCoord) -> Option<usize> {
        if !self.is_valid(coord) {
            return None;
        }
        Some(coord.y as usize * self.width as usize + coord.x as usize)
    }

    pub fn region_at(&self, coord: TileCoord) -> u8 {
        self.index_of(coord)
            .and_then(|index| self.regions.get(index).copied())
            .unwrap_or(0)
    }

    pub fn terrain_tag_at(&self, coord: TileCoord) -> u8 {
        self.index_of(coord)
            .and_then(|index| self.terrain_tags.get(index).copied())
            .unwrap_or(0)
    }

    pub fn set_region(&mut self, coord: TileCoord, region: u8) {
        if let Some(index) = self.index_of(coord) {
            self.regions[index] = region;
        }
    }

    pub fn set_terrain_tag(&mut self, coord: TileCoord, tag: u8) {
        if let Some(index) = self.index_of(coord) {
            self.terrain_tags[index] = tag.min(MAX_TERRAIN_TAG);
        }
    }

    pub fn set_passage(&mut self, coord: TileCoord, blocked_mask: u8) {
        if let Some(index) = self.index_of(coord) {
            self.passage[index] = blocked_mask & PASSAGE_BLOCK_ALL;
        }
    }

    pub fn set_vehicle_flags(&mut self, coord: TileCoord, flags: u8) {
        if let Some(index) = self.index_of(coord) {
            self.vehicle[index] = flags;
        }
    }

    /// Marks a tile impassable from every side.
    pub fn block(&mut self, coord: TileCoord) {
        self.set_passage(coord, PASSAGE_BLOCK_ALL);
    }

    /// Tile-level walk passage through the given side of `coord`.
    pub fn is_passable(&self, coord: TileCoord, direction: Direction) -> bool {
        let Some(index) = self.index_of(coord) else {
            return false;
        };
        let mask = self.passage[index];
        if direction.is_diagonal() {
            return mask & PASSAGE_BLOCK_ALL != PASSAGE_BLOCK_ALL;
        }
        mask & passage_bit(direction) == 0
    }

    /// Walkable from at least one side.
    pub fn is_walkable(&self, coord: TileCoord) -> bool {
        self.index_of(coord)
            .map(|index| self.passage[index] & PASSAGE_BLOCK_ALL != PASSAGE_BLOCK_ALL)
            .unwrap_or(false)
    }

    pub fn is_boat_passable(&self, coord: TileCoord) -> bool {
        self.vehicle_flags(coord) & VEHICLE_BOAT_PASSABLE != 0
    }

    pub fn is_ship_passable(&self, coord: TileCoord) -> bool {
        self.vehicle_flags(coord) & VEHICLE_SHIP_PASSABLE != 0
    }

    pub fn is_airship_land_ok(&self, coord: TileCoord) -> bool {
        self.vehicle_flags(coord) & VEHICLE_AIRSHIP_LAND_OK != 0
    }

    fn vehicle_flags(&self, coord: TileCoord) -> u8 {
        self.index_of(coord)
            .and_then(|index| self.vehicle.get(index).copied())
            .unwrap_or(0)
    }

    /// Signed `from.x - to.x`, taking the short way round on looping maps.
    /// Saturates at `±i32::MAX` so the result can always be negated.
    pub fn delta_x(&self, from: i32, to: i32) -> i32 {
        loop_delta(from, to, self.width, self.loop_x)
    }

    pub fn delta_y(&self, from: i32, to: i32) -> i32 {
        loop_delta(from, to, self.height, self.loop_y)
    }

    /// Chebyshev distance; one diagonal step costs the same as a straight one.
    pub fn distance(&self, a: TileCoord, b: TileCoord) -> u32 {
        let dx = self.delta_x(a.x, b.x).unsigned_abs();
        let dy = self.delta_y(a.y, b.y).unsigned_abs();
        dx.max(dy)
    }

    pub fn coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
        (0..self.height as i32)
            .flat_map(move |y| (0..self.width as i32).map(move |x| TileCoord { x, y }))
    }
}

fn passage_bit(direction: Direction) -> u8 {
    match direction {
        Direction::Down => PASSAGE_BLOCK_DOWN,
        Direction::Left => PASSAGE_BLOCK_LEFT,
        Direction::Right => PASSAGE_BLOCK_RIGHT,
        Direction::Up => PASSAGE_BLOCK_UP,
        _ => PASSAGE_BLOCK_ALL,
    }
}

fn loop_delta(from: i32, to: i32, span: u32, looping: bool) -> i32 {
    let raw = i64::from(from) - i64::from(to);
    let span = i64::from(span);
    let delta = if !looping || raw.abs() <= span / 2 {
        raw
    } else if raw < 0 {
        raw + span
    } else {
        raw - span
    };
    delta.clamp(-i64::from(i32::MAX), i64::from(i32::MAX)) as i32
}

fn tile_count(width: u32, height: u32) -> Result<usize, MapGridError> {
    if width == 0 || height == 0 {
        return Err(MapGridError::EmptyDimensions { width, height });
    }
    Ok(width as usize * height as usize)
}

fn fill_or_check(layer: &'static str, values: Vec<u8>, count: usize) -> Result<Vec<u8>, MapGridError> {
    if values.is_empty() {
        return Ok(vec![0; count]);
    }
    if values.len() != count {
        return Err(MapGridError::TileCountMismatch {
            layer,
            expected: count,
            actual: values.len(),
        });
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_length_mismatch_is_rejected() {
        let error = MapGrid::from_layers(3, 2, vec![0; 5], Vec::new(), Vec::new(), Vec::new())
            .expect_err("mismatch");
        assert_eq!(
            error,
            MapGridError::TileCountMismatch {
                layer: "regions",
                expected: 6,
                actual: 5,
            }
        );
    }

    #[test]
    fn neighbor_wraps_only_on_looping_axes() {
        let bounded = MapGrid::open(4, 4).expect("grid");
        assert_eq!(bounded.neighbor(TileCoord::new(0, 0), Direction::Left), None);

        let looping = MapGrid::open(4, 4).expect("grid").with_loops(true, false);
        assert_eq!(
            looping.neighbor(TileCoord::new(0, 0), Direction::Left),
            Some(TileCoord::new(3, 0))
        );
        assert_eq!(looping.neighbor(TileCoord::new(0, 0), Direction::Up), None);
    }

    #[test]
    fn loop_delta_takes_the_short_way() {
        let grid = MapGrid::open(10, 10).expect("grid").with_loops(true, true);
        assert_eq!(grid.delta_x(9, 0), -1);
        assert_eq!(grid.delta_x(0, 9), 1);
        assert_eq!(grid.distance(TileCoord::new(0, 0), TileCoord::new(9, 8)), 2);
    }

    #[test]
    fn deltas_saturate_at_the_coordinate_extremes() {
        let grid = MapGrid::open(10, 10).expect("grid");
        assert_eq!(grid.delta_x(0, i32::MIN), i32::MAX);
        assert_eq!(grid.delta_x(i32::MIN, 5), -i32::MAX);
        assert_eq!(grid.delta_y(i32::MAX, i32::MIN), i32::MAX);
        assert_eq!(-grid.delta_y(0, i32::MIN), -i32::MAX);

        let looping = grid.with_loops(true, true);
        assert_eq!(looping.delta_x(0, i32::MIN), i32::MAX - 9);
    }

    #[test]
    fn passage_mask_blocks_single_sides() {
        let mut grid = MapGrid::open(3, 3).expect("grid");
        let center = TileCoord::new(1, 1);
        grid.set_passage(center, PASSAGE_BLOCK_UP);
        assert!(!grid.is_passable(center, Direction::Up));
        assert!(grid.is_passable(center, Direction::Down));
        assert!(grid.is_walkable(center));
        grid.block(center);
        assert!(!grid.is_walkable(center));
    }

    #[test]
    fn terrain_tags_above_seven_are_rejected() {
        let error = MapGrid::from_layers(2, 1, Vec::new(), vec![0, 8], Vec::new(), Vec::new())
            .expect_err("bad tag");
        assert_eq!(error, MapGridError::TerrainTagOutOfRange { index: 1, tag: 8 });
    }
}
