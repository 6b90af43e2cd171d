use std::collections::{HashMap, HashSet, VecDeque};

use crate::grid::{Direction, TileCoord, DIRECTION_ORDER};
use crate::rules::{CollisionMode, Mover, PassabilityEngine};

#[derive(Debug, Clone, Copy)]
struct OpenNode {
    coord: TileCoord,
    h_cost: u32,
    f_cost: u32,
    insertion_order: u64,
}

#[derive(Debug, Clone, Copy)]
struct NodeRecord {
    g_cost: u32,
    h_cost: u32,
    parent: Option<TileCoord>,
    /// Direction taken from `parent` to reach this node.
    via: Option<Direction>,
    insertion_order: u64,
}

/// Single-step A* over one map, re-run every tick by whoever follows it.
pub struct Pathfinder<'a> {
    engine: &'a PassabilityEngine<'a>,
    mover: Mover<'a>,
    search_limit: usize,
}

impl<'a> Pathfinder<'a> {
    pub fn new(engine: &'a PassabilityEngine<'a>, mover: Mover<'a>, search_limit: usize) -> Self {
        Self {
            engine,
            mover,
            search_limit: search_limit.max(1),
        }
    }

    /// First direction of a shortest route from `from` to `goal`, or the best
    /// partial route when the goal cannot be reached within the search
    /// limit. `None` only when already at the goal or the goal is off-map.
    pub fn find_direction_to(&self, from: TileCoord, goal: TileCoord) -> Option<Direction> {
        let grid = self.engine.grid();
        let goal = grid.normalize(goal)?;
        if from == goal {
            return None;
        }
        if let Some(direction) = self.straight_line_direction(from, goal) {
            return Some(direction);
        }
        self.search(from, goal)
            .or_else(|| self.direct_direction(from, goal))
    }

    fn directions(&self) -> &'static [Direction] {
        if self.engine.diagonal_config().enabled {
            &DIRECTION_ORDER
        } else {
            &DIRECTION_ORDER[..4]
        }
    }

    /// Character collision counts only for steps leaving the start tile.
    fn can_step(&self, at: TileCoord, direction: Direction, start: TileCoord) -> bool {
        let collision = if at == start {
            CollisionMode::All
        } else {
            CollisionMode::Suppressed
        };
        match direction.components() {
            Some((horizontal, vertical)) => {
                self.engine.can_pass(&self.mover, at, horizontal, collision)
                    && self.engine.can_pass(&self.mover, at, vertical, collision)
                    && self.engine.can_pass(&self.mover, at, direction, collision)
            }
            None => self.engine.can_pass(&self.mover, at, direction, collision),
        }
    }

    fn offset(&self, from: TileCoord, to: TileCoord) -> (i32, i32) {
        let grid = self.engine.grid();
        (-grid.delta_x(from.x, to.x), -grid.delta_y(from.y, to.y))
    }

    fn straight_line_direction(&self, from: TileCoord, goal: TileCoord) -> Option<Direction> {
        let (dx, dy) = self.offset(from, goal);
        let aligned = dx == 0
            || dy == 0
            || (self.engine.diagonal_config().enabled && dx.abs() == dy.abs());
        if !aligned {
            return None;
        }
        let direction = Direction::from_delta(dx, dy)?;
        let steps = dx.unsigned_abs().max(dy.unsigned_abs());
        let mut cursor = from;
        for _ in 0..steps {
            if !self.can_step(cursor, direction, from) {
                return None;
            }
            cursor = self.engine.grid().neighbor(cursor, direction)?;
        }
        (cursor == goal).then_some(direction)
    }

    /// Larger axis first, vertical on ties.
    fn direct_direction(&self, from: TileCoord, goal: TileCoord) -> Option<Direction> {
        let (dx, dy) = self.offset(from, goal);
        if dx.abs() > dy.abs() {
            Direction::from_delta(dx, 0)
        } else {
            Direction::from_delta(0, dy)
        }
    }

    fn search(&self, start: TileCoord, goal: TileCoord) -> Option<Direction> {
        let grid = self.engine.grid();
        let mut records: HashMap<TileCoord, NodeRecord> = HashMap::new();
        let mut closed: HashSet<TileCoord> = HashSet::new();
        let mut open = Vec::new();
        let mut next_insertion = 0u64;
        let mut expansions = 0usize;
        let mut goal_cost: Option<u32> = None;

        let start_h = grid.distance(start, goal);
        records.insert(
            start,
            NodeRecord {
                g_cost: 0,
                h_cost: start_h,
                parent: None,
                via: None,
                insertion_order: next_insertion,
            },
        );
        open.push(OpenNode {
            coord: start,
            h_cost: start_h,
            f_cost: start_h,
            insertion_order: next_insertion,
        });
        next_insertion += 1;

        while let Some(best_index) = pick_best_open_node_index(&open) {
            let current = open.swap_remove(best_index);
            if closed.contains(&current.coord) {
                continue;
            }
            if goal_cost.is_some_and(|cost| current.f_cost > cost) {
                break;
            }
            if expansions >= self.search_limit {
                break;
            }
            expansions += 1;
            closed.insert(current.coord);

            let Some(current_g) = records.get(&current.coord).map(|record| record.g_cost) else {
                continue;
            };
            if current.coord == goal {
                goal_cost.get_or_insert(current_g);
                continue;
            }

            for &direction in self.directions() {
                let Some(neighbor) = grid.neighbor(current.coord, direction) else {
                    continue;
                };
                if closed.contains(&neighbor) || !self.can_step(current.coord, direction, start) {
                    continue;
                }
                let tentative_g = current_g.saturating_add(1);
                if records
                    .get(&neighbor)
                    .is_some_and(|record| tentative_g >= record.g_cost)
                {
                    continue;
                }
                let h_cost = grid.distance(neighbor, goal);
                records.insert(
                    neighbor,
                    NodeRecord {
                        g_cost: tentative_g,
                        h_cost,
                        parent: Some(current.coord),
                        via: Some(direction),
                        insertion_order: next_insertion,
                    },
                );
                open.push(OpenNode {
                    coord: neighbor,
                    h_cost,
                    f_cost: tentative_g.saturating_add(h_cost),
                    insertion_order: next_insertion,
                });
                next_insertion += 1;
            }
        }

        if goal_cost.is_some() {
            if let Some(direction) = self.first_optimal_step(start, goal, &records, &closed) {
                return Some(direction);
            }
            return reconstruct_first_step(&records, start, goal);
        }

        let best = closed
            .iter()
            .filter_map(|coord| records.get(coord).map(|record| (*coord, *record)))
            .min_by_key(|(_, record)| {
                (
                    record.g_cost.saturating_add(record.h_cost),
                    record.h_cost,
                    record.insertion_order,
                )
            })
            .map(|(coord, _)| coord)?;
        if best == start {
            return None;
        }
        reconstruct_first_step(&records, start, best)
    }

    /// Labels every closed node that lies on some shortest path by walking
    /// backward from the goal, then picks the first start direction in
    /// [`DIRECTION_ORDER`] that enters a labelled node.
    fn first_optimal_step(
        &self,
        start: TileCoord,
        goal: TileCoord,
        records: &HashMap<TileCoord, NodeRecord>,
        closed: &HashSet<TileCoord>,
    ) -> Option<Direction> {
        let grid = self.engine.grid();
        let g_of = |coord: &TileCoord| {
            closed
                .contains(coord)
                .then(|| records.get(coord).map(|record| record.g_cost))
                .flatten()
        };

        let mut on_path: HashSet<TileCoord> = HashSet::new();
        let mut pending = VecDeque::new();
        on_path.insert(goal);
        pending.push_back(goal);
        while let Some(node) = pending.pop_front() {
            let Some(node_g) = g_of(&node) else {
                continue;
            };
            if node_g <= 1 {
                continue;
            }
            for &direction in self.directions() {
                let Some(predecessor) = grid.neighbor(node, direction.reverse()) else {
                    continue;
                };
                if on_path.contains(&predecessor) || g_of(&predecessor) != Some(node_g - 1) {
                    continue;
                }
                if self.can_step(predecessor, direction, start) {
                    on_path.insert(predecessor);
                    pending.push_back(predecessor);
                }
            }
        }

        self.directions().iter().copied().find(|&direction| {
            grid.neighbor(start, direction).is_some_and(|next| {
                on_path.contains(&next)
                    && g_of(&next) == Some(1)
                    && self.can_step(start, direction, start)
            })
        })
    }
}

fn pick_best_open_node_index(open: &[OpenNode]) -> Option<usize> {
    (0..open.len()).min_by_key(|&index| open_node_order_key(open[index]))
}

fn open_node_order_key(node: OpenNode) -> (u32, u32, u64) {
    (node.f_cost, node.h_cost, node.insertion_order)
}

fn reconstruct_first_step(
    records: &HashMap<TileCoord, NodeRecord>,
    start: TileCoord,
    target: TileCoord,
) -> Option<Direction> {
    let mut cursor = target;
    // A parent chain can never be longer than the number of records.
    for _ in 0..=records.len() {
        let record = records.get(&cursor)?;
        let parent = record.parent?;
        if parent == start {
            return record.via;
        }
        cursor = parent;
    }
    None
}
