//! Followers that derive their movement from another character.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::grid::{Direction, CARDINALS, DIRECTION_ORDER};
use crate::route::{step_once, RouteSlot, ScriptHost};
use crate::world::{CharacterId, LastMove, MapWorld};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    Mimic,
    ReverseMimic,
    MirrorHorizontal,
    MirrorVertical,
    Approach,
    Away,
    Random,
    /// Runs one step of the follower's own page route.
    Custom,
}

impl SyncPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "mimic" => Some(Self::Mimic),
            "reverse_mimic" => Some(Self::ReverseMimic),
            "mirror_horizontal" | "mirror_horz" => Some(Self::MirrorHorizontal),
            "mirror_vertical" | "mirror_vert" => Some(Self::MirrorVertical),
            "approach" => Some(Self::Approach),
            "away" => Some(Self::Away),
            "random" => Some(Self::Random),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// A follower's binding to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncLink {
    pub target: CharacterId,
    pub policy: SyncPolicy,
    /// Ticks between observing a move and repeating it.
    pub delay: u32,
    counter: u32,
    seen_serial: u64,
    pending: Option<LastMove>,
}

impl SyncLink {
    pub fn new(target: CharacterId, policy: SyncPolicy, delay: u32) -> Self {
        Self {
            target,
            policy,
            delay,
            counter: delay,
            seen_serial: 0,
            pending: None,
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn pending(&self) -> Option<LastMove> {
        self.pending
    }

    /// Marks everything the target did up to `serial` as already seen.
    pub(crate) fn mark_seen(&mut self, serial: u64) {
        self.seen_serial = serial;
    }

    pub(crate) fn observe(&mut self, serial: u64, last_move: Option<LastMove>) {
        if serial == self.seen_serial {
            return;
        }
        self.seen_serial = serial;
        if last_move.is_some() {
            self.pending = last_move;
        }
    }

    /// Counts down one tick. Returns the move to perform when the counter
    /// has run out, a move is pending and the follower is `ready`.
    pub(crate) fn tick(&mut self, ready: bool) -> Option<LastMove> {
        self.counter = self.counter.saturating_sub(1);
        if self.counter > 0 || !ready {
            return None;
        }
        let movement = self.pending.take()?;
        self.counter = self.delay;
        Some(movement)
    }
}

/// Performs `movement`, as observed on the target, under the follower's
/// policy. Returns whether the follower moved.
pub(crate) fn perform(
    world: &mut MapWorld,
    id: CharacterId,
    link: SyncLink,
    movement: LastMove,
    host: &mut dyn ScriptHost,
) -> bool {
    let Some(target) = world.character(link.target).map(|target| target.position) else {
        return false;
    };
    let moved = match (link.policy, movement) {
        (SyncPolicy::Approach, _) => world.move_toward(id, target),
        (SyncPolicy::Away, _) => world.move_away_from(id, target),
        (SyncPolicy::Random, _) => move_random_passable(world, id),
        (SyncPolicy::Custom, _) => matches!(
            step_once(world, id, RouteSlot::Custom, host),
            crate::route::StepOutcome::Executed { moved: true }
        ),
        (_, LastMove::Teleport) => false,
        (policy, LastMove::Step(direction)) => {
            world.move_in_direction(id, derive_direction(policy, direction))
        }
        (policy, LastMove::Jump { dx, dy }) => {
            let (dx, dy) = derive_offset(policy, dx, dy);
            world.jump(id, dx, dy)
        }
    };
    debug!(
        follower = id.0,
        target = link.target.0,
        policy = ?link.policy,
        moved,
        "sync_move"
    );
    moved
}

fn derive_direction(policy: SyncPolicy, direction: Direction) -> Direction {
    match policy {
        SyncPolicy::ReverseMimic => direction.reverse(),
        SyncPolicy::MirrorHorizontal => direction.mirror_horizontal(),
        SyncPolicy::MirrorVertical => direction.mirror_vertical(),
        _ => direction,
    }
}

fn derive_offset(policy: SyncPolicy, dx: i32, dy: i32) -> (i32, i32) {
    match policy {
        SyncPolicy::ReverseMimic => (-dx, -dy),
        SyncPolicy::MirrorHorizontal => (-dx, dy),
        SyncPolicy::MirrorVertical => (dx, -dy),
        _ => (dx, dy),
    }
}

fn move_random_passable(world: &mut MapWorld, id: CharacterId) -> bool {
    let candidates: &[Direction] = if world.config().diagonal.enabled {
        &DIRECTION_ORDER
    } else {
        &CARDINALS
    };
    let open: Vec<Direction> = candidates
        .iter()
        .copied()
        .filter(|direction| world.can_move(id, *direction))
        .collect();
    let Some(direction) = open.choose(world.rng_mut()).copied() else {
        return false;
    };
    world.move_in_direction(id, direction)
}
