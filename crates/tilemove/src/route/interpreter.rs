use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::grid::{Direction, TileCoord, CARDINALS};
use crate::rules::CollisionMode;
use crate::world::{CharacterId, KernelCue, MapWorld};

use super::command::{BuiltinOp, ExtendedCommand, Operand, RouteCommand, Target};
use super::parser::substitute_references;
use super::RouteRunner;

/// Which of a character's two runners to step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSlot {
    Forced,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing installed in the slot.
    Idle,
    /// Suspended in a wait.
    Waiting,
    Executed { moved: bool },
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ScriptError {
    message: String,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Runs route lines no built-in pattern recognised.
pub trait ScriptHost {
    fn run_script(&mut self, character: CharacterId, source: &str) -> Result<(), ScriptError>;
}

/// Host that accepts and ignores every script.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullScriptHost;

impl ScriptHost for NullScriptHost {
    fn run_script(&mut self, character: CharacterId, source: &str) -> Result<(), ScriptError> {
        debug!(character = character.0, source, "script_ignored");
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("no character {0} on this map")]
    UnknownTarget(i64),
    #[error("tile ({x}, {y}) is outside the map")]
    OffMap { x: i64, y: i64 },
    #[error("{command} needs a positive amount, got {value}")]
    InvalidArgument { command: &'static str, value: i64 },
    #[error("{command} divides by zero")]
    DivisionByZero { command: &'static str },
    #[error("script failed: {0}")]
    Script(#[from] ScriptError),
}

/// What a command left for the runner to do.
enum Flow {
    Next { moved: bool },
    /// Run the same command again next tick.
    Hold { moved: bool },
    /// A move that could not be made.
    Blocked,
    End,
}

fn runner_mut(
    world: &mut MapWorld,
    id: CharacterId,
    slot: RouteSlot,
) -> Option<&mut RouteRunner> {
    let character = world.character_mut(id)?;
    Some(match slot {
        RouteSlot::Forced => &mut character.route,
        RouteSlot::Custom => &mut character.custom_route,
    })
}

/// Executes the current instruction of `id`'s route in `slot`.
///
/// Instruction errors are logged and skipped. A blocked move is retried
/// next tick unless the route is skippable.
pub fn step_once(
    world: &mut MapWorld,
    id: CharacterId,
    slot: RouteSlot,
    host: &mut dyn ScriptHost,
) -> StepOutcome {
    let Some(runner) = runner_mut(world, id, slot) else {
        return StepOutcome::Idle;
    };
    if !runner.is_running() {
        return StepOutcome::Idle;
    }
    if runner.tick_wait() {
        return StepOutcome::Waiting;
    }
    let Some(command) = runner.current().cloned() else {
        return StepOutcome::Idle;
    };
    let index = runner.index();
    let skippable = runner.skippable();

    let result = execute(world, id, slot, &command, host);
    let route_debug = world.config().route_debug;
    let Some(runner) = runner_mut(world, id, slot) else {
        return StepOutcome::Executed { moved: false };
    };
    match result {
        Ok(Flow::Next { moved }) => {
            runner.advance();
            StepOutcome::Executed { moved }
        }
        Ok(Flow::Hold { moved }) => StepOutcome::Executed { moved },
        Ok(Flow::Blocked) => {
            if route_debug {
                debug!(character = id.0, index, skippable, "route_move_blocked");
            }
            if skippable {
                runner.advance();
            }
            StepOutcome::Executed { moved: false }
        }
        Ok(Flow::End) => {
            runner.finish();
            StepOutcome::Executed { moved: false }
        }
        Err(error) => {
            debug!(character = id.0, index, error = %error, "route_command_failed");
            runner.advance();
            StepOutcome::Executed { moved: false }
        }
    }
}

fn moved_or_blocked(moved: bool) -> Flow {
    if moved {
        Flow::Next { moved: true }
    } else {
        Flow::Blocked
    }
}

fn execute(
    world: &mut MapWorld,
    id: CharacterId,
    slot: RouteSlot,
    command: &RouteCommand,
    host: &mut dyn ScriptHost,
) -> Result<Flow, RouteError> {
    match command {
        RouteCommand::Builtin(op) => execute_builtin(world, id, slot, op, host),
        RouteCommand::Extended(command) => execute_extended(world, id, slot, command),
        RouteCommand::HostScript(source) => run_host_script(world, id, source, host),
    }
}

fn execute_builtin(
    world: &mut MapWorld,
    id: CharacterId,
    slot: RouteSlot,
    op: &BuiltinOp,
    host: &mut dyn ScriptHost,
) -> Result<Flow, RouteError> {
    if let Some(direction) = op.step_direction() {
        return Ok(moved_or_blocked(world.move_in_direction(id, direction)));
    }
    if let Some(direction) = op.turn_direction() {
        face(world, id, |_| direction);
        return Ok(Flow::Next { moved: false });
    }
    let context = world.self_context(id);
    match op {
        BuiltinOp::End => return Ok(Flow::End),
        BuiltinOp::MoveRandom => return Ok(moved_or_blocked(world.move_random(id))),
        BuiltinOp::MoveTowardPlayer => {
            let player = world.player().position;
            return Ok(moved_or_blocked(world.move_toward(id, player)));
        }
        BuiltinOp::MoveAwayFromPlayer => {
            let player = world.player().position;
            return Ok(moved_or_blocked(world.move_away_from(id, player)));
        }
        BuiltinOp::MoveForward => {
            let facing = character_field(world, id, |c| c.direction)?;
            return Ok(moved_or_blocked(world.move_in_direction(id, facing)));
        }
        BuiltinOp::MoveBackward => return Ok(moved_or_blocked(move_backward(world, id)?)),
        BuiltinOp::Jump { x, y } => return Ok(moved_or_blocked(world.jump(id, *x, *y))),
        BuiltinOp::Wait { ticks } => {
            set_wait(world, id, slot, i64::from(*ticks));
        }
        BuiltinOp::Turn90Right => face(world, id, Direction::turn_right_90),
        BuiltinOp::Turn90Left => face(world, id, Direction::turn_left_90),
        BuiltinOp::Turn180 => face(world, id, Direction::reverse),
        BuiltinOp::Turn90RightOrLeft => {
            let right = world.rng_mut().gen_bool(0.5);
            face(world, id, |current| {
                if right {
                    current.turn_right_90()
                } else {
                    current.turn_left_90()
                }
            });
        }
        BuiltinOp::TurnRandom => {
            if let Some(direction) = CARDINALS.choose(world.rng_mut()).copied() {
                face(world, id, |_| direction);
            }
        }
        BuiltinOp::TurnTowardPlayer => {
            let player = world.player().position;
            world.turn_toward(id, player);
        }
        BuiltinOp::TurnAwayFromPlayer => {
            let player = world.player().position;
            world.turn_away_from(id, player);
        }
        BuiltinOp::SwitchOn { id: switch } => world.state_mut().set_switch(*switch, true, context),
        BuiltinOp::SwitchOff { id: switch } => {
            world.state_mut().set_switch(*switch, false, context)
        }
        BuiltinOp::ChangeSpeed { speed } => with_character(world, id, |c| c.set_speed(*speed))?,
        BuiltinOp::ChangeFrequency { frequency } => {
            with_character(world, id, |c| c.set_frequency(*frequency))?
        }
        BuiltinOp::DirectionFixOn => with_character(world, id, |c| c.direction_fix = true)?,
        BuiltinOp::DirectionFixOff => with_character(world, id, |c| c.direction_fix = false)?,
        BuiltinOp::WalkAnimeOn => with_character(world, id, |c| c.walk_anime = true)?,
        BuiltinOp::WalkAnimeOff => with_character(world, id, |c| c.walk_anime = false)?,
        BuiltinOp::ThroughOn => with_character(world, id, |c| c.through = true)?,
        BuiltinOp::ThroughOff => with_character(world, id, |c| c.through = false)?,
        BuiltinOp::ChangeOpacity { opacity } => {
            with_character(world, id, |c| c.opacity = *opacity)?
        }
        BuiltinOp::Script { source } => return run_host_script(world, id, source, host),
        _ => {}
    }
    Ok(Flow::Next { moved: false })
}

fn execute_extended(
    world: &mut MapWorld,
    id: CharacterId,
    slot: RouteSlot,
    command: &ExtendedCommand,
) -> Result<Flow, RouteError> {
    let context = world.self_context(id);
    match command {
        ExtendedCommand::Animation(animation) => {
            let animation_id = resolve(world, id, *animation);
            world.push_cue(KernelCue::Animation {
                character: id,
                animation_id,
            });
        }
        ExtendedCommand::Balloon(name) => world.push_cue(KernelCue::Balloon {
            character: id,
            name: name.clone(),
        }),
        ExtendedCommand::FadeIn(step) => return fade(world, id, slot, *step, true),
        ExtendedCommand::FadeOut(step) => return fade(world, id, slot, *step, false),
        ExtendedCommand::ForceCarry(on) => with_character(world, id, |c| c.force_carry = *on)?,
        ExtendedCommand::ForceDash(on) => with_character(world, id, |c| c.force_dash = *on)?,
        ExtendedCommand::JumpForward(distance) => {
            let distance = resolve(world, id, *distance);
            let facing = character_field(world, id, |c| c.direction)?;
            let distance = clamp_i32(distance);
            return Ok(moved_or_blocked(world.jump(
                id,
                facing.dx().saturating_mul(distance),
                facing.dy().saturating_mul(distance),
            )));
        }
        ExtendedCommand::JumpTo(target) => {
            let goal = resolve_target(world, id, *target)?;
            let from = character_field(world, id, |c| c.position)?;
            let grid = world.grid();
            let (dx, dy) = (-grid.delta_x(from.x, goal.x), -grid.delta_y(from.y, goal.y));
            return Ok(moved_or_blocked(world.jump(id, dx, dy)));
        }
        ExtendedCommand::MoveUntilStop { direction, crash } => {
            return move_until_stop(world, id, slot, *direction, *crash);
        }
        ExtendedCommand::MoveRepeat { direction, count } => {
            return move_repeat(world, id, slot, *direction, *count);
        }
        ExtendedCommand::MoveTo(target) => return move_to(world, id, *target),
        ExtendedCommand::Opacity(opacity) => {
            let opacity = resolve(world, id, *opacity).clamp(0, 255) as u8;
            with_character(world, id, |c| c.opacity = opacity)?;
        }
        ExtendedCommand::PatternLock(pattern) => {
            let pattern = resolve(world, id, *pattern);
            with_character(world, id, |c| c.pattern_lock = Some(pattern))?;
        }
        ExtendedCommand::PatternUnlock => with_character(world, id, |c| c.pattern_lock = None)?,
        ExtendedCommand::Pose(name) => {
            with_character(world, id, |c| c.pose = Some(name.clone()))?;
            world.push_cue(KernelCue::Pose {
                character: id,
                name: name.clone(),
            });
        }
        ExtendedCommand::StepToward(target) => {
            let goal = resolve_target(world, id, *target)?;
            return Ok(moved_or_blocked(world.move_toward(id, goal)));
        }
        ExtendedCommand::StepAwayFrom(target) => {
            let goal = resolve_target(world, id, *target)?;
            return Ok(moved_or_blocked(world.move_away_from(id, goal)));
        }
        ExtendedCommand::TurnToward(target) => {
            let goal = resolve_target(world, id, *target)?;
            world.turn_toward(id, goal);
        }
        ExtendedCommand::TurnAwayFrom(target) => {
            let goal = resolve_target(world, id, *target)?;
            world.turn_away_from(id, goal);
        }
        ExtendedCommand::TeleportTo(target) => {
            let goal = resolve_target(world, id, *target)?;
            if !world.locate(id, goal) {
                return Err(RouteError::OffMap {
                    x: i64::from(goal.x),
                    y: i64::from(goal.y),
                });
            }
        }
        ExtendedCommand::SelfSwitch { slot, action } => {
            let store = world.state_mut().self_state_mut();
            let current = store.switch(context.map_id, context.event_id, *slot);
            store.set_switch(
                context.map_id,
                context.event_id,
                *slot,
                action.apply(current),
            );
        }
        ExtendedCommand::SelfVariable { id: variable, op, value } => {
            let operand = resolve(world, id, *value);
            let store = world.state_mut().self_state_mut();
            let current = store.variable(context.map_id, context.event_id, *variable);
            let next = op.apply(current, operand).ok_or(RouteError::DivisionByZero {
                command: "self variable",
            })?;
            store.set_variable(context.map_id, context.event_id, *variable, next);
        }
        ExtendedCommand::Switch { id: switch, action } => {
            let state = world.state_mut();
            let current = state.switch(*switch, context);
            state.set_switch(*switch, action.apply(current), context);
        }
        ExtendedCommand::Variable { id: variable, op, value } => {
            let operand = resolve(world, id, *value);
            let state = world.state_mut();
            let current = state.variable(*variable, context);
            let next = op
                .apply(current, operand)
                .ok_or(RouteError::DivisionByZero { command: "variable" })?;
            state.set_variable(*variable, next, context);
        }
        ExtendedCommand::Wait(ticks) => {
            let ticks = resolve(world, id, *ticks);
            set_wait(world, id, slot, ticks);
        }
    }
    Ok(Flow::Next { moved: false })
}

fn run_host_script(
    world: &mut MapWorld,
    id: CharacterId,
    source: &str,
    host: &mut dyn ScriptHost,
) -> Result<Flow, RouteError> {
    let context = world.self_context(id);
    let state = world.state();
    let text = substitute_references(
        source,
        |variable| state.variable(variable, context),
        |variable| {
            state
                .self_state()
                .variable(context.map_id, context.event_id, variable)
        },
    );
    host.run_script(id, &text)?;
    Ok(Flow::Next { moved: false })
}

/// A wait of `ticks` includes the tick that starts it.
fn set_wait(world: &mut MapWorld, id: CharacterId, slot: RouteSlot, ticks: i64) {
    if let Some(runner) = runner_mut(world, id, slot) {
        runner.set_wait(u32::try_from(ticks.saturating_sub(1)).unwrap_or(0));
    }
}

fn fade(
    world: &mut MapWorld,
    id: CharacterId,
    slot: RouteSlot,
    step: Operand,
    fade_in: bool,
) -> Result<Flow, RouteError> {
    let resolved = resolve(world, id, step);
    let command = if fade_in { "fade in" } else { "fade out" };
    let in_flight = runner_mut(world, id, slot).and_then(|runner| runner.fade_step());
    let character = world
        .character_mut(id)
        .ok_or(RouteError::UnknownTarget(i64::from(id.0)))?;
    let step = match in_flight {
        Some(step) => step,
        None if resolved > 0 => clamp_i32(resolved),
        None => {
            return Err(RouteError::InvalidArgument {
                command,
                value: resolved,
            })
        }
    };
    let opacity = i32::from(character.opacity);
    let next = if fade_in {
        opacity.saturating_add(step)
    } else {
        opacity.saturating_sub(step)
    };
    let next = next.clamp(0, 255);
    character.opacity = next as u8;
    let done = if fade_in { next == 255 } else { next == 0 };
    if let Some(runner) = runner_mut(world, id, slot) {
        runner.set_fade_step((!done).then_some(step));
    }
    if done {
        Ok(Flow::Next { moved: false })
    } else {
        Ok(Flow::Hold { moved: false })
    }
}

fn move_until_stop(
    world: &mut MapWorld,
    id: CharacterId,
    slot: RouteSlot,
    direction: Direction,
    crash: bool,
) -> Result<Flow, RouteError> {
    let remaining = match runner_mut(world, id, slot).and_then(|runner| runner.repeat_left()) {
        Some(remaining) => remaining,
        None => world.grid().width().max(world.grid().height()),
    };
    let collision = if crash {
        CollisionMode::IgnorePlayer
    } else {
        CollisionMode::All
    };
    if remaining == 0 || !world.step_with(id, direction, collision) {
        return Ok(Flow::Next { moved: false });
    }
    if crash && touches_player(world, id) {
        world.push_cue(KernelCue::Touch {
            character: id,
            other: CharacterId::PLAYER,
        });
        return Ok(Flow::Next { moved: true });
    }
    let remaining = remaining - 1;
    if remaining == 0 {
        return Ok(Flow::Next { moved: true });
    }
    if let Some(runner) = runner_mut(world, id, slot) {
        runner.set_repeat_left(Some(remaining));
    }
    Ok(Flow::Hold { moved: true })
}

fn touches_player(world: &MapWorld, id: CharacterId) -> bool {
    if id.is_player() {
        return false;
    }
    let (Some(mover), player) = (world.character(id), world.player()) else {
        return false;
    };
    mover
        .hitbox
        .overlaps(mover.position, &player.hitbox, player.position)
}

fn move_repeat(
    world: &mut MapWorld,
    id: CharacterId,
    slot: RouteSlot,
    direction: Direction,
    count: Operand,
) -> Result<Flow, RouteError> {
    let remaining = match runner_mut(world, id, slot).and_then(|runner| runner.repeat_left()) {
        Some(remaining) => remaining,
        None => {
            let count = resolve(world, id, count);
            if count <= 0 {
                return Ok(Flow::Next { moved: false });
            }
            u32::try_from(count).unwrap_or(u32::MAX)
        }
    };
    if !world.move_in_direction(id, direction) {
        if let Some(runner) = runner_mut(world, id, slot) {
            runner.set_repeat_left(Some(remaining));
        }
        return Ok(Flow::Blocked);
    }
    let remaining = remaining - 1;
    if remaining == 0 {
        return Ok(Flow::Next { moved: true });
    }
    if let Some(runner) = runner_mut(world, id, slot) {
        runner.set_repeat_left(Some(remaining));
    }
    Ok(Flow::Hold { moved: true })
}

/// One pathfinder step per tick until the goal is reached.
fn move_to(world: &mut MapWorld, id: CharacterId, target: Target) -> Result<Flow, RouteError> {
    let goal = resolve_target(world, id, target)?;
    let goal = world.grid().normalize(goal).ok_or(RouteError::OffMap {
        x: i64::from(goal.x),
        y: i64::from(goal.y),
    })?;
    let Some(direction) = world.find_direction_to(id, goal) else {
        return Ok(Flow::Next { moved: false });
    };
    if !world.move_in_direction(id, direction) {
        return Ok(Flow::Blocked);
    }
    let arrived = world.character(id).is_some_and(|c| c.position == goal);
    if arrived {
        Ok(Flow::Next { moved: true })
    } else {
        Ok(Flow::Hold { moved: true })
    }
}

fn move_backward(world: &mut MapWorld, id: CharacterId) -> Result<bool, RouteError> {
    let (facing, fixed) = character_field(world, id, |c| (c.direction, c.direction_fix))?;
    with_character(world, id, |c| c.direction_fix = true)?;
    let moved = world.move_in_direction(id, facing.reverse());
    with_character(world, id, |c| c.direction_fix = fixed)?;
    Ok(moved)
}

fn face(world: &mut MapWorld, id: CharacterId, turn: impl FnOnce(Direction) -> Direction) {
    if let Some(character) = world.character_mut(id) {
        let direction = turn(character.direction);
        character.face(direction);
    }
}

fn character_field<T>(
    world: &MapWorld,
    id: CharacterId,
    read: impl FnOnce(&crate::world::Character) -> T,
) -> Result<T, RouteError> {
    world
        .character(id)
        .map(read)
        .ok_or(RouteError::UnknownTarget(i64::from(id.0)))
}

fn with_character(
    world: &mut MapWorld,
    id: CharacterId,
    update: impl FnOnce(&mut crate::world::Character),
) -> Result<(), RouteError> {
    let character = world
        .character_mut(id)
        .ok_or(RouteError::UnknownTarget(i64::from(id.0)))?;
    update(character);
    Ok(())
}

fn resolve(world: &MapWorld, id: CharacterId, operand: Operand) -> i64 {
    let context = world.self_context(id);
    match operand {
        Operand::Literal(value) => value,
        Operand::Variable(variable) => world.state().variable(variable, context),
        Operand::SelfVariable(variable) => {
            world
                .state()
                .self_state()
                .variable(context.map_id, context.event_id, variable)
        }
    }
}

fn resolve_target(
    world: &MapWorld,
    id: CharacterId,
    target: Target,
) -> Result<TileCoord, RouteError> {
    match target {
        Target::Point(x, y) => Ok(TileCoord::new(
            clamp_i32(resolve(world, id, x)),
            clamp_i32(resolve(world, id, y)),
        )),
        Target::Event(event) => {
            let event = resolve(world, id, event);
            u32::try_from(event)
                .ok()
                .and_then(|event| world.character(CharacterId(event)))
                .map(|character| character.position)
                .ok_or(RouteError::UnknownTarget(event))
        }
        Target::Player => Ok(world.player().position),
        Target::Home => character_field(world, id, |c| c.home),
    }
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MovementConfig;
    use crate::content::MapData;
    use crate::grid::MapGrid;
    use crate::route::compile_lines;
    use crate::state::SwitchSlot;
    use crate::world::Character;

    struct RecordingHost {
        scripts: Vec<String>,
        fail: bool,
    }

    impl ScriptHost for RecordingHost {
        fn run_script(&mut self, _character: CharacterId, source: &str) -> Result<(), ScriptError> {
            self.scripts.push(source.to_string());
            if self.fail {
                Err(ScriptError::new("boom"))
            } else {
                Ok(())
            }
        }
    }

    const MOVER: CharacterId = CharacterId(7);

    fn world() -> MapWorld {
        let grid = MapGrid::open(6, 6).expect("grid");
        let config = MovementConfig {
            random_seed: Some(3),
            ..MovementConfig::default()
        };
        let mut world = MapWorld::new(config, MapData::with_grid(2, grid));
        world.place_player(TileCoord::new(5, 5), Direction::Down);
        assert!(world.add_character(Character::new(MOVER, TileCoord::new(0, 0))));
        world
    }

    fn install(world: &mut MapWorld, lines: &[&str], skippable: bool) {
        let mut route = compile_lines(lines.iter().copied(), false);
        route.skippable = skippable;
        world.set_route(MOVER, route);
    }

    /// Steps the forced route, clearing step durations in between.
    fn step(world: &mut MapWorld) -> StepOutcome {
        if let Some(character) = world.character_mut(MOVER) {
            character.busy_ticks = 0;
        }
        step_once(world, MOVER, RouteSlot::Forced, &mut NullScriptHost)
    }

    fn mover(world: &MapWorld) -> &Character {
        world.character(MOVER).expect("mover")
    }

    #[test]
    fn idle_slots_report_idle() {
        let mut world = world();
        assert_eq!(step(&mut world), StepOutcome::Idle);
    }

    #[test]
    fn move_to_walks_until_the_goal_then_runs_the_next_line() {
        let mut world = world();
        install(&mut world, &["Move To: 2, 2", "Self Switch A: ON"], false);
        let mut moves = 0;
        while mover(&world).position != TileCoord::new(2, 2) {
            assert_eq!(step(&mut world), StepOutcome::Executed { moved: true });
            moves += 1;
            assert!(moves <= 4);
        }
        assert_eq!(moves, 4);
        let self_switch = |world: &MapWorld| world.state().self_state().switch(2, 7, SwitchSlot::A);
        assert!(!self_switch(&world));
        step(&mut world);
        assert!(self_switch(&world));
        assert!(!mover(&world).route.is_running());
    }

    #[test]
    fn blocked_moves_retry_unless_skippable() {
        let mut world = world();
        install(&mut world, &["Move Up: 1", "Pose: Done"], false);
        assert_eq!(step(&mut world), StepOutcome::Executed { moved: false });
        assert_eq!(mover(&world).route.index(), 0);

        install(&mut world, &["Move Up: 1", "Pose: Done"], true);
        step(&mut world);
        assert_eq!(mover(&world).route.index(), 1);
    }

    #[test]
    fn move_until_stop_runs_to_the_wall() {
        let mut world = world();
        install(&mut world, &["Move Right Until Stop", "Pose: Stopped"], false);
        for _ in 0..5 {
            assert_eq!(step(&mut world), StepOutcome::Executed { moved: true });
        }
        assert_eq!(mover(&world).position, TileCoord::new(5, 0));
        assert_eq!(step(&mut world), StepOutcome::Executed { moved: false });
        assert_eq!(mover(&world).route.index(), 1);
    }

    #[test]
    fn crash_moves_pass_into_the_player_and_cue_a_touch() {
        let mut world = world();
        world.place_player(TileCoord::new(2, 0), Direction::Down);
        install(&mut world, &["Crash Move Right Until Stop"], false);
        step(&mut world);
        step(&mut world);
        assert_eq!(mover(&world).position, TileCoord::new(2, 0));
        assert!(world.drain_cues().contains(&KernelCue::Touch {
            character: MOVER,
            other: CharacterId::PLAYER,
        }));
        assert!(!mover(&world).route.is_running());
    }

    #[test]
    fn waits_include_the_starting_tick() {
        let mut world = world();
        install(&mut world, &["Wait: 3", "Pose: After"], false);
        assert_eq!(step(&mut world), StepOutcome::Executed { moved: false });
        assert_eq!(step(&mut world), StepOutcome::Waiting);
        assert_eq!(step(&mut world), StepOutcome::Waiting);
        step(&mut world);
        assert_eq!(mover(&world).pose.as_deref(), Some("After"));
    }

    #[test]
    fn fades_hold_until_fully_transparent() {
        let mut world = world();
        install(&mut world, &["Fade Out: 100"], false);
        step(&mut world);
        assert_eq!(mover(&world).opacity, 155);
        step(&mut world);
        assert_eq!(mover(&world).opacity, 55);
        step(&mut world);
        assert_eq!(mover(&world).opacity, 0);
        assert!(!mover(&world).route.is_running());
    }

    #[test]
    fn replacing_the_route_drops_an_unfinished_fade() {
        let mut world = world();
        install(&mut world, &["Fade Out: 100"], false);
        step(&mut world);
        assert_eq!(mover(&world).opacity, 155);

        install(&mut world, &["Fade In: 5"], false);
        step(&mut world);
        assert_eq!(mover(&world).opacity, 160);
    }

    #[test]
    fn extreme_target_coordinates_saturate() {
        let mut world = world();
        install(&mut world, &["Step Toward: -2147483648, 0"], false);
        assert_eq!(step(&mut world), StepOutcome::Executed { moved: false });
        assert_eq!(mover(&world).position, TileCoord::new(0, 0));
        assert_eq!(mover(&world).direction, Direction::Left);

        install(&mut world, &["Step Away From: -2147483648, 0"], false);
        assert_eq!(step(&mut world), StepOutcome::Executed { moved: true });
        assert_eq!(mover(&world).position, TileCoord::new(1, 0));

        let context = world.self_context(MOVER);
        world.state_mut().set_variable(9, i64::MAX, context);
        install(
            &mut world,
            &[
                "Turn Away From: \\V[9], 0",
                "Jump To: -2147483648, -2147483648",
                "Jump Forward: \\V[9]",
            ],
            true,
        );
        for _ in 0..3 {
            step(&mut world);
        }
        assert_eq!(mover(&world).direction, Direction::Left);
        assert_eq!(mover(&world).position, TileCoord::new(1, 0));
    }

    #[test]
    fn self_variables_use_arithmetic_and_references() {
        let mut world = world();
        let context = world.self_context(MOVER);
        world.state_mut().set_variable(4, 6, context);
        install(
            &mut world,
            &["Self Variable 1: \\V[4]", "Self Variable 1 *= 7", "Self Variable 1 /= 0"],
            false,
        );
        step(&mut world);
        step(&mut world);
        step(&mut world);
        let value = world.state().self_state().variable(2, 7, 1);
        assert_eq!(value, 42);
        assert!(!mover(&world).route.is_running());
    }

    #[test]
    fn unknown_targets_are_skipped() {
        let mut world = world();
        install(&mut world, &["Step Toward Event: 99", "Pose: Next"], false);
        step(&mut world);
        assert_eq!(mover(&world).route.index(), 1);
    }

    #[test]
    fn unmatched_lines_reach_the_host_with_references_substituted() {
        let mut world = world();
        let context = world.self_context(MOVER);
        world.state_mut().set_variable(2, 11, context);
        install(&mut world, &["host.shake(\\V[2])", "Pose: After"], false);

        let mut host = RecordingHost {
            scripts: Vec::new(),
            fail: true,
        };
        step_once(&mut world, MOVER, RouteSlot::Forced, &mut host);
        assert_eq!(host.scripts, vec!["host.shake(11)".to_string()]);
        assert_eq!(mover(&world).route.index(), 1);
    }

    #[test]
    fn builtin_turns_then_route_end_stops_the_runner() {
        let mut world = world();
        let route = crate::route::MoveRoute {
            commands: vec![
                RouteCommand::Builtin(BuiltinOp::TurnRight),
                RouteCommand::Builtin(BuiltinOp::Turn90Right),
                RouteCommand::Builtin(BuiltinOp::End),
                RouteCommand::Builtin(BuiltinOp::TurnUp),
            ],
            repeat: false,
            skippable: false,
            wait: false,
        };
        world.set_route(MOVER, route);
        step(&mut world);
        assert_eq!(mover(&world).direction, Direction::Right);
        step(&mut world);
        assert_eq!(mover(&world).direction, Direction::Down);
        step(&mut world);
        assert!(!mover(&world).route.is_running());
    }
}
