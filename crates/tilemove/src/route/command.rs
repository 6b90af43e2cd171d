use serde::{Deserialize, Serialize};

use crate::grid::Direction;
use crate::state::SwitchSlot;

/// Built-in route opcodes. These are also the JSON form of route steps in
/// map files (`{"op": "move_down"}`, `{"op": "wait", "ticks": 30}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BuiltinOp {
    End,
    MoveDown,
    MoveLeft,
    MoveRight,
    MoveUp,
    MoveLowerLeft,
    MoveLowerRight,
    MoveUpperLeft,
    MoveUpperRight,
    MoveRandom,
    MoveTowardPlayer,
    MoveAwayFromPlayer,
    MoveForward,
    MoveBackward,
    Jump { x: i32, y: i32 },
    Wait { ticks: u32 },
    TurnDown,
    TurnLeft,
    TurnRight,
    TurnUp,
    Turn90Right,
    Turn90Left,
    Turn180,
    Turn90RightOrLeft,
    TurnRandom,
    TurnTowardPlayer,
    TurnAwayFromPlayer,
    SwitchOn { id: u32 },
    SwitchOff { id: u32 },
    ChangeSpeed { speed: u8 },
    ChangeFrequency { frequency: u8 },
    WalkAnimeOn,
    WalkAnimeOff,
    DirectionFixOn,
    DirectionFixOff,
    ThroughOn,
    ThroughOff,
    ChangeOpacity { opacity: u8 },
    Script { source: String },
}

impl BuiltinOp {
    /// Straight or diagonal step this opcode performs, if it is a plain move.
    pub fn step_direction(&self) -> Option<Direction> {
        match self {
            Self::MoveDown => Some(Direction::Down),
            Self::MoveLeft => Some(Direction::Left),
            Self::MoveRight => Some(Direction::Right),
            Self::MoveUp => Some(Direction::Up),
            Self::MoveLowerLeft => Some(Direction::DownLeft),
            Self::MoveLowerRight => Some(Direction::DownRight),
            Self::MoveUpperLeft => Some(Direction::UpLeft),
            Self::MoveUpperRight => Some(Direction::UpRight),
            _ => None,
        }
    }

    pub fn turn_direction(&self) -> Option<Direction> {
        match self {
            Self::TurnDown => Some(Direction::Down),
            Self::TurnLeft => Some(Direction::Left),
            Self::TurnRight => Some(Direction::Right),
            Self::TurnUp => Some(Direction::Up),
            _ => None,
        }
    }
}

/// Numeric argument whose value may come from game state at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Literal(i64),
    /// `\V[n]`
    Variable(u32),
    /// `\SelfVar[n]`
    SelfVariable(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Point(Operand, Operand),
    Event(Operand),
    Player,
    /// Where the character was placed when the map was set up.
    Home,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchAction {
    On,
    Off,
    Toggle,
}

impl SwitchAction {
    pub fn apply(self, current: bool) -> bool {
        match self {
            Self::On => true,
            Self::Off => false,
            Self::Toggle => !current,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    /// `None` on division or modulo by zero.
    pub fn apply(self, current: i64, operand: i64) -> Option<i64> {
        match self {
            Self::Set => Some(operand),
            Self::Add => Some(current.saturating_add(operand)),
            Self::Sub => Some(current.saturating_sub(operand)),
            Self::Mul => Some(current.saturating_mul(operand)),
            Self::Div => current.checked_div(operand),
            Self::Mod => current.checked_rem(operand),
        }
    }
}

/// Commands recognised from move-route text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendedCommand {
    Animation(Operand),
    Balloon(String),
    FadeIn(Operand),
    FadeOut(Operand),
    ForceCarry(bool),
    ForceDash(bool),
    JumpForward(Operand),
    JumpTo(Target),
    MoveUntilStop { direction: Direction, crash: bool },
    MoveRepeat { direction: Direction, count: Operand },
    MoveTo(Target),
    Opacity(Operand),
    PatternLock(Operand),
    PatternUnlock,
    Pose(String),
    StepToward(Target),
    StepAwayFrom(Target),
    TurnToward(Target),
    TurnAwayFrom(Target),
    TeleportTo(Target),
    SelfSwitch { slot: SwitchSlot, action: SwitchAction },
    SelfVariable { id: u32, op: ArithOp, value: Operand },
    Switch { id: u32, action: SwitchAction },
    Variable { id: u32, op: ArithOp, value: Operand },
    Wait(Operand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteCommand {
    Builtin(BuiltinOp),
    Extended(ExtendedCommand),
    /// Text no pattern recognised; handed to the host script runner.
    HostScript(String),
}

/// A parsed, ready-to-run move route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveRoute {
    pub commands: Vec<RouteCommand>,
    pub repeat: bool,
    /// Skip a move that cannot be made instead of retrying it.
    pub skippable: bool,
    /// The caller waits for the route to finish.
    pub wait: bool,
}

impl MoveRoute {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ops_read_from_tagged_json() {
        let ops: Vec<BuiltinOp> = serde_json::from_str(
            r#"[{"op":"move_down"},{"op":"jump","x":2,"y":-1},{"op":"wait","ticks":15}]"#,
        )
        .expect("ops");
        assert_eq!(
            ops,
            vec![
                BuiltinOp::MoveDown,
                BuiltinOp::Jump { x: 2, y: -1 },
                BuiltinOp::Wait { ticks: 15 },
            ]
        );
    }

    #[test]
    fn arithmetic_refuses_division_by_zero() {
        assert_eq!(ArithOp::Div.apply(10, 0), None);
        assert_eq!(ArithOp::Mod.apply(10, 3), Some(1));
        assert_eq!(ArithOp::Sub.apply(i64::MIN, 1), Some(i64::MIN));
    }
}
