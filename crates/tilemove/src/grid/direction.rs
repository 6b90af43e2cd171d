use serde::{Deserialize, Serialize};

/// Facing/movement direction in numpad encoding: 2 down, 4 left, 6 right,
/// 8 up, and 1/3/7/9 for the diagonals. Screen y grows downward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Direction {
    DownLeft,
    Down,
    DownRight,
    Left,
    Right,
    UpLeft,
    Up,
    UpRight,
}

/// Probe order used wherever several directions are equally good.
pub const DIRECTION_ORDER: [Direction; 8] = [
    Direction::Down,
    Direction::Left,
    Direction::Right,
    Direction::Up,
    Direction::DownLeft,
    Direction::DownRight,
    Direction::UpLeft,
    Direction::UpRight,
];

pub const CARDINALS: [Direction; 4] = [
    Direction::Down,
    Direction::Left,
    Direction::Right,
    Direction::Up,
];

impl Direction {
    pub fn from_numpad(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::DownLeft),
            2 => Some(Self::Down),
            3 => Some(Self::DownRight),
            4 => Some(Self::Left),
            6 => Some(Self::Right),
            7 => Some(Self::UpLeft),
            8 => Some(Self::Up),
            9 => Some(Self::UpRight),
            _ => None,
        }
    }

    pub fn numpad(self) -> u8 {
        match self {
            Self::DownLeft => 1,
            Self::Down => 2,
            Self::DownRight => 3,
            Self::Left => 4,
            Self::Right => 6,
            Self::UpLeft => 7,
            Self::Up => 8,
            Self::UpRight => 9,
        }
    }

    /// Parses the direction words used by move-route text, e.g. `LOWER LEFT`.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        match normalized.as_str() {
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "up" => Some(Self::Up),
            "lower left" | "down left" => Some(Self::DownLeft),
            "lower right" | "down right" => Some(Self::DownRight),
            "upper left" | "up left" => Some(Self::UpLeft),
            "upper right" | "up right" => Some(Self::UpRight),
            _ => None,
        }
    }

    pub fn dx(self) -> i32 {
        match self {
            Self::DownLeft | Self::Left | Self::UpLeft => -1,
            Self::Down | Self::Up => 0,
            Self::DownRight | Self::Right | Self::UpRight => 1,
        }
    }

    pub fn dy(self) -> i32 {
        match self {
            Self::UpLeft | Self::Up | Self::UpRight => -1,
            Self::Left | Self::Right => 0,
            Self::DownLeft | Self::Down | Self::DownRight => 1,
        }
    }

    pub fn from_delta(dx: i32, dy: i32) -> Option<Self> {
        match (dx.signum(), dy.signum()) {
            (-1, 1) => Some(Self::DownLeft),
            (0, 1) => Some(Self::Down),
            (1, 1) => Some(Self::DownRight),
            (-1, 0) => Some(Self::Left),
            (1, 0) => Some(Self::Right),
            (-1, -1) => Some(Self::UpLeft),
            (0, -1) => Some(Self::Up),
            (1, -1) => Some(Self::UpRight),
            _ => None,
        }
    }

    pub fn is_diagonal(self) -> bool {
        self.dx() != 0 && self.dy() != 0
    }

    /// Horizontal and vertical components of a diagonal.
    pub fn components(self) -> Option<(Direction, Direction)> {
        if !self.is_diagonal() {
            return None;
        }
        let horizontal = if self.dx() < 0 { Self::Left } else { Self::Right };
        let vertical = if self.dy() < 0 { Self::Up } else { Self::Down };
        Some((horizontal, vertical))
    }

    pub fn reverse(self) -> Self {
        match self {
            Self::DownLeft => Self::UpRight,
            Self::Down => Self::Up,
            Self::DownRight => Self::UpLeft,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
            Self::UpLeft => Self::DownRight,
            Self::Up => Self::Down,
            Self::UpRight => Self::DownLeft,
        }
    }

    /// Reflects across the vertical axis: left and right swap.
    pub fn mirror_horizontal(self) -> Self {
        Self::from_delta(-self.dx(), self.dy()).unwrap_or(self)
    }

    /// Reflects across the horizontal axis: up and down swap.
    pub fn mirror_vertical(self) -> Self {
        Self::from_delta(self.dx(), -self.dy()).unwrap_or(self)
    }

    /// Counter-clockwise quarter turn, seen from above.
    pub fn turn_left_90(self) -> Self {
        // (dx, dy) -> (dy, -dx) with y pointing down.
        Self::from_delta(self.dy(), -self.dx()).unwrap_or(self)
    }

    pub fn turn_right_90(self) -> Self {
        Self::from_delta(-self.dy(), self.dx()).unwrap_or(self)
    }
}

impl From<Direction> for u8 {
    fn from(value: Direction) -> Self {
        value.numpad()
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Direction::from_numpad(value).ok_or_else(|| format!("invalid direction {value}"))
    }
}
