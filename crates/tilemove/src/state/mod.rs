//! Self-switches, self-variables and the global switch/variable tables.

mod formula;
mod globals;
mod self_state;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use formula::{Formula, FormulaError, FormulaScope};
pub use globals::{GameState, SwitchDef, VariableDef};
pub use self_state::SelfStateStore;

/// Which self-switch: the classic letters A–D or a numbered extension.
/// Serialized as `"A"` or `"12"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SwitchSlot {
    Letter(char),
    Number(u32),
}

impl SwitchSlot {
    pub const A: Self = Self::Letter('A');
    pub const B: Self = Self::Letter('B');
    pub const C: Self = Self::Letter('C');
    pub const D: Self = Self::Letter('D');

    /// Accepts `a`–`d` in either case.
    pub fn letter(letter: char) -> Option<Self> {
        let upper = letter.to_ascii_uppercase();
        matches!(upper, 'A'..='D').then_some(Self::Letter(upper))
    }
}

impl TryFrom<String> for SwitchSlot {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let trimmed = raw.trim();
        if let Ok(number) = trimmed.parse::<u32>() {
            return Ok(Self::Number(number));
        }
        let mut chars = trimmed.chars();
        match (chars.next().and_then(Self::letter), chars.next()) {
            (Some(slot), None) => Ok(slot),
            _ => Err(format!("invalid self switch {raw:?}, expected A-D or a number")),
        }
    }
}

impl From<SwitchSlot> for String {
    fn from(slot: SwitchSlot) -> Self {
        match slot {
            SwitchSlot::Letter(letter) => letter.to_string(),
            SwitchSlot::Number(number) => number.to_string(),
        }
    }
}

impl fmt::Display for SwitchSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Letter(letter) => write!(f, "{letter}"),
            Self::Number(number) => write!(f, "Self Sw {number}"),
        }
    }
}

/// One addressable entry of an event's self state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelfSlot {
    Switch(SwitchSlot),
    Variable(u32),
}

impl fmt::Display for SelfSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Switch(slot) => slot.fmt(f),
            Self::Variable(id) => write!(f, "Self Vr {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelfValue {
    Bool(bool),
    Int(i64),
}

impl SelfValue {
    pub fn as_bool(self) -> bool {
        match self {
            Self::Bool(value) => value,
            Self::Int(value) => value != 0,
        }
    }

    pub fn as_int(self) -> i64 {
        match self {
            Self::Bool(value) => i64::from(value),
            Self::Int(value) => value,
        }
    }
}

/// The event on whose behalf state is read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SelfContext {
    pub map_id: u32,
    pub event_id: u32,
}

impl SelfContext {
    pub fn new(map_id: u32, event_id: u32) -> Self {
        Self { map_id, event_id }
    }

    /// Fills a zero map or event id from this context.
    pub fn resolve(self, map_id: u32, event_id: u32) -> (u32, u32) {
        let map_id = if map_id == 0 { self.map_id } else { map_id };
        let event_id = if event_id == 0 { self.event_id } else { event_id };
        (map_id, event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_labels_match_storage_suffixes() {
        assert_eq!(SelfSlot::Switch(SwitchSlot::C).to_string(), "C");
        assert_eq!(SelfSlot::Switch(SwitchSlot::Number(7)).to_string(), "Self Sw 7");
        assert_eq!(SelfSlot::Variable(3).to_string(), "Self Vr 3");
    }

    #[test]
    fn letters_outside_a_to_d_are_rejected() {
        assert_eq!(SwitchSlot::letter('b'), Some(SwitchSlot::B));
        assert_eq!(SwitchSlot::letter('E'), None);
    }

    #[test]
    fn switch_slots_serialize_as_short_strings() {
        let slots: Vec<SwitchSlot> = serde_json::from_str(r#"["a","D","14"]"#).expect("slots");
        assert_eq!(
            slots,
            vec![SwitchSlot::A, SwitchSlot::D, SwitchSlot::Number(14)]
        );
        assert_eq!(
            serde_json::to_string(&SwitchSlot::Number(3)).expect("json"),
            "\"3\""
        );
        assert!(serde_json::from_str::<SwitchSlot>(r#""Q""#).is_err());
    }

    #[test]
    fn zero_ids_resolve_from_context() {
        let context = SelfContext::new(4, 12);
        assert_eq!(context.resolve(0, 0), (4, 12));
        assert_eq!(context.resolve(9, 0), (9, 12));
        assert_eq!(context.resolve(2, 3), (2, 3));
    }
}
