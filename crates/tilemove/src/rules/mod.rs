mod passability;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub use passability::{CollisionMode, DiagonalMove, Mover, Occupant, PassabilityEngine};

/// What kind of body is moving; selects which rule lists apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Walk,
    Player,
    Event,
    Vehicle,
    Boat,
    Ship,
    Airship,
}

impl UnitType {
    /// Rule keys consulted for this unit: the catch-all, the unit itself and
    /// its broader category.
    pub fn rule_keys(self) -> &'static [RuleKey] {
        match self {
            Self::Walk => &[RuleKey::All, RuleKey::Walk],
            Self::Player => &[RuleKey::All, RuleKey::Player, RuleKey::Walk],
            Self::Event => &[RuleKey::All, RuleKey::Event, RuleKey::Walk],
            Self::Vehicle => &[RuleKey::All, RuleKey::Vehicle],
            Self::Boat => &[RuleKey::All, RuleKey::Boat, RuleKey::Vehicle],
            Self::Ship => &[RuleKey::All, RuleKey::Ship, RuleKey::Vehicle],
            Self::Airship => &[RuleKey::All, RuleKey::Airship, RuleKey::Vehicle],
        }
    }

    pub fn vehicle(self) -> Option<VehicleKind> {
        match self {
            Self::Boat => Some(VehicleKind::Boat),
            Self::Ship => Some(VehicleKind::Ship),
            Self::Airship => Some(VehicleKind::Airship),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKey {
    All,
    Walk,
    Player,
    Event,
    Vehicle,
    Boat,
    Ship,
    Airship,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleKind {
    Boat,
    Ship,
    Airship,
}

impl VehicleKind {
    pub fn unit_type(self) -> UnitType {
        match self {
            Self::Boat => UnitType::Boat,
            Self::Ship => UnitType::Ship,
            Self::Airship => UnitType::Airship,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockRule {
    pub regions: BTreeSet<u8>,
    /// Only the listed regions accept this vehicle.
    pub region_only: bool,
}

/// Region allow/forbid/dock lists for one map.
///
/// A region may appear in both the allow and forbid list of the same key;
/// allow is always consulted first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionRuleSet {
    pub allow: BTreeMap<RuleKey, BTreeSet<u8>>,
    pub forbid: BTreeMap<RuleKey, BTreeSet<u8>>,
    pub dock: BTreeMap<VehicleKind, DockRule>,
}

impl RegionRuleSet {
    pub fn with_allow(mut self, key: RuleKey, regions: impl IntoIterator<Item = u8>) -> Self {
        self.allow.entry(key).or_default().extend(regions);
        self
    }

    pub fn with_forbid(mut self, key: RuleKey, regions: impl IntoIterator<Item = u8>) -> Self {
        self.forbid.entry(key).or_default().extend(regions);
        self
    }

    pub fn with_dock(
        mut self,
        vehicle: VehicleKind,
        regions: impl IntoIterator<Item = u8>,
        region_only: bool,
    ) -> Self {
        let rule = self.dock.entry(vehicle).or_default();
        rule.regions.extend(regions);
        rule.region_only = region_only;
        self
    }

    pub fn allows(&self, unit: UnitType, region: u8) -> bool {
        list_contains(&self.allow, unit, region)
    }

    pub fn forbids(&self, unit: UnitType, region: u8) -> bool {
        list_contains(&self.forbid, unit, region)
    }

    pub fn dock_rule(&self, vehicle: VehicleKind) -> Option<&DockRule> {
        self.dock.get(&vehicle)
    }
}

fn list_contains(lists: &BTreeMap<RuleKey, BTreeSet<u8>>, unit: UnitType, region: u8) -> bool {
    unit.rule_keys().iter().any(|key| {
        lists
            .get(key)
            .is_some_and(|regions| regions.contains(&region))
    })
}
