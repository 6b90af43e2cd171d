use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SelfSlot, SelfValue, SwitchSlot};

/// Keyed store of every event's self-switches and self-variables.
///
/// Keys use the `"{map},{event},{slot}"` layout so saved games stay
/// readable. Entries are created on first write and only removed by
/// [`SelfStateStore::purge_missing_events`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelfStateStore {
    entries: BTreeMap<String, SelfValue>,
}

impl SelfStateStore {
    pub fn storage_key(map_id: u32, event_id: u32, slot: SelfSlot) -> String {
        format!("{map_id},{event_id},{slot}")
    }

    pub fn get(&self, map_id: u32, event_id: u32, slot: SelfSlot) -> SelfValue {
        self.entries
            .get(&Self::storage_key(map_id, event_id, slot))
            .copied()
            .unwrap_or(match slot {
                SelfSlot::Switch(_) => SelfValue::Bool(false),
                SelfSlot::Variable(_) => SelfValue::Int(0),
            })
    }

    pub fn set(&mut self, map_id: u32, event_id: u32, slot: SelfSlot, value: SelfValue) {
        let value = match slot {
            SelfSlot::Switch(_) => SelfValue::Bool(value.as_bool()),
            SelfSlot::Variable(_) => SelfValue::Int(value.as_int()),
        };
        self.entries
            .insert(Self::storage_key(map_id, event_id, slot), value);
    }

    pub fn switch(&self, map_id: u32, event_id: u32, slot: SwitchSlot) -> bool {
        self.get(map_id, event_id, SelfSlot::Switch(slot)).as_bool()
    }

    pub fn set_switch(&mut self, map_id: u32, event_id: u32, slot: SwitchSlot, value: bool) {
        self.set(map_id, event_id, SelfSlot::Switch(slot), SelfValue::Bool(value));
    }

    pub fn variable(&self, map_id: u32, event_id: u32, id: u32) -> i64 {
        self.get(map_id, event_id, SelfSlot::Variable(id)).as_int()
    }

    pub fn set_variable(&mut self, map_id: u32, event_id: u32, id: u32, value: i64) {
        self.set(map_id, event_id, SelfSlot::Variable(id), SelfValue::Int(value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SelfValue)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), *value))
    }

    /// Drops every entry of `map_id` whose event id is not in `live_events`.
    /// Returns the number of removed entries.
    pub fn purge_missing_events(&mut self, map_id: u32, live_events: &BTreeSet<u32>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| match split_key(key) {
            Some((map, event)) if map == map_id => live_events.contains(&event),
            _ => true,
        });
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(map_id, removed, "self_state_purged");
        }
        removed
    }

    /// Removes every entry of one event, used when a spawned event despawns.
    pub fn clear_event(&mut self, map_id: u32, event_id: u32) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| split_key(key) != Some((map_id, event_id)));
        before - self.entries.len()
    }
}

fn split_key(key: &str) -> Option<(u32, u32)> {
    let mut parts = key.splitn(3, ',');
    let map = parts.next()?.trim().parse().ok()?;
    let event = parts.next()?.trim().parse().ok()?;
    Some((map, event))
}
