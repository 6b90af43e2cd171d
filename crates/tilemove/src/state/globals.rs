use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::formula::{Formula, FormulaError, FormulaScope};
use super::{SelfContext, SelfStateStore, SwitchSlot};

const MAX_FORMULA_DEPTH: usize = 32;

/// How a global switch is backed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "expr", rename_all = "snake_case")]
pub enum SwitchDef {
    #[default]
    Plain,
    /// Read-only; evaluated on every read.
    Formula(String),
    /// Stored per event as `Self Sw {id}` of the reading event.
    SelfScoped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "expr", rename_all = "snake_case")]
pub enum VariableDef {
    #[default]
    Plain,
    Formula(String),
    /// Stored per event as `Self Vr {id}` of the reading event.
    SelfScoped,
}

#[derive(Debug, Clone)]
enum Backing {
    Formula(Formula),
    SelfScoped,
}

/// Global switches and variables plus every event's self state.
///
/// Reads of advanced entries take an explicit [`SelfContext`]; a context
/// with event id 0 reads self-scoped entries from the plain table.
#[derive(Debug, Clone, Default)]
pub struct GameState {
    switches: BTreeMap<u32, bool>,
    variables: BTreeMap<u32, i64>,
    switch_backing: BTreeMap<u32, Backing>,
    variable_backing: BTreeMap<u32, Backing>,
    self_state: SelfStateStore,
}

impl GameState {
    pub fn self_state(&self) -> &SelfStateStore {
        &self.self_state
    }

    pub fn self_state_mut(&mut self) -> &mut SelfStateStore {
        &mut self.self_state
    }

    pub fn replace_self_state(&mut self, store: SelfStateStore) {
        self.self_state = store;
    }

    pub fn define_switch(&mut self, id: u32, def: &SwitchDef) -> Result<(), FormulaError> {
        match def {
            SwitchDef::Plain => {
                self.switch_backing.remove(&id);
            }
            SwitchDef::Formula(source) => {
                self.switch_backing
                    .insert(id, Backing::Formula(Formula::parse(source)?));
            }
            SwitchDef::SelfScoped => {
                self.switch_backing.insert(id, Backing::SelfScoped);
            }
        }
        Ok(())
    }

    pub fn define_variable(&mut self, id: u32, def: &VariableDef) -> Result<(), FormulaError> {
        match def {
            VariableDef::Plain => {
                self.variable_backing.remove(&id);
            }
            VariableDef::Formula(source) => {
                self.variable_backing
                    .insert(id, Backing::Formula(Formula::parse(source)?));
            }
            VariableDef::SelfScoped => {
                self.variable_backing.insert(id, Backing::SelfScoped);
            }
        }
        Ok(())
    }

    /// Switch value as seen from `context`. Formula errors read as `false`.
    pub fn switch(&self, id: u32, context: SelfContext) -> bool {
        self.try_switch(id, context).unwrap_or_else(|error| {
            warn!(switch_id = id, error = %error, "switch_formula_failed");
            false
        })
    }

    pub fn try_switch(&self, id: u32, context: SelfContext) -> Result<bool, FormulaError> {
        self.switch_at_depth(id, context, 0)
    }

    /// Variable value as seen from `context`. Formula errors read as 0.
    pub fn variable(&self, id: u32, context: SelfContext) -> i64 {
        self.try_variable(id, context).unwrap_or_else(|error| {
            warn!(variable_id = id, error = %error, "variable_formula_failed");
            0
        })
    }

    pub fn try_variable(&self, id: u32, context: SelfContext) -> Result<i64, FormulaError> {
        self.variable_at_depth(id, context, 0)
    }

    /// Writes a switch. Formula-backed switches are read-only and ignore
    /// the write.
    pub fn set_switch(&mut self, id: u32, value: bool, context: SelfContext) {
        match self.switch_backing.get(&id) {
            Some(Backing::Formula(_)) => {
                warn!(switch_id = id, "formula_switch_write_ignored");
            }
            Some(Backing::SelfScoped) if context.event_id != 0 => {
                self.self_state.set_switch(
                    context.map_id,
                    context.event_id,
                    SwitchSlot::Number(id),
                    value,
                );
            }
            _ => {
                self.switches.insert(id, value);
            }
        }
    }

    pub fn set_variable(&mut self, id: u32, value: i64, context: SelfContext) {
        match self.variable_backing.get(&id) {
            Some(Backing::Formula(_)) => {
                warn!(variable_id = id, "formula_variable_write_ignored");
            }
            Some(Backing::SelfScoped) if context.event_id != 0 => {
                self.self_state
                    .set_variable(context.map_id, context.event_id, id, value);
            }
            _ => {
                self.variables.insert(id, value);
            }
        }
    }

    fn switch_at_depth(
        &self,
        id: u32,
        context: SelfContext,
        depth: usize,
    ) -> Result<bool, FormulaError> {
        match self.switch_backing.get(&id) {
            Some(Backing::Formula(formula)) => formula.evaluate_bool(&self.scope(context, depth)?),
            Some(Backing::SelfScoped) if context.event_id != 0 => Ok(self.self_state.switch(
                context.map_id,
                context.event_id,
                SwitchSlot::Number(id),
            )),
            _ => Ok(self.switches.get(&id).copied().unwrap_or(false)),
        }
    }

    fn variable_at_depth(
        &self,
        id: u32,
        context: SelfContext,
        depth: usize,
    ) -> Result<i64, FormulaError> {
        match self.variable_backing.get(&id) {
            Some(Backing::Formula(formula)) => formula.evaluate(&self.scope(context, depth)?),
            Some(Backing::SelfScoped) if context.event_id != 0 => {
                Ok(self
                    .self_state
                    .variable(context.map_id, context.event_id, id))
            }
            _ => Ok(self.variables.get(&id).copied().unwrap_or(0)),
        }
    }

    fn scope(&self, context: SelfContext, depth: usize) -> Result<StateScope<'_>, FormulaError> {
        if depth >= MAX_FORMULA_DEPTH {
            return Err(FormulaError::RecursionLimit {
                limit: MAX_FORMULA_DEPTH,
            });
        }
        Ok(StateScope {
            state: self,
            context,
            depth: depth + 1,
        })
    }
}

struct StateScope<'a> {
    state: &'a GameState,
    context: SelfContext,
    depth: usize,
}

impl FormulaScope for StateScope<'_> {
    fn variable(&self, id: u32) -> Result<i64, FormulaError> {
        self.state.variable_at_depth(id, self.context, self.depth)
    }

    fn switch(&self, id: u32) -> Result<bool, FormulaError> {
        self.state.switch_at_depth(id, self.context, self.depth)
    }

    fn self_variable(&self, id: u32) -> i64 {
        self.state
            .self_state
            .variable(self.context.map_id, self.context.event_id, id)
    }

    fn self_switch(&self, slot: SwitchSlot) -> bool {
        self.state
            .self_state
            .switch(self.context.map_id, self.context.event_id, slot)
    }

    fn context(&self) -> SelfContext {
        self.context
    }
}
