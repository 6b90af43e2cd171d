//! Move-route programs: the command AST, the text parser and the
//! per-character interpreter.

mod command;
mod interpreter;
mod parser;

use serde::{Deserialize, Serialize};

pub use command::{
    ArithOp, BuiltinOp, ExtendedCommand, MoveRoute, Operand, RouteCommand, SwitchAction, Target,
};
pub use interpreter::{
    step_once, NullScriptHost, RouteError, RouteSlot, ScriptError, ScriptHost, StepOutcome,
};
pub use parser::{compile_lines, compile_route, parse_line};

/// A route as written in map files: text lines and tagged opcodes mixed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveRouteDef {
    pub steps: Vec<RouteStep>,
    pub repeat: bool,
    pub skippable: bool,
    pub wait: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteStep {
    Line(String),
    Op(BuiltinOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
}

/// Program counter and suspension state for one installed route.
///
/// The counter either points at a command or the runner is idle; a
/// counter pushed past the end is clamped and the route finishes.
#[derive(Debug, Clone, Default)]
pub struct RouteRunner {
    route: Option<MoveRoute>,
    index: usize,
    wait_ticks: u32,
    repeat_left: Option<u32>,
    /// Opacity change per tick of the fade in progress.
    fade_step: Option<i32>,
}

impl RouteRunner {
    /// Installs `route`, replacing any running program and resetting the
    /// counter.
    pub fn start(&mut self, route: MoveRoute) {
        self.index = 0;
        self.wait_ticks = 0;
        self.repeat_left = None;
        self.fade_step = None;
        self.route = (!route.is_empty()).then_some(route);
    }

    pub fn clear(&mut self) {
        self.route = None;
        self.index = 0;
        self.wait_ticks = 0;
        self.repeat_left = None;
        self.fade_step = None;
    }

    pub fn state(&self) -> RunnerState {
        if self.route.is_some() {
            RunnerState::Running
        } else {
            RunnerState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunnerState::Running
    }

    pub fn route(&self) -> Option<&MoveRoute> {
        self.route.as_ref()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Moves the counter, finishing the route when it lands past the end.
    pub fn set_index(&mut self, index: usize) {
        self.index = index;
        self.repeat_left = None;
        self.fade_step = None;
        self.clamp();
    }

    pub fn current(&self) -> Option<&RouteCommand> {
        self.route.as_ref()?.commands.get(self.index)
    }

    pub fn skippable(&self) -> bool {
        self.route.as_ref().is_some_and(|route| route.skippable)
    }

    /// Steps past the current command, wrapping repeating routes.
    pub fn advance(&mut self) {
        self.repeat_left = None;
        self.fade_step = None;
        self.index += 1;
        self.clamp();
    }

    /// Handles an explicit route end opcode.
    pub fn finish(&mut self) {
        self.index = usize::MAX;
        self.repeat_left = None;
        self.fade_step = None;
        self.clamp();
    }

    fn clamp(&mut self) {
        let Some(route) = &self.route else {
            self.index = 0;
            return;
        };
        if self.index < route.len() {
            return;
        }
        if route.repeat {
            self.index = 0;
        } else {
            self.clear();
        }
    }

    pub fn set_wait(&mut self, ticks: u32) {
        self.wait_ticks = ticks;
    }

    /// Consumes one waiting tick. Returns `true` while the runner is still
    /// suspended.
    pub fn tick_wait(&mut self) -> bool {
        if self.wait_ticks == 0 {
            return false;
        }
        self.wait_ticks -= 1;
        true
    }

    pub fn repeat_left(&self) -> Option<u32> {
        self.repeat_left
    }

    pub fn set_repeat_left(&mut self, remaining: Option<u32>) {
        self.repeat_left = remaining;
    }

    pub fn fade_step(&self) -> Option<i32> {
        self.fade_step
    }

    pub fn set_fade_step(&mut self, step: Option<i32>) {
        self.fade_step = step;
    }
}
