use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::grid::Direction;
use crate::state::SwitchSlot;

use super::command::{
    ArithOp, BuiltinOp, ExtendedCommand, MoveRoute, Operand, RouteCommand, SwitchAction, Target,
};
use super::{MoveRouteDef, RouteStep};

const OPERAND: &str = r"-?\d+|\\V\[\d+\]|\\SELFVAR\[\d+\]";
const DIRECTION_WORDS: &str =
    r"LOWER\s+LEFT|LOWER\s+RIGHT|UPPER\s+LEFT|UPPER\s+RIGHT|DOWN|LEFT|RIGHT|UP";

type BuildFn = fn(&Captures<'_>) -> Option<ExtendedCommand>;

struct LinePattern {
    name: &'static str,
    regex: Regex,
    build: BuildFn,
}

/// Ordered pattern table; the first matching entry wins.
struct PatternTable {
    patterns: Vec<LinePattern>,
}

impl PatternTable {
    fn with_builtins() -> Self {
        let mut table = Self { patterns: Vec::new() };
        let op = OPERAND;
        let dir = DIRECTION_WORDS;

        table.register("animation", &format!(r"^ANIMATION\s*:\s*(?P<v>{op})$"), |caps| {
            Some(ExtendedCommand::Animation(operand(caps, "v")?))
        });
        table.register("balloon", r"^BALLOON\s*:\s*(?P<name>.+)$", |caps| {
            Some(ExtendedCommand::Balloon(text(caps, "name")?))
        });
        table.register("fade_in", &format!(r"^FADE\s+IN\s*:\s*(?P<v>{op})$"), |caps| {
            Some(ExtendedCommand::FadeIn(operand(caps, "v")?))
        });
        table.register("fade_out", &format!(r"^FADE\s+OUT\s*:\s*(?P<v>{op})$"), |caps| {
            Some(ExtendedCommand::FadeOut(operand(caps, "v")?))
        });
        table.register(
            "force_carry",
            r"^FORCE\s+CARRY(?:ING)?\s*:\s*(?P<flag>ON|OFF)$",
            |caps| Some(ExtendedCommand::ForceCarry(flag(caps, "flag")?)),
        );
        table.register(
            "force_dash",
            r"^FORCE\s+DASH(?:ING)?\s*:\s*(?P<flag>ON|OFF)$",
            |caps| Some(ExtendedCommand::ForceDash(flag(caps, "flag")?)),
        );
        table.register(
            "jump_forward",
            &format!(r"^JUMP\s+FORWARD\s*:\s*(?P<v>{op})$"),
            |caps| Some(ExtendedCommand::JumpForward(operand(caps, "v")?)),
        );
        table.register("jump_to", &target_pattern(r"JUMP\s+TO"), |caps| {
            Some(ExtendedCommand::JumpTo(target(caps)?))
        });
        table.register(
            "move_until_stop",
            &format!(r"^(?P<crash>CRASH\s+)?MOVE\s+(?P<dir>{dir})\s+UNTIL\s+STOP$"),
            |caps| {
                Some(ExtendedCommand::MoveUntilStop {
                    direction: direction(caps, "dir")?,
                    crash: caps.name("crash").is_some(),
                })
            },
        );
        table.register("move_to", &target_pattern(r"MOVE\s+TO"), |caps| {
            Some(ExtendedCommand::MoveTo(target(caps)?))
        });
        table.register(
            "move_repeat",
            &format!(r"^MOVE\s+(?P<dir>{dir})\s*:\s*(?P<v>{op})$"),
            |caps| {
                Some(ExtendedCommand::MoveRepeat {
                    direction: direction(caps, "dir")?,
                    count: operand(caps, "v")?,
                })
            },
        );
        table.register("opacity", &format!(r"^OPACITY\s*:\s*(?P<v>{op})$"), |caps| {
            Some(ExtendedCommand::Opacity(operand(caps, "v")?))
        });
        table.register(
            "pattern_lock",
            &format!(r"^PATTERN\s+LOCK\s*:\s*(?P<v>{op})$"),
            |caps| Some(ExtendedCommand::PatternLock(operand(caps, "v")?)),
        );
        table.register("pattern_unlock", r"^PATTERN\s+UNLOCK$", |_| {
            Some(ExtendedCommand::PatternUnlock)
        });
        table.register("pose", r"^POSE\s*:\s*(?P<name>.+)$", |caps| {
            Some(ExtendedCommand::Pose(text(caps, "name")?))
        });
        table.register("step_away", &target_pattern(r"STEP\s+AWAY\s+FROM"), |caps| {
            Some(ExtendedCommand::StepAwayFrom(target(caps)?))
        });
        table.register("step_toward", &target_pattern(r"STEP\s+TOWARDS?"), |caps| {
            Some(ExtendedCommand::StepToward(target(caps)?))
        });
        table.register("turn_away", &target_pattern(r"TURN\s+AWAY\s+FROM"), |caps| {
            Some(ExtendedCommand::TurnAwayFrom(target(caps)?))
        });
        table.register("turn_to", &target_pattern(r"TURN\s+TO(?:WARDS?)?"), |caps| {
            Some(ExtendedCommand::TurnToward(target(caps)?))
        });
        table.register("teleport_to", &target_pattern(r"TELEPORT\s+TO"), |caps| {
            Some(ExtendedCommand::TeleportTo(target(caps)?))
        });
        table.register(
            "self_switch",
            r"^SELF\s+SWITCH\s+(?P<slot>[A-D]|\d+)\s*:\s*(?P<act>ON|OFF|TOGGLE)$",
            |caps| {
                Some(ExtendedCommand::SelfSwitch {
                    slot: switch_slot(caps, "slot")?,
                    action: switch_action(caps, "act")?,
                })
            },
        );
        table.register(
            "self_variable",
            &format!(r"^SELF\s+VARIABLE\s+(?P<id>\d+)\s*(?:(?P<op>[-+*/%])=|:)\s*(?P<v>{op})$"),
            |caps| {
                Some(ExtendedCommand::SelfVariable {
                    id: number(caps, "id")?,
                    op: arith_op(caps),
                    value: operand(caps, "v")?,
                })
            },
        );
        table.register(
            "switch",
            r"^SWITCH\s+(?P<id>\d+)\s*:\s*(?P<act>ON|OFF|TOGGLE)$",
            |caps| {
                Some(ExtendedCommand::Switch {
                    id: number(caps, "id")?,
                    action: switch_action(caps, "act")?,
                })
            },
        );
        table.register(
            "variable",
            &format!(r"^VARIABLE\s+(?P<id>\d+)\s*(?:(?P<op>[-+*/%])=|:)\s*(?P<v>{op})$"),
            |caps| {
                Some(ExtendedCommand::Variable {
                    id: number(caps, "id")?,
                    op: arith_op(caps),
                    value: operand(caps, "v")?,
                })
            },
        );
        table.register("wait", &format!(r"^WAIT\s*:\s*(?P<v>{op})$"), |caps| {
            Some(ExtendedCommand::Wait(operand(caps, "v")?))
        });
        table
    }

    fn register(&mut self, name: &'static str, pattern: &str, build: BuildFn) {
        let regex = Regex::new(&format!("(?i){pattern}"))
            .expect("built-in route pattern should compile");
        self.patterns.push(LinePattern { name, regex, build });
    }

    fn parse(&self, line: &str) -> Option<(&'static str, ExtendedCommand)> {
        for pattern in &self.patterns {
            if let Some(caps) = pattern.regex.captures(line) {
                if let Some(command) = (pattern.build)(&caps) {
                    return Some((pattern.name, command));
                }
            }
        }
        None
    }
}

fn pattern_table() -> &'static PatternTable {
    static TABLE: OnceLock<PatternTable> = OnceLock::new();
    TABLE.get_or_init(PatternTable::with_builtins)
}

fn target_pattern(verb: &str) -> String {
    let op = OPERAND;
    format!(
        r"^{verb}\s*(?:(?P<player>PLAYER)|(?P<home>HOME)|EVENT\s*:\s*(?P<event>{op})|:\s*(?P<x>{op})\s*,\s*(?P<y>{op}))$"
    )
}

/// Parses one move-route text line. Lines no pattern recognises become
/// [`RouteCommand::HostScript`].
pub fn parse_line(line: &str) -> RouteCommand {
    let trimmed = line.trim();
    match pattern_table().parse(trimmed) {
        Some((_, command)) => RouteCommand::Extended(command),
        None => RouteCommand::HostScript(trimmed.to_string()),
    }
}

/// Name of the pattern a line matches.
#[cfg(test)]
fn matched_pattern_name(line: &str) -> Option<&'static str> {
    pattern_table().parse(line.trim()).map(|(name, _)| name)
}

pub fn compile_route(def: &MoveRouteDef) -> MoveRoute {
    let commands = def
        .steps
        .iter()
        .map(|step| match step {
            RouteStep::Line(line) => parse_line(line),
            RouteStep::Op(BuiltinOp::Script { source }) => parse_line(source),
            RouteStep::Op(op) => RouteCommand::Builtin(op.clone()),
        })
        .collect();
    MoveRoute {
        commands,
        repeat: def.repeat,
        skippable: def.skippable,
        wait: def.wait,
    }
}

/// Convenience for routes written as text lines only.
pub fn compile_lines<I, S>(lines: I, repeat: bool) -> MoveRoute
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    MoveRoute {
        commands: lines
            .into_iter()
            .map(|line| parse_line(line.as_ref()))
            .collect(),
        repeat,
        skippable: false,
        wait: false,
    }
}

pub(crate) fn parse_operand(raw: &str) -> Option<Operand> {
    let upper = raw.trim().to_ascii_uppercase();
    if let Some(rest) = upper.strip_prefix("\\SELFVAR[") {
        return rest
            .strip_suffix(']')?
            .parse()
            .ok()
            .map(Operand::SelfVariable);
    }
    if let Some(rest) = upper.strip_prefix("\\V[") {
        return rest.strip_suffix(']')?.parse().ok().map(Operand::Variable);
    }
    upper.parse().ok().map(Operand::Literal)
}

fn operand(caps: &Captures<'_>, name: &str) -> Option<Operand> {
    parse_operand(caps.name(name)?.as_str())
}

fn number(caps: &Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name)?.as_str().parse().ok()
}

fn text(caps: &Captures<'_>, name: &str) -> Option<String> {
    let value = caps.name(name)?.as_str().trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn flag(caps: &Captures<'_>, name: &str) -> Option<bool> {
    match caps.name(name)?.as_str().to_ascii_uppercase().as_str() {
        "ON" => Some(true),
        "OFF" => Some(false),
        _ => None,
    }
}

fn direction(caps: &Captures<'_>, name: &str) -> Option<Direction> {
    Direction::from_name(caps.name(name)?.as_str())
}

fn switch_action(caps: &Captures<'_>, name: &str) -> Option<SwitchAction> {
    match caps.name(name)?.as_str().to_ascii_uppercase().as_str() {
        "ON" => Some(SwitchAction::On),
        "OFF" => Some(SwitchAction::Off),
        "TOGGLE" => Some(SwitchAction::Toggle),
        _ => None,
    }
}

fn switch_slot(caps: &Captures<'_>, name: &str) -> Option<SwitchSlot> {
    let raw = caps.name(name)?.as_str();
    match raw.parse::<u32>() {
        Ok(number) => Some(SwitchSlot::Number(number)),
        Err(_) => SwitchSlot::letter(raw.chars().next()?),
    }
}

fn arith_op(caps: &Captures<'_>) -> ArithOp {
    match caps.name("op").map(|m| m.as_str()) {
        Some("+") => ArithOp::Add,
        Some("-") => ArithOp::Sub,
        Some("*") => ArithOp::Mul,
        Some("/") => ArithOp::Div,
        Some("%") => ArithOp::Mod,
        _ => ArithOp::Set,
    }
}

fn target(caps: &Captures<'_>) -> Option<Target> {
    if caps.name("player").is_some() {
        return Some(Target::Player);
    }
    if caps.name("home").is_some() {
        return Some(Target::Home);
    }
    if let Some(event) = caps.name("event") {
        return parse_operand(event.as_str()).map(Target::Event);
    }
    Some(Target::Point(operand(caps, "x")?, operand(caps, "y")?))
}

/// Replaces `\V[n]` and `\SelfVar[n]` in raw script text with their values.
pub(crate) fn substitute_references(
    source: &str,
    variable: impl Fn(u32) -> i64,
    self_variable: impl Fn(u32) -> i64,
) -> String {
    static VARIABLE: OnceLock<Regex> = OnceLock::new();
    static SELF_VARIABLE: OnceLock<Regex> = OnceLock::new();
    let variable_pattern = VARIABLE
        .get_or_init(|| Regex::new(r"(?i)\\V\[(\d+)\]").expect("variable pattern should compile"));
    let self_pattern = SELF_VARIABLE.get_or_init(|| {
        Regex::new(r"(?i)\\SELFVAR\[(\d+)\]").expect("self variable pattern should compile")
    });

    let first = variable_pattern.replace_all(source, |caps: &Captures<'_>| {
        let id = caps[1].parse().unwrap_or(0);
        variable(id).to_string()
    });
    self_pattern
        .replace_all(&first, |caps: &Captures<'_>| {
            let id = caps[1].parse().unwrap_or(0);
            self_variable(id).to_string()
        })
        .into_owned()
}
