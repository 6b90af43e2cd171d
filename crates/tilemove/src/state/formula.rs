use thiserror::Error;

use super::{SelfContext, SwitchSlot};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("unexpected character {found:?} at {position}")]
    UnexpectedChar { position: usize, found: char },
    #[error("unexpected {found} at {position}")]
    UnexpectedToken { position: usize, found: String },
    #[error("formula ended early")]
    UnexpectedEnd,
    #[error("unknown name {name:?} at {position}")]
    UnknownName { position: usize, name: String },
    #[error("invalid index at {position}")]
    BadIndex { position: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("formula nesting exceeded {limit} levels")]
    RecursionLimit { limit: usize },
}

/// State a formula may read.
pub trait FormulaScope {
    fn variable(&self, id: u32) -> Result<i64, FormulaError>;
    fn switch(&self, id: u32) -> Result<bool, FormulaError>;
    fn self_variable(&self, id: u32) -> i64;
    fn self_switch(&self, slot: SwitchSlot) -> bool;
    fn context(&self) -> SelfContext;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Int(i64),
    Variable(u32),
    Switch(u32),
    SelfVariable(u32),
    SelfSwitch(SwitchSlot),
    MapId,
    EventId,
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// A parsed switch or variable formula. Booleans evaluate to 0/1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    source: String,
    root: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, index: 0 };
        let root = parser.parse_or()?;
        if let Some(token) = parser.tokens.get(parser.index) {
            return Err(FormulaError::UnexpectedToken {
                position: token.position,
                found: token.kind.describe(),
            });
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, scope: &dyn FormulaScope) -> Result<i64, FormulaError> {
        eval(&self.root, scope)
    }

    pub fn evaluate_bool(&self, scope: &dyn FormulaScope) -> Result<bool, FormulaError> {
        Ok(self.evaluate(scope)? != 0)
    }
}

fn eval(expr: &Expr, scope: &dyn FormulaScope) -> Result<i64, FormulaError> {
    Ok(match expr {
        Expr::Int(value) => *value,
        Expr::Variable(id) => scope.variable(*id)?,
        Expr::Switch(id) => i64::from(scope.switch(*id)?),
        Expr::SelfVariable(id) => scope.self_variable(*id),
        Expr::SelfSwitch(slot) => i64::from(scope.self_switch(*slot)),
        Expr::MapId => i64::from(scope.context().map_id),
        Expr::EventId => i64::from(scope.context().event_id),
        Expr::Unary(UnaryOp::Neg, inner) => eval(inner, scope)?.saturating_neg(),
        Expr::Unary(UnaryOp::Not, inner) => i64::from(eval(inner, scope)? == 0),
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            i64::from(eval(lhs, scope)? != 0 && eval(rhs, scope)? != 0)
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            i64::from(eval(lhs, scope)? != 0 || eval(rhs, scope)? != 0)
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, scope)?;
            let rhs = eval(rhs, scope)?;
            match op {
                BinaryOp::Add => lhs.saturating_add(rhs),
                BinaryOp::Sub => lhs.saturating_sub(rhs),
                BinaryOp::Mul => lhs.saturating_mul(rhs),
                BinaryOp::Div => lhs.checked_div(rhs).ok_or(FormulaError::DivisionByZero)?,
                BinaryOp::Rem => lhs.checked_rem(rhs).ok_or(FormulaError::DivisionByZero)?,
                BinaryOp::Eq => i64::from(lhs == rhs),
                BinaryOp::NotEq => i64::from(lhs != rhs),
                BinaryOp::Lt => i64::from(lhs < rhs),
                BinaryOp::LtEq => i64::from(lhs <= rhs),
                BinaryOp::Gt => i64::from(lhs > rhs),
                BinaryOp::GtEq => i64::from(lhs >= rhs),
                BinaryOp::And => i64::from(lhs != 0 && rhs != 0),
                BinaryOp::Or => i64::from(lhs != 0 || rhs != 0),
            }
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Int(i64),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    BangEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AmpAmp,
    PipePipe,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            Self::Int(value) => format!("number {value}"),
            Self::Ident(name) => format!("name {name:?}"),
            other => format!("{other:?}"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn tokenize(source: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut index = 0;
    while let Some(&(position, ch)) = chars.get(index) {
        if ch.is_whitespace() {
            index += 1;
            continue;
        }
        let next = chars.get(index + 1).map(|(_, c)| *c);
        let (kind, width) = match (ch, next) {
            ('=', Some('=')) => (TokenKind::EqEq, 2),
            ('!', Some('=')) => (TokenKind::BangEq, 2),
            ('<', Some('=')) => (TokenKind::LtEq, 2),
            ('>', Some('=')) => (TokenKind::GtEq, 2),
            ('&', Some('&')) => (TokenKind::AmpAmp, 2),
            ('|', Some('|')) => (TokenKind::PipePipe, 2),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('!', _) => (TokenKind::Bang, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            (c, _) if c.is_ascii_digit() => {
                let width = chars[index..]
                    .iter()
                    .take_while(|(_, c)| c.is_ascii_digit())
                    .count();
                let text: String = chars[index..index + width].iter().map(|(_, c)| c).collect();
                let value = text
                    .parse()
                    .map_err(|_| FormulaError::BadIndex { position })?;
                (TokenKind::Int(value), width)
            }
            (c, _) if c.is_ascii_alphabetic() || c == '_' => {
                let width = chars[index..]
                    .iter()
                    .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
                    .count();
                let text: String = chars[index..index + width].iter().map(|(_, c)| c).collect();
                (TokenKind::Ident(text.to_ascii_lowercase()), width)
            }
            (found, _) => return Err(FormulaError::UnexpectedChar { position, found }),
        };
        tokens.push(Token { kind, position });
        index += width;
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.index).map(|token| &token.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), FormulaError> {
        match self.advance() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(FormulaError::UnexpectedToken {
                position: token.position,
                found: token.kind.describe(),
            }),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&TokenKind::PipePipe) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_cmp()?;
        while self.peek() == Some(&TokenKind::AmpAmp) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr, FormulaError> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(TokenKind::EqEq) => BinaryOp::Eq,
            Some(TokenKind::BangEq) => BinaryOp::NotEq,
            Some(TokenKind::Lt) => BinaryOp::Lt,
            Some(TokenKind::LtEq) => BinaryOp::LtEq,
            Some(TokenKind::Gt) => BinaryOp::Gt,
            Some(TokenKind::GtEq) => BinaryOp::GtEq,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_add()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_add(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Star) => BinaryOp::Mul,
                Some(TokenKind::Slash) => BinaryOp::Div,
                Some(TokenKind::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Some(TokenKind::Minus) => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            Some(TokenKind::Bang) => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        let token = self.advance().ok_or(FormulaError::UnexpectedEnd)?;
        match token.kind {
            TokenKind::Int(value) => Ok(Expr::Int(value)),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Int(1)),
                "false" => Ok(Expr::Int(0)),
                "map_id" => Ok(Expr::MapId),
                "event_id" => Ok(Expr::EventId),
                "v" => Ok(Expr::Variable(self.parse_index(token.position)?)),
                "s" => Ok(Expr::Switch(self.parse_index(token.position)?)),
                "sv" => Ok(Expr::SelfVariable(self.parse_index(token.position)?)),
                "ss" => Ok(Expr::SelfSwitch(self.parse_switch_slot(token.position)?)),
                _ => Err(FormulaError::UnknownName {
                    position: token.position,
                    name,
                }),
            },
            other => Err(FormulaError::UnexpectedToken {
                position: token.position,
                found: other.describe(),
            }),
        }
    }

    fn parse_index(&mut self, position: usize) -> Result<u32, FormulaError> {
        self.expect(TokenKind::LBracket)?;
        let id = match self.advance() {
            Some(Token {
                kind: TokenKind::Int(value),
                ..
            }) => u32::try_from(value).map_err(|_| FormulaError::BadIndex { position })?,
            Some(_) => return Err(FormulaError::BadIndex { position }),
            None => return Err(FormulaError::UnexpectedEnd),
        };
        self.expect(TokenKind::RBracket)?;
        Ok(id)
    }

    fn parse_switch_slot(&mut self, position: usize) -> Result<SwitchSlot, FormulaError> {
        self.expect(TokenKind::LBracket)?;
        let slot = match self.advance() {
            Some(Token {
                kind: TokenKind::Int(value),
                ..
            }) => SwitchSlot::Number(
                u32::try_from(value).map_err(|_| FormulaError::BadIndex { position })?,
            ),
            Some(Token {
                kind: TokenKind::Ident(name),
                ..
            }) => {
                let mut letters = name.chars();
                match (letters.next().and_then(SwitchSlot::letter), letters.next()) {
                    (Some(slot), None) => slot,
                    _ => return Err(FormulaError::BadIndex { position }),
                }
            }
            Some(_) => return Err(FormulaError::BadIndex { position }),
            None => return Err(FormulaError::UnexpectedEnd),
        };
        self.expect(TokenKind::RBracket)?;
        Ok(slot)
    }
}
