use crate::opcode::Opcode;
use std::{fmt, sync::Arc};

/// Where a token starts in its source file. Lines and columns count from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub file: Arc<str>,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Operator symbols. Each one is shorthand for an opcode.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OpSym {
    Eq,
    Neq,
    Lte,
    Gte,
    Lt,
    Gt,
    And,
    Or,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl OpSym {
    pub fn new(sym: &str) -> Option<Self> {
        match sym {
            "==" => Some(OpSym::Eq),
            "!=" => Some(OpSym::Neq),
            "<=" => Some(OpSym::Lte),
            ">=" => Some(OpSym::Gte),
            "<" => Some(OpSym::Lt),
            ">" => Some(OpSym::Gt),
            "&&" => Some(OpSym::And),
            "||" => Some(OpSym::Or),
            "!" => Some(OpSym::Not),
            "+" => Some(OpSym::Add),
            "-" => Some(OpSym::Sub),
            "*" => Some(OpSym::Mul),
            "/" => Some(OpSym::Div),
            "%" => Some(OpSym::Mod),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpSym::Eq => "==",
            OpSym::Neq => "!=",
            OpSym::Lte => "<=",
            OpSym::Gte => ">=",
            OpSym::Lt => "<",
            OpSym::Gt => ">",
            OpSym::And => "&&",
            OpSym::Or => "||",
            OpSym::Not => "!",
            OpSym::Add => "+",
            OpSym::Sub => "-",
            OpSym::Mul => "*",
            OpSym::Div => "/",
            OpSym::Mod => "%",
        }
    }

    /// The opcode an operator compiles to
    pub fn opcode(self) -> Opcode {
        match self {
            OpSym::Eq => Opcode::Eq,
            OpSym::Neq => Opcode::Neq,
            OpSym::Lte => Opcode::Lte,
            OpSym::Gte => Opcode::Gte,
            OpSym::Lt => Opcode::Lt,
            OpSym::Gt => Opcode::Gt,
            OpSym::And => Opcode::And,
            OpSym::Or => Opcode::Or,
            OpSym::Not => Opcode::Not,
            OpSym::Add => Opcode::Add,
            OpSym::Sub => Opcode::Sub,
            OpSym::Mul => Opcode::Mul,
            OpSym::Div => Opcode::Div,
            OpSym::Mod => Opcode::Mod,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Integer(i64),
    Float(f64),
    Str(String),
    /// Dotted path such as `sys.aim`, `user.score` or a plain local/label name
    Identifier(String),
    Opcode(Opcode),
    OpSym(OpSym),

    Colon,
    Assign,

    Eof,
}

impl TokenKind {
    /// Classify a run of identifier characters. Opcodes match case-insensitively.
    pub fn word(word: &str) -> Self {
        match Opcode::from_name(word) {
            Some(op) => TokenKind::Opcode(op),
            None => TokenKind::Identifier(word.to_string()),
        }
    }

    /// Whether the token can stand as an operand
    pub fn is_rval(&self) -> bool {
        matches!(
            self,
            TokenKind::Integer(_) | TokenKind::Float(_) | TokenKind::Str(_) | TokenKind::Identifier(_)
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenKind::Integer(n) => write!(f, "{}", n),
            TokenKind::Float(n) => write!(f, "{:?}", n),
            TokenKind::Str(s) => write!(f, "\"{}\"", s),
            TokenKind::Identifier(name) => f.write_str(name),
            TokenKind::Opcode(op) => f.write_str(op.name()),
            TokenKind::OpSym(sym) => f.write_str(sym.as_str()),
            TokenKind::Colon => f.write_str(":"),
            TokenKind::Assign => f.write_str("="),
            TokenKind::Eof => f.write_str("<eof>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Position,
}

impl Token {
    pub fn new(kind: TokenKind, pos: Position) -> Self {
        Token { kind, pos }
    }

    pub fn identifier(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Identifier(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.kind.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_matches_opcodes_case_insensitively() {
        assert_eq!(TokenKind::word("JUMP"), TokenKind::Opcode(Opcode::Jump));
        assert_eq!(TokenKind::word("Store2"), TokenKind::Opcode(Opcode::Store2));
        assert_eq!(
            TokenKind::word("sys.aim"),
            TokenKind::Identifier("sys.aim".to_string())
        );
    }

    #[test]
    fn every_symbol_round_trips() {
        for sym in [
            "==", "!=", "<=", ">=", "<", ">", "&&", "||", "!", "+", "-", "*", "/", "%",
        ] {
            assert_eq!(OpSym::new(sym).map(OpSym::as_str), Some(sym));
        }
        assert_eq!(OpSym::new("=>"), None);
    }
}
