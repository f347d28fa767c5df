//! Instruction table
//!
//! Every opcode has a fixed list of required argument slots followed by a list
//! of optional ones. The compiler checks each instruction against this table
//! before the program ever runs; the argument types are advisory and only the
//! counts are enforced.

use std::fmt;
use thiserror::Error;

/// Reserved opcode names of the language.
/// ***Note that opcode names are matched case-insensitively***
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Opcode {
    Abs,
    Add,
    And,
    Atan,
    Call,
    Cos,
    Debug,
    Div,
    Eq,
    Gt,
    Gte,
    If,
    Ifnz,
    Ifz,
    IntOff,
    IntOn,
    Jump,
    Log,
    Lt,
    Lte,
    Max,
    Min,
    Mod,
    Mul,
    Neq,
    Noop,
    Not,
    Or,
    Return,
    Round,
    Rti,
    SetInt,
    SetLimit,
    Sin,
    Store,
    Store2,
    Sub,
    Sync,
    Tuple,
}

/// What kind of operand a slot expects
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ArgType {
    Number,
    Address,
    Any,
    /// A place to write to: local, `user.*` or `sys.*`
    LValue,
    /// A hardware module path such as `sys.wall`
    Module,
    /// Zero or more further arguments of any type
    Variadic,
}

/// Argument slots of an opcode
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub required: &'static [ArgType],
    pub optional: &'static [ArgType],
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ArityError {
    #[error("{opcode} needs at least {required} argument(s), got {found}")]
    TooFew {
        opcode: Opcode,
        required: usize,
        found: usize,
    },
    #[error("{opcode} takes at most {max} argument(s), got {found}")]
    TooMany {
        opcode: Opcode,
        max: usize,
        found: usize,
    },
}

use ArgType::*;

const NONE: &[ArgType] = &[];
const ONE_NUMBER: &[ArgType] = &[Number];
const TWO_NUMBERS: &[ArgType] = &[Number, Number];
const TWO_ANY: &[ArgType] = &[Any, Any];
const BRANCH: &[ArgType] = &[Any, Address];
const MORE: &[ArgType] = &[Variadic];
const ONE_ANY: &[ArgType] = &[Any];
const ADDRESS: &[ArgType] = &[Address];
const DESTINATION: &[ArgType] = &[LValue];
const SET_INT: &[ArgType] = &[Module, Address];
const SET_LIMIT: &[ArgType] = &[Module, Any];

impl Opcode {
    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name.to_ascii_lowercase().as_str() {
            "abs" => Opcode::Abs,
            "add" => Opcode::Add,
            "and" => Opcode::And,
            "atan" => Opcode::Atan,
            "call" => Opcode::Call,
            "cos" => Opcode::Cos,
            "debug" => Opcode::Debug,
            "div" => Opcode::Div,
            "eq" => Opcode::Eq,
            "gt" => Opcode::Gt,
            "gte" => Opcode::Gte,
            "if" => Opcode::If,
            "ifnz" => Opcode::Ifnz,
            "ifz" => Opcode::Ifz,
            "intoff" => Opcode::IntOff,
            "inton" => Opcode::IntOn,
            "jump" => Opcode::Jump,
            "log" => Opcode::Log,
            "lt" => Opcode::Lt,
            "lte" => Opcode::Lte,
            "max" => Opcode::Max,
            "min" => Opcode::Min,
            "mod" => Opcode::Mod,
            "mul" => Opcode::Mul,
            "neq" => Opcode::Neq,
            "noop" => Opcode::Noop,
            "not" => Opcode::Not,
            "or" => Opcode::Or,
            "return" => Opcode::Return,
            "round" => Opcode::Round,
            "rti" => Opcode::Rti,
            "setint" => Opcode::SetInt,
            "setlimit" => Opcode::SetLimit,
            "sin" => Opcode::Sin,
            "store" => Opcode::Store,
            "store2" => Opcode::Store2,
            "sub" => Opcode::Sub,
            "sync" => Opcode::Sync,
            "tuple" => Opcode::Tuple,
            _ => return None,
        };
        Some(op)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Abs => "abs",
            Opcode::Add => "add",
            Opcode::And => "and",
            Opcode::Atan => "atan",
            Opcode::Call => "call",
            Opcode::Cos => "cos",
            Opcode::Debug => "debug",
            Opcode::Div => "div",
            Opcode::Eq => "eq",
            Opcode::Gt => "gt",
            Opcode::Gte => "gte",
            Opcode::If => "if",
            Opcode::Ifnz => "ifnz",
            Opcode::Ifz => "ifz",
            Opcode::IntOff => "intoff",
            Opcode::IntOn => "inton",
            Opcode::Jump => "jump",
            Opcode::Log => "log",
            Opcode::Lt => "lt",
            Opcode::Lte => "lte",
            Opcode::Max => "max",
            Opcode::Min => "min",
            Opcode::Mod => "mod",
            Opcode::Mul => "mul",
            Opcode::Neq => "neq",
            Opcode::Noop => "noop",
            Opcode::Not => "not",
            Opcode::Or => "or",
            Opcode::Return => "return",
            Opcode::Round => "round",
            Opcode::Rti => "rti",
            Opcode::SetInt => "setint",
            Opcode::SetLimit => "setlimit",
            Opcode::Sin => "sin",
            Opcode::Store => "store",
            Opcode::Store2 => "store2",
            Opcode::Sub => "sub",
            Opcode::Sync => "sync",
            Opcode::Tuple => "tuple",
        }
    }

    pub fn signature(self) -> Signature {
        let (required, optional) = match self {
            Opcode::Abs | Opcode::Round => (ONE_NUMBER, NONE),
            Opcode::Not => (ONE_ANY, NONE),
            Opcode::Add | Opcode::And | Opcode::Or | Opcode::Eq | Opcode::Neq => (TWO_ANY, NONE),
            Opcode::Gt | Opcode::Gte | Opcode::Lt | Opcode::Lte => (TWO_ANY, NONE),
            Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => (TWO_NUMBERS, NONE),
            Opcode::Max | Opcode::Min => (TWO_NUMBERS, MORE),
            Opcode::Atan | Opcode::Cos | Opcode::Sin => (ONE_NUMBER, ONE_NUMBER),
            Opcode::If | Opcode::Ifnz | Opcode::Ifz => (BRANCH, ADDRESS),
            Opcode::Jump => (ADDRESS, NONE),
            Opcode::Call => (ADDRESS, MORE),
            Opcode::Return => (NONE, ONE_ANY),
            Opcode::Log => (NONE, MORE),
            Opcode::Tuple => (ONE_ANY, MORE),
            Opcode::Store => (ONE_ANY, DESTINATION),
            Opcode::Store2 => (TWO_NUMBERS, DESTINATION),
            Opcode::SetInt => (SET_INT, NONE),
            Opcode::SetLimit => (SET_LIMIT, NONE),
            Opcode::Debug
            | Opcode::Noop
            | Opcode::Sync
            | Opcode::Rti
            | Opcode::IntOn
            | Opcode::IntOff => (NONE, NONE),
        };
        Signature { required, optional }
    }

    /// Check an argument count against the table
    pub fn check_arity(self, found: usize) -> Result<(), ArityError> {
        let Signature { required, optional } = self.signature();

        if found < required.len() {
            return Err(ArityError::TooFew {
                opcode: self,
                required: required.len(),
                found,
            });
        }

        let max = required.len() + optional.len();
        if found > max && !optional.contains(&Variadic) {
            return Err(ArityError::TooMany {
                opcode: self,
                max,
                found,
            });
        }

        Ok(())
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}
