//! Compile and runtime errors

use crate::token::Position;
use std::sync::Arc;
use thiserror::Error;

/// Lexical, grammatical or arity failure. Always aborts compilation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{file}:{line}:{column}: {message}")]
pub struct CompileError {
    pub file: Arc<str>,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl CompileError {
    pub fn new(pos: &Position, message: impl Into<String>) -> Self {
        CompileError {
            file: pos.file.clone(),
            line: pos.line,
            column: pos.column,
            message: message.into(),
        }
    }
}

/// A fatal error raised while stepping an agent's program
#[derive(Debug, Error)]
#[error("{agent}@{pc}: {fault}")]
pub struct RuntimeError {
    pub agent: String,
    pub pc: usize,
    #[source]
    pub fault: Fault,
}

/// What went wrong at run time
#[derive(Debug, Error)]
pub enum Fault {
    #[error("program counter out of range (program has {len} instructions)")]
    PcOutOfRange { len: usize },

    #[error("instruction at {pc} claims address {address}")]
    CorruptProgram { pc: usize, address: usize },

    #[error("cannot resolve '{0}'")]
    Unresolved(String),

    #[error("global 'user.{0}' is not defined")]
    UndefinedGlobal(String),

    #[error("bad address {value} (program has {len} instructions)")]
    BadAddress { value: String, len: usize },

    #[error("unknown register 'sys.{0}'")]
    UnknownRegister(String),

    #[error("register 'sys.{0}' is read-only")]
    ReadOnlyRegister(String),

    #[error("'{0}' cannot be assigned to")]
    NotAssignable(String),

    #[error("unknown hardware module '{0}'")]
    UnknownModule(String),

    #[error("'sys.{register}' needs a pair, got {value}")]
    ExpectedPair { register: String, value: String },

    #[error("return outside of a subroutine")]
    ReturnFromMain,

    #[error("call stack exceeded {0} frames")]
    StackOverflow(usize),

    #[error("agent has crashed")]
    Crashed,

    #[error("hardware: {0}")]
    Hardware(#[from] anyhow::Error),
}
