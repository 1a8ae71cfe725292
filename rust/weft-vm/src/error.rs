//! Error taxonomy: fatal engine errors versus recoverable user errors.

use crate::dom::DomError;
use std::fmt;
use thiserror::Error;
use weft_program::ProgramError;

/// An error raised by user code (helpers, modifiers, components) or by a
/// dynamic value that cannot be used where it appears.
///
/// These are the only errors routed to try frames. They are `Clone` so that
/// fallible formulas can cache and rethrow them.
#[derive(Debug, Clone, PartialEq)]
pub struct UserError {
    pub message: String,
    pub path: Option<String>,
}

impl UserError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    /// Attaches the binding path of the offending reference.
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} (at {})", self.message, path),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for UserError {}

/// Invariant violations inside the engine. Never caught by try frames.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack slot {0} is out of range")]
    StackOutOfRange(i64),
    #[error("expected {expected} on the stack, found {found}")]
    UnexpectedStackValue { expected: &'static str, found: &'static str },
    #[error("frame imbalance: {0}")]
    FrameImbalance(&'static str),
    #[error("invalid program counter {0}")]
    InvalidProgramCounter(i64),
    #[error("unknown register operand {0}")]
    InvalidRegister(i32),
    #[error("unknown {kind} '{name}'")]
    UnknownDefinition { kind: &'static str, name: String },
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("no transaction is active")]
    NoTransaction,
    #[error("a transaction is already active")]
    TransactionActive,
    #[error("instruction limit exceeded ({0} instructions)")]
    InstructionLimitExceeded(u64),
    #[error("{0}")]
    Invariant(String),
    #[error("program error: {0}")]
    Program(#[from] ProgramError),
    #[error("dom error: {0}")]
    Dom(#[from] DomError),
}

#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{0}")]
    User(#[from] UserError),
}

impl VmError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, VmError::Engine(_))
    }

    pub fn message_contains(&self, needle: &str) -> bool {
        self.to_string().contains(needle)
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        VmError::Engine(EngineError::Invariant(message.into()))
    }
}

impl From<ProgramError> for VmError {
    fn from(e: ProgramError) -> Self {
        VmError::Engine(EngineError::Program(e))
    }
}

impl From<DomError> for VmError {
    fn from(e: DomError) -> Self {
        VmError::Engine(EngineError::Dom(e))
    }
}
