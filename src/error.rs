//! Error taxonomy (spec.md §7).
//!
//! `ExitRequested` is listed by the spec as "a cooperative signal, not an
//! error", but it travels the same `Result` plumbing as everything else so
//! evaluator code can use `?` uniformly; callers that need to distinguish it
//! from a genuine failure use [`ConkerError::is_exit`].

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConkerError {
    #[error("type error: '{op}' is not defined for {found}")]
    Type {
        op: &'static str,
        found: &'static str,
    },

    #[error("arithmetic error: {reason}")]
    Arithmetic { reason: &'static str },

    #[error("name error: '{name}' is not bound")]
    Name { name: String },

    #[error("channel error: {reason}")]
    Channel { reason: String },

    #[error("deadlock: every task is suspended and no rendezvous is possible")]
    Deadlock,

    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// Cooperative termination signal raised by `exit` (spec.md §4.E, §5).
    #[error("exit requested")]
    ExitRequested,
}

impl ConkerError {
    pub fn is_exit(&self) -> bool {
        matches!(self, ConkerError::ExitRequested)
    }

    pub fn is_deadlock(&self) -> bool {
        matches!(self, ConkerError::Deadlock)
    }

    /// Process exit code, matching spec.md §6: 0 for normal termination,
    /// nonzero otherwise. Deadlock and other runtime errors are given
    /// distinct codes so a caller can tell them apart without matching on
    /// the diagnostic string.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConkerError::ExitRequested => 0,
            ConkerError::Deadlock => 2,
            ConkerError::Parse { .. } => 3,
            _ => 1,
        }
    }
}
