//! Conker: an experimental concurrent language whose only first-class
//! concurrency primitive is the unbuffered synchronous channel between
//! independently scheduled tasks. This crate is the language runtime: the
//! AST, the task scheduler, the channel rendezvous engine, the expression
//! evaluator, and the magic channel surface that connects the language to
//! the outside world. Lexing/parsing/CLI entry are external collaborators
//! whose interfaces are fixed here but whose implementation lives in
//! `syntax` and `bin/conker.rs` only because a runtime with no way to run
//! the example programs in its own spec would not be worth trusting.

pub mod ast;
pub mod error;
pub mod eval;
pub mod magic;
pub mod registry;
pub mod scheduler;
pub mod syntax;
pub mod task;
pub mod value;

pub use error::ConkerError;
pub use scheduler::{run_program, run_program_with_magic, Termination};
pub use value::Value;

/// Parses Conker source text and runs it to termination, the shape most
/// callers (the CLI, integration tests) actually want.
pub fn run_source(source: &str, seed: Option<u64>) -> Result<Termination, ConkerError> {
    let program = syntax::parse(source)?;
    run_program(&program, seed)
}
