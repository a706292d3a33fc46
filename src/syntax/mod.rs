//! Lexing and parsing: the "external collaborator" spec.md §1 scopes out of
//! the runtime's core, implemented here only so the runtime is actually
//! runnable end to end against the example programs in spec.md §8 (see
//! SPEC_FULL.md §11). The runtime itself (`crate::eval`, `crate::registry`,
//! `crate::scheduler`) never calls back into this module or otherwise
//! depends on how its `Program` was produced.

mod lexer;
mod parser;

pub use lexer::{Span, Token, TokenKind};
pub use parser::Parser;

use crate::ast::Program;
use crate::error::ConkerError;

/// Lexes and parses a whole Conker source file into a [`Program`].
pub fn parse(source: &str) -> Result<Program, ConkerError> {
    let tokens = lexer::lex(source)?;
    Parser::new(tokens).parse_program()
}
