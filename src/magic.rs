//! The magic channel surface (spec.md §4.F): built-in endpoints that are not
//! attached to any task. `$out` is the only one spec.md requires; it is
//! modeled uniformly with how any other magic endpoint would plug in, so
//! adding `$in` or a timer later is a new implementor of [`MagicSink`], not
//! a change to the registry or evaluator (spec.md §9 "'Magic' endpoints").

use std::io::Write;
use std::sync::Mutex;

use crate::value::Value;

/// A pseudo-channel with built-in behavior rather than a task on the other
/// end. `$out`'s `PendingReceives` set is conceptually nonempty forever
/// (spec.md §4.C "Magic channels"): a send to it always matches
/// immediately and never blocks the sender (spec.md invariant 4).
pub trait MagicSink: Send + Sync {
    fn send(&self, value: Value);
}

/// The standard `$out` sink: renders a value per spec.md §4.F and writes it,
/// followed by a newline, to standard output. Writes are serialized so that
/// one task's line is never interleaved with another's (spec.md §5 "Shared
/// resources").
pub struct StdoutSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(Box::new(std::io::stdout())),
        }
    }

    /// Builds a sink over an arbitrary writer, so tests can capture `$out`
    /// traces without touching the process's real stdout.
    pub fn with_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MagicSink for StdoutSink {
    fn send(&self, value: Value) {
        let mut out = self.out.lock().unwrap();
        let _ = writeln!(out, "{value}");
    }
}

/// The set of magic endpoints available to a program. Only `$out` is
/// required by spec.md; the struct exists so a future `$in` or timer slots
/// in beside it without touching callers.
pub struct MagicSurface {
    out: Box<dyn MagicSink>,
}

impl MagicSurface {
    pub fn new(out: Box<dyn MagicSink>) -> Self {
        Self { out }
    }

    pub fn emit_out(&self, value: Value) {
        tracing::debug!(%value, "$out");
        self.out.send(value);
    }
}

impl Default for MagicSurface {
    fn default() -> Self {
        Self::new(Box::new(StdoutSink::new()))
    }
}
