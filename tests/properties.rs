//! Property-based coverage of spec.md §8's quantified invariants, run
//! against whole programs through the public `conker` API rather than
//! against the registry directly — the registry's own unit tests already
//! cover the matching engine in isolation.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use conker::magic::{MagicSurface, StdoutSink};
use conker::scheduler::run_program_with_magic;
use conker::syntax::parse;
use conker::Termination;
use proptest::prelude::*;

#[derive(Clone, Default)]
struct CapturedOut(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedOut {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn run(source: &str, seed: u64) -> (String, Termination) {
    let captured = CapturedOut::default();
    let sink = StdoutSink::with_writer(captured.clone());
    let magic = Arc::new(MagicSurface::new(Box::new(sink)));
    let program = parse(source).expect("program parses");
    let termination =
        run_program_with_magic(&program, Some(seed), magic).expect("runtime does not error");
    let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    (text, termination)
}

proptest! {
    /// Round-trip: `task M { <v> -> $out; }` prints exactly `v`, once,
    /// whatever `v` is (spec.md §8 "Round-trip/idempotence").
    #[test]
    fn send_literal_to_out_round_trips(v in any::<i64>().prop_filter("representable as a literal", |v| *v != i64::MIN)) {
        let source = format!("task M {{\n {v} -> $out;\n}}\n");
        let (out, termination) = run(&source, 1);
        prop_assert_eq!(out, format!("{v}\n"));
        prop_assert_eq!(termination.exit_code(), 0);
    }

    /// A value sent and immediately received back in a loop preserves
    /// equality across an arbitrary number of round trips (spec.md §8
    /// "Round-trip/idempotence").
    #[test]
    fn echoed_value_preserves_equality(v in any::<i64>().prop_filter("representable as a literal", |v| *v != i64::MIN), rounds in 1..8usize) {
        let source = format!(
            "task Echo {{\n loop {{\n x <- Main;\n x -> Main;\n }}\n}}\n\
             task Main {{\n i = 0;\n while i < {rounds} {{\n {v} -> Echo;\n y <- Echo;\n y -> $out;\n i = i + 1;\n }}\n exit;\n}}\n"
        );
        let (out, termination) = run(&source, 1);
        let expected = format!("{v}\n").repeat(rounds);
        prop_assert_eq!(out, expected);
        prop_assert_eq!(termination.exit_code(), 0);
    }

    /// Invariant 3 (spec.md §8): when `n` distinct senders each fan a
    /// distinct value into one binding receiver, every value is observed
    /// exactly once — none lost, none duplicated — regardless of arrival
    /// order.
    #[test]
    fn binding_receive_fan_in_is_exactly_once(n in 1..8usize) {
        let source = format!(
            "task Workers[{n}] {{\n $index -> Main;\n}}\n\
             task Main {{\n i = 0;\n while i < {n} {{\n v <- ?c;\n v -> $out;\n i = i + 1;\n }}\n}}\n"
        );
        let (out, termination) = run(&source, 11);
        let mut observed: Vec<i64> = out.lines().map(|l| l.parse().unwrap()).collect();
        observed.sort_unstable();
        let expected: Vec<i64> = (0..n as i64).collect();
        prop_assert_eq!(observed, expected);
        prop_assert_eq!(termination.exit_code(), 0);
    }
}
