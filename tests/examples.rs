//! End-to-end coverage of spec.md §8's concrete scenarios: whole programs,
//! run to termination through the public `conker` API, asserting on the
//! captured `$out` trace and the resulting `Termination`.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use conker::magic::{MagicSurface, StdoutSink};
use conker::scheduler::run_program_with_magic;
use conker::syntax::parse;
use conker::Termination;

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

/// Parses and runs `source`, returning its captured `$out` trace and how it
/// terminated.
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

#[test]
fn hello_number() {
    let (out, termination) = run("task Main {\n 123 -> $out;\n}\n", 1);
    assert_eq!(out, "123\n");
    assert_eq!(termination.exit_code(), 0);
}

#[test]
fn adder() {
    let source = "\
task InputA {\n 5 -> Adder;\n}\n\
task InputB {\n 4 -> Adder;\n}\n\
task Adder {\n a <- InputA;\n b <- InputB;\n (a + b) -> Main;\n}\n\
task Main {\n sum <- Adder;\n sum -> $out;\n}\n";
    let (out, termination) = run(source, 1);
    assert_eq!(out, "9\n");
    assert_eq!(termination.exit_code(), 0);
}

#[test]
fn counter_bounded_to_five() {
    let source = "\
task Counter {\n n = 0;\n loop {\n n = n + 1;\n n -> Main;\n }\n}\n\
task Main {\n count = 0;\n while count < 5 {\n v <- Counter;\n v -> $out;\n count = count + 1;\n }\n exit;\n}\n";
    let (out, termination) = run(source, 1);
    assert_eq!(out, "1\n2\n3\n4\n5\n");
    assert_eq!(termination.exit_code(), 0);
}

#[test]
fn multi_task_unordered_printer() {
    let (out, termination) = run("task Printer[5] {\n $index -> $out;\n}\n", 42);
    let mut lines: Vec<i64> = out.lines().map(|l| l.parse().unwrap()).collect();
    lines.sort_unstable();
    assert_eq!(lines, vec![0, 1, 2, 3, 4]);
    assert_eq!(termination.exit_code(), 0);
}

#[test]
fn multi_task_mediated_constant_source() {
    let source = "\
task ConstantSource[5] {\n $index -> Main;\n}\n\
task Main {\n i = 0;\n while i < 5 {\n v <- ConstantSource[i];\n v -> $out;\n i = i + 1;\n }\n}\n";
    let (out, termination) = run(source, 3);
    assert_eq!(out, "0\n1\n2\n3\n4\n");
    assert_eq!(termination.exit_code(), 0);
}

#[test]
fn mutual_receive_deadlocks() {
    let source = "task A {\n x <- B;\n}\ntask B {\n y <- A;\n}\n";
    let (out, termination) = run(source, 1);
    assert_eq!(out, "");
    assert!(matches!(termination, Termination::Deadlocked));
    assert_ne!(termination.exit_code(), 0);
}

