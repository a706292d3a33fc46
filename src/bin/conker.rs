//! The `conker` CLI: loads a program file, runs it to termination, and maps
//! that termination to a process exit code (spec.md §6, SPEC_FULL.md §12).

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use conker::{ConkerError, Termination};

#[derive(Debug, Clone, clap::Parser)]
#[command(version, author, about = "Runtime for the Conker concurrent language")]
struct Opts {
    /// Path to a Conker source file.
    program: std::path::PathBuf,

    /// Seeds the tie-break RNG used when more than one rendezvous is
    /// simultaneously eligible, for reproducible `$out` traces.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> ExitCode {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let seed = opts.seed.or_else(|| {
        std::env::var("CONKER_SEED")
            .ok()
            .and_then(|v| v.parse().ok())
    });

    let source = match fs::read_to_string(&opts.program) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("conker: cannot read {}: {err}", opts.program.display());
            return ExitCode::from(1);
        }
    };

    match conker::run_source(&source, seed) {
        Ok(termination) => {
            report(&termination);
            ExitCode::from(termination.exit_code() as u8)
        }
        Err(error) => {
            report_error(&error);
            ExitCode::from(error.exit_code() as u8)
        }
    }
}

fn report(termination: &Termination) {
    match termination {
        Termination::Finished | Termination::Exited => {}
        Termination::Deadlocked => eprintln!("conker: deadlock: every task is suspended"),
        Termination::Errored { task, error } => eprintln!("conker: task {task} failed: {error}"),
    }
}

fn report_error(error: &ConkerError) {
    eprintln!("conker: {error}");
}
