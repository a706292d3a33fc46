//! The task scheduler (spec.md §4.D): spawns one activity per task instance
//! at program start, drives them to completion, and detects program
//! termination.
//!
//! Each task instance runs on its own OS thread, in the style of this
//! crate's ancestry (`TcpCommunicator`'s one-thread-per-rank, the worker
//! pool's join-on-drop). Tasks in Conker run for the program's whole
//! lifetime and spend most of it blocked on a channel rendezvous, which
//! suits a thread-per-task model better than a shared worker pool sized to
//! the CPU count — there is no bound on how many tasks can be
//! simultaneously, legitimately blocked.

use std::sync::Arc;
use std::thread;

use crate::ast::Program;
use crate::error::ConkerError;
use crate::eval::{self, Environment, TaskContext};
use crate::magic::MagicSurface;
use crate::registry::Registry;
use crate::task::{self, TaskHandle, TaskTable};

/// The outcome of running a whole program: the first terminating condition
/// observed by any task (spec.md §4.D "until... `exit`... or the whole
/// program deadlocks"). `Finished` covers the case where every task's body
/// simply ran out of statements with no `exit` and no error.
#[derive(Debug)]
pub enum Termination {
    /// Every task finished its body with no `exit` and no error.
    Finished,
    /// Some task ran `exit`.
    Exited,
    /// The registry detected that every live task was suspended with no
    /// possible rendezvous.
    Deadlocked,
    /// Some task hit a genuine runtime error (spec.md §7 "Propagation": any
    /// runtime error terminates the whole program).
    Errored { task: String, error: ConkerError },
}

impl Termination {
    pub fn exit_code(&self) -> i32 {
        match self {
            Termination::Finished | Termination::Exited => 0,
            Termination::Deadlocked => ConkerError::Deadlock.exit_code(),
            Termination::Errored { error, .. } => error.exit_code(),
        }
    }
}

/// Runs a whole program to termination, sharing one [`Registry`] and one
/// [`MagicSurface`] across every task instance (spec.md §2 "Data flow").
pub fn run_program(program: &Program, seed: Option<u64>) -> Result<Termination, ConkerError> {
    run_program_with_magic(program, seed, Arc::new(MagicSurface::default()))
}

/// As [`run_program`], but with a caller-supplied magic surface — tests use
/// this to capture `$out` without touching the process's real stdout.
pub fn run_program_with_magic(
    program: &Program,
    seed: Option<u64>,
    magic: Arc<MagicSurface>,
) -> Result<Termination, ConkerError> {
    let handles = task::instantiate(program)?;
    if handles.is_empty() {
        return Ok(Termination::Finished);
    }
    let task_table = Arc::new(TaskTable::build(&handles));
    let registry = Arc::new(Registry::new(handles.len(), seed));

    tracing::info!(tasks = handles.len(), "spawning task instances");

    let workers: Vec<_> = handles
        .into_iter()
        .map(|handle| spawn_task(handle, task_table.clone(), registry.clone(), magic.clone()))
        .collect();

    let results: Vec<JoinResult> = workers
        .into_iter()
        .map(|worker| worker.join().expect("task thread panicked"))
        .collect();

    // A genuine runtime error outranks a cascading `ExitRequested`/`Deadlock`
    // seen by other tasks as a side effect of that error cancelling them
    // (spec.md §7 "Propagation"); deadlock in turn outranks a plain `exit`.
    // None of this depends on which worker happened to be joined first.
    let mut outcome = Termination::Finished;
    for (name, result) in &results {
        if let Err(error) = result {
            if !matches!(error, ConkerError::ExitRequested | ConkerError::Deadlock) {
                outcome = Termination::Errored {
                    task: name.clone(),
                    error: error.clone(),
                };
                break;
            }
        }
    }
    if matches!(outcome, Termination::Finished) {
        if results
            .iter()
            .any(|(_, r)| matches!(r, Err(ConkerError::Deadlock)))
        {
            outcome = Termination::Deadlocked;
        } else if results
            .iter()
            .any(|(_, r)| matches!(r, Err(ConkerError::ExitRequested)))
        {
            outcome = Termination::Exited;
        }
    }

    tracing::info!(?outcome, "program terminated");
    Ok(outcome)
}

type JoinResult = (String, Result<(), ConkerError>);

fn spawn_task(
    handle: TaskHandle,
    task_table: Arc<TaskTable>,
    registry: Arc<Registry>,
    magic: Arc<MagicSurface>,
) -> thread::JoinHandle<JoinResult> {
    thread::Builder::new()
        .name(handle.diagnostic_name())
        .spawn(move || {
            let name = handle.diagnostic_name();
            let span = tracing::info_span!("task", name = %name);
            let _enter = span.enter();

            let ctx = TaskContext {
                id: handle.id,
                index: handle.index,
                task_table,
                registry: registry.clone(),
                magic,
            };
            let mut env = Environment::empty();
            let result = eval::run_task(&handle.def.body, &mut env, &ctx);

            match &result {
                Ok(()) => {
                    tracing::debug!("task finished");
                    registry.task_finished(handle.id);
                }
                Err(ConkerError::ExitRequested) => {
                    tracing::info!("task exited");
                    // `trigger_exit` was already called by the evaluator;
                    // this task does not also count as "finished" capacity
                    // for deadlock bookkeeping, since the whole program is
                    // already being torn down.
                }
                Err(error) => {
                    tracing::error!(%error, "task failed");
                    registry.trigger_exit();
                }
            }

            (name, result)
        })
        .expect("failed to spawn task thread")
}
