//! Task identity and instantiation (spec.md §3 "Task instance", §4.D).

use std::fmt;
use std::sync::Arc;

use crate::ast::{Program, TaskDef};
use crate::error::ConkerError;
use crate::eval::{self, Environment};

/// A flat, zero-based identifier for one task *instance*. A single-instance
/// task gets exactly one `TaskId`; a `task T[n]` multi-task gets `n` of
/// them, one per index (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Metadata the scheduler and evaluator need about one live task instance.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: TaskId,
    pub name: String,
    /// `Some(i)` for the `i`-th instance of a multi-task, exposed to Conker
    /// code as `$index`; `None` for a single-instance task.
    pub index: Option<i64>,
    pub def: Arc<TaskDef>,
}

impl TaskHandle {
    pub fn diagnostic_name(&self) -> String {
        match self.index {
            Some(i) => format!("{}[{}]", self.name, i),
            None => self.name.clone(),
        }
    }
}

/// Expands every `TaskDef` in a `Program` into its instances, resolving
/// multiplicity expressions (spec.md §4.D: `task T[n]` instantiates `n`
/// activities indexed `0..n-1`). Multiplicity expressions are evaluated in
/// an empty environment, since no task (and so no binding, no `$index`, no
/// peer) exists yet at program start; a multiplicity that references a name
/// is therefore a `NameError`.
pub fn instantiate(program: &Program) -> Result<Vec<TaskHandle>, ConkerError> {
    let mut handles = Vec::new();
    let mut next_id = 0usize;
    // Bare `TaskRef` resolution (spec.md §4.C: "Name[i]... bare Name is only
    // legal when single-instance") needs to know each task's multiplicity
    // up front, so instantiation is a single pass building handles in
    // definition order; this is also the table the evaluator/scheduler use
    // to translate a `TaskRef` into the `TaskId`(s) it denotes.
    for def in &program.tasks {
        let def = Arc::new(def.clone());
        match &def.multiplicity {
            None => {
                handles.push(TaskHandle {
                    id: TaskId(next_id),
                    name: def.name.clone(),
                    index: None,
                    def: def.clone(),
                });
                next_id += 1;
            }
            Some(expr) => {
                let empty_env = Environment::empty();
                let n = eval::eval_static_expr(expr, &empty_env)?;
                let n = n.as_multiplicity().ok_or_else(|| ConkerError::Channel {
                    reason: format!("task '{}' has a non-integer multiplicity", def.name),
                })?;
                if n == 0 {
                    return Err(ConkerError::Channel {
                        reason: format!("task '{}' declared with multiplicity 0", def.name),
                    });
                }
                for i in 0..n {
                    handles.push(TaskHandle {
                        id: TaskId(next_id),
                        name: def.name.clone(),
                        index: Some(i as i64),
                        def: def.clone(),
                    });
                    next_id += 1;
                }
            }
        }
    }
    Ok(handles)
}

/// A lookup table from a task name to the `TaskId`s of its instances, used
/// to resolve `TaskRef`s during evaluation (spec.md §4.C).
#[derive(Debug, Clone, Default)]
pub struct TaskTable {
    by_name: std::collections::HashMap<String, Vec<TaskId>>,
}

impl TaskTable {
    pub fn build(handles: &[TaskHandle]) -> Self {
        let mut by_name: std::collections::HashMap<String, Vec<TaskId>> =
            std::collections::HashMap::new();
        for handle in handles {
            by_name.entry(handle.name.clone()).or_default().push(handle.id);
        }
        Self { by_name }
    }

    /// Resolves a bare task name. Errors (`ChannelError`) if the task is a
    /// multi-task with more than one instance (spec.md §4.C, §4.D).
    pub fn resolve_bare(&self, name: &str) -> Result<TaskId, ConkerError> {
        match self.by_name.get(name) {
            Some(ids) if ids.len() == 1 => Ok(ids[0]),
            Some(ids) if ids.len() > 1 => Err(ConkerError::Channel {
                reason: format!("'{name}' is a multi-task; an index is required"),
            }),
            _ => Err(ConkerError::Name {
                name: name.to_string(),
            }),
        }
    }

    /// Resolves `name[index]`.
    pub fn resolve_indexed(&self, name: &str, index: i64) -> Result<TaskId, ConkerError> {
        let ids = self.by_name.get(name).ok_or_else(|| ConkerError::Name {
            name: name.to_string(),
        })?;
        let index = usize::try_from(index).map_err(|_| ConkerError::Channel {
            reason: format!("negative index into task '{name}'"),
        })?;
        ids.get(index).copied().ok_or_else(|| ConkerError::Channel {
            reason: format!("index {index} out of range for task '{name}'"),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }
}
