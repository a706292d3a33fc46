//! The per-task expression/statement evaluator (spec.md §4.E): a tree-
//! walking interpreter over a task-local environment, delegating every send
//! and receive to the channel registry — the registry call is the
//! evaluator's only suspension point.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{BinaryOp, Block, ChannelExpr, ChannelSpec, Expr, Statement, TaskRef};
use crate::error::ConkerError;
use crate::magic::MagicSurface;
use crate::registry::{ChannelId, Registry};
use crate::task::{TaskId, TaskTable};
use crate::value::Value;

/// A task-local name -> value environment (spec.md §3 "Local binding").
#[derive(Debug, Clone, Default)]
pub struct Environment {
    bindings: HashMap<String, Value>,
}

impl Environment {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.bindings.get(name).copied()
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.bindings.insert(name.to_string(), value);
    }
}

/// Everything one running task instance needs beyond its own environment:
/// its identity, the shared registry, the shared magic surface, and the
/// table for resolving other tasks by name (spec.md §4.E "Name lookup
/// order").
pub struct TaskContext {
    pub id: TaskId,
    pub index: Option<i64>,
    pub task_table: Arc<TaskTable>,
    pub registry: Arc<Registry>,
    pub magic: Arc<MagicSurface>,
}

/// Runs a task's whole body to completion, or until `exit`/a runtime error
/// unwinds it (spec.md §4.D "activities"). A normal return (`Ok(())`) means
/// the task's block ran out of statements; `exit` and errors surface as
/// `Err` so the scheduler can tell termination reasons apart.
pub fn run_task(body: &Block, env: &mut Environment, ctx: &TaskContext) -> Result<(), ConkerError> {
    exec_block(body, env, ctx)
}

fn exec_block(block: &Block, env: &mut Environment, ctx: &TaskContext) -> Result<(), ConkerError> {
    for statement in &block.statements {
        ctx.registry.check_cancelled()?;
        exec_statement(statement, env, ctx)?;
    }
    Ok(())
}

fn exec_statement(
    statement: &Statement,
    env: &mut Environment,
    ctx: &TaskContext,
) -> Result<(), ConkerError> {
    match statement {
        Statement::Assignment { target, value } => {
            let value = eval_expr(value, env, ctx)?;
            env.set(target, value);
            Ok(())
        }
        Statement::Loop { body } => loop {
            ctx.registry.check_cancelled()?;
            exec_block(body, env, ctx)?;
        },
        Statement::While { condition, body } => {
            while eval_expr(condition, env, ctx)?.is_truthy() {
                ctx.registry.check_cancelled()?;
                exec_block(body, env, ctx)?;
            }
            Ok(())
        }
        Statement::If {
            condition,
            then_block,
            else_block,
        } => {
            if eval_expr(condition, env, ctx)?.is_truthy() {
                exec_block(then_block, env, ctx)
            } else if let Some(else_block) = else_block {
                exec_block(else_block, env, ctx)
            } else {
                Ok(())
            }
        }
        Statement::Exit => {
            ctx.registry.trigger_exit();
            Err(ConkerError::ExitRequested)
        }
        Statement::Send { value, channel } => {
            let value = eval_expr(value, env, ctx)?;
            exec_send(channel, value, env, ctx)
        }
        Statement::Receive { target, spec } => {
            let (value, channel) = exec_receive(spec, env, ctx)?;
            if let ChannelSpec::Binding { name } = spec {
                env.set(name, Value::ChannelRef(channel));
            }
            if let Some(target) = target {
                env.set(target, value);
            }
            Ok(())
        }
    }
}

/// A resolved channel-position reference: either a task (for an explicit
/// send/receive target) or an already-established channel (for a name
/// previously bound by a binding receive).
enum ChannelTarget {
    Task(TaskId),
    Ref(ChannelId),
}

/// Resolves a bare identifier used in channel position: local binding (a
/// channel captured by an earlier binding receive), then task reference,
/// mirroring the name lookup order spec.md §4.E specifies for value
/// position (spec.md §4.C, SPEC_FULL.md §11 — the grammar cannot tell the
/// two cases apart syntactically, so resolution is deferred to here).
fn resolve_channel_by_name(
    name: &str,
    env: &Environment,
    ctx: &TaskContext,
) -> Result<ChannelTarget, ConkerError> {
    if let Some(value) = env.get(name) {
        return Ok(ChannelTarget::Ref(expect_channel_ref(&value)?));
    }
    if ctx.task_table.contains(name) {
        return Ok(ChannelTarget::Task(ctx.task_table.resolve_bare(name)?));
    }
    Err(ConkerError::Name {
        name: name.to_string(),
    })
}

fn resolve_channel_expr(
    expr: &Expr,
    env: &mut Environment,
    ctx: &TaskContext,
) -> Result<ChannelTarget, ConkerError> {
    if let Expr::Name(name) = expr {
        return resolve_channel_by_name(name, env, ctx);
    }
    let value = eval_expr(expr, env, ctx)?;
    Ok(ChannelTarget::Ref(expect_channel_ref(&value)?))
}

fn exec_send(
    channel: &ChannelExpr,
    value: Value,
    env: &mut Environment,
    ctx: &TaskContext,
) -> Result<(), ConkerError> {
    match channel {
        ChannelExpr::MagicOut => {
            ctx.magic.emit_out(value);
            Ok(())
        }
        ChannelExpr::Task(task_ref) => {
            let target = resolve_task_ref(task_ref, env, ctx)?;
            ctx.registry.send(ctx.id, target, value)
        }
        ChannelExpr::Expr(expr) => match resolve_channel_expr(expr, env, ctx)? {
            ChannelTarget::Task(target) => ctx.registry.send(ctx.id, target, value),
            ChannelTarget::Ref(channel) => ctx.registry.send_on_ref(ctx.id, channel, value),
        },
    }
}

fn exec_receive(
    spec: &ChannelSpec,
    env: &mut Environment,
    ctx: &TaskContext,
) -> Result<(Value, ChannelId), ConkerError> {
    match spec {
        ChannelSpec::Binding { .. } => ctx.registry.receive_binding(ctx.id),
        ChannelSpec::Explicit(ChannelExpr::MagicOut) => Err(ConkerError::Channel {
            reason: "cannot receive from $out; it only accepts sends".to_string(),
        }),
        ChannelSpec::Explicit(ChannelExpr::Task(task_ref)) => {
            let from = resolve_task_ref(task_ref, env, ctx)?;
            ctx.registry.receive(ctx.id, from)
        }
        ChannelSpec::Explicit(ChannelExpr::Expr(expr)) => {
            match resolve_channel_expr(expr, env, ctx)? {
                ChannelTarget::Task(from) => ctx.registry.receive(ctx.id, from),
                ChannelTarget::Ref(channel) => ctx.registry.receive_on_ref(ctx.id, channel),
            }
        }
    }
}

fn resolve_task_ref(
    task_ref: &TaskRef,
    env: &mut Environment,
    ctx: &TaskContext,
) -> Result<TaskId, ConkerError> {
    match &task_ref.index {
        None => ctx.task_table.resolve_bare(&task_ref.name),
        Some(index_expr) => {
            let index = eval_expr(index_expr, env, ctx)?.expect_integer("task index")?;
            ctx.task_table.resolve_indexed(&task_ref.name, index)
        }
    }
}

fn expect_channel_ref(value: &Value) -> Result<ChannelId, ConkerError> {
    match value {
        Value::ChannelRef(id) => Ok(*id),
        other => Err(ConkerError::Channel {
            reason: format!("expected a channel reference, found {}", other.type_name()),
        }),
    }
}

fn eval_expr(expr: &Expr, env: &mut Environment, ctx: &TaskContext) -> Result<Value, ConkerError> {
    match expr {
        Expr::IntegerLiteral(n) => Ok(Value::Integer(*n)),
        Expr::BooleanLiteral(b) => Ok(Value::Boolean(*b)),
        Expr::NullLiteral => Ok(Value::Null),
        Expr::MagicIndex => ctx.index.map(Value::Integer).ok_or_else(|| ConkerError::Name {
            name: "$index".to_string(),
        }),
        Expr::Name(name) => resolve_name(name, env, ctx),
        Expr::TaskRef(task_ref) => {
            // A task reference has no representation in the value model; it
            // is only meaningful in channel position (spec.md §4.B), which
            // is handled directly by `exec_send`/`exec_receive` without
            // going through this generic evaluator.
            let _ = resolve_task_ref(task_ref, env, ctx)?;
            Err(ConkerError::Channel {
                reason: "a task reference cannot be used as a value".to_string(),
            })
        }
        Expr::Negate(inner) => {
            let value = eval_expr(inner, env, ctx)?.expect_integer("-")?;
            Ok(Value::Integer(-value))
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval_expr(lhs, env, ctx)?;
            let rhs = eval_expr(rhs, env, ctx)?;
            eval_binary(*op, &lhs, &rhs)
        }
    }
}

fn resolve_name(name: &str, env: &Environment, ctx: &TaskContext) -> Result<Value, ConkerError> {
    // Name lookup order: task-local binding, then task reference, then
    // magic endpoint (spec.md §4.E). `$out`/`$index` are lexically distinct
    // tokens in the grammar (`Expr::MagicIndex`, `ChannelExpr::MagicOut`),
    // so the only remaining "magic endpoint" a bare identifier could name
    // is nothing — falling through all the way is a `NameError`.
    if let Some(value) = env.get(name) {
        return Ok(value);
    }
    if ctx.task_table.contains(name) {
        return Err(ConkerError::Channel {
            reason: format!("'{name}' names a task and cannot be used as a value here"),
        });
    }
    Err(ConkerError::Name {
        name: name.to_string(),
    })
}

fn eval_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ConkerError> {
    match op {
        BinaryOp::Add => lhs.plus(rhs),
        BinaryOp::Sub => lhs.minus(rhs),
        BinaryOp::Mul => lhs.times(rhs),
        BinaryOp::Div => lhs.divide(rhs),
        BinaryOp::Lt => lhs.compare_lt(rhs),
        BinaryOp::Gt => lhs.compare_gt(rhs),
        BinaryOp::Le => lhs.compare_le(rhs),
        BinaryOp::Ge => lhs.compare_ge(rhs),
        BinaryOp::Eq => Ok(Value::Boolean(lhs.value_eq(rhs))),
        BinaryOp::Ne => Ok(Value::Boolean(!lhs.value_eq(rhs))),
    }
}

/// A restricted evaluator used only to resolve a `task T[n]` multiplicity
/// expression before any task exists (spec.md §4.D). No local bindings,
/// `$index`, task references, or sends/receives are reachable here, so
/// `Name`/`TaskRef`/`MagicIndex` are simply errors rather than needing a
/// full `TaskContext`.
pub fn eval_static_expr(expr: &Expr, env: &Environment) -> Result<Value, ConkerError> {
    match expr {
        Expr::IntegerLiteral(n) => Ok(Value::Integer(*n)),
        Expr::BooleanLiteral(b) => Ok(Value::Boolean(*b)),
        Expr::NullLiteral => Ok(Value::Null),
        Expr::Name(name) => env.get(name).ok_or_else(|| ConkerError::Name {
            name: name.to_string(),
        }),
        Expr::Negate(inner) => {
            let value = eval_static_expr(inner, env)?.expect_integer("-")?;
            Ok(Value::Integer(-value))
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval_static_expr(lhs, env)?;
            let rhs = eval_static_expr(rhs, env)?;
            eval_binary(*op, &lhs, &rhs)
        }
        Expr::MagicIndex | Expr::TaskRef(_) => Err(ConkerError::Channel {
            reason: "task multiplicity must be a constant expression".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;

    fn make_ctx(id: TaskId, index: Option<i64>) -> TaskContext {
        TaskContext {
            id,
            index,
            task_table: Arc::new(TaskTable::default()),
            registry: Arc::new(Registry::new(1, Some(1))),
            magic: Arc::new(MagicSurface::default()),
        }
    }

    #[test]
    fn assignment_then_name_lookup() {
        let ctx = make_ctx(TaskId(0), None);
        let mut env = Environment::empty();
        exec_statement(
            &Statement::Assignment {
                target: "x".to_string(),
                value: Expr::IntegerLiteral(41),
            },
            &mut env,
            &ctx,
        )
        .unwrap();
        let value = eval_expr(&Expr::Name("x".to_string()), &mut env, &ctx).unwrap();
        assert!(matches!(value, Value::Integer(41)));
    }

    #[test]
    fn magic_index_requires_multiplicity() {
        let ctx = make_ctx(TaskId(0), None);
        let mut env = Environment::empty();
        assert!(matches!(
            eval_expr(&Expr::MagicIndex, &mut env, &ctx),
            Err(ConkerError::Name { .. })
        ));
    }

    #[test]
    fn magic_index_present_on_multi_task_instance() {
        let ctx = make_ctx(TaskId(3), Some(3));
        let mut env = Environment::empty();
        let value = eval_expr(&Expr::MagicIndex, &mut env, &ctx).unwrap();
        assert!(matches!(value, Value::Integer(3)));
    }

    #[test]
    fn unbound_name_is_name_error() {
        let ctx = make_ctx(TaskId(0), None);
        let mut env = Environment::empty();
        assert!(matches!(
            eval_expr(&Expr::Name("nope".to_string()), &mut env, &ctx),
            Err(ConkerError::Name { .. })
        ));
    }
}
