//! Budgeted expression interpreter
//!
//! A plain tree walk over the AST with three meters attached: a wall-clock
//! deadline checked every few steps, an allocation meter fed by every
//! produced composite value, and a shared cancellation flag the host flips
//! when an execution is torn down. Bindings are read-only; the grammar has
//! no assignment, so the interpreter never needs to copy them defensively.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::domain::error::SandboxError;
use crate::domain::value_objects::Value;

use crate::application::transforms::TransformRegistry;

use super::ast::{BinaryOp, Expr, UnaryOp};

/// How many interpreter steps run between deadline checks
const DEADLINE_CHECK_INTERVAL: u64 = 64;

/// Shared cancellation flag handed to the host
///
/// Cancellation is modelled as hitting the deadline early: the evaluation
/// stops at the next instruction boundary with a `Timeout`.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub(super) struct Budget {
    deadline: Instant,
    budget_ms: u64,
    allocated: usize,
    memory_bytes: usize,
    steps: u64,
    cancel: CancelHandle,
}

impl Budget {
    pub fn new(budget_ms: u64, memory_bytes: usize, cancel: CancelHandle) -> Self {
        Self {
            deadline: Instant::now() + std::time::Duration::from_millis(budget_ms),
            budget_ms,
            allocated: 0,
            memory_bytes,
            steps: 0,
            cancel,
        }
    }

    fn step(&mut self) -> Result<(), SandboxError> {
        self.steps += 1;
        if self.steps % DEADLINE_CHECK_INTERVAL == 0 || self.cancel.is_cancelled() {
            if self.cancel.is_cancelled() || Instant::now() > self.deadline {
                return Err(SandboxError::Timeout {
                    budget_ms: self.budget_ms,
                });
            }
        }
        Ok(())
    }

    fn charge(&mut self, value: &Value) -> Result<(), SandboxError> {
        if matches!(value, Value::String(_) | Value::Array(_) | Value::Object(_)) {
            self.allocated += value.approx_size();
            if self.allocated > self.memory_bytes {
                return Err(SandboxError::MemoryExceeded {
                    budget_bytes: self.memory_bytes,
                });
            }
        }
        Ok(())
    }
}

pub(super) fn eval(expr: &Expr, bindings: &Value, budget: &mut Budget) -> Result<Value, SandboxError> {
    budget.step()?;
    let result = match expr {
        Expr::Null => Value::Null,
        Expr::Bool(b) => Value::Bool(*b),
        Expr::Int(n) => Value::Int(*n),
        Expr::Float(f) => Value::Float(*f),
        Expr::Str(s) => Value::String(s.clone()),
        Expr::Path(path) => bindings
            .get_path(path)
            .cloned()
            .ok_or_else(|| SandboxError::Runtime(format!("unknown identifier '{}'", path)))?,
        Expr::Unary { op, expr } => {
            let inner = eval(expr, bindings, budget)?;
            apply_unary(*op, inner)?
        }
        Expr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let lhs = eval(left, bindings, budget)?;
                if !lhs.is_truthy() {
                    Value::Bool(false)
                } else {
                    Value::Bool(eval(right, bindings, budget)?.is_truthy())
                }
            }
            BinaryOp::Or => {
                let lhs = eval(left, bindings, budget)?;
                if lhs.is_truthy() {
                    Value::Bool(true)
                } else {
                    Value::Bool(eval(right, bindings, budget)?.is_truthy())
                }
            }
            _ => {
                let lhs = eval(left, bindings, budget)?;
                let rhs = eval(right, bindings, budget)?;
                apply_binary(*op, lhs, rhs)?
            }
        },
        Expr::Ternary {
            cond,
            then,
            otherwise,
        } => {
            if eval(cond, bindings, budget)?.is_truthy() {
                eval(then, bindings, budget)?
            } else {
                eval(otherwise, bindings, budget)?
            }
        }
        Expr::Call { function, args } => {
            let mut evaluated = Vec::with_capacity(args.len());
            for arg in args {
                evaluated.push(eval(arg, bindings, budget)?);
            }
            TransformRegistry::standard()
                .call(function, &evaluated)
                .map_err(|e| SandboxError::Runtime(e.to_string()))?
        }
        Expr::Index { base, index } => {
            let base = eval(base, bindings, budget)?;
            let index = eval(index, bindings, budget)?;
            index_value(&base, &index)?
        }
    };
    budget.charge(&result)?;
    Ok(result)
}

fn apply_unary(op: UnaryOp, value: Value) -> Result<Value, SandboxError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
        UnaryOp::Neg => match value {
            Value::Int(n) => Ok(Value::Int(-n)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(SandboxError::Runtime(format!(
                "cannot negate {}",
                type_name(&other)
            ))),
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Int(_) | Value::Float(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn numeric_pair(lhs: &Value, rhs: &Value) -> Result<(f64, f64), SandboxError> {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(SandboxError::Runtime(format!(
            "numeric operator applied to {} and {}",
            type_name(lhs),
            type_name(rhs)
        ))),
    }
}

fn apply_binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, SandboxError> {
    match op {
        BinaryOp::Add => match (&lhs, &rhs) {
            // String concatenation when either side is a string.
            (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(format!(
                "{}{}",
                lhs.coerce_string(),
                rhs.coerce_string()
            ))),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            _ => {
                let (a, b) = numeric_pair(&lhs, &rhs)?;
                Ok(Value::Float(a + b))
            }
        },
        BinaryOp::Sub | BinaryOp::Mul => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(if op == BinaryOp::Sub {
                a - b
            } else {
                a * b
            })),
            _ => {
                let (a, b) = numeric_pair(&lhs, &rhs)?;
                Ok(Value::Float(if op == BinaryOp::Sub { a - b } else { a * b }))
            }
        },
        BinaryOp::Div => {
            let (a, b) = numeric_pair(&lhs, &rhs)?;
            if b == 0.0 {
                return Err(SandboxError::Runtime("division by zero".to_string()));
            }
            Ok(Value::Float(a / b))
        }
        BinaryOp::Rem => {
            let (a, b) = numeric_pair(&lhs, &rhs)?;
            if b == 0.0 {
                return Err(SandboxError::Runtime("division by zero".to_string()));
            }
            Ok(Value::Float(a % b))
        }
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => Some(lhs.coerce_string().cmp(&rhs.coerce_string())),
            }
            .ok_or_else(|| SandboxError::Runtime("incomparable values".to_string()))?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit ops handled by eval"),
    }
}

/// Equality with int/float unification, structural otherwise
fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        _ => lhs == rhs,
    }
}

fn index_value(base: &Value, index: &Value) -> Result<Value, SandboxError> {
    match base {
        Value::Array(items) => {
            let idx = index
                .as_i64()
                .ok_or_else(|| SandboxError::Runtime("array index must be a number".to_string()))?;
            if idx < 0 {
                return Ok(Value::Null);
            }
            Ok(items.get(idx as usize).cloned().unwrap_or(Value::Null))
        }
        Value::Object(map) => Ok(map.get(&index.coerce_string()).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(SandboxError::Runtime(format!(
            "cannot index into {}",
            type_name(other)
        ))),
    }
}
