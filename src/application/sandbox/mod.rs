//! Expression sandbox module
//!
//! Bounded evaluator for transformation expressions and rule predicates.
//! Expressions have no way to reach the host: no I/O, no clock beyond
//! whatever bindings the caller freezes in, no process or network access.
//! The static pass (denylist + parse + complexity ceiling) runs before any
//! evaluation; at runtime a wall-clock budget, an allocation meter and a
//! cancellation handle bound the walk.

pub mod analysis;
pub mod ast;
pub mod interp;
pub mod parser;

use crate::domain::error::SandboxError;
use crate::domain::value_objects::Value;
use crate::infrastructure::config::CoreConfig;

pub use interp::CancelHandle;

/// Resource caps applied to a single evaluation
#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    pub timeout_ms: u64,
    pub memory_bytes: usize,
    pub complexity_ceiling: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            memory_bytes: 50 * 1024 * 1024,
            complexity_ceiling: 100,
        }
    }
}

impl From<&CoreConfig> for SandboxLimits {
    fn from(config: &CoreConfig) -> Self {
        Self {
            timeout_ms: config.sandbox_timeout_ms,
            memory_bytes: config.sandbox_memory_bytes,
            complexity_ceiling: config.sandbox_complexity_ceiling,
        }
    }
}

/// The sandboxed expression evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct Sandbox {
    limits: SandboxLimits,
}

impl Sandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    /// Static pass only; used by the mapping validator at save time
    pub fn check(&self, source: &str) -> Result<(), SandboxError> {
        analysis::check_expression(source, self.limits.complexity_ceiling).map(|_| ())
    }

    /// Checks and evaluates an expression against read-only bindings
    ///
    /// # Arguments
    ///
    /// * `source` - The expression text
    /// * `bindings` - Object value whose fields the expression can read
    ///
    /// # Returns
    ///
    /// The resulting value, or the sandbox error that stopped evaluation
    pub fn evaluate(&self, source: &str, bindings: &Value) -> Result<Value, SandboxError> {
        self.evaluate_with_cancel(source, bindings, &CancelHandle::new())
    }

    /// Like [`Sandbox::evaluate`] but tear-downable through `cancel`
    pub fn evaluate_with_cancel(
        &self,
        source: &str,
        bindings: &Value,
        cancel: &CancelHandle,
    ) -> Result<Value, SandboxError> {
        let parsed = analysis::check_expression(source, self.limits.complexity_ceiling)?;
        let mut budget = interp::Budget::new(
            self.limits.timeout_ms,
            self.limits.memory_bytes,
            cancel.clone(),
        );
        interp::eval(&parsed, bindings, &mut budget)
    }

    /// Evaluates a predicate expression to a boolean (truthiness)
    pub fn evaluate_predicate(
        &self,
        source: &str,
        bindings: &Value,
    ) -> Result<bool, SandboxError> {
        Ok(self.evaluate(source, bindings)?.is_truthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(json: &str) -> Value {
        let parsed: serde_json::Value = serde_json::from_str(json).unwrap();
        Value::from(parsed)
    }

    #[test]
    fn test_arithmetic_and_paths() {
        let sandbox = Sandbox::default();
        let b = bindings(r#"{"price": 10, "quantity": 3}"#);
        assert_eq!(
            sandbox.evaluate("price * quantity", &b).unwrap(),
            Value::Int(30)
        );
        assert_eq!(
            sandbox.evaluate("price * quantity * 0.5", &b).unwrap(),
            Value::Float(15.0)
        );
    }

    #[test]
    fn test_nested_path_resolution() {
        let sandbox = Sandbox::default();
        let b = bindings(r#"{"customer": {"name": "kim"}, "items": [5, 6]}"#);
        assert_eq!(
            sandbox.evaluate("customer.name", &b).unwrap(),
            Value::String("kim".into())
        );
        assert_eq!(sandbox.evaluate("items[1]", &b).unwrap(), Value::Int(6));
    }

    #[test]
    fn test_catalog_calls() {
        let sandbox = Sandbox::default();
        let b = bindings(r#"{"name": "kim"}"#);
        assert_eq!(
            sandbox.evaluate("string.upper(name)", &b).unwrap(),
            Value::String("KIM".into())
        );
    }

    #[test]
    fn test_string_concat() {
        let sandbox = Sandbox::default();
        let b = bindings(r#"{"first": "Data", "last": "Weaver"}"#);
        assert_eq!(
            sandbox.evaluate("first + ' ' + last", &b).unwrap(),
            Value::String("Data Weaver".into())
        );
    }

    #[test]
    fn test_ternary_and_predicates() {
        let sandbox = Sandbox::default();
        let b = bindings(r#"{"age": 20}"#);
        assert_eq!(
            sandbox
                .evaluate("age >= 18 ? 'adult' : 'minor'", &b)
                .unwrap(),
            Value::String("adult".into())
        );
        assert!(sandbox.evaluate_predicate("age > 10 && age < 30", &b).unwrap());
        assert!(!sandbox.evaluate_predicate("age == 21", &b).unwrap());
    }

    #[test]
    fn test_binding_miss_is_runtime_error() {
        let sandbox = Sandbox::default();
        let b = bindings("{}");
        assert!(matches!(
            sandbox.evaluate("missing + 1", &b),
            Err(SandboxError::Runtime(_))
        ));
    }

    #[test]
    fn test_division_by_zero() {
        let sandbox = Sandbox::default();
        let b = bindings(r#"{"n": 1}"#);
        assert!(matches!(
            sandbox.evaluate("n / 0", &b),
            Err(SandboxError::Runtime(_))
        ));
    }

    #[test]
    fn test_denied_expression_never_evaluates() {
        let sandbox = Sandbox::default();
        let b = bindings("{}");
        assert!(matches!(
            sandbox.evaluate("eval('1')", &b),
            Err(SandboxError::Denied(_))
        ));
    }

    #[test]
    fn test_cancel_stops_evaluation() {
        let sandbox = Sandbox::default();
        let cancel = CancelHandle::new();
        cancel.cancel();
        let b = bindings(r#"{"n": 1}"#);
        assert!(matches!(
            sandbox.evaluate_with_cancel("n + 1", &b, &cancel),
            Err(SandboxError::Timeout { .. })
        ));
    }

    #[test]
    fn test_memory_budget_enforced() {
        let sandbox = Sandbox::new(SandboxLimits {
            timeout_ms: 5_000,
            memory_bytes: 64,
            complexity_ceiling: 100,
        });
        let b = bindings(r#"{"s": "0123456789012345678901234567890123456789"}"#);
        assert!(matches!(
            sandbox.evaluate("s + s + s + s", &b),
            Err(SandboxError::MemoryExceeded { .. })
        ));
    }

    #[test]
    fn test_complexity_ceiling_exact_boundary() {
        let sandbox = Sandbox::new(SandboxLimits {
            timeout_ms: 5_000,
            memory_bytes: 1024,
            complexity_ceiling: 2,
        });
        let b = bindings(r#"{"a": 1, "b": 1, "c": 1}"#);
        // Two && nodes: exactly at the ceiling.
        assert!(sandbox.evaluate("a && b && c", &b).is_ok());
        // Three nodes: one over.
        assert!(matches!(
            sandbox.evaluate("a && b && c && a", &b),
            Err(SandboxError::Complexity { .. })
        ));
    }

    #[test]
    fn test_frozen_now_binding() {
        let sandbox = Sandbox::default();
        let b = bindings(r#"{"now": "2024-01-01T00:00:00"}"#);
        assert_eq!(
            sandbox.evaluate("date.format(now, 'YYYY')", &b).unwrap(),
            Value::String("2024".into())
        );
    }
}
