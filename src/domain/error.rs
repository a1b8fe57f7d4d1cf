//! Core error taxonomy module
//!
//! Every failure surfaced to callers or telemetry is one of the kinds
//! defined here. The taxonomy is closed: services map lower-level failures
//! into it at the boundary instead of leaking backend error types upward.

use thiserror::Error;

use crate::domain::entities::audit::Severity;

/// Expression sandbox failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("expression denied: {0}")]
    Denied(String),
    #[error("expression too complex: {nodes} nodes exceeds ceiling {ceiling}")]
    Complexity { nodes: usize, ceiling: usize },
    #[error("expression timed out after {budget_ms} ms")]
    Timeout { budget_ms: u64 },
    #[error("expression exceeded memory budget of {budget_bytes} bytes")]
    MemoryExceeded { budget_bytes: usize },
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// External endpoint failures reported by connectors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("connector unavailable: {0}")]
    Unavailable(String),
    #[error("connector timed out: {0}")]
    Timeout(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("connector I/O error: {0}")]
    Io(String),
}

/// The closed set of failures the execution core can report
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Input violates a schema or rule invariant; fix and retry
    #[error("validation failed: {0}")]
    Validation(String),

    /// Optimistic concurrency version mismatch; refetch and retry
    #[error("version conflict on {entity} {id}: expected {expected}, found {found}")]
    Conflict {
        entity: &'static str,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Admission rejected by the rate limiter
    #[error("rate limited; retry after {retry_after_seconds} s")]
    RateLimited {
        retry_after_seconds: u64,
        limit: u64,
        window_ms: u64,
    },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("execution exceeded its timeout of {timeout_seconds} s")]
    ExecutionTimeout { timeout_seconds: u64 },

    #[error("cancelled")]
    Cancelled,

    /// Transient persistence failure; the runner retries with backoff
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Programmer error; always audited at critical severity
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CoreError::Internal(message.into())
    }

    /// True when retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::StorageUnavailable(_)
                | CoreError::RateLimited { .. }
                | CoreError::Connector(ConnectorError::Unavailable(_))
                | CoreError::Connector(ConnectorError::Timeout(_))
        )
    }

    /// Audit severity derived from the error kind
    ///
    /// Validation problems are operator mistakes (low); rate limiting is
    /// suspicious but common (medium); a denied sandbox expression means
    /// someone probed the evaluator (high); internal errors are bugs
    /// (critical).
    pub fn audit_severity(&self) -> Severity {
        match self {
            CoreError::Validation(_) | CoreError::NotFound { .. } => Severity::Low,
            CoreError::Conflict { .. } | CoreError::Cancelled => Severity::Low,
            CoreError::RateLimited { .. } => Severity::Medium,
            CoreError::Sandbox(SandboxError::Denied(_)) => Severity::High,
            CoreError::Sandbox(_) => Severity::Medium,
            CoreError::Connector(_)
            | CoreError::ExecutionTimeout { .. }
            | CoreError::StorageUnavailable(_) => Severity::Medium,
            CoreError::Internal(_) => Severity::Critical,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
