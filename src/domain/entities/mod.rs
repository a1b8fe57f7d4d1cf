pub mod audit;
pub mod execution;
pub mod job;
pub mod mapping;
pub mod schema;
pub mod system;

pub use audit::{
    Actor, Alert, AlertAction, AlertCondition, AlertRule, AuditEvent, AuditEventType, AuditResult,
    GroupByField, ResourceRef, Severity,
};
pub use execution::{
    Checkpoint, CheckpointType, ExecutionError, ExecutionStatus, JobExecution, Trigger,
};
pub use job::{IntervalUnit, Job, JobStatus, Schedule};
pub use mapping::{
    Aggregation, Cardinality, ExecutionStats, Mapping, MappingRule, RuleKind, ValidationRule,
};
pub use schema::{Column, ConstraintDef, IndexDef, RelationshipDef, Schema, SchemaChange, SchemaFormat};
pub use system::{ProbeStatus, System, SystemType};
