//! Job execution entity module
//!
//! A JobExecution records one run of a job: timing, counters, retry lineage
//! and the checkpoint trace operators read when something goes wrong. Once a
//! terminal status is reached the record is never mutated again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::value_objects::Priority;

/// Runtime state of an execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Queued | ExecutionStatus::Running)
    }
}

/// What caused an execution to be created
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Scheduled,
    Dependency,
    Retry,
}

/// Phase marker appended to the execution trace
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    MappingLoaded,
    SourceOpened,
    BatchProcessed,
    SinkCommitted,
    Failure,
}

/// Tagged timestamped entry in an execution's trace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub checkpoint_type: CheckpointType,
    pub message: String,
    pub ts: DateTime<Utc>,
    pub payload: Option<serde_json::Value>,
}

/// Error captured on a failed execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionError {
    pub message: String,
    pub stack: Option<String>,
}

/// One run of a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobExecution {
    pub id: Uuid,
    /// Human-facing unique identifier (`exec-<hex>`), indexed by the gateway
    pub execution_id: String,
    pub job_id: Uuid,
    pub status: ExecutionStatus,
    pub trigger: Trigger,
    pub triggered_by: Option<Uuid>,
    /// When the scheduler intended the run to happen
    pub scheduled_at: Option<DateTime<Utc>>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    pub source_records: u64,
    pub target_records: u64,
    pub error_records: u64,
    pub retry_count: u32,
    /// The failed execution this run retries, forming an acyclic chain
    pub parent_execution_id: Option<Uuid>,
    /// Priority snapshot taken at enqueue time
    pub priority: Priority,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    pub error: Option<ExecutionError>,
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Optimistic concurrency version, managed by the persistence gateway
    pub version: u64,
}

impl JobExecution {
    /// Creates a queued execution for a job
    pub fn queued(job_id: Uuid, priority: Priority, trigger: Trigger, now: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            execution_id: format!("exec-{}", id.simple()),
            job_id,
            status: ExecutionStatus::Queued,
            trigger,
            triggered_by: None,
            scheduled_at: None,
            queued_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            parameters: HashMap::new(),
            source_records: 0,
            target_records: 0,
            error_records: 0,
            retry_count: 0,
            parent_execution_id: None,
            priority,
            metrics: HashMap::new(),
            error: None,
            checkpoints: Vec::new(),
            warnings: Vec::new(),
            version: 1,
        }
    }

    /// Derives the retry of this (failed) execution
    ///
    /// The child keeps the job, parameters and priority, points back at this
    /// execution and increments the retry counter.
    pub fn retry(&self, now: DateTime<Utc>) -> Self {
        let mut child = Self::queued(self.job_id, self.priority, Trigger::Retry, now);
        child.parameters = self.parameters.clone();
        child.parent_execution_id = Some(self.id);
        child.retry_count = self.retry_count + 1;
        child.triggered_by = self.triggered_by;
        child
    }

    /// Marks the execution running
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(now);
    }

    /// Moves the execution to a terminal status, fixing the timing invariants
    ///
    /// `completed_at` is clamped to be at least `started_at` and
    /// `duration_ms` is always derived from the two, so listings never show
    /// a negative duration.
    pub fn mark_terminal(&mut self, status: ExecutionStatus, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        let started = self.started_at.unwrap_or(self.queued_at);
        let completed = now.max(started);
        self.status = status;
        self.completed_at = Some(completed);
        self.duration_ms = Some((completed - started).num_milliseconds());
    }

    pub fn fail(&mut self, message: impl Into<String>, stack: Option<String>, now: DateTime<Utc>) {
        self.error = Some(ExecutionError {
            message: message.into(),
            stack,
        });
        self.mark_terminal(ExecutionStatus::Failed, now);
    }

    /// Appends a checkpoint to the trace
    pub fn checkpoint(
        &mut self,
        checkpoint_type: CheckpointType,
        message: impl Into<String>,
        payload: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) {
        self.checkpoints.push(Checkpoint {
            checkpoint_type,
            message: message.into(),
            ts: now,
            payload,
        });
    }

    /// True when a further retry is allowed under the job's budget
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.status == ExecutionStatus::Failed && self.retry_count < max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_terminal_timing_invariants() {
        let now = Utc::now();
        let mut exec = JobExecution::queued(Uuid::new_v4(), Priority::default(), Trigger::Manual, now);
        exec.mark_running(now + Duration::seconds(1));
        exec.mark_terminal(ExecutionStatus::Completed, now + Duration::seconds(5));

        let started = exec.started_at.unwrap();
        let completed = exec.completed_at.unwrap();
        assert!(completed >= started);
        assert_eq!(exec.duration_ms, Some((completed - started).num_milliseconds()));
    }

    #[test]
    fn test_terminal_clamps_clock_skew() {
        let now = Utc::now();
        let mut exec = JobExecution::queued(Uuid::new_v4(), Priority::default(), Trigger::Manual, now);
        exec.mark_running(now);
        // A wall clock stepping backwards must not yield a negative duration.
        exec.mark_terminal(ExecutionStatus::Failed, now - Duration::seconds(3));
        assert_eq!(exec.duration_ms, Some(0));
        assert_eq!(exec.completed_at, exec.started_at);
    }

    #[test]
    fn test_retry_chain_lineage() {
        let now = Utc::now();
        let mut parent =
            JobExecution::queued(Uuid::new_v4(), Priority::new(7), Trigger::Scheduled, now);
        parent.mark_running(now);
        parent.fail("connector unavailable", None, now);

        let child = parent.retry(now);
        assert_eq!(child.parent_execution_id, Some(parent.id));
        assert_eq!(child.retry_count, 1);
        assert_eq!(child.trigger, Trigger::Retry);
        assert_eq!(child.priority, parent.priority);
        assert!(child.parent_execution_id.is_some());
    }

    #[test]
    fn test_can_retry_respects_budget() {
        let now = Utc::now();
        let mut exec = JobExecution::queued(Uuid::new_v4(), Priority::default(), Trigger::Manual, now);
        exec.mark_running(now);
        exec.fail("boom", None, now);
        assert!(exec.can_retry(3));

        exec.retry_count = 3;
        assert!(!exec.can_retry(3));
    }

    #[test]
    fn test_execution_id_unique_shape() {
        let now = Utc::now();
        let a = JobExecution::queued(Uuid::new_v4(), Priority::default(), Trigger::Manual, now);
        let b = JobExecution::queued(Uuid::new_v4(), Priority::default(), Trigger::Manual, now);
        assert!(a.execution_id.starts_with("exec-"));
        assert_ne!(a.execution_id, b.execution_id);
    }
}
