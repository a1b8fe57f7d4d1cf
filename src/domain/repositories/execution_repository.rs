//! Execution repository trait
//!
//! Executions are immutable once terminal: an update against a record whose
//! stored status is terminal is rejected as a validation error.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entities::JobExecution;
use crate::domain::error::CoreResult;

#[async_trait]
pub trait ExecutionRepository {
    /// Stores a new execution; `execution_id` must be unique
    async fn create_execution(&self, execution: JobExecution) -> CoreResult<JobExecution>;

    async fn get_execution(&self, id: Uuid) -> CoreResult<JobExecution>;

    async fn get_execution_by_execution_id(&self, execution_id: &str)
        -> CoreResult<Option<JobExecution>>;

    async fn update_execution(
        &self,
        execution: JobExecution,
        expected_version: u64,
    ) -> CoreResult<JobExecution>;

    /// Newest-first listing, optionally restricted to one job
    async fn list_executions(
        &self,
        job_id: Option<Uuid>,
        limit: usize,
    ) -> CoreResult<Vec<JobExecution>>;

    /// Most recently queued execution for a job, if any
    async fn latest_execution(&self, job_id: Uuid) -> CoreResult<Option<JobExecution>>;

    /// Executions in a non-terminal state, used for restart recovery
    async fn list_active_executions(&self) -> CoreResult<Vec<JobExecution>>;
}
