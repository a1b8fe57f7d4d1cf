//! Job repository trait
//!
//! The gateway recomputes `next_execution_at` as part of create and update
//! whenever the schedule or active flag changed, so the scheduler's hot
//! query never sees a stale firing time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entities::Job;
use crate::domain::error::CoreResult;

#[async_trait]
pub trait JobRepository {
    async fn create_job(&self, job: Job) -> CoreResult<Job>;

    async fn get_job(&self, id: Uuid) -> CoreResult<Job>;

    async fn list_jobs(&self) -> CoreResult<Vec<Job>>;

    async fn update_job(&self, job: Job, expected_version: u64) -> CoreResult<Job>;

    async fn delete_job(&self, id: Uuid) -> CoreResult<()>;

    /// The scheduler's hot query: active jobs with `status = scheduled` and
    /// `next_execution_at <= now`, ordered by priority descending then
    /// `next_execution_at` ascending
    async fn list_executable_jobs(&self, now: DateTime<Utc>) -> CoreResult<Vec<Job>>;
}
