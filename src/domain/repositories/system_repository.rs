//! System repository trait
//!
//! Mutating calls carry the caller's expected version; the gateway rejects
//! the write with `CoreError::Conflict` when the stored version differs, and
//! bumps the version on success.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entities::System;
use crate::domain::error::CoreResult;

#[async_trait]
pub trait SystemRepository {
    /// Stores a new system; the name must be unique
    async fn create_system(&self, system: System) -> CoreResult<System>;

    async fn get_system(&self, id: Uuid) -> CoreResult<System>;

    async fn get_system_by_name(&self, name: &str) -> CoreResult<Option<System>>;

    async fn list_systems(&self) -> CoreResult<Vec<System>>;

    /// Replaces a system under optimistic concurrency
    async fn update_system(&self, system: System, expected_version: u64) -> CoreResult<System>;

    async fn delete_system(&self, id: Uuid) -> CoreResult<()>;
}
