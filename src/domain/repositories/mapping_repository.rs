//! Mapping repository trait
//!
//! Create and update run the mapping's structural checks before persisting,
//! so a mapping with duplicate target fields or no rules never reaches
//! storage.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entities::Mapping;
use crate::domain::error::CoreResult;

#[async_trait]
pub trait MappingRepository {
    async fn create_mapping(&self, mapping: Mapping) -> CoreResult<Mapping>;

    async fn get_mapping(&self, id: Uuid) -> CoreResult<Mapping>;

    /// Lists mappings; `active_only` filters out deactivated revisions
    async fn list_mappings(&self, active_only: bool) -> CoreResult<Vec<Mapping>>;

    async fn update_mapping(&self, mapping: Mapping, expected_version: u64) -> CoreResult<Mapping>;

    async fn delete_mapping(&self, id: Uuid) -> CoreResult<()>;
}
