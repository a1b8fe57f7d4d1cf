//! Schema repository trait

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entities::Schema;
use crate::domain::error::CoreResult;

#[async_trait]
pub trait SchemaRepository {
    /// Stores a new schema; `(system_id, name, version)` must be unique and
    /// the schema must pass its structural validation
    async fn create_schema(&self, schema: Schema) -> CoreResult<Schema>;

    async fn get_schema(&self, id: Uuid) -> CoreResult<Schema>;

    /// Lists schemas, optionally restricted to one system
    async fn list_schemas(&self, system_id: Option<Uuid>) -> CoreResult<Vec<Schema>>;

    /// Highest-version schema for `(system_id, name)`, if any
    async fn latest_schema(&self, system_id: Uuid, name: &str) -> CoreResult<Option<Schema>>;

    /// Replaces a schema under optimistic concurrency on its revision
    async fn update_schema(&self, schema: Schema, expected_version: i64) -> CoreResult<Schema>;

    async fn delete_schema(&self, id: Uuid) -> CoreResult<()>;
}
