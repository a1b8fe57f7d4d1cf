//! Connector capability module
//!
//! The core talks to every external system through this trait set and
//! nothing else. Real adapters (SQL drivers, blob SDKs, broker clients)
//! live outside the core; the in-memory connector here backs tests,
//! previews and the demo path.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::entities::{Schema, System};
use crate::domain::error::ConnectorError;
use crate::domain::value_objects::Value;

pub use memory::{MemoryConnector, MemoryConnectorProvider};

/// One batch of records as produced by a reader or consumed by a sink
pub type RecordBatch = Vec<Value>;

/// Result of a connection probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub latency_ms: u64,
}

/// Pull-based reader over source batches
///
/// Implementations must stop early and release resources when the caller
/// simply drops them mid-stream; the runner does exactly that on
/// cancellation.
#[async_trait]
pub trait BatchReader: Send {
    /// Next batch in source order, or `None` when the source is exhausted
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>, ConnectorError>;
}

/// Transactional writer; writes are only visible after `commit`
#[async_trait]
pub trait BatchSink: Send {
    async fn write(&mut self, batch: RecordBatch) -> Result<(), ConnectorError>;

    /// Atomically publishes everything written so far; returns the count
    async fn commit(self: Box<Self>) -> Result<u64, ConnectorError>;

    /// Discards everything written so far
    async fn abort(self: Box<Self>) -> Result<(), ConnectorError>;
}

/// The capability set any system adapter must provide
#[async_trait]
pub trait Connector: Send + Sync {
    /// Cheap liveness probe
    async fn test_connection(&self) -> Result<ProbeResult, ConnectorError>;

    /// Introspects the endpoint and returns its schemas; may be slow
    async fn discover_schema(&self, system_id: Uuid) -> Result<Vec<Schema>, ConnectorError>;

    /// Opens a batch reader over the schema's records
    ///
    /// `predicate` is a connector-interpreted filter; `cursor` resumes an
    /// earlier read. Batch size is connector-defined.
    async fn open_read(
        &self,
        schema: &Schema,
        predicate: Option<&str>,
        cursor: Option<String>,
    ) -> Result<Box<dyn BatchReader>, ConnectorError>;

    /// Opens a transactional sink for the schema
    async fn open_write(&self, schema: &Schema) -> Result<Box<dyn BatchSink>, ConnectorError>;
}

/// Resolves the connector serving a given System
///
/// The runner looks connectors up per execution so retries always get a
/// fresh connector instance.
pub trait ConnectorProvider: Send + Sync {
    fn connector_for(&self, system: &System) -> Result<Arc<dyn Connector>, ConnectorError>;
}
