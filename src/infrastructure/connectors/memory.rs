//! In-memory connector
//!
//! Stores record tables in process memory, keyed by schema name. Besides
//! backing tests and previews it doubles as a fault injector: a connector
//! can be configured to fail reads, writes or probes so the runner's retry
//! and failure paths can be exercised deterministically.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::domain::entities::{Schema, System};
use crate::domain::error::ConnectorError;
use crate::domain::value_objects::Value;

use super::{BatchReader, BatchSink, Connector, ConnectorProvider, ProbeResult, RecordBatch};

const DEFAULT_BATCH_SIZE: usize = 100;

/// Which operations the connector should fail, for tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultMode {
    #[default]
    None,
    /// `open_read` fails with `ConnectorError::Unavailable`
    FailReads,
    /// `open_write` fails with `ConnectorError::Unavailable`
    FailWrites,
    /// `commit` fails after accepting all writes
    FailCommit,
}

#[derive(Default)]
struct Tables {
    rows: HashMap<String, Vec<Value>>,
}

/// Memory-backed implementation of the connector capability set
pub struct MemoryConnector {
    tables: Arc<Mutex<Tables>>,
    batch_size: usize,
    fault_mode: FaultMode,
    schemas: Mutex<Vec<Schema>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            batch_size: DEFAULT_BATCH_SIZE,
            fault_mode: FaultMode::None,
            schemas: Mutex::new(Vec::new()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_fault_mode(mut self, fault_mode: FaultMode) -> Self {
        self.fault_mode = fault_mode;
        self
    }

    /// Seeds a table with records, replacing any existing content
    pub fn load_table(&self, name: &str, rows: Vec<Value>) {
        self.tables.lock().unwrap().rows.insert(name.to_string(), rows);
    }

    /// Registers a schema returned by `discover_schema`
    pub fn register_schema(&self, schema: Schema) {
        self.schemas.lock().unwrap().push(schema);
    }

    /// Snapshot of a table's committed rows
    pub fn table(&self, name: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .rows
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryReader {
    batches: std::vec::IntoIter<RecordBatch>,
}

#[async_trait]
impl BatchReader for MemoryReader {
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>, ConnectorError> {
        Ok(self.batches.next())
    }
}

struct MemorySink {
    tables: Arc<Mutex<Tables>>,
    table: String,
    pending: Vec<Value>,
    fail_commit: bool,
}

#[async_trait]
impl BatchSink for MemorySink {
    async fn write(&mut self, batch: RecordBatch) -> Result<(), ConnectorError> {
        self.pending.extend(batch);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<u64, ConnectorError> {
        if self.fail_commit {
            return Err(ConnectorError::Io("commit failed".to_string()));
        }
        let count = self.pending.len() as u64;
        let mut tables = self.tables.lock().unwrap();
        tables
            .rows
            .entry(self.table)
            .or_default()
            .extend(self.pending);
        Ok(count)
    }

    async fn abort(self: Box<Self>) -> Result<(), ConnectorError> {
        // Pending rows are simply dropped.
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn test_connection(&self) -> Result<ProbeResult, ConnectorError> {
        Ok(ProbeResult { latency_ms: 0 })
    }

    async fn discover_schema(&self, _system_id: Uuid) -> Result<Vec<Schema>, ConnectorError> {
        Ok(self.schemas.lock().unwrap().clone())
    }

    async fn open_read(
        &self,
        schema: &Schema,
        _predicate: Option<&str>,
        cursor: Option<String>,
    ) -> Result<Box<dyn BatchReader>, ConnectorError> {
        if self.fault_mode == FaultMode::FailReads {
            return Err(ConnectorError::Unavailable(format!(
                "read refused for '{}'",
                schema.name
            )));
        }
        let skip: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let rows = self.table(&schema.name);
        let batches: Vec<RecordBatch> = rows
            .into_iter()
            .skip(skip)
            .collect::<Vec<_>>()
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        Ok(Box::new(MemoryReader {
            batches: batches.into_iter(),
        }))
    }

    async fn open_write(&self, schema: &Schema) -> Result<Box<dyn BatchSink>, ConnectorError> {
        if self.fault_mode == FaultMode::FailWrites {
            return Err(ConnectorError::Unavailable(format!(
                "write refused for '{}'",
                schema.name
            )));
        }
        Ok(Box::new(MemorySink {
            tables: Arc::clone(&self.tables),
            table: schema.name.clone(),
            pending: Vec::new(),
            fail_commit: self.fault_mode == FaultMode::FailCommit,
        }))
    }
}

/// Provider that serves one shared `MemoryConnector` for every system
pub struct MemoryConnectorProvider {
    connector: Arc<MemoryConnector>,
}

impl MemoryConnectorProvider {
    pub fn new(connector: Arc<MemoryConnector>) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> Arc<MemoryConnector> {
        Arc::clone(&self.connector)
    }
}

impl ConnectorProvider for MemoryConnectorProvider {
    fn connector_for(&self, _system: &System) -> Result<Arc<dyn Connector>, ConnectorError> {
        Ok(Arc::clone(&self.connector) as Arc<dyn Connector>)
    }
}
