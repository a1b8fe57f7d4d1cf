//! Runner service
//!
//! Owns the admission of queued executions under the concurrency cap and
//! supervises each run: loading the mapping, streaming source batches
//! through the mapping engine into the target sink, checkpointing each
//! phase, and handling timeout, cancellation and retry. Executions of the
//! same job are serialised; the queue skips entries whose job is busy
//! without disturbing their position.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::entities::{
    AuditEvent, AuditEventType, AuditResult, CheckpointType, ExecutionStatus, Job, JobExecution,
    JobStatus, Mapping, Trigger,
};
use crate::domain::error::{CoreError, CoreResult};
use crate::domain::repositories::{
    ExecutionRepository, JobRepository, MappingRepository, SchemaRepository, Store,
    SystemRepository,
};
use crate::infrastructure::config::CoreConfig;
use crate::infrastructure::connectors::{BatchSink, ConnectorProvider};

use crate::application::audit::AuditManager;
use crate::application::mapping::MappingEngine;
use crate::application::sandbox::CancelHandle;
use crate::application::telemetry::TelemetryHub;

use super::queue::{ExecutionQueue, QueuedExecution};

const STORAGE_RETRY_ATTEMPTS: usize = 5;
const STORAGE_RETRY_BASE_MS: u64 = 50;

/// Why a run stopped before committing
enum StopReason {
    Timeout,
    Cancelled,
    Failed(CoreError),
}

struct RunningExecution {
    execution_id: Uuid,
    cancel: CancelHandle,
}

/// Admission and supervision of job executions
pub struct RunnerService {
    store: Arc<dyn Store>,
    connectors: Arc<dyn ConnectorProvider>,
    engine: MappingEngine,
    queue: Arc<ExecutionQueue>,
    max_concurrent: usize,
    grace: Duration,
    running: Mutex<HashMap<Uuid, RunningExecution>>,
    audit: Mutex<Option<Arc<AuditManager>>>,
    telemetry: Mutex<Option<Arc<TelemetryHub>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl RunnerService {
    pub fn new(
        store: Arc<dyn Store>,
        connectors: Arc<dyn ConnectorProvider>,
        engine: MappingEngine,
        queue: Arc<ExecutionQueue>,
        config: &CoreConfig,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            store,
            connectors,
            engine,
            queue,
            max_concurrent: config.max_concurrent_executions.max(1),
            grace: config.cancellation_grace(),
            running: Mutex::new(HashMap::new()),
            audit: Mutex::new(None),
            telemetry: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            shutdown,
        })
    }

    pub fn set_audit(&self, audit: Arc<AuditManager>) {
        *self.audit.lock().unwrap() = Some(audit);
    }

    pub fn set_telemetry(&self, telemetry: Arc<TelemetryHub>) {
        *self.telemetry.lock().unwrap() = Some(telemetry);
    }

    pub fn queue(&self) -> Arc<ExecutionQueue> {
        Arc::clone(&self.queue)
    }

    /// Number of currently running executions
    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    /// Starts the worker pool
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap();
        for worker_id in 0..self.max_concurrent {
            let runner = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            workers.push(tokio::spawn(async move {
                loop {
                    let entry = tokio::select! {
                        entry = runner.next_admissible() => entry,
                        _ = shutdown.changed() => break,
                    };
                    runner.run_entry(entry).await;
                }
                debug!(worker_id, "runner worker stopped");
            }));
        }
        info!(workers = self.max_concurrent, "runner started");
    }

    /// Stops admitting work, signals running executions and waits briefly
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        {
            let running = self.running.lock().unwrap();
            for handle in running.values() {
                handle.cancel.cancel();
            }
        }
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = tokio::time::timeout(self.grace, worker).await;
        }
        info!("runner stopped");
    }

    /// Pops the next entry whose job is not already running
    async fn next_admissible(&self) -> QueuedExecution {
        loop {
            let entry = self
                .queue
                .pop_wait(|entry| !self.running.lock().unwrap().contains_key(&entry.job_id))
                .await;
            // Re-check under the running lock; another worker may have
            // admitted the same job between the pop and now.
            let mut running = self.running.lock().unwrap();
            if running.contains_key(&entry.job_id) {
                drop(running);
                let _ = self.queue.try_push(
                    entry.execution_id,
                    entry.job_id,
                    entry.priority,
                    entry.queued_at,
                );
                continue;
            }
            running.insert(
                entry.job_id,
                RunningExecution {
                    execution_id: entry.execution_id,
                    cancel: CancelHandle::new(),
                },
            );
            return entry;
        }
    }

    async fn run_entry(self: &Arc<Self>, entry: QueuedExecution) {
        let cancel = {
            let running = self.running.lock().unwrap();
            running
                .get(&entry.job_id)
                .map(|r| r.cancel.clone())
                .unwrap_or_default()
        };

        if let Err(e) = self.run_execution(&entry, &cancel).await {
            error!(execution = %entry.execution_id, "execution supervision failed: {}", e);
            let audit = self.audit.lock().unwrap().clone();
            if let Some(audit) = audit {
                let _ = audit.submit_error(&e, "job_execution").await;
            }
        }

        self.running.lock().unwrap().remove(&entry.job_id);
        // The job freed up; queued siblings may be admissible now.
        self.queue.wake();
    }

    async fn run_execution(
        self: &Arc<Self>,
        entry: &QueuedExecution,
        cancel: &CancelHandle,
    ) -> CoreResult<()> {
        let mut execution = self.store.get_execution(entry.execution_id).await?;
        if execution.status != ExecutionStatus::Queued {
            // Cancelled (or otherwise settled) while waiting in the queue.
            return Ok(());
        }

        let started = Utc::now();
        execution.mark_running(started);
        execution = self.update_execution_backoff(execution).await?;
        self.set_job_status(entry.job_id, JobStatus::Running).await?;
        self.audit_event(
            AuditEventType::JobExecutionStarted,
            &execution,
            AuditResult::Success,
        )
        .await;
        self.count("runner.executions_started", 1.0);

        let outcome = self.drive(&mut execution, cancel, started).await;

        let job = self.store.get_job(entry.job_id).await?;
        match outcome {
            Ok(()) => {
                execution.mark_terminal(ExecutionStatus::Completed, Utc::now());
                execution = self.update_execution_backoff(execution).await?;
                let next_status = if job.next_execution_at.is_some() {
                    JobStatus::Scheduled
                } else {
                    JobStatus::Completed
                };
                self.set_job_status(job.id, next_status).await?;
                self.audit_event(
                    AuditEventType::JobExecutionCompleted,
                    &execution,
                    AuditResult::Success,
                )
                .await;
                self.count("runner.executions_completed", 1.0);
            }
            Err(StopReason::Timeout) => {
                let timeout_seconds = job.timeout_seconds.unwrap_or_default();
                execution.checkpoint(
                    CheckpointType::Failure,
                    format!("execution exceeded {} s timeout", timeout_seconds),
                    None,
                    Utc::now(),
                );
                execution.error = Some(crate::domain::entities::ExecutionError {
                    message: CoreError::ExecutionTimeout { timeout_seconds }.to_string(),
                    stack: None,
                });
                execution.mark_terminal(ExecutionStatus::Timeout, Utc::now());
                execution = self.update_execution_backoff(execution).await?;
                self.set_job_status(job.id, JobStatus::Failed).await?;
                self.audit_event(
                    AuditEventType::JobExecutionFailed,
                    &execution,
                    AuditResult::Failure,
                )
                .await;
                self.count("runner.executions_timed_out", 1.0);
            }
            Err(StopReason::Cancelled) => {
                execution.checkpoint(CheckpointType::Failure, "cancelled", None, Utc::now());
                execution.mark_terminal(ExecutionStatus::Cancelled, Utc::now());
                execution = self.update_execution_backoff(execution).await?;
                let next_status = if job.next_execution_at.is_some() {
                    JobStatus::Scheduled
                } else {
                    JobStatus::Completed
                };
                self.set_job_status(job.id, next_status).await?;
                self.count("runner.executions_cancelled", 1.0);
            }
            Err(StopReason::Failed(error)) => {
                execution.checkpoint(
                    CheckpointType::Failure,
                    error.to_string(),
                    None,
                    Utc::now(),
                );
                execution.fail(error.to_string(), None, Utc::now());
                execution = self.update_execution_backoff(execution).await?;
                self.set_job_status(job.id, JobStatus::Failed).await?;
                self.audit_event(
                    AuditEventType::JobExecutionFailed,
                    &execution,
                    AuditResult::Failure,
                )
                .await;
                self.count("runner.executions_failed", 1.0);
                self.schedule_retry(&job, &execution);
            }
        }

        if let Some(duration) = execution.duration_ms {
            self.timing("runner.execution_duration_ms", duration as f64);
        }
        self.record_mapping_stats(&job, &execution).await;
        Ok(())
    }

    /// The streaming read → map → write loop
    async fn drive(
        &self,
        execution: &mut JobExecution,
        cancel: &CancelHandle,
        started: DateTime<Utc>,
    ) -> Result<(), StopReason> {
        let job = self
            .store
            .get_job(execution.job_id)
            .await
            .map_err(StopReason::Failed)?;
        let mapping = self
            .store
            .get_mapping(job.mapping_id)
            .await
            .map_err(StopReason::Failed)?;
        let source_schema = self
            .store
            .get_schema(mapping.source_schema_id)
            .await
            .map_err(StopReason::Failed)?;
        let target_schema = self
            .store
            .get_schema(mapping.target_schema_id)
            .await
            .map_err(StopReason::Failed)?;
        let source_system = self
            .store
            .get_system(mapping.source_system_id)
            .await
            .map_err(StopReason::Failed)?;
        let target_system = self
            .store
            .get_system(mapping.target_system_id)
            .await
            .map_err(StopReason::Failed)?;

        execution.checkpoint(
            CheckpointType::MappingLoaded,
            format!("mapping '{}' v{}", mapping.name, mapping.version),
            None,
            Utc::now(),
        );

        let source = self
            .connectors
            .connector_for(&source_system)
            .map_err(|e| StopReason::Failed(e.into()))?;
        let target = self
            .connectors
            .connector_for(&target_system)
            .map_err(|e| StopReason::Failed(e.into()))?;

        let mut reader = source
            .open_read(&source_schema, None, None)
            .await
            .map_err(|e| StopReason::Failed(e.into()))?;
        let mut sink = target
            .open_write(&target_schema)
            .await
            .map_err(|e| StopReason::Failed(e.into()))?;

        execution.checkpoint(
            CheckpointType::SourceOpened,
            format!("reading '{}'", source_schema.name),
            None,
            Utc::now(),
        );

        let deadline = job
            .timeout_seconds
            .map(|s| started + ChronoDuration::seconds(s as i64));

        let mut batch_index: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                self.abort_sink(sink).await;
                return Err(StopReason::Cancelled);
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let left = deadline - Utc::now();
                    if left <= ChronoDuration::zero() {
                        self.abort_sink(sink).await;
                        return Err(StopReason::Timeout);
                    }
                    left.to_std().unwrap_or(Duration::from_millis(1))
                }
                None => Duration::from_secs(24 * 60 * 60),
            };

            let batch = match tokio::time::timeout(remaining, reader.next_batch()).await {
                Ok(Ok(Some(batch))) => batch,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    self.abort_sink(sink).await;
                    return Err(StopReason::Failed(e.into()));
                }
                Err(_) => {
                    self.abort_sink(sink).await;
                    return Err(StopReason::Timeout);
                }
            };

            batch_index += 1;
            let batch_len = batch.len() as u64;
            let output = match self.engine.apply(&mapping, &batch, Utc::now()) {
                Ok(output) => output,
                Err(e) => {
                    self.abort_sink(sink).await;
                    return Err(StopReason::Failed(e));
                }
            };

            execution.source_records += batch_len;
            execution.error_records += output.error_count;
            execution.warnings.extend(output.warnings);

            let produced = output.records.len() as u64;
            if let Err(e) = sink.write(output.records).await {
                self.abort_sink(sink).await;
                return Err(StopReason::Failed(e.into()));
            }
            execution.target_records += produced;

            execution.checkpoint(
                CheckpointType::BatchProcessed,
                format!("batch {} mapped", batch_index),
                Some(serde_json::json!({
                    "batch": batch_index,
                    "source_records": batch_len,
                    "target_records": produced,
                })),
                Utc::now(),
            );
            self.count("runner.records_processed", batch_len as f64);
        }

        let written = sink
            .commit()
            .await
            .map_err(|e| StopReason::Failed(e.into()))?;
        execution.checkpoint(
            CheckpointType::SinkCommitted,
            format!("{} records committed", written),
            None,
            Utc::now(),
        );
        Ok(())
    }

    async fn abort_sink(&self, sink: Box<dyn BatchSink>) {
        match tokio::time::timeout(self.grace, sink.abort()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("sink abort failed: {}", e),
            Err(_) => warn!("sink abort timed out after grace period"),
        }
    }

    /// Cancels a queued or running execution
    pub async fn cancel_execution(&self, execution_id: Uuid) -> CoreResult<()> {
        if self.queue.cancel(execution_id) {
            let mut execution = self.store.get_execution(execution_id).await?;
            execution.checkpoint(CheckpointType::Failure, "cancelled while queued", None, Utc::now());
            execution.mark_terminal(ExecutionStatus::Cancelled, Utc::now());
            let version = execution.version;
            self.store.update_execution(execution, version).await?;
            return Ok(());
        }

        let running = self.running.lock().unwrap();
        match running.values().find(|r| r.execution_id == execution_id) {
            Some(handle) => {
                handle.cancel.cancel();
                Ok(())
            }
            None => Err(CoreError::not_found("execution", execution_id)),
        }
    }

    /// Enqueues the retry of a failed execution after the job's delay
    fn schedule_retry(self: &Arc<Self>, job: &Job, failed: &JobExecution) {
        if !failed.can_retry(job.max_retries) {
            return;
        }
        let runner = Arc::clone(self);
        let child = failed.retry(Utc::now());
        let delay = Duration::from_secs(job.retry_delay_seconds);
        let job_id = job.id;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut child = child;
            child.queued_at = Utc::now();
            match runner.store.create_execution(child.clone()).await {
                Ok(created) => {
                    if let Err(e) = runner.queue.try_push(
                        created.id,
                        job_id,
                        created.priority,
                        created.queued_at,
                    ) {
                        warn!(job = %job_id, "retry enqueue failed: {}", e);
                    } else {
                        debug!(
                            job = %job_id,
                            retry = created.retry_count,
                            "retry enqueued"
                        );
                    }
                }
                Err(e) => warn!(job = %job_id, "retry creation failed: {}", e),
            }
        });
    }

    /// Updates the job's status, retrying around version conflicts
    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> CoreResult<()> {
        for _ in 0..STORAGE_RETRY_ATTEMPTS {
            let mut job = self.store.get_job(job_id).await?;
            if job.status == status {
                return Ok(());
            }
            job.status = status;
            let version = job.version;
            match self.store.update_job(job, version).await {
                Ok(_) => return Ok(()),
                Err(CoreError::Conflict { .. }) => continue,
                Err(e) if e.is_transient() => {
                    tokio::time::sleep(Duration::from_millis(STORAGE_RETRY_BASE_MS)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(CoreError::StorageUnavailable(format!(
            "could not update status of job {}",
            job_id
        )))
    }

    /// Persists an execution with exponential backoff on transient failures
    async fn update_execution_backoff(&self, execution: JobExecution) -> CoreResult<JobExecution> {
        let mut delay = Duration::from_millis(STORAGE_RETRY_BASE_MS);
        let mut last_error = None;
        for attempt in 0..STORAGE_RETRY_ATTEMPTS {
            match self
                .store
                .update_execution(execution.clone(), execution.version)
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_transient() && attempt + 1 < STORAGE_RETRY_ATTEMPTS => {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| CoreError::internal("retry budget logic error")))
    }

    /// Folds the terminal execution into the mapping's rolling statistics
    async fn record_mapping_stats(&self, job: &Job, execution: &JobExecution) {
        for _ in 0..STORAGE_RETRY_ATTEMPTS {
            let Ok(mut mapping) = self.store.get_mapping(job.mapping_id).await else {
                return;
            };
            mapping.execution_stats.record(
                execution.status == ExecutionStatus::Completed,
                execution.source_records,
                execution.target_records,
                execution.error_records,
                execution.duration_ms.unwrap_or(0),
                execution.error.as_ref().map(|e| e.message.clone()),
                execution.completed_at.unwrap_or_else(Utc::now),
            );
            let version = mapping.version;
            match self.store.update_mapping(mapping, version).await {
                Ok(_) => return,
                Err(CoreError::Conflict { .. }) => continue,
                Err(e) => {
                    warn!("mapping stats update failed: {}", e);
                    return;
                }
            }
        }
    }

    async fn audit_event(
        &self,
        event_type: AuditEventType,
        execution: &JobExecution,
        result: AuditResult,
    ) {
        let audit = self.audit.lock().unwrap().clone();
        if let Some(audit) = audit {
            let event = AuditEvent::new(event_type, "job_execution", result)
                .with_resource("execution", execution.execution_id.clone())
                .with_metadata("job_id", serde_json::json!(execution.job_id.to_string()))
                .with_metadata("retry_count", serde_json::json!(execution.retry_count));
            if let Err(e) = audit.submit(event).await {
                warn!("execution audit failed: {}", e);
            }
        }
    }

    fn count(&self, metric: &str, value: f64) {
        if let Some(telemetry) = self.telemetry.lock().unwrap().clone() {
            telemetry.counter(metric, value);
        }
    }

    fn timing(&self, metric: &str, value: f64) {
        if let Some(telemetry) = self.telemetry.lock().unwrap().clone() {
            telemetry.timing_ms(metric, value);
        }
    }

    /// Recovers queue state after a restart: re-enqueues stored executions
    /// that never reached a terminal status
    pub async fn recover(&self) -> CoreResult<usize> {
        let active = self.store.list_active_executions().await?;
        let mut recovered = 0;
        for mut execution in active {
            match execution.status {
                ExecutionStatus::Queued => {
                    self.queue.try_push(
                        execution.id,
                        execution.job_id,
                        execution.priority,
                        execution.queued_at,
                    )?;
                    recovered += 1;
                }
                ExecutionStatus::Running => {
                    // The process died mid-run; the sink never committed.
                    execution.checkpoint(
                        CheckpointType::Failure,
                        "interrupted by restart",
                        None,
                        Utc::now(),
                    );
                    execution.fail("interrupted by restart", None, Utc::now());
                    let version = execution.version;
                    let _ = self.store.update_execution(execution, version).await;
                }
                _ => {}
            }
        }
        if recovered > 0 {
            info!(recovered, "requeued executions from storage");
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::schema::{Column, SchemaFormat};
    use crate::domain::entities::{Cardinality, MappingRule, Schedule, Schema, System, SystemType};
    use crate::domain::value_objects::{Priority, UniversalType, Value};
    use crate::infrastructure::connectors::memory::FaultMode;
    use crate::infrastructure::connectors::{MemoryConnector, MemoryConnectorProvider};
    use crate::infrastructure::storage::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        connector: Arc<MemoryConnector>,
        runner: Arc<RunnerService>,
        job: Job,
        source_table: String,
        target_table: String,
    }

    async fn fixture(fault: FaultMode, max_concurrent: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let connector = Arc::new(MemoryConnector::new().with_fault_mode(fault));
        let provider = Arc::new(MemoryConnectorProvider::new(Arc::clone(&connector)));

        let system = store
            .create_system(System::new("db", SystemType::Postgresql, vec![]))
            .await
            .unwrap();
        let mut pk = Column::new("id", "bigint", UniversalType::Long);
        pk.nullable = false;
        pk.primary_key = true;
        let source_schema = store
            .create_schema(
                Schema::new(system.id, "orders", SchemaFormat::Relational)
                    .with_columns(vec![pk.clone()]),
            )
            .await
            .unwrap();
        let target_schema = store
            .create_schema(
                Schema::new(system.id, "orders_out", SchemaFormat::Relational)
                    .with_columns(vec![pk]),
            )
            .await
            .unwrap();
        let mapping = store
            .create_mapping(
                Mapping::new(
                    "m",
                    system.id,
                    system.id,
                    source_schema.id,
                    target_schema.id,
                    Cardinality::OneToOne,
                )
                .with_rules(vec![MappingRule::direct("id", "id")]),
            )
            .await
            .unwrap();

        let mut job = Job::new("copy-orders", mapping.id, Schedule::Manual);
        job.active = true;
        job.retry_delay_seconds = 0;
        let job = store.create_job(job).await.unwrap();

        let config = CoreConfig {
            max_concurrent_executions: max_concurrent,
            cancellation_grace_seconds: 1,
            ..Default::default()
        };
        let queue = Arc::new(ExecutionQueue::new(config.execution_queue_capacity));
        let runner = RunnerService::new(
            Arc::clone(&store) as Arc<dyn Store>,
            provider,
            MappingEngine::default(),
            queue,
            &config,
        );

        Fixture {
            store,
            connector,
            runner,
            job,
            source_table: "orders".to_string(),
            target_table: "orders_out".to_string(),
        }
    }

    fn row(n: i64) -> Value {
        let mut v = Value::empty_object();
        v.set_path("id", Value::Int(n));
        v
    }

    async fn enqueue(fixture: &Fixture, job: &Job) -> JobExecution {
        let execution = fixture
            .store
            .create_execution(JobExecution::queued(
                job.id,
                job.priority,
                Trigger::Manual,
                Utc::now(),
            ))
            .await
            .unwrap();
        fixture
            .runner
            .queue()
            .try_push(execution.id, job.id, execution.priority, execution.queued_at)
            .unwrap();
        execution
    }

    async fn wait_terminal(store: &Arc<MemoryStore>, id: Uuid) -> JobExecution {
        for _ in 0..200 {
            let execution = store.get_execution(id).await.unwrap();
            if execution.status.is_terminal() {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("execution never reached a terminal state");
    }

    #[tokio::test]
    async fn test_successful_run_commits_and_checkpoints() {
        let fixture = fixture(FaultMode::None, 2).await;
        fixture
            .connector
            .load_table(&fixture.source_table, (1..=5).map(row).collect());

        fixture.runner.start();
        let execution = enqueue(&fixture, &fixture.job).await;
        let done = wait_terminal(&fixture.store, execution.id).await;

        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.source_records, 5);
        assert_eq!(done.target_records, 5);
        assert_eq!(done.error_records, 0);
        assert!(done.completed_at.unwrap() >= done.started_at.unwrap());
        assert_eq!(
            done.duration_ms,
            Some((done.completed_at.unwrap() - done.started_at.unwrap()).num_milliseconds())
        );

        let types: Vec<CheckpointType> =
            done.checkpoints.iter().map(|c| c.checkpoint_type).collect();
        assert!(types.contains(&CheckpointType::MappingLoaded));
        assert!(types.contains(&CheckpointType::SourceOpened));
        assert!(types.contains(&CheckpointType::BatchProcessed));
        assert!(types.contains(&CheckpointType::SinkCommitted));

        assert_eq!(fixture.connector.table(&fixture.target_table).len(), 5);

        // The mapping's rolling stats caught the run.
        let mapping = fixture.store.get_mapping(fixture.job.mapping_id).await.unwrap();
        assert_eq!(mapping.execution_stats.total_executions, 1);
        assert!((mapping.execution_stats.success_rate - 1.0).abs() < f64::EPSILON);

        fixture.runner.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_chain_on_connector_failure() {
        let fixture = fixture(FaultMode::FailReads, 2).await;
        let mut job = fixture.store.get_job(fixture.job.id).await.unwrap();
        job.max_retries = 2;
        let job = fixture.store.update_job(job.clone(), job.version).await.unwrap();

        fixture.runner.start();
        let first = enqueue(&fixture, &job).await;

        // Three terminal executions: the original and two retries.
        let mut terminal = Vec::new();
        for _ in 0..400 {
            let all = fixture.store.list_executions(Some(job.id), 10).await.unwrap();
            terminal = all
                .into_iter()
                .filter(|e| e.status.is_terminal())
                .collect::<Vec<_>>();
            if terminal.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(terminal.len(), 3, "expected a three-execution retry chain");

        terminal.sort_by_key(|e| e.retry_count);
        assert_eq!(terminal[0].retry_count, 0);
        assert_eq!(terminal[0].id, first.id);
        assert_eq!(terminal[1].retry_count, 1);
        assert_eq!(terminal[1].parent_execution_id, Some(terminal[0].id));
        assert_eq!(terminal[1].trigger, Trigger::Retry);
        assert_eq!(terminal[2].retry_count, 2);
        assert_eq!(terminal[2].parent_execution_id, Some(terminal[1].id));
        assert!(terminal.iter().all(|e| e.status == ExecutionStatus::Failed));

        let job = fixture.store.get_job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        fixture.runner.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_marks_execution_timeout_and_job_failed() {
        let fixture = fixture(FaultMode::None, 2).await;
        fixture
            .connector
            .load_table(&fixture.source_table, (1..=3).map(row).collect());
        let mut job = fixture.store.get_job(fixture.job.id).await.unwrap();
        job.timeout_seconds = Some(0);
        job.max_retries = 0;
        let job = fixture.store.update_job(job.clone(), job.version).await.unwrap();

        fixture.runner.start();
        let execution = enqueue(&fixture, &job).await;
        let done = wait_terminal(&fixture.store, execution.id).await;

        assert_eq!(done.status, ExecutionStatus::Timeout);
        assert_eq!(
            fixture.store.get_job(job.id).await.unwrap().status,
            JobStatus::Failed
        );
        // The sink never committed.
        assert!(fixture.connector.table(&fixture.target_table).is_empty());

        fixture.runner.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_queued_execution() {
        let fixture = fixture(FaultMode::None, 1).await;
        // Runner not started: the entry stays queued.
        let execution = enqueue(&fixture, &fixture.job).await;
        fixture.runner.cancel_execution(execution.id).await.unwrap();

        let stored = fixture.store.get_execution(execution.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_concurrency_cap_and_same_job_serialisation() {
        let fixture = fixture(FaultMode::None, 2).await;
        // A decent chunk of rows per execution so runs overlap.
        fixture
            .connector
            .load_table(&fixture.source_table, (1..=50).map(row).collect());

        // Two more jobs over the same mapping.
        let mut other_jobs = vec![fixture.job.clone()];
        for (name, priority) in [("job-b", 5u8), ("job-c", 9)] {
            let mut job = Job::new(name, fixture.job.mapping_id, Schedule::Manual);
            job.active = true;
            job.priority = Priority::new(priority);
            other_jobs.push(fixture.store.create_job(job).await.unwrap());
        }

        // Two executions for the first job (must serialise) plus one for
        // each other job.
        let mut executions = Vec::new();
        executions.push(enqueue(&fixture, &other_jobs[0]).await);
        executions.push(enqueue(&fixture, &other_jobs[0]).await);
        executions.push(enqueue(&fixture, &other_jobs[1]).await);
        executions.push(enqueue(&fixture, &other_jobs[2]).await);

        fixture.runner.start();

        // While anything is in flight, the cap and serialisation hold.
        for _ in 0..100 {
            assert!(fixture.runner.running_count() <= 2);
            let active = fixture.store.list_active_executions().await.unwrap();
            let running_first_job = active
                .iter()
                .filter(|e| {
                    e.job_id == other_jobs[0].id && e.status == ExecutionStatus::Running
                })
                .count();
            assert!(running_first_job <= 1);
            if active.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for execution in executions {
            let done = wait_terminal(&fixture.store, execution.id).await;
            assert_eq!(done.status, ExecutionStatus::Completed);
        }
        fixture.runner.shutdown().await;
    }

    #[tokio::test]
    async fn test_recover_requeues_queued_and_fails_orphaned_running() {
        let fixture = fixture(FaultMode::None, 1).await;
        let queued = enqueue(&fixture, &fixture.job).await;

        // Fake an execution that was mid-run when the process died.
        let mut other = Job::new("other", fixture.job.mapping_id, Schedule::Manual);
        other.active = true;
        let other = fixture.store.create_job(other).await.unwrap();
        let mut orphan = JobExecution::queued(other.id, other.priority, Trigger::Manual, Utc::now());
        orphan = fixture.store.create_execution(orphan).await.unwrap();
        orphan.mark_running(Utc::now());
        let orphan = fixture
            .store
            .update_execution(orphan.clone(), orphan.version)
            .await
            .unwrap();

        // Fresh queue: pretend a restart dropped the in-memory state.
        let config = CoreConfig::default();
        let queue = Arc::new(ExecutionQueue::new(config.execution_queue_capacity));
        let runner = RunnerService::new(
            Arc::clone(&fixture.store) as Arc<dyn Store>,
            Arc::new(MemoryConnectorProvider::new(fixture.connector.clone())),
            MappingEngine::default(),
            queue,
            &config,
        );
        let recovered = runner.recover().await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(runner.queue().len(), 1);

        let orphan = fixture.store.get_execution(orphan.id).await.unwrap();
        assert_eq!(orphan.status, ExecutionStatus::Failed);
        let _ = queued;
    }
}
