//! In-memory persistence gateway
//!
//! HashMap-backed implementation of every repository trait. Fast, not
//! durable: it backs unit tests, previews and embedded single-run use.
//! The SQLite gateway is the durable twin with identical semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::entities::{
    AuditEvent, Job, JobExecution, Mapping, Schema, System,
};
use crate::domain::error::{CoreError, CoreResult};
use crate::domain::repositories::{
    AuditQuery, AuditRepository, ExecutionRepository, JobRepository, MappingRepository,
    SchemaRepository, SystemRepository,
};

#[derive(Default)]
struct MemoryState {
    systems: HashMap<Uuid, System>,
    schemas: HashMap<Uuid, Schema>,
    mappings: HashMap<Uuid, Mapping>,
    jobs: HashMap<Uuid, Job>,
    executions: HashMap<Uuid, JobExecution>,
    audit: Vec<AuditEvent>,
}

/// In-memory implementation of the persistence gateway
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn conflict(entity: &'static str, id: impl ToString, expected: u64, found: u64) -> CoreError {
    CoreError::Conflict {
        entity,
        id: id.to_string(),
        expected,
        found,
    }
}

#[async_trait]
impl SystemRepository for MemoryStore {
    async fn create_system(&self, system: System) -> CoreResult<System> {
        let mut state = self.state.lock().unwrap();
        if state.systems.values().any(|s| s.name == system.name) {
            return Err(CoreError::validation(format!(
                "system name '{}' already exists",
                system.name
            )));
        }
        state.systems.insert(system.id, system.clone());
        Ok(system)
    }

    async fn get_system(&self, id: Uuid) -> CoreResult<System> {
        let state = self.state.lock().unwrap();
        state
            .systems
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("system", id))
    }

    async fn get_system_by_name(&self, name: &str) -> CoreResult<Option<System>> {
        let state = self.state.lock().unwrap();
        Ok(state.systems.values().find(|s| s.name == name).cloned())
    }

    async fn list_systems(&self) -> CoreResult<Vec<System>> {
        let state = self.state.lock().unwrap();
        let mut systems: Vec<System> = state.systems.values().cloned().collect();
        systems.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(systems)
    }

    async fn update_system(&self, mut system: System, expected_version: u64) -> CoreResult<System> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .systems
            .get(&system.id)
            .ok_or_else(|| CoreError::not_found("system", system.id))?;
        if stored.version != expected_version {
            return Err(conflict("system", system.id, expected_version, stored.version));
        }
        if stored.name != system.name && state.systems.values().any(|s| s.name == system.name) {
            return Err(CoreError::validation(format!(
                "system name '{}' already exists",
                system.name
            )));
        }
        system.version = expected_version + 1;
        system.updated_at = Utc::now();
        state.systems.insert(system.id, system.clone());
        Ok(system)
    }

    async fn delete_system(&self, id: Uuid) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.schemas.values().any(|s| s.system_id == id) {
            return Err(CoreError::validation(
                "system still has schemas; delete them first",
            ));
        }
        state
            .systems
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("system", id))
    }
}

#[async_trait]
impl SchemaRepository for MemoryStore {
    async fn create_schema(&self, schema: Schema) -> CoreResult<Schema> {
        schema.validate()?;
        let mut state = self.state.lock().unwrap();
        if !state.systems.contains_key(&schema.system_id) {
            return Err(CoreError::not_found("system", schema.system_id));
        }
        let duplicate = state.schemas.values().any(|s| {
            s.system_id == schema.system_id && s.name == schema.name && s.version == schema.version
        });
        if duplicate {
            return Err(CoreError::validation(format!(
                "schema '{}' version {} already exists for this system",
                schema.name, schema.version
            )));
        }
        state.schemas.insert(schema.id, schema.clone());
        Ok(schema)
    }

    async fn get_schema(&self, id: Uuid) -> CoreResult<Schema> {
        let state = self.state.lock().unwrap();
        state
            .schemas
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("schema", id))
    }

    async fn list_schemas(&self, system_id: Option<Uuid>) -> CoreResult<Vec<Schema>> {
        let state = self.state.lock().unwrap();
        let mut schemas: Vec<Schema> = state
            .schemas
            .values()
            .filter(|s| system_id.is_none_or(|id| s.system_id == id))
            .cloned()
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name).then(a.version.cmp(&b.version)));
        Ok(schemas)
    }

    async fn latest_schema(&self, system_id: Uuid, name: &str) -> CoreResult<Option<Schema>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .schemas
            .values()
            .filter(|s| s.system_id == system_id && s.name == name)
            .max_by_key(|s| s.version)
            .cloned())
    }

    async fn update_schema(&self, mut schema: Schema, expected_version: i64) -> CoreResult<Schema> {
        schema.validate()?;
        let mut state = self.state.lock().unwrap();
        let stored = state
            .schemas
            .get(&schema.id)
            .ok_or_else(|| CoreError::not_found("schema", schema.id))?;
        if stored.version != expected_version {
            return Err(conflict(
                "schema",
                schema.id,
                expected_version as u64,
                stored.version as u64,
            ));
        }
        schema.version = expected_version + 1;
        schema.updated_at = Utc::now();
        state.schemas.insert(schema.id, schema.clone());
        Ok(schema)
    }

    async fn delete_schema(&self, id: Uuid) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let referenced = state
            .mappings
            .values()
            .any(|m| m.source_schema_id == id || m.target_schema_id == id);
        if referenced {
            return Err(CoreError::validation(
                "schema is referenced by a mapping; delete the mapping first",
            ));
        }
        state
            .schemas
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("schema", id))
    }
}

#[async_trait]
impl MappingRepository for MemoryStore {
    async fn create_mapping(&self, mapping: Mapping) -> CoreResult<Mapping> {
        mapping.validate_structure()?;
        let mut state = self.state.lock().unwrap();
        for (entity, id) in [
            ("system", mapping.source_system_id),
            ("system", mapping.target_system_id),
        ] {
            if !state.systems.contains_key(&id) {
                return Err(CoreError::not_found(entity, id));
            }
        }
        for id in [mapping.source_schema_id, mapping.target_schema_id] {
            if !state.schemas.contains_key(&id) {
                return Err(CoreError::not_found("schema", id));
            }
        }
        state.mappings.insert(mapping.id, mapping.clone());
        Ok(mapping)
    }

    async fn get_mapping(&self, id: Uuid) -> CoreResult<Mapping> {
        let state = self.state.lock().unwrap();
        state
            .mappings
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("mapping", id))
    }

    async fn list_mappings(&self, active_only: bool) -> CoreResult<Vec<Mapping>> {
        let state = self.state.lock().unwrap();
        let mut mappings: Vec<Mapping> = state
            .mappings
            .values()
            .filter(|m| !active_only || m.active)
            .cloned()
            .collect();
        mappings.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(mappings)
    }

    async fn update_mapping(&self, mut mapping: Mapping, expected_version: u64) -> CoreResult<Mapping> {
        mapping.validate_structure()?;
        let mut state = self.state.lock().unwrap();
        let stored = state
            .mappings
            .get(&mapping.id)
            .ok_or_else(|| CoreError::not_found("mapping", mapping.id))?;
        if stored.version != expected_version {
            return Err(conflict("mapping", mapping.id, expected_version, stored.version));
        }
        mapping.version = expected_version + 1;
        mapping.updated_at = Utc::now();
        state.mappings.insert(mapping.id, mapping.clone());
        Ok(mapping)
    }

    async fn delete_mapping(&self, id: Uuid) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.jobs.values().any(|j| j.mapping_id == id) {
            return Err(CoreError::validation(
                "mapping is referenced by a job; delete the job first",
            ));
        }
        state
            .mappings
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("mapping", id))
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn create_job(&self, mut job: Job) -> CoreResult<Job> {
        job.schedule.validate()?;
        job.recompute_next_execution(Utc::now())?;
        let mut state = self.state.lock().unwrap();
        if !state.mappings.contains_key(&job.mapping_id) {
            return Err(CoreError::not_found("mapping", job.mapping_id));
        }
        for dep in &job.dependencies {
            if !state.jobs.contains_key(dep) {
                return Err(CoreError::not_found("job", *dep));
            }
        }
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> CoreResult<Job> {
        let state = self.state.lock().unwrap();
        state
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("job", id))
    }

    async fn list_jobs(&self) -> CoreResult<Vec<Job>> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(jobs)
    }

    async fn update_job(&self, mut job: Job, expected_version: u64) -> CoreResult<Job> {
        job.schedule.validate()?;
        let mut state = self.state.lock().unwrap();
        let stored = state
            .jobs
            .get(&job.id)
            .ok_or_else(|| CoreError::not_found("job", job.id))?;
        if stored.version != expected_version {
            return Err(conflict("job", job.id, expected_version, stored.version));
        }
        // Derived-field hook: a schedule or activation change invalidates
        // the stored firing time.
        if stored.schedule != job.schedule || stored.active != job.active {
            job.recompute_next_execution(Utc::now())?;
        }
        job.version = expected_version + 1;
        job.updated_at = Utc::now();
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn delete_job(&self, id: Uuid) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let dependents: Vec<&Job> = state
            .jobs
            .values()
            .filter(|j| j.dependencies.contains(&id))
            .collect();
        if !dependents.is_empty() {
            return Err(CoreError::validation(
                "job is a dependency of other jobs; remove those dependencies first",
            ));
        }
        state
            .jobs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("job", id))
    }

    async fn list_executable_jobs(&self, now: DateTime<Utc>) -> CoreResult<Vec<Job>> {
        let state = self.state.lock().unwrap();
        let mut due: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.next_execution_at.cmp(&b.next_execution_at))
        });
        Ok(due)
    }
}

#[async_trait]
impl ExecutionRepository for MemoryStore {
    async fn create_execution(&self, execution: JobExecution) -> CoreResult<JobExecution> {
        let mut state = self.state.lock().unwrap();
        if !state.jobs.contains_key(&execution.job_id) {
            return Err(CoreError::not_found("job", execution.job_id));
        }
        if state
            .executions
            .values()
            .any(|e| e.execution_id == execution.execution_id)
        {
            return Err(CoreError::validation(format!(
                "execution_id '{}' already exists",
                execution.execution_id
            )));
        }
        state.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, id: Uuid) -> CoreResult<JobExecution> {
        let state = self.state.lock().unwrap();
        state
            .executions
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("execution", id))
    }

    async fn get_execution_by_execution_id(
        &self,
        execution_id: &str,
    ) -> CoreResult<Option<JobExecution>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .executions
            .values()
            .find(|e| e.execution_id == execution_id)
            .cloned())
    }

    async fn update_execution(
        &self,
        mut execution: JobExecution,
        expected_version: u64,
    ) -> CoreResult<JobExecution> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .executions
            .get(&execution.id)
            .ok_or_else(|| CoreError::not_found("execution", execution.id))?;
        if stored.status.is_terminal() {
            return Err(CoreError::validation(
                "execution is terminal and cannot be modified",
            ));
        }
        if stored.version != expected_version {
            return Err(conflict(
                "execution",
                execution.id,
                expected_version,
                stored.version,
            ));
        }
        execution.version = expected_version + 1;
        state.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn list_executions(
        &self,
        job_id: Option<Uuid>,
        limit: usize,
    ) -> CoreResult<Vec<JobExecution>> {
        let state = self.state.lock().unwrap();
        let mut executions: Vec<JobExecution> = state
            .executions
            .values()
            .filter(|e| job_id.is_none_or(|id| e.job_id == id))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.queued_at.cmp(&a.queued_at));
        executions.truncate(limit);
        Ok(executions)
    }

    async fn latest_execution(&self, job_id: Uuid) -> CoreResult<Option<JobExecution>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .executions
            .values()
            .filter(|e| e.job_id == job_id)
            .max_by_key(|e| e.queued_at)
            .cloned())
    }

    async fn list_active_executions(&self) -> CoreResult<Vec<JobExecution>> {
        let state = self.state.lock().unwrap();
        let mut active: Vec<JobExecution> = state
            .executions
            .values()
            .filter(|e| !e.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.queued_at.cmp(&b.queued_at));
        Ok(active)
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append_audit_events(&self, events: Vec<AuditEvent>) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.audit.extend(events);
        Ok(())
    }

    async fn query_audit_events(&self, query: AuditQuery) -> CoreResult<Vec<AuditEvent>> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<AuditEvent> = state
            .audit
            .iter()
            .filter(|e| {
                query.event_type.is_none_or(|t| e.event_type == t)
                    && query.user_id.is_none_or(|u| e.actor.user_id == Some(u))
                    && query
                        .resource_kind
                        .as_ref()
                        .is_none_or(|k| e.resource.as_ref().is_some_and(|r| &r.kind == k))
                    && query.min_severity.is_none_or(|s| e.severity >= s)
                    && query.start.is_none_or(|t| e.ts >= t)
                    && query.end.is_none_or(|t| e.ts <= t)
            })
            .cloned()
            .collect();
        events.sort_by(|a, b| b.ts.cmp(&a.ts).then(b.seq.cmp(&a.seq)));
        let events: Vec<AuditEvent> = events
            .into_iter()
            .skip(query.offset)
            .take(if query.limit == 0 { usize::MAX } else { query.limit })
            .collect();
        Ok(events)
    }
}
