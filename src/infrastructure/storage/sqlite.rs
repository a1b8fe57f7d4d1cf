//! SQLite persistence gateway
//!
//! Durable implementation of the repository traits. Entities are stored as
//! JSON documents beside the scalar columns the hot queries filter and sort
//! on, so the schema stays stable while the entity structs evolve.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::entities::{
    AuditEvent, Job, JobExecution, Mapping, Schema, Severity, System,
};
use crate::domain::error::{CoreError, CoreResult};
use crate::domain::repositories::{
    AuditQuery, AuditRepository, ExecutionRepository, JobRepository, MappingRepository,
    SchemaRepository, SystemRepository,
};

/// SQLite-backed implementation of the persistence gateway
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database and bootstraps the schema
    pub fn open<P: AsRef<Path>>(db_path: P) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open SQLite database")?;

        // WAL keeps readers unblocked while the runner's writer task commits.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = 10000;
            "#,
        )
        .context("Failed to configure SQLite")?;

        Self::bootstrap(&conn).context("Failed to create schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory database; used by tests and previews
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open SQLite database")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to configure SQLite")?;
        Self::bootstrap(&conn).context("Failed to create schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn bootstrap(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS systems (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL UNIQUE,
                version     INTEGER NOT NULL,
                doc         TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schemas (
                id          TEXT PRIMARY KEY,
                system_id   TEXT NOT NULL REFERENCES systems(id),
                name        TEXT NOT NULL,
                version     INTEGER NOT NULL,
                doc         TEXT NOT NULL,
                UNIQUE(system_id, name, version)
            );

            CREATE TABLE IF NOT EXISTS mappings (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                active      INTEGER NOT NULL,
                version     INTEGER NOT NULL,
                doc         TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id                 TEXT PRIMARY KEY,
                name               TEXT NOT NULL,
                status             TEXT NOT NULL,
                active             INTEGER NOT NULL,
                priority           INTEGER NOT NULL,
                next_execution_ms  INTEGER,
                version            INTEGER NOT NULL,
                doc                TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_due
                ON jobs(active, status, next_execution_ms);

            CREATE TABLE IF NOT EXISTS executions (
                id            TEXT PRIMARY KEY,
                execution_id  TEXT NOT NULL UNIQUE,
                job_id        TEXT NOT NULL REFERENCES jobs(id),
                status        TEXT NOT NULL,
                queued_ms     INTEGER NOT NULL,
                version       INTEGER NOT NULL,
                doc           TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_job
                ON executions(job_id, queued_ms);

            CREATE TABLE IF NOT EXISTS audit_events (
                id             TEXT PRIMARY KEY,
                ts_ms          INTEGER NOT NULL,
                seq            INTEGER NOT NULL,
                event_type     TEXT NOT NULL,
                user_id        TEXT,
                resource_kind  TEXT,
                severity_rank  INTEGER NOT NULL,
                doc            TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_ts ON audit_events(ts_ms, seq);
            "#,
        )
    }
}

fn storage_err(e: rusqlite::Error) -> CoreError {
    CoreError::StorageUnavailable(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> CoreResult<String> {
    serde_json::to_string(value).map_err(|e| CoreError::internal(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(doc: String) -> CoreResult<T> {
    serde_json::from_str(&doc).map_err(|e| CoreError::internal(e.to_string()))
}

fn severity_rank(severity: Severity) -> i64 {
    match severity {
        Severity::Low => 0,
        Severity::Medium => 1,
        Severity::High => 2,
        Severity::Critical => 3,
    }
}

fn status_tag(job: &Job) -> String {
    serde_json::to_value(job.status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[async_trait]
impl SystemRepository for SqliteStore {
    async fn create_system(&self, system: System) -> CoreResult<System> {
        let conn = self.conn.lock().unwrap();
        let doc = encode(&system)?;
        conn.execute(
            "INSERT INTO systems (id, name, version, doc) VALUES (?1, ?2, ?3, ?4)",
            params![system.id.to_string(), system.name, system.version as i64, doc],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CoreError::validation(format!("system name '{}' already exists", system.name))
            }
            other => storage_err(other),
        })?;
        Ok(system)
    }

    async fn get_system(&self, id: Uuid) -> CoreResult<System> {
        let conn = self.conn.lock().unwrap();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM systems WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        doc.map(decode)
            .transpose()?
            .ok_or_else(|| CoreError::not_found("system", id))
    }

    async fn get_system_by_name(&self, name: &str) -> CoreResult<Option<System>> {
        let conn = self.conn.lock().unwrap();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM systems WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        doc.map(decode).transpose()
    }

    async fn list_systems(&self) -> CoreResult<Vec<System>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT doc FROM systems ORDER BY name")
            .map_err(storage_err)?;
        let docs = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        docs.into_iter().map(decode).collect()
    }

    async fn update_system(&self, mut system: System, expected_version: u64) -> CoreResult<System> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT version FROM systems WHERE id = ?1",
                params![system.id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        let found = found.ok_or_else(|| CoreError::not_found("system", system.id))? as u64;
        if found != expected_version {
            return Err(CoreError::Conflict {
                entity: "system",
                id: system.id.to_string(),
                expected: expected_version,
                found,
            });
        }
        system.version = expected_version + 1;
        system.updated_at = Utc::now();
        let doc = encode(&system)?;
        conn.execute(
            "UPDATE systems SET name = ?2, version = ?3, doc = ?4 WHERE id = ?1",
            params![system.id.to_string(), system.name, system.version as i64, doc],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CoreError::validation(format!("system name '{}' already exists", system.name))
            }
            other => storage_err(other),
        })?;
        Ok(system)
    }

    async fn delete_system(&self, id: Uuid) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let referenced: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM schemas WHERE system_id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        if referenced > 0 {
            return Err(CoreError::validation(
                "system still has schemas; delete them first",
            ));
        }
        let deleted = conn
            .execute("DELETE FROM systems WHERE id = ?1", params![id.to_string()])
            .map_err(storage_err)?;
        if deleted == 0 {
            return Err(CoreError::not_found("system", id));
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaRepository for SqliteStore {
    async fn create_schema(&self, schema: Schema) -> CoreResult<Schema> {
        schema.validate()?;
        let conn = self.conn.lock().unwrap();
        let doc = encode(&schema)?;
        conn.execute(
            "INSERT INTO schemas (id, system_id, name, version, doc) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                schema.id.to_string(),
                schema.system_id.to_string(),
                schema.name,
                schema.version,
                doc
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CoreError::validation(format!(
                    "schema '{}' version {} violates a constraint (duplicate version or unknown system)",
                    schema.name, schema.version
                ))
            }
            other => storage_err(other),
        })?;
        Ok(schema)
    }

    async fn get_schema(&self, id: Uuid) -> CoreResult<Schema> {
        let conn = self.conn.lock().unwrap();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM schemas WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        doc.map(decode)
            .transpose()?
            .ok_or_else(|| CoreError::not_found("schema", id))
    }

    async fn list_schemas(&self, system_id: Option<Uuid>) -> CoreResult<Vec<Schema>> {
        let conn = self.conn.lock().unwrap();
        let docs = match system_id {
            Some(id) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT doc FROM schemas WHERE system_id = ?1 ORDER BY name, version",
                    )
                    .map_err(storage_err)?;
                let rows = stmt
                    .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
                    .map_err(storage_err)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(storage_err)?;
                rows
            }
            None => {
                let mut stmt = conn
                    .prepare("SELECT doc FROM schemas ORDER BY name, version")
                    .map_err(storage_err)?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(storage_err)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(storage_err)?;
                rows
            }
        };
        docs.into_iter().map(decode).collect()
    }

    async fn latest_schema(&self, system_id: Uuid, name: &str) -> CoreResult<Option<Schema>> {
        let conn = self.conn.lock().unwrap();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM schemas WHERE system_id = ?1 AND name = ?2 \
                 ORDER BY version DESC LIMIT 1",
                params![system_id.to_string(), name],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        doc.map(decode).transpose()
    }

    async fn update_schema(&self, mut schema: Schema, expected_version: i64) -> CoreResult<Schema> {
        schema.validate()?;
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT version FROM schemas WHERE id = ?1",
                params![schema.id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        let found = found.ok_or_else(|| CoreError::not_found("schema", schema.id))?;
        if found != expected_version {
            return Err(CoreError::Conflict {
                entity: "schema",
                id: schema.id.to_string(),
                expected: expected_version as u64,
                found: found as u64,
            });
        }
        schema.version = expected_version + 1;
        schema.updated_at = Utc::now();
        let doc = encode(&schema)?;
        conn.execute(
            "UPDATE schemas SET name = ?2, version = ?3, doc = ?4 WHERE id = ?1",
            params![schema.id.to_string(), schema.name, schema.version, doc],
        )
        .map_err(storage_err)?;
        Ok(schema)
    }

    async fn delete_schema(&self, id: Uuid) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute("DELETE FROM schemas WHERE id = ?1", params![id.to_string()])
            .map_err(storage_err)?;
        if deleted == 0 {
            return Err(CoreError::not_found("schema", id));
        }
        Ok(())
    }
}

#[async_trait]
impl MappingRepository for SqliteStore {
    async fn create_mapping(&self, mapping: Mapping) -> CoreResult<Mapping> {
        mapping.validate_structure()?;
        let conn = self.conn.lock().unwrap();
        let doc = encode(&mapping)?;
        conn.execute(
            "INSERT INTO mappings (id, name, active, version, doc) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                mapping.id.to_string(),
                mapping.name,
                mapping.active as i64,
                mapping.version as i64,
                doc
            ],
        )
        .map_err(storage_err)?;
        Ok(mapping)
    }

    async fn get_mapping(&self, id: Uuid) -> CoreResult<Mapping> {
        let conn = self.conn.lock().unwrap();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM mappings WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        doc.map(decode)
            .transpose()?
            .ok_or_else(|| CoreError::not_found("mapping", id))
    }

    async fn list_mappings(&self, active_only: bool) -> CoreResult<Vec<Mapping>> {
        let conn = self.conn.lock().unwrap();
        let sql = if active_only {
            "SELECT doc FROM mappings WHERE active = 1 ORDER BY name"
        } else {
            "SELECT doc FROM mappings ORDER BY name"
        };
        let mut stmt = conn.prepare(sql).map_err(storage_err)?;
        let docs = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        docs.into_iter().map(decode).collect()
    }

    async fn update_mapping(&self, mut mapping: Mapping, expected_version: u64) -> CoreResult<Mapping> {
        mapping.validate_structure()?;
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT version FROM mappings WHERE id = ?1",
                params![mapping.id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        let found = found.ok_or_else(|| CoreError::not_found("mapping", mapping.id))? as u64;
        if found != expected_version {
            return Err(CoreError::Conflict {
                entity: "mapping",
                id: mapping.id.to_string(),
                expected: expected_version,
                found,
            });
        }
        mapping.version = expected_version + 1;
        mapping.updated_at = Utc::now();
        let doc = encode(&mapping)?;
        conn.execute(
            "UPDATE mappings SET name = ?2, active = ?3, version = ?4, doc = ?5 WHERE id = ?1",
            params![
                mapping.id.to_string(),
                mapping.name,
                mapping.active as i64,
                mapping.version as i64,
                doc
            ],
        )
        .map_err(storage_err)?;
        Ok(mapping)
    }

    async fn delete_mapping(&self, id: Uuid) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute("DELETE FROM mappings WHERE id = ?1", params![id.to_string()])
            .map_err(storage_err)?;
        if deleted == 0 {
            return Err(CoreError::not_found("mapping", id));
        }
        Ok(())
    }
}

#[async_trait]
impl JobRepository for SqliteStore {
    async fn create_job(&self, mut job: Job) -> CoreResult<Job> {
        job.schedule.validate()?;
        job.recompute_next_execution(Utc::now())?;
        let conn = self.conn.lock().unwrap();
        let doc = encode(&job)?;
        conn.execute(
            "INSERT INTO jobs (id, name, status, active, priority, next_execution_ms, version, doc) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job.id.to_string(),
                job.name,
                status_tag(&job),
                job.active as i64,
                job.priority.value() as i64,
                job.next_execution_at.map(|t| t.timestamp_millis()),
                job.version as i64,
                doc
            ],
        )
        .map_err(storage_err)?;
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> CoreResult<Job> {
        let conn = self.conn.lock().unwrap();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM jobs WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        doc.map(decode)
            .transpose()?
            .ok_or_else(|| CoreError::not_found("job", id))
    }

    async fn list_jobs(&self) -> CoreResult<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT doc FROM jobs ORDER BY name")
            .map_err(storage_err)?;
        let docs = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        docs.into_iter().map(decode).collect()
    }

    async fn update_job(&self, mut job: Job, expected_version: u64) -> CoreResult<Job> {
        job.schedule.validate()?;
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, doc FROM jobs WHERE id = ?1",
                params![job.id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_err)?;
        let (found, stored_doc) = row.ok_or_else(|| CoreError::not_found("job", job.id))?;
        if found as u64 != expected_version {
            return Err(CoreError::Conflict {
                entity: "job",
                id: job.id.to_string(),
                expected: expected_version,
                found: found as u64,
            });
        }
        let stored: Job = decode(stored_doc)?;
        if stored.schedule != job.schedule || stored.active != job.active {
            job.recompute_next_execution(Utc::now())?;
        }
        job.version = expected_version + 1;
        job.updated_at = Utc::now();
        let doc = encode(&job)?;
        conn.execute(
            "UPDATE jobs SET name = ?2, status = ?3, active = ?4, priority = ?5, \
             next_execution_ms = ?6, version = ?7, doc = ?8 WHERE id = ?1",
            params![
                job.id.to_string(),
                job.name,
                status_tag(&job),
                job.active as i64,
                job.priority.value() as i64,
                job.next_execution_at.map(|t| t.timestamp_millis()),
                job.version as i64,
                doc
            ],
        )
        .map_err(storage_err)?;
        Ok(job)
    }

    async fn delete_job(&self, id: Uuid) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])
            .map_err(storage_err)?;
        if deleted == 0 {
            return Err(CoreError::not_found("job", id));
        }
        Ok(())
    }

    async fn list_executable_jobs(&self, now: DateTime<Utc>) -> CoreResult<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT doc FROM jobs \
                 WHERE active = 1 AND status = 'scheduled' \
                   AND next_execution_ms IS NOT NULL AND next_execution_ms <= ?1 \
                 ORDER BY priority DESC, next_execution_ms ASC",
            )
            .map_err(storage_err)?;
        let docs = stmt
            .query_map(params![now.timestamp_millis()], |row| row.get::<_, String>(0))
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        docs.into_iter().map(decode).collect()
    }
}

#[async_trait]
impl ExecutionRepository for SqliteStore {
    async fn create_execution(&self, execution: JobExecution) -> CoreResult<JobExecution> {
        let conn = self.conn.lock().unwrap();
        let doc = encode(&execution)?;
        let status = encode(&execution.status)?.trim_matches('"').to_string();
        conn.execute(
            "INSERT INTO executions (id, execution_id, job_id, status, queued_ms, version, doc) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                execution.id.to_string(),
                execution.execution_id,
                execution.job_id.to_string(),
                status,
                execution.queued_at.timestamp_millis(),
                execution.version as i64,
                doc
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CoreError::validation(format!(
                    "execution '{}' violates a constraint (duplicate execution_id or unknown job)",
                    execution.execution_id
                ))
            }
            other => storage_err(other),
        })?;
        Ok(execution)
    }

    async fn get_execution(&self, id: Uuid) -> CoreResult<JobExecution> {
        let conn = self.conn.lock().unwrap();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM executions WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        doc.map(decode)
            .transpose()?
            .ok_or_else(|| CoreError::not_found("execution", id))
    }

    async fn get_execution_by_execution_id(
        &self,
        execution_id: &str,
    ) -> CoreResult<Option<JobExecution>> {
        let conn = self.conn.lock().unwrap();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM executions WHERE execution_id = ?1",
                params![execution_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        doc.map(decode).transpose()
    }

    async fn update_execution(
        &self,
        mut execution: JobExecution,
        expected_version: u64,
    ) -> CoreResult<JobExecution> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, doc FROM executions WHERE id = ?1",
                params![execution.id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_err)?;
        let (found, stored_doc) =
            row.ok_or_else(|| CoreError::not_found("execution", execution.id))?;
        let stored: JobExecution = decode(stored_doc)?;
        if stored.status.is_terminal() {
            return Err(CoreError::validation(
                "execution is terminal and cannot be modified",
            ));
        }
        if found as u64 != expected_version {
            return Err(CoreError::Conflict {
                entity: "execution",
                id: execution.id.to_string(),
                expected: expected_version,
                found: found as u64,
            });
        }
        execution.version = expected_version + 1;
        let doc = encode(&execution)?;
        let status = encode(&execution.status)?.trim_matches('"').to_string();
        conn.execute(
            "UPDATE executions SET status = ?2, version = ?3, doc = ?4 WHERE id = ?1",
            params![
                execution.id.to_string(),
                status,
                execution.version as i64,
                doc
            ],
        )
        .map_err(storage_err)?;
        Ok(execution)
    }

    async fn list_executions(
        &self,
        job_id: Option<Uuid>,
        limit: usize,
    ) -> CoreResult<Vec<JobExecution>> {
        let conn = self.conn.lock().unwrap();
        let docs = match job_id {
            Some(id) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT doc FROM executions WHERE job_id = ?1 \
                         ORDER BY queued_ms DESC LIMIT ?2",
                    )
                    .map_err(storage_err)?;
                let rows = stmt
                    .query_map(params![id.to_string(), limit as i64], |row| {
                        row.get::<_, String>(0)
                    })
                    .map_err(storage_err)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(storage_err)?;
                rows
            }
            None => {
                let mut stmt = conn
                    .prepare("SELECT doc FROM executions ORDER BY queued_ms DESC LIMIT ?1")
                    .map_err(storage_err)?;
                let rows = stmt
                    .query_map(params![limit as i64], |row| row.get::<_, String>(0))
                    .map_err(storage_err)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(storage_err)?;
                rows
            }
        };
        docs.into_iter().map(decode).collect()
    }

    async fn latest_execution(&self, job_id: Uuid) -> CoreResult<Option<JobExecution>> {
        let conn = self.conn.lock().unwrap();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM executions WHERE job_id = ?1 ORDER BY queued_ms DESC LIMIT 1",
                params![job_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        doc.map(decode).transpose()
    }

    async fn list_active_executions(&self) -> CoreResult<Vec<JobExecution>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT doc FROM executions WHERE status IN ('queued', 'running') \
                 ORDER BY queued_ms ASC",
            )
            .map_err(storage_err)?;
        let docs = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        docs.into_iter().map(decode).collect()
    }
}

#[async_trait]
impl AuditRepository for SqliteStore {
    async fn append_audit_events(&self, events: Vec<AuditEvent>) -> CoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(storage_err)?;
        for event in &events {
            let doc = encode(event)?;
            let event_type = encode(&event.event_type)?.trim_matches('"').to_string();
            tx.execute(
                "INSERT INTO audit_events \
                 (id, ts_ms, seq, event_type, user_id, resource_kind, severity_rank, doc) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.id.to_string(),
                    event.ts.timestamp_millis(),
                    event.seq as i64,
                    event_type,
                    event.actor.user_id.map(|u| u.to_string()),
                    event.resource.as_ref().map(|r| r.kind.clone()),
                    severity_rank(event.severity),
                    doc
                ],
            )
            .map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;
        Ok(())
    }

    async fn query_audit_events(&self, query: AuditQuery) -> CoreResult<Vec<AuditEvent>> {
        let conn = self.conn.lock().unwrap();

        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(event_type) = query.event_type {
            clauses.push("event_type = ?");
            let tag = encode(&event_type)?.trim_matches('"').to_string();
            args.push(Box::new(tag));
        }
        if let Some(user_id) = query.user_id {
            clauses.push("user_id = ?");
            args.push(Box::new(user_id.to_string()));
        }
        if let Some(ref kind) = query.resource_kind {
            clauses.push("resource_kind = ?");
            args.push(Box::new(kind.clone()));
        }
        if let Some(min) = query.min_severity {
            clauses.push("severity_rank >= ?");
            args.push(Box::new(severity_rank(min)));
        }
        if let Some(start) = query.start {
            clauses.push("ts_ms >= ?");
            args.push(Box::new(start.timestamp_millis()));
        }
        if let Some(end) = query.end {
            clauses.push("ts_ms <= ?");
            args.push(Box::new(end.timestamp_millis()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit = if query.limit == 0 { i64::MAX } else { query.limit as i64 };
        let sql = format!(
            "SELECT doc FROM audit_events {} ORDER BY ts_ms DESC, seq DESC LIMIT {} OFFSET {}",
            where_clause, limit, query.offset
        );

        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let docs = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                |row| row.get::<_, String>(0),
            )
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        docs.into_iter().map(decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Schedule, SystemType};
    use crate::domain::value_objects::Priority;
    use crate::domain::entities::Trigger;

    fn temp_store() -> SqliteStore {
        // An in-memory database keeps the tests hermetic.
        SqliteStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn test_system_round_trip() {
        let store = temp_store();
        let system = store
            .create_system(System::new("db", SystemType::Postgresql, vec![9, 9]))
            .await
            .unwrap();
        let loaded = store.get_system(system.id).await.unwrap();
        assert_eq!(loaded, system);
    }

    #[tokio::test]
    async fn test_version_conflict_detected() {
        let store = temp_store();
        let system = store
            .create_system(System::new("db", SystemType::Postgresql, vec![]))
            .await
            .unwrap();
        store.update_system(system.clone(), 1).await.unwrap();
        assert!(matches!(
            store.update_system(system, 1).await,
            Err(CoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_executable_jobs_query_shape() {
        let store = temp_store();
        let system = store
            .create_system(System::new("db", SystemType::Postgresql, vec![]))
            .await
            .unwrap();
        let mut pk =
            crate::domain::entities::Column::new("id", "bigint", crate::domain::value_objects::UniversalType::Long);
        pk.nullable = false;
        pk.primary_key = true;
        let schema = store
            .create_schema(
                Schema::new(system.id, "t", crate::domain::entities::SchemaFormat::Relational)
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
                    schema.id,
                    schema.id,
                    crate::domain::entities::Cardinality::OneToOne,
                )
                .with_rules(vec![crate::domain::entities::MappingRule::direct("id", "id")]),
            )
            .await
            .unwrap();

        let mut job = Job::new("due", mapping.id, Schedule::Immediate);
        job.active = true;
        let mut job = store.create_job(job).await.unwrap();
        job.status = crate::domain::entities::JobStatus::Scheduled;
        store.update_job(job.clone(), job.version).await.unwrap();

        let due = store.list_executable_jobs(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "due");
    }

    #[tokio::test]
    async fn test_duplicate_execution_id_rejected() {
        let store = temp_store();
        let system = store
            .create_system(System::new("db", SystemType::Postgresql, vec![]))
            .await
            .unwrap();
        let mut pk =
            crate::domain::entities::Column::new("id", "bigint", crate::domain::value_objects::UniversalType::Long);
        pk.nullable = false;
        pk.primary_key = true;
        let schema = store
            .create_schema(
                Schema::new(system.id, "t", crate::domain::entities::SchemaFormat::Relational)
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
                    schema.id,
                    schema.id,
                    crate::domain::entities::Cardinality::OneToOne,
                )
                .with_rules(vec![crate::domain::entities::MappingRule::direct("id", "id")]),
            )
            .await
            .unwrap();
        let job = store
            .create_job(Job::new("j", mapping.id, Schedule::Manual))
            .await
            .unwrap();

        let exec = JobExecution::queued(job.id, Priority::default(), Trigger::Manual, Utc::now());
        store.create_execution(exec.clone()).await.unwrap();
        let mut twin = JobExecution::queued(job.id, Priority::default(), Trigger::Manual, Utc::now());
        twin.execution_id = exec.execution_id.clone();
        assert!(matches!(
            store.create_execution(twin).await,
            Err(CoreError::Validation(_))
        ));
    }
}
