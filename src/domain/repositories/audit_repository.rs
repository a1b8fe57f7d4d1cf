//! Audit repository trait
//!
//! The audit trail is append-only: there is no update or delete verb, and
//! implementations must not expose one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entities::{AuditEvent, AuditEventType, Severity};
use crate::domain::error::CoreResult;

/// Filters for the audit query surface; results are newest-first
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub event_type: Option<AuditEventType>,
    pub user_id: Option<Uuid>,
    pub resource_kind: Option<String>,
    pub min_severity: Option<Severity>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait AuditRepository {
    /// Appends a batch of events in order
    async fn append_audit_events(&self, events: Vec<AuditEvent>) -> CoreResult<()>;

    async fn query_audit_events(&self, query: AuditQuery) -> CoreResult<Vec<AuditEvent>>;
}
