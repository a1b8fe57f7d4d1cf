//! Audit and alert entity module
//!
//! Audit events form an append-only trail of everything actors do to the
//! platform. Alert rules watch that trail and materialise alerts when a
//! threshold of matching events accumulates inside a time window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Classified audit event types
///
/// The `is_critical` set forces an immediate buffer flush in the audit
/// manager so security-relevant events are never lost to a crash between
/// flush intervals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    UserLogin,
    UserLogout,
    ResourceCreated,
    ResourceUpdated,
    ResourceDeleted,
    JobExecutionStarted,
    JobExecutionCompleted,
    JobExecutionFailed,
    MappingValidated,
    DataExport,
    SystemConfigChange,
    UnauthorizedAccessAttempt,
    MultipleLoginFailures,
    PrivilegeEscalation,
    SecurityBreach,
    SuspiciousActivity,
    AdminAction,
    BulkDataAccess,
    AfterHoursAccess,
    SecurityAlertGenerated,
    PerformanceAlert,
    RateLimitExceeded,
    InternalError,
}

impl AuditEventType {
    /// Event types that bypass buffering and flush immediately
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            AuditEventType::UnauthorizedAccessAttempt
                | AuditEventType::MultipleLoginFailures
                | AuditEventType::PrivilegeEscalation
                | AuditEventType::DataExport
                | AuditEventType::SystemConfigChange
                | AuditEventType::SecurityBreach
                | AuditEventType::SuspiciousActivity
                | AuditEventType::AdminAction
                | AuditEventType::BulkDataAccess
                | AuditEventType::AfterHoursAccess
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    Blocked,
    Alert,
}

/// Who performed the audited action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Actor {
    pub user_id: Option<Uuid>,
    pub name: Option<String>,
    pub role: Option<String>,
}

/// What the audited action touched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRef {
    pub kind: String,
    pub id: String,
}

/// Immutable structured record of one action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    /// Insertion sequence assigned by the audit manager; breaks `ts` ties so
    /// events from one actor stay causally ordered
    pub seq: u64,
    pub event_type: AuditEventType,
    pub actor: Actor,
    pub action: String,
    pub resource: Option<ResourceRef>,
    pub result: AuditResult,
    pub severity: Severity,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AuditEvent {
    /// Creates a minimal event; builder-style setters fill in the rest
    pub fn new(event_type: AuditEventType, action: impl Into<String>, result: AuditResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            seq: 0,
            event_type,
            actor: Actor::default(),
            action: action.into(),
            resource: None,
            result,
            severity: Severity::Low,
            ip: None,
            user_agent: None,
            session_id: None,
            old_values: None,
            new_values: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_resource(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.resource = Some(ResourceRef {
            kind: kind.into(),
            id: id.into(),
        });
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Event field an alert rule can group its counters by
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GroupByField {
    UserId,
    Ip,
    Role,
    EventType,
    ResourceKind,
}

impl GroupByField {
    /// Extracts this field's value from an event, as a string key component
    pub fn extract(&self, event: &AuditEvent) -> String {
        match self {
            GroupByField::UserId => event
                .actor
                .user_id
                .map(|u| u.to_string())
                .unwrap_or_else(|| "-".to_string()),
            GroupByField::Ip => event.ip.clone().unwrap_or_else(|| "-".to_string()),
            GroupByField::Role => event.actor.role.clone().unwrap_or_else(|| "-".to_string()),
            GroupByField::EventType => format!("{:?}", event.event_type),
            GroupByField::ResourceKind => event
                .resource
                .as_ref()
                .map(|r| r.kind.clone())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Filter + threshold that decides when an alert rule fires
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertCondition {
    /// Event types the rule watches; empty means all
    #[serde(default)]
    pub event_types: Vec<AuditEventType>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub resource_kinds: Vec<String>,
    pub min_severity: Option<Severity>,
    /// Number of matching events inside the window required to fire
    pub threshold: u32,
    pub time_window_ms: u64,
    #[serde(default)]
    pub group_by: Vec<GroupByField>,
}

impl AlertCondition {
    /// Whether an event passes all configured filters
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if !self.roles.is_empty() {
            match &event.actor.role {
                Some(role) if self.roles.contains(role) => {}
                _ => return false,
            }
        }
        if !self.actions.is_empty() && !self.actions.contains(&event.action) {
            return false;
        }
        if !self.resource_kinds.is_empty() {
            match &event.resource {
                Some(r) if self.resource_kinds.contains(&r.kind) => {}
                _ => return false,
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        true
    }

    /// Builds the group key for an event by joining the `group_by` fields
    pub fn group_key(&self, event: &AuditEvent) -> String {
        if self.group_by.is_empty() {
            return "*".to_string();
        }
        self.group_by
            .iter()
            .map(|f| f.extract(event))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Where a fired alert is delivered
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertAction {
    /// Publish on the monitoring pub/sub bus
    Pubsub,
    Email { to: String },
    ChatWebhook { url: String },
    HttpWebhook { url: String },
}

/// Rule that turns audit-event patterns into alerts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub severity: Severity,
    pub condition: AlertCondition,
    pub actions: Vec<AlertAction>,
    pub enabled: bool,
    /// Rule-wide cap on firings per rate window
    pub max_alerts_per_window: u32,
    /// Minimum interval between firings for the same group key
    pub cooldown_ms: u64,
}

impl AlertRule {
    pub fn new(name: impl Into<String>, severity: Severity, condition: AlertCondition) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            severity,
            condition,
            actions: vec![AlertAction::Pubsub],
            enabled: true,
            max_alerts_per_window: 10,
            cooldown_ms: 60_000,
        }
    }
}

/// Materialised firing of an alert rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub severity: Severity,
    pub group_key: String,
    /// Matching events observed in the window when the rule fired
    pub count: u32,
    pub triggered_at: DateTime<Utc>,
    pub originating_event: AuditEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_failure(role: &str, ip: &str) -> AuditEvent {
        let mut event = AuditEvent::new(
            AuditEventType::MultipleLoginFailures,
            "login",
            AuditResult::Failure,
        )
        .with_severity(Severity::Medium);
        event.actor.role = Some(role.to_string());
        event.ip = Some(ip.to_string());
        event
    }

    #[test]
    fn test_critical_set() {
        assert!(AuditEventType::SecurityBreach.is_critical());
        assert!(AuditEventType::DataExport.is_critical());
        assert!(!AuditEventType::UserLogin.is_critical());
        assert!(!AuditEventType::JobExecutionCompleted.is_critical());
    }

    #[test]
    fn test_condition_filters() {
        let condition = AlertCondition {
            event_types: vec![AuditEventType::MultipleLoginFailures],
            roles: vec!["user".to_string()],
            actions: vec![],
            resource_kinds: vec![],
            min_severity: Some(Severity::Medium),
            threshold: 3,
            time_window_ms: 60_000,
            group_by: vec![GroupByField::Ip],
        };

        assert!(condition.matches(&login_failure("user", "10.0.0.1")));
        assert!(!condition.matches(&login_failure("admin", "10.0.0.1")));

        let low = login_failure("user", "10.0.0.1").with_severity(Severity::Low);
        assert!(!condition.matches(&low));
    }

    #[test]
    fn test_group_key_joins_fields() {
        let condition = AlertCondition {
            event_types: vec![],
            roles: vec![],
            actions: vec![],
            resource_kinds: vec![],
            min_severity: None,
            threshold: 1,
            time_window_ms: 1000,
            group_by: vec![GroupByField::Role, GroupByField::Ip],
        };
        let key = condition.group_key(&login_failure("user", "10.0.0.9"));
        assert_eq!(key, "user|10.0.0.9");
    }

    #[test]
    fn test_empty_group_by_uses_wildcard_key() {
        let condition = AlertCondition {
            event_types: vec![],
            roles: vec![],
            actions: vec![],
            resource_kinds: vec![],
            min_severity: None,
            threshold: 1,
            time_window_ms: 1000,
            group_by: vec![],
        };
        assert_eq!(condition.group_key(&login_failure("user", "1.2.3.4")), "*");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }
}
