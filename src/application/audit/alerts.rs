//! Alert engine
//!
//! Evaluates every audit event against the configured alert rules. Each
//! rule keeps sliding-window counters per group key; a threshold breach
//! fires an alert subject to the rule's global rate limit and the
//! per-group cooldown. Dispatch to sinks is best-effort with bounded
//! retry and never blocks other sinks.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::entities::{Alert, AlertRule, AuditEvent, Severity};

/// Window for a rule's global firing rate limit
const RATE_LIMIT_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Attempts per sink before a dispatch failure is dropped
const DISPATCH_ATTEMPTS: usize = 3;

/// Wire payload handed to dispatch sinks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertDispatchPayload {
    pub alert_id: Uuid,
    pub rule_id: Uuid,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub group_key: String,
    pub count: u32,
    pub triggered_at: DateTime<Utc>,
    pub originating_event: AuditEvent,
}

impl AlertDispatchPayload {
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            alert_id: alert.id,
            rule_id: alert.rule_id,
            severity: alert.severity,
            title: alert.rule_name.clone(),
            message: format!(
                "rule '{}' fired for group '{}' after {} matching events",
                alert.rule_name, alert.group_key, alert.count
            ),
            group_key: alert.group_key.clone(),
            count: alert.count,
            triggered_at: alert.triggered_at,
            originating_event: alert.originating_event.clone(),
        }
    }
}

/// Transport for fired alerts; implementations live outside the core
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    async fn dispatch(&self, payload: &AlertDispatchPayload) -> Result<(), String>;
}

/// Sink that writes alerts to the structured log; the default wiring
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn dispatch(&self, payload: &AlertDispatchPayload) -> Result<(), String> {
        warn!(
            rule = %payload.title,
            group = %payload.group_key,
            count = payload.count,
            severity = ?payload.severity,
            "alert fired"
        );
        Ok(())
    }
}

/// Delivers a payload to every sink, retrying each a bounded number of times
pub async fn dispatch_to_sinks(sinks: &[std::sync::Arc<dyn AlertSink>], payload: &AlertDispatchPayload) {
    for sink in sinks {
        let mut delivered = false;
        for attempt in 1..=DISPATCH_ATTEMPTS {
            match sink.dispatch(payload).await {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                Err(e) => {
                    debug!(sink = sink.name(), attempt, error = %e, "alert dispatch attempt failed");
                    tokio::time::sleep(std::time::Duration::from_millis(50 * attempt as u64)).await;
                }
            }
        }
        if !delivered {
            warn!(sink = sink.name(), alert = %payload.alert_id, "alert dispatch gave up");
        }
    }
}

#[derive(Default)]
struct RuleState {
    /// Matching-event timestamps per group key
    windows: HashMap<String, VecDeque<DateTime<Utc>>>,
    /// Last firing per group key, for the cooldown
    last_fired: HashMap<String, DateTime<Utc>>,
    /// All firings of this rule, for the global rate limit
    fired: VecDeque<DateTime<Utc>>,
}

struct RuleRuntime {
    rule: AlertRule,
    state: Mutex<RuleState>,
}

/// Rule evaluation and alert materialisation
pub struct AlertEngine {
    rules: RwLock<Vec<RuleRuntime>>,
    history: Mutex<VecDeque<Alert>>,
    history_cap: usize,
    default_cooldown_ms: u64,
}

impl AlertEngine {
    pub fn new(history_cap: usize, default_cooldown_ms: u64) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            history_cap,
            default_cooldown_ms,
        }
    }

    pub fn add_rule(&self, rule: AlertRule) {
        self.rules.write().unwrap().push(RuleRuntime {
            rule,
            state: Mutex::new(RuleState::default()),
        });
    }

    pub fn remove_rule(&self, rule_id: Uuid) {
        self.rules.write().unwrap().retain(|r| r.rule.id != rule_id);
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().unwrap().iter().map(|r| r.rule.clone()).collect()
    }

    /// Recent alerts, newest last, bounded by the history cap
    pub fn history(&self) -> Vec<Alert> {
        self.history.lock().unwrap().iter().cloned().collect()
    }

    /// Evaluates one event against every enabled rule
    ///
    /// Returns the alerts that fired; the caller audits and dispatches them.
    pub fn observe(&self, event: &AuditEvent, now: DateTime<Utc>) -> Vec<Alert> {
        let mut fired = Vec::new();
        let rules = self.rules.read().unwrap();
        for runtime in rules.iter() {
            if !runtime.rule.enabled || !runtime.rule.condition.matches(event) {
                continue;
            }
            if let Some(alert) = self.evaluate_rule(runtime, event, now) {
                fired.push(alert);
            }
        }
        drop(rules);

        if !fired.is_empty() {
            let mut history = self.history.lock().unwrap();
            for alert in &fired {
                history.push_back(alert.clone());
                while history.len() > self.history_cap {
                    history.pop_front();
                }
            }
        }
        fired
    }

    fn evaluate_rule(
        &self,
        runtime: &RuleRuntime,
        event: &AuditEvent,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let rule = &runtime.rule;
        let group_key = rule.condition.group_key(event);
        let window = Duration::milliseconds(rule.condition.time_window_ms as i64);
        let mut state = runtime.state.lock().unwrap();

        let samples = state.windows.entry(group_key.clone()).or_default();
        samples.push_back(now);
        while samples.front().is_some_and(|t| now - *t > window) {
            samples.pop_front();
        }
        let count = samples.len() as u32;
        if count < rule.condition.threshold {
            return None;
        }

        // Global rate limit across all groups of this rule.
        while state
            .fired
            .front()
            .is_some_and(|t| (now - *t).num_milliseconds() > RATE_LIMIT_WINDOW_MS)
        {
            state.fired.pop_front();
        }
        if state.fired.len() as u32 >= rule.max_alerts_per_window {
            debug!(rule = %rule.name, "alert suppressed by rule rate limit");
            return None;
        }

        // Per-group cooldown.
        let cooldown_ms = if rule.cooldown_ms > 0 {
            rule.cooldown_ms
        } else {
            self.default_cooldown_ms
        };
        if let Some(last) = state.last_fired.get(&group_key) {
            if (now - *last).num_milliseconds() < cooldown_ms as i64 {
                debug!(rule = %rule.name, group = %group_key, "alert suppressed by cooldown");
                return None;
            }
        }

        state.last_fired.insert(group_key.clone(), now);
        state.fired.push_back(now);
        // The window restarts after a firing so one burst fires once.
        state.windows.remove(&group_key);

        Some(Alert {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            severity: rule.severity,
            group_key,
            count,
            triggered_at: now,
            originating_event: event.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{
        AlertCondition, AuditEventType, AuditResult, GroupByField,
    };

    fn failure_event(ip: &str) -> AuditEvent {
        let mut event = AuditEvent::new(
            AuditEventType::MultipleLoginFailures,
            "login",
            AuditResult::Failure,
        )
        .with_severity(Severity::Medium);
        event.ip = Some(ip.to_string());
        event
    }

    fn rule(threshold: u32, window_ms: u64, cooldown_ms: u64) -> AlertRule {
        let mut rule = AlertRule::new(
            "login-failures",
            Severity::High,
            AlertCondition {
                event_types: vec![AuditEventType::MultipleLoginFailures],
                roles: vec![],
                actions: vec![],
                resource_kinds: vec![],
                min_severity: None,
                threshold,
                time_window_ms: window_ms,
                group_by: vec![GroupByField::Ip],
            },
        );
        rule.cooldown_ms = cooldown_ms;
        rule
    }

    #[test]
    fn test_threshold_fires_once_per_burst() {
        let engine = AlertEngine::new(100, 60_000);
        engine.add_rule(rule(3, 60_000, 1_000));
        let now = Utc::now();

        assert!(engine.observe(&failure_event("1.1.1.1"), now).is_empty());
        assert!(engine
            .observe(&failure_event("1.1.1.1"), now + Duration::seconds(1))
            .is_empty());
        let fired = engine.observe(&failure_event("1.1.1.1"), now + Duration::seconds(2));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].count, 3);
        assert_eq!(fired[0].group_key, "1.1.1.1");
    }

    #[test]
    fn test_groups_are_independent() {
        let engine = AlertEngine::new(100, 60_000);
        engine.add_rule(rule(2, 60_000, 1_000));
        let now = Utc::now();

        engine.observe(&failure_event("1.1.1.1"), now);
        // A different IP does not contribute to the first group's window.
        assert!(engine.observe(&failure_event("2.2.2.2"), now).is_empty());
        assert_eq!(engine.observe(&failure_event("1.1.1.1"), now).len(), 1);
    }

    #[test]
    fn test_cooldown_suppresses_refire() {
        let engine = AlertEngine::new(100, 60_000);
        engine.add_rule(rule(1, 60_000, 10_000));
        let now = Utc::now();

        assert_eq!(engine.observe(&failure_event("1.1.1.1"), now).len(), 1);
        // Inside the cooldown: suppressed.
        assert!(engine
            .observe(&failure_event("1.1.1.1"), now + Duration::seconds(5))
            .is_empty());
        // After the cooldown: fires again.
        assert_eq!(
            engine
                .observe(&failure_event("1.1.1.1"), now + Duration::seconds(11))
                .len(),
            1
        );
    }

    #[test]
    fn test_cooldown_ordering_invariant() {
        let engine = AlertEngine::new(100, 60_000);
        engine.add_rule(rule(1, 60_000, 2_000));
        let now = Utc::now();

        let mut firings = Vec::new();
        for i in 0..100 {
            let t = now + Duration::milliseconds(i * 100);
            for alert in engine.observe(&failure_event("1.1.1.1"), t) {
                firings.push(alert.triggered_at);
            }
        }
        for pair in firings.windows(2) {
            assert!((pair[1] - pair[0]).num_milliseconds() >= 2_000);
        }
    }

    #[test]
    fn test_global_rate_limit() {
        let engine = AlertEngine::new(1000, 60_000);
        let mut r = rule(1, 60_000, 1);
        r.max_alerts_per_window = 3;
        engine.add_rule(r);
        let now = Utc::now();

        let mut fired = 0;
        for i in 0..10 {
            // Distinct groups so the cooldown never applies.
            fired += engine
                .observe(&failure_event(&format!("1.1.1.{}", i)), now + Duration::milliseconds(i))
                .len();
        }
        assert_eq!(fired, 3);
    }

    #[test]
    fn test_window_expiry() {
        let engine = AlertEngine::new(100, 60_000);
        engine.add_rule(rule(2, 1_000, 1));
        let now = Utc::now();

        engine.observe(&failure_event("1.1.1.1"), now);
        // The first sample has aged out of the 1 s window.
        assert!(engine
            .observe(&failure_event("1.1.1.1"), now + Duration::seconds(5))
            .is_empty());
    }

    #[test]
    fn test_history_bounded() {
        let engine = AlertEngine::new(5, 60_000);
        engine.add_rule(rule(1, 60_000, 1));
        let now = Utc::now();
        for i in 0..20 {
            engine.observe(&failure_event(&format!("10.0.0.{}", i)), now + Duration::milliseconds(i));
        }
        assert_eq!(engine.history().len(), 5);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_block_others() {
        struct FailingSink;
        #[async_trait]
        impl AlertSink for FailingSink {
            fn name(&self) -> &str {
                "failing"
            }
            async fn dispatch(&self, _payload: &AlertDispatchPayload) -> Result<(), String> {
                Err("down".to_string())
            }
        }
        struct CountingSink(std::sync::atomic::AtomicUsize);
        #[async_trait]
        impl AlertSink for CountingSink {
            fn name(&self) -> &str {
                "counting"
            }
            async fn dispatch(&self, _payload: &AlertDispatchPayload) -> Result<(), String> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        }

        let counting = std::sync::Arc::new(CountingSink(std::sync::atomic::AtomicUsize::new(0)));
        let sinks: Vec<std::sync::Arc<dyn AlertSink>> =
            vec![std::sync::Arc::new(FailingSink), counting.clone()];

        let engine = AlertEngine::new(10, 60_000);
        engine.add_rule(rule(1, 1_000, 1));
        let alert = engine.observe(&failure_event("1.1.1.1"), Utc::now()).remove(0);
        dispatch_to_sinks(&sinks, &AlertDispatchPayload::from_alert(&alert)).await;

        assert_eq!(counting.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
