//! Audit manager
//!
//! Single ingestion point for audit events. Events are stamped with a
//! monotonic timestamp and an insertion sequence, buffered, and flushed to
//! the store either when the buffer fills, on the flush interval, or
//! immediately for the critical event types. Every event also runs through
//! the alert engine; fired alerts are audited and dispatched to sinks.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::domain::entities::{
    Alert, AuditEvent, AuditEventType, AuditResult, Severity,
};
use crate::domain::error::CoreResult;
use crate::domain::repositories::{AuditQuery, AuditRepository, Store};
use crate::infrastructure::config::CoreConfig;

use super::alerts::{dispatch_to_sinks, AlertDispatchPayload, AlertEngine, AlertSink};

/// Buffered, alert-evaluating audit ingestion service
pub struct AuditManager {
    store: Arc<dyn Store>,
    buffer: Mutex<Vec<AuditEvent>>,
    seq: AtomicU64,
    last_ts: Mutex<DateTime<Utc>>,
    buffer_size: usize,
    flush_interval: std::time::Duration,
    alerts: Arc<AlertEngine>,
    sinks: Mutex<Vec<Arc<dyn AlertSink>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl AuditManager {
    pub fn new(store: Arc<dyn Store>, config: &CoreConfig) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            store,
            buffer: Mutex::new(Vec::new()),
            seq: AtomicU64::new(1),
            last_ts: Mutex::new(DateTime::<Utc>::MIN_UTC),
            buffer_size: config.audit_buffer_size,
            flush_interval: config.audit_flush_interval(),
            alerts: Arc::new(AlertEngine::new(
                config.alert_history_size,
                config.alert_cooldown_seconds * 1000,
            )),
            sinks: Mutex::new(vec![Arc::new(super::alerts::LogSink)]),
            flusher: Mutex::new(None),
            shutdown,
        })
    }

    pub fn alert_engine(&self) -> Arc<AlertEngine> {
        Arc::clone(&self.alerts)
    }

    pub fn add_sink(&self, sink: Arc<dyn AlertSink>) {
        self.sinks.lock().unwrap().push(sink);
    }

    /// Starts the interval flusher task
    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = manager.flush().await {
                            error!("audit flush failed: {}", e);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
        *self.flusher.lock().unwrap() = Some(handle);
        info!(buffer = self.buffer_size, "audit manager started");
    }

    /// Stops the flusher and drains the buffer
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.flusher.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        if let Err(e) = self.flush().await {
            error!("final audit flush failed: {}", e);
        }
        info!("audit manager stopped");
    }

    /// Ingests one event
    ///
    /// The event is stamped, buffered (or flushed straight through when
    /// critical), and evaluated against the alert rules.
    pub async fn submit(self: &Arc<Self>, event: AuditEvent) -> CoreResult<()> {
        let event = self.stamp(event);
        let critical = event.event_type.is_critical();

        let should_flush = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.push(event.clone());
            critical || buffer.len() >= self.buffer_size
        };
        if should_flush {
            self.flush().await?;
        }

        for alert in self.alerts.observe(&event, event.ts) {
            self.record_alert(&alert).await?;
        }
        Ok(())
    }

    /// Stamps sequence and monotonic timestamp
    ///
    /// A wall clock stepping backwards must not reorder the trail: the
    /// timestamp is clamped to the last issued one, and the sequence breaks
    /// the resulting ties.
    fn stamp(&self, mut event: AuditEvent) -> AuditEvent {
        event.seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last_ts.lock().unwrap();
        if event.ts < *last {
            event.ts = *last;
        }
        *last = event.ts;
        event
    }

    async fn record_alert(self: &Arc<Self>, alert: &Alert) -> CoreResult<()> {
        let audit_event = AuditEvent::new(
            AuditEventType::SecurityAlertGenerated,
            "alert_fired",
            AuditResult::Alert,
        )
        .with_severity(alert.severity)
        .with_resource("alert_rule", alert.rule_id.to_string())
        .with_metadata("group_key", serde_json::json!(alert.group_key))
        .with_metadata("count", serde_json::json!(alert.count));

        // The generated event is stamped and stored but deliberately not
        // re-evaluated against the rules; alerting on alerts would loop.
        let stamped = self.stamp(audit_event);
        let should_flush = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.push(stamped);
            buffer.len() >= self.buffer_size
        };
        if should_flush {
            self.flush().await?;
        }

        let sinks = self.sinks.lock().unwrap().clone();
        let payload = AlertDispatchPayload::from_alert(alert);
        tokio::spawn(async move {
            dispatch_to_sinks(&sinks, &payload).await;
        });
        Ok(())
    }

    /// Drains the buffer into the store in one batch
    pub async fn flush(&self) -> CoreResult<()> {
        let batch: Vec<AuditEvent> = {
            let mut buffer = self.buffer.lock().unwrap();
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return Ok(());
        }
        self.store.append_audit_events(batch).await
    }

    /// Query surface; flushes first so callers see their own writes
    pub async fn query(&self, query: AuditQuery) -> CoreResult<Vec<AuditEvent>> {
        self.flush().await?;
        self.store.query_audit_events(query).await
    }

    /// Convenience for severity classification of failures (see the error
    /// taxonomy): audits an error with the severity derived from its kind
    pub async fn submit_error(
        self: &Arc<Self>,
        error: &crate::domain::error::CoreError,
        action: &str,
    ) -> CoreResult<()> {
        let event_type = match error.audit_severity() {
            Severity::Critical => AuditEventType::InternalError,
            _ => AuditEventType::JobExecutionFailed,
        };
        let event = AuditEvent::new(event_type, action, AuditResult::Failure)
            .with_severity(error.audit_severity())
            .with_metadata("error", serde_json::json!(error.to_string()));
        self.submit(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{AlertCondition, AlertRule, GroupByField};
    use crate::infrastructure::storage::MemoryStore;

    fn manager_with(buffer_size: usize) -> Arc<AuditManager> {
        let config = CoreConfig {
            audit_buffer_size: buffer_size,
            ..Default::default()
        };
        AuditManager::new(Arc::new(MemoryStore::new()), &config)
    }

    fn plain_event() -> AuditEvent {
        AuditEvent::new(AuditEventType::UserLogin, "login", AuditResult::Success)
    }

    #[tokio::test]
    async fn test_buffering_until_capacity() {
        let manager = manager_with(3);
        manager.submit(plain_event()).await.unwrap();
        manager.submit(plain_event()).await.unwrap();

        // Below capacity: nothing stored yet.
        let stored = manager
            .store
            .query_audit_events(AuditQuery::new())
            .await
            .unwrap();
        assert!(stored.is_empty());

        manager.submit(plain_event()).await.unwrap();
        let stored = manager
            .store
            .query_audit_events(AuditQuery::new())
            .await
            .unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn test_critical_event_flushes_immediately() {
        let manager = manager_with(100);
        let critical = AuditEvent::new(
            AuditEventType::SecurityBreach,
            "breach",
            AuditResult::Failure,
        )
        .with_severity(Severity::Critical);
        manager.submit(critical).await.unwrap();

        let stored = manager
            .store
            .query_audit_events(AuditQuery::new())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_monotonic_stamping() {
        let manager = manager_with(100);
        let now = Utc::now();
        let mut first = plain_event();
        first.ts = now;
        let mut second = plain_event();
        second.ts = now - chrono::Duration::seconds(10); // clock stepped back

        manager.submit(first).await.unwrap();
        manager.submit(second).await.unwrap();

        let events = manager.query(AuditQuery::new()).await.unwrap();
        // Newest-first query; equal clamped timestamps, ordered by seq.
        assert_eq!(events.len(), 2);
        assert!(events[0].seq > events[1].seq);
        assert!(events[0].ts >= events[1].ts);
    }

    #[tokio::test]
    async fn test_alert_fires_and_is_audited() {
        let manager = manager_with(1);
        manager.alert_engine().add_rule(AlertRule::new(
            "any-login",
            Severity::High,
            AlertCondition {
                event_types: vec![AuditEventType::UserLogin],
                roles: vec![],
                actions: vec![],
                resource_kinds: vec![],
                min_severity: None,
                threshold: 1,
                time_window_ms: 60_000,
                group_by: vec![GroupByField::EventType],
            },
        ));

        manager.submit(plain_event()).await.unwrap();
        let mut query = AuditQuery::new();
        query.event_type = Some(AuditEventType::SecurityAlertGenerated);
        let generated = manager.query(query).await.unwrap();
        assert_eq!(generated.len(), 1);
        assert_eq!(manager.alert_engine().history().len(), 1);
    }

    #[tokio::test]
    async fn test_interval_flusher_start_shutdown() {
        let config = CoreConfig {
            audit_buffer_size: 1000,
            audit_flush_interval_seconds: 3600,
            ..Default::default()
        };
        let manager = AuditManager::new(Arc::new(MemoryStore::new()), &config);
        manager.start();
        manager.submit(plain_event()).await.unwrap();
        // Shutdown drains the buffer even though the interval never fired.
        manager.shutdown().await;
        let stored = manager
            .store
            .query_audit_events(AuditQuery::new())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }
}
