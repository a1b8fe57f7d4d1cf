//! Telemetry hub
//!
//! Collects metric samples into a bounded buffer, flushes them into
//! per-metric in-memory rings (24 h raw retention), builds roll-ups every
//! minute, answers range and realtime queries, runs z-score anomaly
//! detection, and fans samples out to subscribers. Threshold crossings are
//! reported to the alert manager through the same audit interface every
//! other caller uses.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::domain::entities::{AuditEvent, AuditEventType, AuditResult, Severity};
use crate::infrastructure::config::CoreConfig;

use crate::application::audit::AuditManager;

use super::pubsub::{Channel, MessageType, PubSubBus, PubSubMessage, Subscription};
use super::rollup::{compute_bucket, RollupBucket, RollupInterval};

const RAW_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

/// One metric observation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub ts: DateTime<Utc>,
}

/// Per-metric alerting thresholds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

struct HubState {
    buffer: Vec<Sample>,
    raw: HashMap<String, VecDeque<Sample>>,
    /// `metric:interval` -> bucket start (unix ms) -> bucket
    rollups: HashMap<String, BTreeMap<i64, RollupBucket>>,
    thresholds: HashMap<String, Threshold>,
}

/// The process-wide metrics service
pub struct TelemetryHub {
    state: Mutex<HubState>,
    buffer_size: usize,
    flush_interval: std::time::Duration,
    bus: PubSubBus,
    audit: Mutex<Option<Arc<AuditManager>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl TelemetryHub {
    pub fn new(config: &CoreConfig) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(HubState {
                buffer: Vec::new(),
                raw: HashMap::new(),
                rollups: HashMap::new(),
                thresholds: HashMap::new(),
            }),
            buffer_size: config.telemetry_buffer_size,
            flush_interval: config.telemetry_flush_interval(),
            bus: PubSubBus::new(),
            audit: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            shutdown,
        })
    }

    /// Wires the audit manager used for threshold alerts
    pub fn set_audit(&self, audit: Arc<AuditManager>) {
        *self.audit.lock().unwrap() = Some(audit);
    }

    pub fn counter(self: &Arc<Self>, name: &str, increment: f64) {
        self.record(name, MetricKind::Counter, increment, BTreeMap::new());
    }

    pub fn gauge(self: &Arc<Self>, name: &str, value: f64) {
        self.record(name, MetricKind::Gauge, value, BTreeMap::new());
    }

    pub fn timing_ms(self: &Arc<Self>, name: &str, millis: f64) {
        self.record(name, MetricKind::Histogram, millis, BTreeMap::new());
    }

    /// Records one sample
    ///
    /// Publishes it to the metrics channel, checks thresholds and buffers it
    /// for the ring; a full buffer flushes inline.
    pub fn record(
        self: &Arc<Self>,
        name: &str,
        kind: MetricKind,
        value: f64,
        tags: BTreeMap<String, String>,
    ) {
        let sample = Sample {
            name: name.to_string(),
            kind,
            value,
            tags,
            ts: Utc::now(),
        };

        self.bus.publish(
            Channel::Metrics,
            PubSubMessage::new(
                MessageType::Metrics,
                serde_json::to_value(&sample).unwrap_or(serde_json::Value::Null),
            ),
        );

        let crossed = {
            let mut state = self.state.lock().unwrap();
            let crossed = state.thresholds.get(name).and_then(|threshold| {
                if value >= threshold.critical {
                    Some((Severity::Critical, threshold.critical))
                } else if value >= threshold.warning {
                    Some((Severity::High, threshold.warning))
                } else {
                    None
                }
            });
            state.buffer.push(sample);
            if state.buffer.len() >= self.buffer_size {
                Self::drain_buffer(&mut state);
            }
            crossed
        };

        if let Some((severity, threshold)) = crossed {
            self.emit_performance_alert(name, value, severity, threshold);
        }
    }

    fn emit_performance_alert(self: &Arc<Self>, metric: &str, value: f64, severity: Severity, threshold: f64) {
        let audit = self.audit.lock().unwrap().clone();
        let Some(audit) = audit else {
            return;
        };
        let event = AuditEvent::new(
            AuditEventType::PerformanceAlert,
            "metric_threshold_crossed",
            AuditResult::Alert,
        )
        .with_severity(severity)
        .with_resource("metric", metric.to_string())
        .with_metadata("value", serde_json::json!(value))
        .with_metadata("threshold", serde_json::json!(threshold));
        tokio::spawn(async move {
            if let Err(e) = audit.submit(event).await {
                error!("performance alert submission failed: {}", e);
            }
        });

        self.bus.publish(
            Channel::Alerts,
            PubSubMessage::new(
                MessageType::Alert,
                serde_json::json!({"metric": metric, "value": value}),
            ),
        );
    }

    /// Moves buffered samples into the rings and prunes raw retention
    fn drain_buffer(state: &mut HubState) {
        let cutoff = Utc::now() - Duration::hours(RAW_RETENTION_HOURS);
        let drained = std::mem::take(&mut state.buffer);
        for sample in drained {
            let ring = state.raw.entry(sample.name.clone()).or_default();
            ring.push_back(sample);
        }
        for ring in state.raw.values_mut() {
            while ring.front().is_some_and(|s| s.ts < cutoff) {
                ring.pop_front();
            }
        }
    }

    /// Forces buffered samples into the rings
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap();
        Self::drain_buffer(&mut state);
    }

    /// Rebuilds roll-up buckets from the raw rings
    ///
    /// Runs every minute from the background task; idempotent, so tests can
    /// call it directly.
    pub fn build_rollups(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        Self::drain_buffer(&mut state);

        let metrics: Vec<String> = state.raw.keys().cloned().collect();
        for metric in metrics {
            let samples: Vec<(i64, f64)> = state.raw[&metric]
                .iter()
                .map(|s| (s.ts.timestamp_millis(), s.value))
                .collect();
            for interval in RollupInterval::all() {
                let width = interval.duration().num_milliseconds();
                let mut grouped: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
                for (ts, value) in &samples {
                    grouped.entry(ts - ts.rem_euclid(width)).or_default().push(*value);
                }
                let key = format!("{}:{}", metric, interval.as_str());
                let buckets = state.rollups.entry(key).or_default();
                for (start, values) in grouped {
                    if let Some(bucket) = compute_bucket(&values) {
                        buckets.insert(start, bucket);
                    }
                }
                let cutoff = (now - interval.retention()).timestamp_millis();
                buckets.retain(|start, _| *start >= cutoff);
            }
        }
    }

    /// Time-ordered roll-up slice for a metric
    pub fn query(
        &self,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: RollupInterval,
        limit: usize,
    ) -> Vec<(DateTime<Utc>, RollupBucket)> {
        let state = self.state.lock().unwrap();
        let key = format!("{}:{}", metric, interval.as_str());
        state
            .rollups
            .get(&key)
            .map(|buckets| {
                buckets
                    .range(start.timestamp_millis()..=end.timestamp_millis())
                    .take(if limit == 0 { usize::MAX } else { limit })
                    .filter_map(|(ts, bucket)| {
                        DateTime::<Utc>::from_timestamp_millis(*ts).map(|t| (t, *bucket))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stats over raw samples inside a trailing window
    pub fn realtime_stats(&self, metric: &str, window: Duration) -> Option<RollupBucket> {
        let mut state = self.state.lock().unwrap();
        Self::drain_buffer(&mut state);
        let cutoff = Utc::now() - window;
        let values: Vec<f64> = state
            .raw
            .get(metric)?
            .iter()
            .filter(|s| s.ts >= cutoff)
            .map(|s| s.value)
            .collect();
        compute_bucket(&values)
    }

    /// Raw samples of the last hour falling outside `mean ± z·stddev` of the
    /// trailing 24 h roll-up
    pub fn detect_anomalies(&self, metric: &str, z: f64, now: DateTime<Utc>) -> Vec<Sample> {
        let state = self.state.lock().unwrap();
        let key = format!("{}:{}", metric, RollupInterval::OneMinute.as_str());
        let Some(buckets) = state.rollups.get(&key) else {
            return Vec::new();
        };
        let day_ago = (now - Duration::hours(24)).timestamp_millis();
        let averages: Vec<f64> = buckets
            .range(day_ago..)
            .map(|(_, bucket)| bucket.avg)
            .collect();
        if averages.len() < 2 {
            return Vec::new();
        }
        let mean = averages.iter().sum::<f64>() / averages.len() as f64;
        let variance = averages
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / averages.len() as f64;
        let stddev = variance.sqrt();

        let hour_ago = now - Duration::hours(1);
        state
            .raw
            .get(metric)
            .map(|ring| {
                ring.iter()
                    .filter(|s| s.ts >= hour_ago && (s.value - mean).abs() > z * stddev)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_threshold(&self, metric: &str, warning: f64, critical: f64) {
        self.state
            .lock()
            .unwrap()
            .thresholds
            .insert(metric.to_string(), Threshold { warning, critical });
    }

    /// Attaches a dashboard subscriber to a channel
    pub fn subscribe(&self, channel: Channel) -> Subscription {
        let initial = {
            let state = self.state.lock().unwrap();
            serde_json::json!({
                "metrics": state.raw.keys().collect::<Vec<_>>(),
                "subscribers": self.bus.subscriber_count(channel),
            })
        };
        self.bus.subscribe(channel, initial)
    }

    pub fn bus(&self) -> &PubSubBus {
        &self.bus
    }

    /// Starts the flush and roll-up background tasks
    pub fn start(self: &Arc<Self>) {
        let hub = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let flusher = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(hub.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => hub.flush(),
                    _ = shutdown.changed() => break,
                }
            }
        });

        let hub = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let roller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => hub.build_rollups(Utc::now()),
                    _ = shutdown.changed() => break,
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(flusher);
        tasks.push(roller);
        info!(buffer = self.buffer_size, "telemetry hub started");
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
        self.flush();
        info!("telemetry hub stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> Arc<TelemetryHub> {
        TelemetryHub::new(&CoreConfig {
            telemetry_buffer_size: 4,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_record_flush_and_realtime_stats() {
        let hub = hub();
        for v in [1.0, 2.0, 3.0, 4.0] {
            hub.timing_ms("batch.duration", v);
        }
        let stats = hub
            .realtime_stats("batch.duration", Duration::minutes(5))
            .unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.avg, 2.5);
    }

    #[tokio::test]
    async fn test_rollups_and_query() {
        let hub = hub();
        for v in 1..=10 {
            hub.counter("records.processed", v as f64);
        }
        let now = Utc::now();
        hub.build_rollups(now);

        let slices = hub.query(
            "records.processed",
            now - Duration::hours(1),
            now + Duration::hours(1),
            RollupInterval::OneMinute,
            0,
        );
        assert!(!slices.is_empty());
        let total: u64 = slices.iter().map(|(_, b)| b.count).sum();
        assert_eq!(total, 10);
    }

    #[tokio::test]
    async fn test_query_unknown_metric_is_empty() {
        let hub = hub();
        let now = Utc::now();
        assert!(hub
            .query("ghost", now - Duration::hours(1), now, RollupInterval::OneHour, 0)
            .is_empty());
    }

    #[tokio::test]
    async fn test_anomaly_detection_flags_outlier() {
        let hub = hub();
        // A steady signal with one spike.
        for _ in 0..50 {
            hub.gauge("queue.depth", 10.0);
        }
        hub.gauge("queue.depth", 500.0);
        let now = Utc::now();
        hub.build_rollups(now);

        let anomalies = hub.detect_anomalies("queue.depth", 2.0, now);
        assert!(anomalies.iter().any(|s| s.value == 500.0));
        assert!(anomalies.iter().all(|s| s.value != 10.0));
    }

    #[tokio::test]
    async fn test_threshold_emits_performance_alert() {
        use crate::domain::repositories::AuditQuery;
        use crate::infrastructure::storage::MemoryStore;

        let hub = hub();
        let audit = AuditManager::new(
            Arc::new(MemoryStore::new()),
            &CoreConfig {
                audit_buffer_size: 1,
                ..Default::default()
            },
        );
        hub.set_audit(Arc::clone(&audit));
        hub.set_threshold("cpu.load", 70.0, 90.0);

        hub.gauge("cpu.load", 95.0);
        // The audit submission runs on a spawned task.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut query = AuditQuery::new();
        query.event_type = Some(AuditEventType::PerformanceAlert);
        let events = audit.query(query).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_subscription_receives_samples() {
        let hub = hub();
        let mut sub = hub.subscribe(Channel::Metrics);
        assert_eq!(
            sub.recv().await.unwrap().message_type,
            MessageType::InitialState
        );
        hub.counter("x", 1.0);
        assert_eq!(sub.recv().await.unwrap().message_type, MessageType::Metrics);
    }
}
