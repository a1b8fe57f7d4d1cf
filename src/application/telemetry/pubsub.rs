//! Telemetry pub/sub bus
//!
//! Fan-out of JSON messages to dashboard subscribers over named channels.
//! Publishing never blocks: a slow subscriber loses messages and its
//! subscription counts how many. The transport beyond this bus (websocket,
//! SSE) is external.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Named subscription channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Metrics,
    Alerts,
    Logs,
    Jobs,
    System,
}

impl Channel {
    pub fn all() -> &'static [Channel] {
        &[
            Channel::Metrics,
            Channel::Alerts,
            Channel::Logs,
            Channel::Jobs,
            Channel::System,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Metrics => "metrics",
            Channel::Alerts => "alerts",
            Channel::Logs => "logs",
            Channel::Jobs => "jobs",
            Channel::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Metrics,
    Alert,
    Health,
    InitialState,
    Event,
}

/// Wire message delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PubSubMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub data: serde_json::Value,
    pub ts: DateTime<Utc>,
}

impl PubSubMessage {
    pub fn new(message_type: MessageType, data: serde_json::Value) -> Self {
        Self {
            message_type,
            data,
            ts: Utc::now(),
        }
    }
}

/// One subscriber's end of a channel
pub struct Subscription {
    initial: Option<PubSubMessage>,
    receiver: broadcast::Receiver<PubSubMessage>,
    dropped: u64,
}

impl Subscription {
    /// Next message; the initial-state message is always delivered first.
    /// Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<PubSubMessage> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Messages lost to lag so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// The fan-out bus
pub struct PubSubBus {
    senders: HashMap<Channel, broadcast::Sender<PubSubMessage>>,
}

impl PubSubBus {
    pub fn new() -> Self {
        let senders = Channel::all()
            .iter()
            .map(|c| (*c, broadcast::channel(CHANNEL_CAPACITY).0))
            .collect();
        Self { senders }
    }

    /// Publishes without blocking; no subscribers is not an error
    pub fn publish(&self, channel: Channel, message: PubSubMessage) {
        if let Some(sender) = self.senders.get(&channel) {
            let _ = sender.send(message);
        }
    }

    /// Attaches a subscriber, delivering `initial_state` as the first message
    pub fn subscribe(&self, channel: Channel, initial_state: serde_json::Value) -> Subscription {
        let receiver = self
            .senders
            .get(&channel)
            .expect("every channel has a sender")
            .subscribe();
        Subscription {
            initial: Some(PubSubMessage::new(MessageType::InitialState, initial_state)),
            receiver,
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.senders
            .get(&channel)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for PubSubBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_state_delivered_first() {
        let bus = PubSubBus::new();
        let mut sub = bus.subscribe(Channel::Metrics, serde_json::json!({"jobs": 3}));
        bus.publish(
            Channel::Metrics,
            PubSubMessage::new(MessageType::Metrics, serde_json::json!({"v": 1})),
        );

        let first = sub.recv().await.unwrap();
        assert_eq!(first.message_type, MessageType::InitialState);
        let second = sub.recv().await.unwrap();
        assert_eq!(second.message_type, MessageType::Metrics);
    }

    #[tokio::test]
    async fn test_fan_out_to_multiple_subscribers() {
        let bus = PubSubBus::new();
        let mut a = bus.subscribe(Channel::Jobs, serde_json::json!(null));
        let mut b = bus.subscribe(Channel::Jobs, serde_json::json!(null));
        a.recv().await; // initial
        b.recv().await;

        bus.publish(
            Channel::Jobs,
            PubSubMessage::new(MessageType::Event, serde_json::json!("started")),
        );
        assert_eq!(a.recv().await.unwrap().data, serde_json::json!("started"));
        assert_eq!(b.recv().await.unwrap().data, serde_json::json!("started"));
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = PubSubBus::new();
        let mut metrics = bus.subscribe(Channel::Metrics, serde_json::json!(null));
        metrics.recv().await;

        bus.publish(
            Channel::Alerts,
            PubSubMessage::new(MessageType::Alert, serde_json::json!("boom")),
        );
        bus.publish(
            Channel::Metrics,
            PubSubMessage::new(MessageType::Metrics, serde_json::json!(1)),
        );
        // The alert never arrives on the metrics channel.
        assert_eq!(
            metrics.recv().await.unwrap().message_type,
            MessageType::Metrics
        );
    }

    #[tokio::test]
    async fn test_lagging_subscriber_counts_drops() {
        let bus = PubSubBus::new();
        let mut slow = bus.subscribe(Channel::Metrics, serde_json::json!(null));
        slow.recv().await;

        for i in 0..(CHANNEL_CAPACITY * 2) {
            bus.publish(
                Channel::Metrics,
                PubSubMessage::new(MessageType::Metrics, serde_json::json!(i)),
            );
        }
        // Drain whatever survived; lag is surfaced through the counter.
        while slow.dropped() == 0 {
            slow.recv().await.unwrap();
        }
        assert!(slow.dropped() > 0);
    }
}
