pub mod hub;
pub mod pubsub;
pub mod rollup;

pub use hub::{MetricKind, Sample, TelemetryHub, Threshold};
pub use pubsub::{Channel, MessageType, PubSubBus, PubSubMessage, Subscription};
pub use rollup::{RollupBucket, RollupInterval};
