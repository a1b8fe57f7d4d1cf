pub mod alerts;
pub mod manager;

pub use alerts::{AlertDispatchPayload, AlertEngine, AlertSink, LogSink};
pub use manager::AuditManager;
