pub mod queue;
pub mod service;

pub use queue::{ExecutionQueue, QueuedExecution};
pub use service::RunnerService;
