pub mod audit_repository;
pub mod execution_repository;
pub mod job_repository;
pub mod mapping_repository;
pub mod schema_repository;
pub mod system_repository;

pub use audit_repository::{AuditQuery, AuditRepository};
pub use execution_repository::ExecutionRepository;
pub use job_repository::JobRepository;
pub use mapping_repository::MappingRepository;
pub use schema_repository::SchemaRepository;
pub use system_repository::SystemRepository;

/// The full persistence gateway: one object implementing every repository
///
/// Services take `Arc<dyn Store>` so the SQLite and in-memory backends are
/// interchangeable.
pub trait Store:
    SystemRepository
    + SchemaRepository
    + MappingRepository
    + JobRepository
    + ExecutionRepository
    + AuditRepository
    + Send
    + Sync
{
}

impl<T> Store for T where
    T: SystemRepository
        + SchemaRepository
        + MappingRepository
        + JobRepository
        + ExecutionRepository
        + AuditRepository
        + Send
        + Sync
{
}
