pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::entities;
pub use domain::error::{CoreError, CoreResult};
pub use domain::value_objects;
pub use infrastructure::config::CoreConfig;
