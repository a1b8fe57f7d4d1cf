pub mod entities;
pub mod error;
pub mod repositories;
pub mod value_objects;

pub use error::{CoreError, CoreResult};
