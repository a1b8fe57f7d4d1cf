pub mod priority;
pub mod record;
pub mod similarity;
pub mod universal_type;

pub use priority::Priority;
pub use record::Value;
pub use similarity::name_similarity;
pub use universal_type::{TypeCategory, UniversalType};
