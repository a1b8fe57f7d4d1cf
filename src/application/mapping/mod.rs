pub mod aggregate;
pub mod engine;
pub mod validator;

pub use engine::{MappingEngine, MappingOutput, PreviewOutcome};
pub use validator::{
    CoverageMetrics, MappingSuggestion, MappingValidator, ValidationIssue, ValidationReport,
};
