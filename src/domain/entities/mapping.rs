//! Mapping entity module
//!
//! A Mapping is an ordered list of transformation rules from one schema to
//! another, plus an optional whole-mapping expression and per-field
//! validation rules. Mappings are versioned through `parent_id` lineage so
//! an operator can roll back to an earlier revision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::domain::error::CoreError;
use crate::domain::value_objects::UniversalType;

/// Kind of transformation a rule performs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Direct,
    Transform,
    Concat,
    Split,
    Lookup,
    Formula,
    Conditional,
    Aggregate,
}

/// Aggregation applied by a rule when the mapping collapses groups (N:1, N:N)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    First,
    Last,
    Concat,
}

/// One transformation step of a mapping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingRule {
    /// Dotted path into the source record
    pub source_field: String,
    /// Additional source paths for multi-input kinds (concat)
    #[serde(default)]
    pub source_fields: Vec<String>,
    /// Dotted path into the target record
    pub target_field: String,
    pub kind: RuleKind,
    /// Kind-specific parameters (separator, delimiter, lookup table, formula,
    /// transform function name and arguments)
    #[serde(default)]
    pub params: serde_json::Value,
    /// Optional predicate expression; a false result skips the rule and
    /// applies `default_value`
    pub predicate: Option<String>,
    pub default_value: Option<serde_json::Value>,
    /// When true, a null result fails the record
    #[serde(default)]
    pub required: bool,
    pub aggregation: Option<Aggregation>,
    /// Array-valued source path expanded into one target record per element
    pub expand_field: Option<String>,
}

impl MappingRule {
    /// Creates a direct rule copying `source_field` to `target_field`
    pub fn direct(source_field: impl Into<String>, target_field: impl Into<String>) -> Self {
        Self {
            source_field: source_field.into(),
            source_fields: Vec::new(),
            target_field: target_field.into(),
            kind: RuleKind::Direct,
            params: serde_json::Value::Null,
            predicate: None,
            default_value: None,
            required: false,
            aggregation: None,
            expand_field: None,
        }
    }

    /// Creates a transform rule calling `category.function`
    pub fn transform(
        source_field: impl Into<String>,
        target_field: impl Into<String>,
        function: &str,
        args: Vec<serde_json::Value>,
    ) -> Self {
        let mut rule = Self::direct(source_field, target_field);
        rule.kind = RuleKind::Transform;
        rule.params = serde_json::json!({ "function": function, "args": args });
        rule
    }

    /// Named string parameter out of `params`
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(|v| v.as_i64())
    }
}

/// Per-field validation rule applied to produced target records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ValidationRule {
    pub field: String,
    #[serde(default)]
    pub required: bool,
    pub expected_type: Option<UniversalType>,
    /// Regex the string form must match
    pub format: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

/// Arity relationship between source and target records
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Cardinality {
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "1:N")]
    OneToMany,
    #[serde(rename = "N:1")]
    ManyToOne,
    #[serde(rename = "N:N")]
    ManyToMany,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cardinality::OneToOne => "1:1",
            Cardinality::OneToMany => "1:N",
            Cardinality::ManyToOne => "N:1",
            Cardinality::ManyToMany => "N:N",
        };
        write!(f, "{}", s)
    }
}

/// Rolling execution statistics maintained on the mapping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub total_source_records: u64,
    pub total_target_records: u64,
    pub total_errors: u64,
    pub avg_duration_ms: f64,
    /// Fraction of executions that completed, in `[0, 1]`
    pub success_rate: f64,
    pub last_error: Option<String>,
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl ExecutionStats {
    /// Folds one terminal execution into the rolling stats
    pub fn record(
        &mut self,
        succeeded: bool,
        source_records: u64,
        target_records: u64,
        errors: u64,
        duration_ms: i64,
        error: Option<String>,
        at: DateTime<Utc>,
    ) {
        let n = self.total_executions as f64;
        self.avg_duration_ms = (self.avg_duration_ms * n + duration_ms as f64) / (n + 1.0);
        self.success_rate =
            (self.success_rate * n + if succeeded { 1.0 } else { 0.0 }) / (n + 1.0);
        self.total_executions += 1;
        self.total_source_records += source_records;
        self.total_target_records += target_records;
        self.total_errors += errors;
        if let Some(e) = error {
            self.last_error = Some(e);
        }
        self.last_executed_at = Some(at);
    }
}

/// Declarative schema-to-schema transformation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mapping {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub source_system_id: Uuid,
    pub target_system_id: Uuid,
    pub source_schema_id: Uuid,
    pub target_schema_id: Uuid,
    pub cardinality: Cardinality,
    /// Applied in order; later rules see nothing of earlier rules' output
    pub rules: Vec<MappingRule>,
    /// Optional whole-mapping expression, run after the rule list with
    /// `source` and `target` bound
    pub expression: Option<String>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    /// When true, per-record errors are recorded and skipped instead of
    /// aborting the batch
    #[serde(default)]
    pub continue_on_error: bool,
    pub version: u64,
    /// Previous revision of this mapping, if any
    pub parent_id: Option<Uuid>,
    pub active: bool,
    #[serde(default)]
    pub execution_stats: ExecutionStats,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mapping {
    /// Creates a new mapping between two schemas with no rules yet
    pub fn new(
        name: impl Into<String>,
        source_system_id: Uuid,
        target_system_id: Uuid,
        source_schema_id: Uuid,
        target_schema_id: Uuid,
        cardinality: Cardinality,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            source_system_id,
            target_system_id,
            source_schema_id,
            target_schema_id,
            cardinality,
            rules: Vec::new(),
            expression: None,
            validation_rules: Vec::new(),
            continue_on_error: false,
            version: 1,
            parent_id: None,
            active: true,
            execution_stats: ExecutionStats::default(),
            created_by: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_rules(mut self, rules: Vec<MappingRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Target fields that appear in more than one rule
    pub fn duplicate_target_fields(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for rule in &self.rules {
            if !seen.insert(rule.target_field.as_str())
                && !duplicates.contains(&rule.target_field.as_str())
            {
                duplicates.push(rule.target_field.as_str());
            }
        }
        duplicates
    }

    /// Cheap structural checks enforced by the persistence gateway on save
    ///
    /// The full static pass (schema references, type compatibility,
    /// expression analysis) lives in the mapping validator; this guards the
    /// invariants that must hold for the entity to be storable at all.
    pub fn validate_structure(&self) -> Result<(), CoreError> {
        if self.rules.is_empty() {
            return Err(CoreError::validation(format!(
                "mapping '{}' has no rules",
                self.name
            )));
        }
        let duplicates = self.duplicate_target_fields();
        if !duplicates.is_empty() {
            return Err(CoreError::validation(format!(
                "mapping '{}' writes target field(s) more than once: {}",
                self.name,
                duplicates.join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping_with(rules: Vec<MappingRule>) -> Mapping {
        Mapping::new(
            "orders-to-warehouse",
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Cardinality::OneToOne,
        )
        .with_rules(rules)
    }

    #[test]
    fn test_validate_structure_requires_rules() {
        let mapping = mapping_with(vec![]);
        assert!(mapping.validate_structure().is_err());
    }

    #[test]
    fn test_duplicate_targets_rejected() {
        let mapping = mapping_with(vec![
            MappingRule::direct("a", "out"),
            MappingRule::direct("b", "out"),
        ]);
        assert_eq!(mapping.duplicate_target_fields(), vec!["out"]);
        assert!(mapping.validate_structure().is_err());
    }

    #[test]
    fn test_cardinality_wire_form() {
        let json = serde_json::to_string(&Cardinality::OneToMany).unwrap();
        assert_eq!(json, "\"1:N\"");
        let parsed: Cardinality = serde_json::from_str("\"N:1\"").unwrap();
        assert_eq!(parsed, Cardinality::ManyToOne);
    }

    #[test]
    fn test_execution_stats_rolling_average() {
        let mut stats = ExecutionStats::default();
        let now = Utc::now();
        stats.record(true, 10, 10, 0, 100, None, now);
        stats.record(false, 5, 0, 5, 300, Some("boom".into()), now);

        assert_eq!(stats.total_executions, 2);
        assert!((stats.avg_duration_ms - 200.0).abs() < f64::EPSILON);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.last_error.as_deref(), Some("boom"));
    }
}
