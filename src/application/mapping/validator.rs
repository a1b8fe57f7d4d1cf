//! Mapping validator module
//!
//! Static pre-save / pre-preview pass over a mapping and its two schemas.
//! Produces errors (the mapping cannot run), warnings (it can run but may
//! lose data), coverage percentages and auto-mapper suggestions. Never part
//! of the execution hot path.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::entities::{Mapping, MappingRule, RuleKind, Schema};
use crate::domain::value_objects::{name_similarity, UniversalType};

use crate::application::sandbox::Sandbox;
use crate::application::transforms::TransformRegistry;

/// How many unused source columns the report lists before truncating
const UNUSED_SOURCE_CAP: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationIssue {
    pub message: String,
    /// Field the issue concerns, when attributable
    pub field: Option<String>,
}

impl ValidationIssue {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    fn on_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

/// Proposed rule for an unmapped required target column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingSuggestion {
    pub target_field: String,
    pub suggested_source: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct CoverageMetrics {
    /// Percentage of source columns referenced by at least one rule
    pub source_field_coverage: f64,
    /// Percentage of target columns assigned by at least one rule
    pub target_field_coverage: f64,
    /// Percentage of required target columns covered by a non-conditional rule
    pub required_field_coverage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub coverage: CoverageMetrics,
    pub suggestions: Vec<MappingSuggestion>,
    /// Source columns no rule reads, capped at five
    pub unused_source_columns: Vec<String>,
}

/// Static mapping checker
#[derive(Debug, Clone, Copy, Default)]
pub struct MappingValidator {
    sandbox: Sandbox,
}

/// Root segment of a dotted path; rules address columns by their first
/// segment and may drill into document-typed columns below it
fn root_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

impl MappingValidator {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    /// Runs the full static pass
    pub fn validate(
        &self,
        mapping: &Mapping,
        source_schema: &Schema,
        target_schema: &Schema,
    ) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Structural.
        if mapping.source_schema_id != source_schema.id {
            errors.push(ValidationIssue::new(
                "mapping does not reference the given source schema",
            ));
        }
        if mapping.target_schema_id != target_schema.id {
            errors.push(ValidationIssue::new(
                "mapping does not reference the given target schema",
            ));
        }
        if mapping.rules.is_empty() {
            errors.push(ValidationIssue::new("mapping has no rules"));
        }

        // 2. References.
        for rule in &mapping.rules {
            for source in self.rule_source_roots(rule) {
                if source_schema.find_column(source).is_none() {
                    errors.push(ValidationIssue::on_field(
                        format!("source field '{}' does not exist in schema '{}'",
                            source, source_schema.name),
                        source,
                    ));
                }
            }
            let target_root = root_segment(&rule.target_field);
            if target_schema.find_column(target_root).is_none() {
                errors.push(ValidationIssue::on_field(
                    format!(
                        "target field '{}' does not exist in schema '{}'",
                        target_root, target_schema.name
                    ),
                    target_root,
                ));
            }
        }

        // 3. Required closure: every required target column needs at least
        // one rule that can actually fire.
        let covering_targets: HashSet<&str> = mapping
            .rules
            .iter()
            .filter(|rule| Self::can_always_fire(rule))
            .map(|rule| root_segment(&rule.target_field))
            .collect();
        let required_targets: Vec<&str> = target_schema
            .required_columns()
            .map(|c| c.name.as_str())
            .collect();
        let mut unmapped_required = Vec::new();
        for column in &required_targets {
            if !covering_targets.contains(column) {
                unmapped_required.push(*column);
                errors.push(ValidationIssue::on_field(
                    format!("required target column '{}' is not mapped", column),
                    *column,
                ));
            }
        }

        // 4. Target uniqueness.
        for duplicate in mapping.duplicate_target_fields() {
            errors.push(ValidationIssue::on_field(
                format!("target field '{}' is assigned more than once", duplicate),
                duplicate,
            ));
        }

        // 5. Per-rule parameter checks.
        for rule in &mapping.rules {
            self.check_rule(rule, &mut errors);
        }

        // 6. Type compatibility on direct rules.
        for rule in &mapping.rules {
            if rule.kind != RuleKind::Direct {
                continue;
            }
            let source_column = source_schema.find_column(root_segment(&rule.source_field));
            let target_column = target_schema.find_column(root_segment(&rule.target_field));
            if let (Some(source), Some(target)) = (source_column, target_column) {
                self.check_types(source.universal_type, target.universal_type, rule, &mut errors, &mut warnings);
            }
        }

        // 7. Whole-mapping expression.
        if let Some(expression) = &mapping.expression {
            if let Err(e) = self.sandbox.check(expression) {
                errors.push(ValidationIssue::new(format!("mapping expression rejected: {}", e)));
            }
        }

        let coverage = self.coverage(mapping, source_schema, target_schema, &required_targets);
        let suggestions = self.suggest(&unmapped_required, source_schema);
        let unused_source_columns = self.unused_sources(mapping, source_schema);

        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
            coverage,
            suggestions,
            unused_source_columns,
        }
    }

    /// Source column roots a rule reads
    fn rule_source_roots<'a>(&self, rule: &'a MappingRule) -> Vec<&'a str> {
        let mut roots = Vec::new();
        if rule.kind == RuleKind::Formula {
            // Formula inputs are free identifiers; reference checking is the
            // sandbox's job at runtime.
            return roots;
        }
        if !rule.source_fields.is_empty() {
            roots.extend(rule.source_fields.iter().map(|f| root_segment(f)));
        } else if !rule.source_field.is_empty() {
            roots.push(root_segment(&rule.source_field));
        }
        if let Some(expand) = &rule.expand_field {
            roots.push(root_segment(expand));
        }
        roots
    }

    /// A rule counts toward required-closure when it is not conditional and
    /// its predicate is not statically false
    fn can_always_fire(rule: &MappingRule) -> bool {
        if rule.kind == RuleKind::Conditional {
            return rule.default_value.is_some();
        }
        match rule.predicate.as_deref() {
            Some(predicate) => predicate.trim() != "false" || rule.default_value.is_some(),
            None => true,
        }
    }

    fn check_rule(&self, rule: &MappingRule, errors: &mut Vec<ValidationIssue>) {
        match rule.kind {
            RuleKind::Split => {
                if rule.param_str("delimiter").is_none() {
                    errors.push(ValidationIssue::on_field(
                        "split rule requires params.delimiter",
                        rule.target_field.clone(),
                    ));
                }
                if rule.param_i64("index").is_some_and(|i| i < 0) {
                    errors.push(ValidationIssue::on_field(
                        "split rule index must be non-negative",
                        rule.target_field.clone(),
                    ));
                }
            }
            RuleKind::Lookup => {
                if rule.params.get("lookup_table").is_none() {
                    errors.push(ValidationIssue::on_field(
                        "lookup rule requires params.lookup_table",
                        rule.target_field.clone(),
                    ));
                }
            }
            RuleKind::Formula => match rule.param_str("formula") {
                Some(formula) => {
                    if let Err(e) = self.sandbox.check(formula) {
                        errors.push(ValidationIssue::on_field(
                            format!("formula rejected: {}", e),
                            rule.target_field.clone(),
                        ));
                    }
                }
                None => errors.push(ValidationIssue::on_field(
                    "formula rule requires params.formula",
                    rule.target_field.clone(),
                )),
            },
            RuleKind::Conditional => match &rule.predicate {
                Some(predicate) => {
                    if let Err(e) = self.sandbox.check(predicate) {
                        errors.push(ValidationIssue::on_field(
                            format!("predicate rejected: {}", e),
                            rule.target_field.clone(),
                        ));
                    }
                }
                None => errors.push(ValidationIssue::on_field(
                    "conditional rule requires a predicate",
                    rule.target_field.clone(),
                )),
            },
            RuleKind::Transform => {
                let registry = TransformRegistry::standard();
                match rule.param_str("function") {
                    Some(function) => match registry.lookup(function) {
                        Some(spec) => {
                            let supplied = 1 + rule
                                .params
                                .get("args")
                                .and_then(|v| v.as_array())
                                .map_or(0, |a| a.len());
                            if supplied > spec.max_args {
                                errors.push(ValidationIssue::on_field(
                                    format!(
                                        "'{}' takes at most {} arguments, rule supplies {}",
                                        spec.name, spec.max_args, supplied
                                    ),
                                    rule.target_field.clone(),
                                ));
                            }
                        }
                        None => errors.push(ValidationIssue::on_field(
                            format!("unknown transform function '{}'", function),
                            rule.target_field.clone(),
                        )),
                    },
                    None => errors.push(ValidationIssue::on_field(
                        "transform rule requires params.function",
                        rule.target_field.clone(),
                    )),
                }
            }
            _ => {}
        }
        // Predicates are checked wherever present, not only on conditionals.
        if rule.kind != RuleKind::Conditional {
            if let Some(predicate) = &rule.predicate {
                if let Err(e) = self.sandbox.check(predicate) {
                    errors.push(ValidationIssue::on_field(
                        format!("predicate rejected: {}", e),
                        rule.target_field.clone(),
                    ));
                }
            }
        }
    }

    fn check_types(
        &self,
        source: UniversalType,
        target: UniversalType,
        rule: &MappingRule,
        errors: &mut Vec<ValidationIssue>,
        warnings: &mut Vec<ValidationIssue>,
    ) {
        if !source.is_compatible(target) {
            errors.push(ValidationIssue::on_field(
                format!(
                    "cannot map {} '{}' to {} '{}'",
                    source, rule.source_field, target, rule.target_field
                ),
                rule.target_field.clone(),
            ));
        } else if source.is_lossy(target) {
            warnings.push(ValidationIssue::on_field(
                format!(
                    "mapping {} '{}' to {} '{}' may lose information",
                    source, rule.source_field, target, rule.target_field
                ),
                rule.target_field.clone(),
            ));
        }
    }

    fn coverage(
        &self,
        mapping: &Mapping,
        source_schema: &Schema,
        target_schema: &Schema,
        required_targets: &[&str],
    ) -> CoverageMetrics {
        let used_sources: HashSet<&str> = mapping
            .rules
            .iter()
            .flat_map(|rule| self.rule_source_roots(rule))
            .collect();
        let assigned_targets: HashSet<&str> = mapping
            .rules
            .iter()
            .map(|rule| root_segment(&rule.target_field))
            .collect();
        let covering_targets: HashSet<&str> = mapping
            .rules
            .iter()
            .filter(|rule| Self::can_always_fire(rule))
            .map(|rule| root_segment(&rule.target_field))
            .collect();

        let percentage = |hit: usize, total: usize| {
            if total == 0 {
                100.0
            } else {
                hit as f64 * 100.0 / total as f64
            }
        };

        let source_hits = source_schema
            .columns
            .iter()
            .filter(|c| used_sources.contains(c.name.as_str()))
            .count();
        let target_hits = target_schema
            .columns
            .iter()
            .filter(|c| assigned_targets.contains(c.name.as_str()))
            .count();
        let required_hits = required_targets
            .iter()
            .filter(|c| covering_targets.contains(**c))
            .count();

        CoverageMetrics {
            source_field_coverage: percentage(source_hits, source_schema.columns.len()),
            target_field_coverage: percentage(target_hits, target_schema.columns.len()),
            required_field_coverage: percentage(required_hits, required_targets.len()),
        }
    }

    /// For every unmapped required target, the most similar source column
    fn suggest(&self, unmapped_required: &[&str], source_schema: &Schema) -> Vec<MappingSuggestion> {
        unmapped_required
            .iter()
            .filter_map(|target| {
                source_schema
                    .columns
                    .iter()
                    .map(|c| (c.name.as_str(), name_similarity(&c.name, target)))
                    .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(source, similarity)| MappingSuggestion {
                        target_field: (*target).to_string(),
                        suggested_source: source.to_string(),
                        similarity,
                    })
            })
            .collect()
    }

    fn unused_sources(&self, mapping: &Mapping, source_schema: &Schema) -> Vec<String> {
        let used: HashSet<&str> = mapping
            .rules
            .iter()
            .flat_map(|rule| self.rule_source_roots(rule))
            .collect();
        source_schema
            .columns
            .iter()
            .filter(|c| !used.contains(c.name.as_str()))
            .take(UNUSED_SOURCE_CAP)
            .map(|c| c.name.clone())
            .collect()
    }
}
