//! Mapping engine module
//!
//! Applies a mapping's ordered rule list to a batch of source records and
//! produces target records. The engine is pure over (mapping, batch,
//! current time): no persistence, no connector calls, and identical inputs
//! produce byte-identical output batches.

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::domain::entities::{Aggregation, Cardinality, Mapping, MappingRule, RuleKind, ValidationRule};
use crate::domain::error::{CoreError, SandboxError};
use crate::domain::value_objects::{TypeCategory, Value};

use crate::application::sandbox::Sandbox;
use crate::application::transforms::TransformRegistry;

use super::aggregate::aggregate_field;

/// Result of applying a mapping to one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingOutput {
    /// Target records in source order; 1:N expansions appear contiguously
    pub records: Vec<Value>,
    pub source_count: u64,
    pub error_count: u64,
    pub warnings: Vec<String>,
}

/// Per-record outcome returned by preview so operators can debug mappings
pub type PreviewOutcome = Result<Vec<Value>, String>;

/// Failure of a single record; the batch decides whether it is fatal
#[derive(Debug)]
struct RecordError(String);

struct RecordContext {
    warnings: Vec<String>,
}

/// Applies mappings to record batches
#[derive(Debug, Clone, Copy, Default)]
pub struct MappingEngine {
    sandbox: Sandbox,
}

impl MappingEngine {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    /// Applies a mapping to a batch
    ///
    /// Per-record failures either abort the batch (the default) or are
    /// counted and skipped when the mapping sets `continue_on_error`.
    ///
    /// # Arguments
    ///
    /// * `mapping` - The mapping to apply
    /// * `batch` - Source records, in source order
    /// * `now` - Frozen evaluation instant exposed to expressions as `now`
    pub fn apply(
        &self,
        mapping: &Mapping,
        batch: &[Value],
        now: DateTime<Utc>,
    ) -> Result<MappingOutput, CoreError> {
        let mut output = MappingOutput {
            source_count: batch.len() as u64,
            ..Default::default()
        };

        match mapping.cardinality {
            Cardinality::OneToOne | Cardinality::OneToMany => {
                for record in batch {
                    match self.map_record(mapping, record, now) {
                        Ok((records, warnings)) => {
                            output.records.extend(records);
                            output.warnings.extend(warnings);
                        }
                        Err(RecordError(message)) => {
                            output.error_count += 1;
                            if !mapping.continue_on_error {
                                return Err(CoreError::validation(message));
                            }
                            output.warnings.push(message);
                        }
                    }
                }
            }
            Cardinality::ManyToOne | Cardinality::ManyToMany => {
                if batch.is_empty() {
                    return Ok(output);
                }
                match self.map_group(mapping, batch, now) {
                    Ok((records, warnings)) => {
                        output.records.extend(records);
                        output.warnings.extend(warnings);
                    }
                    Err(RecordError(message)) => {
                        output.error_count += 1;
                        if !mapping.continue_on_error {
                            return Err(CoreError::validation(message));
                        }
                        output.warnings.push(message);
                    }
                }
            }
        }

        debug!(
            mapping = %mapping.name,
            source = output.source_count,
            produced = output.records.len(),
            errors = output.error_count,
            "batch mapped"
        );
        Ok(output)
    }

    /// Applies the mapping record by record, returning per-record outcomes
    ///
    /// This is the preview surface: nothing is persisted and errors never
    /// abort the whole batch.
    pub fn preview(
        &self,
        mapping: &Mapping,
        batch: &[Value],
        now: DateTime<Utc>,
    ) -> Vec<PreviewOutcome> {
        batch
            .iter()
            .map(|record| {
                self.map_record(mapping, record, now)
                    .map(|(records, _)| records)
                    .map_err(|RecordError(message)| message)
            })
            .collect()
    }

    /// Maps one source record into one or more target records
    fn map_record(
        &self,
        mapping: &Mapping,
        record: &Value,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Value>, Vec<String>), RecordError> {
        let bindings = self.bindings_for(record, now);
        let expansion = mapping
            .rules
            .iter()
            .find_map(|rule| rule.expand_field.as_deref())
            .filter(|_| {
                matches!(
                    mapping.cardinality,
                    Cardinality::OneToMany | Cardinality::ManyToMany
                )
            });

        let mut context = RecordContext { warnings: Vec::new() };
        let records = match expansion {
            Some(expand_field) => {
                let elements = match bindings.get_path(expand_field) {
                    Some(Value::Array(items)) => items.clone(),
                    Some(Value::Null) | None => Vec::new(),
                    Some(single) => vec![single.clone()],
                };
                let mut out = Vec::with_capacity(elements.len());
                for element in elements {
                    let mut expanded = bindings.clone();
                    expanded.set_path(expand_field, element);
                    out.push(self.apply_rules(mapping, &expanded, None, &mut context)?);
                }
                out
            }
            None => vec![self.apply_rules(mapping, &bindings, None, &mut context)?],
        };
        Ok((records, context.warnings))
    }

    /// Maps a whole batch as one group (N:1), expanding afterwards for N:N
    fn map_group(
        &self,
        mapping: &Mapping,
        batch: &[Value],
        now: DateTime<Utc>,
    ) -> Result<(Vec<Value>, Vec<String>), RecordError> {
        // Non-aggregate rules read the first element of the group.
        let first = self.bindings_for(&batch[0], now);
        let mut context = RecordContext { warnings: Vec::new() };

        match mapping.cardinality {
            Cardinality::ManyToMany => {
                let expansion = mapping
                    .rules
                    .iter()
                    .find_map(|rule| rule.expand_field.as_deref());
                match expansion {
                    Some(expand_field) => {
                        let elements = match first.get_path(expand_field) {
                            Some(Value::Array(items)) => items.clone(),
                            Some(Value::Null) | None => Vec::new(),
                            Some(single) => vec![single.clone()],
                        };
                        let mut out = Vec::with_capacity(elements.len());
                        for element in elements {
                            let mut expanded = first.clone();
                            expanded.set_path(expand_field, element);
                            out.push(self.apply_rules(mapping, &expanded, Some(batch), &mut context)?);
                        }
                        Ok((out, context.warnings))
                    }
                    None => {
                        let record = self.apply_rules(mapping, &first, Some(batch), &mut context)?;
                        Ok((vec![record], context.warnings))
                    }
                }
            }
            _ => {
                let record = self.apply_rules(mapping, &first, Some(batch), &mut context)?;
                Ok((vec![record], context.warnings))
            }
        }
    }

    fn bindings_for(&self, record: &Value, now: DateTime<Utc>) -> Value {
        let mut bindings = record.clone();
        // Frozen clock; only injected when the record does not carry a
        // field of the same name.
        if bindings.get_path("now").is_none() {
            bindings.set_path(
                "now",
                Value::String(now.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string()),
            );
        }
        bindings
    }

    /// Runs the ordered rule list and the whole-mapping expression
    fn apply_rules(
        &self,
        mapping: &Mapping,
        bindings: &Value,
        group: Option<&[Value]>,
        context: &mut RecordContext,
    ) -> Result<Value, RecordError> {
        let mut target = Value::empty_object();

        for rule in &mapping.rules {
            // Step 1: predicate. False means the rule yields its default.
            if let Some(predicate) = &rule.predicate {
                match self.sandbox.evaluate_predicate(predicate, bindings) {
                    Ok(true) => {}
                    Ok(false) => {
                        let fallback = rule
                            .default_value
                            .clone()
                            .map(Value::from)
                            .unwrap_or(Value::Null);
                        target.set_path(&rule.target_field, fallback);
                        continue;
                    }
                    Err(e) => {
                        self.handle_rule_failure(rule, e, &mut target, context)?;
                        continue;
                    }
                }
            }

            // Step 2: kind dispatch.
            let value = match self.rule_value(rule, bindings, group) {
                Ok(value) => value,
                Err(RuleFailure::Fatal(message)) => return Err(RecordError(message)),
                Err(RuleFailure::Sandbox(e)) => {
                    self.handle_rule_failure(rule, e, &mut target, context)?;
                    continue;
                }
            };

            // Step 3: a required rule must produce a value.
            let value = match (value.is_null(), &rule.default_value) {
                (true, Some(default)) => Value::from(default.clone()),
                (true, None) if rule.required => {
                    return Err(RecordError(format!(
                        "required field '{}' resolved to null",
                        rule.target_field
                    )));
                }
                (_, _) => value,
            };

            // Step 4: dotted-path assignment.
            target.set_path(&rule.target_field, value);
        }

        // The whole-mapping expression runs after the rule list; an object
        // result replaces the built record.
        if let Some(expression) = &mapping.expression {
            let mut expr_bindings = Value::empty_object();
            expr_bindings.set_path("source", bindings.clone());
            expr_bindings.set_path("target", target.clone());
            match self.sandbox.evaluate(expression, &expr_bindings) {
                Ok(result @ Value::Object(_)) => target = result,
                Ok(_) => context.warnings.push(
                    "mapping expression did not produce an object; keeping rule output".to_string(),
                ),
                Err(e) => {
                    return Err(RecordError(format!("mapping expression failed: {}", e)));
                }
            }
        }

        self.apply_validation_rules(&mapping.validation_rules, &target)?;
        Ok(target)
    }

    fn handle_rule_failure(
        &self,
        rule: &MappingRule,
        error: SandboxError,
        target: &mut Value,
        context: &mut RecordContext,
    ) -> Result<(), RecordError> {
        if rule.required {
            return Err(RecordError(format!(
                "rule for '{}' failed: {}",
                rule.target_field, error
            )));
        }
        context
            .warnings
            .push(format!("rule for '{}' degraded: {}", rule.target_field, error));
        let fallback = rule
            .default_value
            .clone()
            .map(Value::from)
            .unwrap_or(Value::Null);
        target.set_path(&rule.target_field, fallback);
        Ok(())
    }

    fn rule_value(
        &self,
        rule: &MappingRule,
        bindings: &Value,
        group: Option<&[Value]>,
    ) -> Result<Value, RuleFailure> {
        // Aggregations take precedence inside a grouped application.
        if let (Some(aggregation), Some(group)) = (rule.aggregation, group) {
            let separator = rule.param_str("separator").unwrap_or("");
            return Ok(aggregate_field(
                aggregation,
                group,
                &rule.source_field,
                separator,
            ));
        }

        let source_value = bindings
            .get_path(&rule.source_field)
            .cloned()
            .unwrap_or(Value::Null);

        match rule.kind {
            RuleKind::Direct | RuleKind::Conditional => Ok(source_value),
            RuleKind::Transform => {
                let function = rule
                    .param_str("function")
                    .ok_or_else(|| RuleFailure::Fatal("transform rule missing 'function'".into()))?;
                let registry = TransformRegistry::standard();
                if registry.lookup(function).is_none() {
                    return Err(RuleFailure::Fatal(format!(
                        "unknown transform function '{}'",
                        function
                    )));
                }
                let mut args = vec![source_value];
                if let Some(extra) = rule.params.get("args").and_then(|v| v.as_array()) {
                    args.extend(extra.iter().cloned().map(Value::from));
                }
                registry
                    .call(function, &args)
                    .map_err(|e| RuleFailure::Sandbox(SandboxError::Runtime(e.to_string())))
            }
            RuleKind::Concat => {
                let separator = rule.param_str("separator").unwrap_or("");
                let fields: Vec<&str> = if rule.source_fields.is_empty() {
                    vec![rule.source_field.as_str()]
                } else {
                    rule.source_fields.iter().map(String::as_str).collect()
                };
                let joined = fields
                    .iter()
                    .filter_map(|field| bindings.get_path(field))
                    .filter(|v| !v.is_null())
                    .map(Value::coerce_string)
                    .collect::<Vec<_>>()
                    .join(separator);
                Ok(Value::String(joined))
            }
            RuleKind::Split => {
                if source_value.is_null() {
                    return Ok(Value::Null);
                }
                let delimiter = rule
                    .param_str("delimiter")
                    .ok_or_else(|| RuleFailure::Fatal("split rule missing 'delimiter'".into()))?;
                let index = rule.param_i64("index").unwrap_or(0);
                if index < 0 {
                    return Ok(Value::Null);
                }
                let text = source_value.coerce_string();
                Ok(text
                    .split(delimiter)
                    .nth(index as usize)
                    .map(|part| Value::String(part.to_string()))
                    .unwrap_or(Value::Null))
            }
            RuleKind::Lookup => {
                let table = rule.params.get("lookup_table").ok_or_else(|| {
                    RuleFailure::Fatal("lookup rule missing 'lookup_table'".into())
                })?;
                let serde_json::Value::Object(table) = table else {
                    // Remote lookup sources are not part of the core.
                    return Err(RuleFailure::Fatal(
                        "lookup_table must be an object literal".into(),
                    ));
                };
                let key = source_value.coerce_string();
                Ok(table.get(&key).cloned().map(Value::from).unwrap_or(Value::Null))
            }
            RuleKind::Formula => {
                let formula = rule
                    .param_str("formula")
                    .ok_or_else(|| RuleFailure::Fatal("formula rule missing 'formula'".into()))?;
                self.sandbox
                    .evaluate(formula, bindings)
                    .map_err(RuleFailure::Sandbox)
            }
            RuleKind::Aggregate => {
                // Outside a group, aggregate over the array at the source
                // path.
                let aggregation = rule.aggregation.unwrap_or(Aggregation::First);
                let separator = rule.param_str("separator").unwrap_or("");
                match source_value {
                    Value::Array(items) => {
                        // Aggregate over plain elements by wrapping each in
                        // a record keyed "value".
                        let group: Vec<Value> = items
                            .into_iter()
                            .map(|item| {
                                let mut wrapper = Value::empty_object();
                                wrapper.set_path("value", item);
                                wrapper
                            })
                            .collect();
                        Ok(aggregate_field(aggregation, &group, "value", separator))
                    }
                    Value::Null => Ok(Value::Null),
                    other => Ok(other),
                }
            }
        }
    }

    fn apply_validation_rules(
        &self,
        rules: &[ValidationRule],
        record: &Value,
    ) -> Result<(), RecordError> {
        for rule in rules {
            let value = record.get_path(&rule.field).unwrap_or(&Value::Null);
            if value.is_null() {
                if rule.required {
                    return Err(RecordError(format!(
                        "validation: field '{}' is required",
                        rule.field
                    )));
                }
                continue;
            }
            if let Some(expected) = rule.expected_type {
                let actual_category = match value {
                    Value::Bool(_) => Some(TypeCategory::Boolean),
                    Value::Int(_) | Value::Float(_) => Some(TypeCategory::Numeric),
                    Value::String(_) => Some(TypeCategory::Text),
                    _ => None,
                };
                let expected_category = expected.category();
                let matches = match expected_category {
                    TypeCategory::DateTime => matches!(value, Value::String(_)),
                    TypeCategory::Complex => {
                        matches!(value, Value::Array(_) | Value::Object(_))
                    }
                    other => actual_category == Some(other),
                };
                if !matches {
                    return Err(RecordError(format!(
                        "validation: field '{}' is not a {}",
                        rule.field, expected
                    )));
                }
            }
            if let Some(format) = &rule.format {
                let re = Regex::new(format).map_err(|e| {
                    RecordError(format!("validation: bad format for '{}': {}", rule.field, e))
                })?;
                if !re.is_match(&value.coerce_string()) {
                    return Err(RecordError(format!(
                        "validation: field '{}' does not match format",
                        rule.field
                    )));
                }
            }
            if let Some(number) = value.as_f64() {
                if rule.min.is_some_and(|min| number < min)
                    || rule.max.is_some_and(|max| number > max)
                {
                    return Err(RecordError(format!(
                        "validation: field '{}' out of range",
                        rule.field
                    )));
                }
            }
            let length = value.coerce_string().chars().count();
            if rule.min_length.is_some_and(|min| length < min)
                || rule.max_length.is_some_and(|max| length > max)
            {
                return Err(RecordError(format!(
                    "validation: field '{}' has invalid length",
                    rule.field
                )));
            }
        }
        Ok(())
    }
}

enum RuleFailure {
    /// Aborts the record regardless of the rule's `required` flag
    Fatal(String),
    /// Subject to the required/default failure policy
    Sandbox(SandboxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Cardinality;
    use uuid::Uuid;

    fn record(json: &str) -> Value {
        Value::from(serde_json::from_str::<serde_json::Value>(json).unwrap())
    }

    fn mapping(cardinality: Cardinality, rules: Vec<MappingRule>) -> Mapping {
        Mapping::new(
            "test",
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            cardinality,
        )
        .with_rules(rules)
    }

    fn engine() -> MappingEngine {
        MappingEngine::default()
    }

    #[test]
    fn test_direct_and_transform_one_to_one() {
        let m = mapping(
            Cardinality::OneToOne,
            vec![
                MappingRule::direct("a", "out.x"),
                MappingRule::transform("b", "out.y", "number.round", vec![serde_json::json!(0)]),
            ],
        );
        let out = engine()
            .apply(&m, &[record(r#"{"a": "X", "b": 3.2}"#)], Utc::now())
            .unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0], record(r#"{"out": {"x": "X", "y": 3}}"#));
        assert_eq!(out.error_count, 0);
    }

    #[test]
    fn test_expand_one_to_many() {
        let mut tag_rule = MappingRule::direct("tag", "tag");
        tag_rule.expand_field = Some("items".to_string());
        let m = mapping(
            Cardinality::OneToMany,
            vec![tag_rule, MappingRule::direct("items", "value")],
        );
        let out = engine()
            .apply(&m, &[record(r#"{"items": [1, 2, 3], "tag": "t"}"#)], Utc::now())
            .unwrap();
        let produced: Vec<Value> = out.records;
        assert_eq!(
            produced,
            vec![
                record(r#"{"tag": "t", "value": 1}"#),
                record(r#"{"tag": "t", "value": 2}"#),
                record(r#"{"tag": "t", "value": 3}"#),
            ]
        );
    }

    #[test]
    fn test_group_aggregation_many_to_one() {
        let mut total = MappingRule::direct("amount", "total");
        total.aggregation = Some(Aggregation::Sum);
        let mut count = MappingRule::direct("amount", "orders");
        count.aggregation = Some(Aggregation::Count);
        let m = mapping(
            Cardinality::ManyToOne,
            vec![MappingRule::direct("customer", "customer"), total, count],
        );
        let batch = vec![
            record(r#"{"customer": "kim", "amount": 10}"#),
            record(r#"{"customer": "kim", "amount": 15}"#),
        ];
        let out = engine().apply(&m, &batch, Utc::now()).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(
            out.records[0],
            record(r#"{"customer": "kim", "orders": 2, "total": 25.0}"#)
        );
    }

    #[test]
    fn test_empty_batch_produces_empty_output() {
        let m = mapping(Cardinality::ManyToOne, vec![MappingRule::direct("a", "a")]);
        let out = engine().apply(&m, &[], Utc::now()).unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.error_count, 0);
    }

    #[test]
    fn test_predicate_false_uses_default() {
        let mut rule = MappingRule::direct("score", "grade");
        rule.predicate = Some("score >= 60".to_string());
        rule.default_value = Some(serde_json::json!("fail"));
        let m = mapping(Cardinality::OneToOne, vec![rule]);
        let out = engine()
            .apply(&m, &[record(r#"{"score": 40}"#)], Utc::now())
            .unwrap();
        assert_eq!(out.records[0], record(r#"{"grade": "fail"}"#));
    }

    #[test]
    fn test_required_null_aborts_batch_by_default() {
        let mut rule = MappingRule::direct("missing", "out");
        rule.required = true;
        let m = mapping(Cardinality::OneToOne, vec![rule]);
        let err = engine().apply(&m, &[record("{}")], Utc::now());
        assert!(matches!(err, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_continue_on_error_counts_and_skips() {
        let mut rule = MappingRule::direct("missing", "out");
        rule.required = true;
        let mut m = mapping(Cardinality::OneToOne, vec![rule]);
        m.continue_on_error = true;
        let out = engine()
            .apply(&m, &[record("{}"), record(r#"{"missing": 1}"#)], Utc::now())
            .unwrap();
        assert_eq!(out.error_count, 1);
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn test_split_rule() {
        let mut rule = MappingRule::direct("full_name", "last");
        rule.kind = RuleKind::Split;
        rule.params = serde_json::json!({"delimiter": " ", "index": 1});
        let m = mapping(Cardinality::OneToOne, vec![rule]);
        let out = engine()
            .apply(&m, &[record(r#"{"full_name": "Kim Minsu"}"#)], Utc::now())
            .unwrap();
        assert_eq!(out.records[0], record(r#"{"last": "Minsu"}"#));
    }

    #[test]
    fn test_split_out_of_range_is_null() {
        let mut rule = MappingRule::direct("name", "part");
        rule.kind = RuleKind::Split;
        rule.params = serde_json::json!({"delimiter": ",", "index": 9});
        let m = mapping(Cardinality::OneToOne, vec![rule]);
        let out = engine()
            .apply(&m, &[record(r#"{"name": "a,b"}"#)], Utc::now())
            .unwrap();
        assert_eq!(out.records[0], record(r#"{"part": null}"#));
    }

    #[test]
    fn test_lookup_rule() {
        let mut rule = MappingRule::direct("code", "label");
        rule.kind = RuleKind::Lookup;
        rule.params = serde_json::json!({"lookup_table": {"A": "active", "D": "deleted"}});
        let m = mapping(Cardinality::OneToOne, vec![rule]);
        let out = engine()
            .apply(&m, &[record(r#"{"code": "A"}"#)], Utc::now())
            .unwrap();
        assert_eq!(out.records[0], record(r#"{"label": "active"}"#));
    }

    #[test]
    fn test_formula_rule() {
        let mut rule = MappingRule::direct("", "total");
        rule.kind = RuleKind::Formula;
        rule.params = serde_json::json!({"formula": "price * quantity"});
        let m = mapping(Cardinality::OneToOne, vec![rule]);
        let out = engine()
            .apply(&m, &[record(r#"{"price": 4, "quantity": 5}"#)], Utc::now())
            .unwrap();
        assert_eq!(out.records[0], record(r#"{"total": 20}"#));
    }

    #[test]
    fn test_concat_rule_skips_nulls() {
        let mut rule = MappingRule::direct("first", "full");
        rule.kind = RuleKind::Concat;
        rule.source_fields = vec!["first".into(), "middle".into(), "last".into()];
        rule.params = serde_json::json!({"separator": " "});
        let m = mapping(Cardinality::OneToOne, vec![rule]);
        let out = engine()
            .apply(
                &m,
                &[record(r#"{"first": "Kim", "middle": null, "last": "Minsu"}"#)],
                Utc::now(),
            )
            .unwrap();
        assert_eq!(out.records[0], record(r#"{"full": "Kim Minsu"}"#));
    }

    #[test]
    fn test_unknown_transform_is_fatal_even_when_optional() {
        let mut rule = MappingRule::transform("a", "out", "string.does_not_exist", vec![]);
        rule.required = false;
        let m = mapping(Cardinality::OneToOne, vec![rule]);
        assert!(engine()
            .apply(&m, &[record(r#"{"a": 1}"#)], Utc::now())
            .is_err());
    }

    #[test]
    fn test_optional_sandbox_failure_degrades_to_default() {
        let mut rule = MappingRule::direct("", "computed");
        rule.kind = RuleKind::Formula;
        rule.params = serde_json::json!({"formula": "unknown_binding + 1"});
        rule.default_value = Some(serde_json::json!(0));
        let m = mapping(
            Cardinality::OneToOne,
            vec![rule, MappingRule::direct("a", "a")],
        );
        let out = engine()
            .apply(&m, &[record(r#"{"a": 7}"#)], Utc::now())
            .unwrap();
        assert_eq!(out.records[0], record(r#"{"a": 7, "computed": 0}"#));
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_global_expression_replaces_target() {
        let mut m = mapping(Cardinality::OneToOne, vec![MappingRule::direct("a", "a")]);
        m.expression = Some("object.merge(target, source)".to_string());
        let out = engine()
            .apply(&m, &[record(r#"{"a": 1, "b": 2}"#)], Utc::now())
            .unwrap();
        // The expression merged the full source over the rule output.
        assert_eq!(out.records[0].get_path("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_identical_inputs_identical_outputs() {
        let m = mapping(
            Cardinality::OneToOne,
            vec![
                MappingRule::direct("z", "out.z"),
                MappingRule::direct("a", "out.a"),
            ],
        );
        let batch = vec![record(r#"{"a": 1, "z": 2}"#)];
        let now = Utc::now();
        let first = engine().apply(&m, &batch, now).unwrap();
        let second = engine().apply(&m, &batch, now).unwrap();
        let bytes_a = serde_json::to_vec(&first.records).unwrap();
        let bytes_b = serde_json::to_vec(&second.records).unwrap();
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn test_validation_rules_enforced() {
        let mut m = mapping(Cardinality::OneToOne, vec![MappingRule::direct("age", "age")]);
        m.validation_rules = vec![ValidationRule {
            field: "age".to_string(),
            required: true,
            min: Some(0.0),
            max: Some(150.0),
            ..Default::default()
        }];
        let ok = engine().apply(&m, &[record(r#"{"age": 30}"#)], Utc::now());
        assert!(ok.is_ok());
        let bad = engine().apply(&m, &[record(r#"{"age": 900}"#)], Utc::now());
        assert!(bad.is_err());
    }
}
