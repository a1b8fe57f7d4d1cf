//! Group aggregation for N:1 and N:N mappings

use crate::domain::entities::Aggregation;
use crate::domain::value_objects::Value;

/// Computes one aggregation over a group's values for a source field
///
/// `sum`, `avg` and `count` consider non-null values only; `min`/`max`
/// coerce numerically; `first`/`last` follow group order; `concat` joins
/// string forms, skipping nulls. Empty groups yield `count = 0`, `sum = 0`,
/// an empty concat string and null for everything else.
pub fn aggregate_field(
    aggregation: Aggregation,
    group: &[Value],
    source_field: &str,
    separator: &str,
) -> Value {
    let values: Vec<&Value> = group
        .iter()
        .map(|record| record.get_path(source_field).unwrap_or(&Value::Null))
        .collect();
    let non_null: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();

    match aggregation {
        Aggregation::Count => Value::Int(non_null.len() as i64),
        Aggregation::Sum => Value::Float(non_null.iter().filter_map(|v| v.as_f64()).sum()),
        Aggregation::Avg => {
            let numbers: Vec<f64> = non_null.iter().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Aggregation::Min => non_null
            .iter()
            .filter_map(|v| v.as_f64())
            .fold(None::<f64>, |acc, x| Some(acc.map_or(x, |m| m.min(x))))
            .map_or(Value::Null, Value::Float),
        Aggregation::Max => non_null
            .iter()
            .filter_map(|v| v.as_f64())
            .fold(None::<f64>, |acc, x| Some(acc.map_or(x, |m| m.max(x))))
            .map_or(Value::Null, Value::Float),
        Aggregation::First => values.first().copied().cloned().unwrap_or(Value::Null),
        Aggregation::Last => values.last().copied().cloned().unwrap_or(Value::Null),
        Aggregation::Concat => Value::String(
            non_null
                .iter()
                .map(|v| v.coerce_string())
                .collect::<Vec<_>>()
                .join(separator),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(ns: &[Option<i64>]) -> Vec<Value> {
        ns.iter()
            .map(|n| {
                let mut record = Value::empty_object();
                record.set_path("x", n.map_or(Value::Null, Value::Int));
                record
            })
            .collect()
    }

    #[test]
    fn test_sum_avg_count_skip_nulls() {
        let g = group(&[Some(1), None, Some(3)]);
        assert_eq!(aggregate_field(Aggregation::Sum, &g, "x", ""), Value::Float(4.0));
        assert_eq!(aggregate_field(Aggregation::Avg, &g, "x", ""), Value::Float(2.0));
        assert_eq!(aggregate_field(Aggregation::Count, &g, "x", ""), Value::Int(2));
    }

    #[test]
    fn test_min_max() {
        let g = group(&[Some(5), Some(-2), Some(9)]);
        assert_eq!(aggregate_field(Aggregation::Min, &g, "x", ""), Value::Float(-2.0));
        assert_eq!(aggregate_field(Aggregation::Max, &g, "x", ""), Value::Float(9.0));
    }

    #[test]
    fn test_first_last_follow_group_order() {
        let g = group(&[None, Some(2), Some(3)]);
        assert_eq!(aggregate_field(Aggregation::First, &g, "x", ""), Value::Null);
        assert_eq!(aggregate_field(Aggregation::Last, &g, "x", ""), Value::Int(3));
    }

    #[test]
    fn test_concat() {
        let g = group(&[Some(1), None, Some(2)]);
        assert_eq!(
            aggregate_field(Aggregation::Concat, &g, "x", "-"),
            Value::String("1-2".into())
        );
    }

    #[test]
    fn test_empty_group_defaults() {
        let g: Vec<Value> = Vec::new();
        assert_eq!(aggregate_field(Aggregation::Count, &g, "x", ""), Value::Int(0));
        assert_eq!(aggregate_field(Aggregation::Sum, &g, "x", ""), Value::Float(0.0));
        assert_eq!(aggregate_field(Aggregation::Avg, &g, "x", ""), Value::Null);
        assert_eq!(aggregate_field(Aggregation::Min, &g, "x", ""), Value::Null);
        assert_eq!(aggregate_field(Aggregation::First, &g, "x", ""), Value::Null);
        assert_eq!(
            aggregate_field(Aggregation::Concat, &g, "x", ","),
            Value::String(String::new())
        );
    }
}
