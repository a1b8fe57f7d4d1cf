//! Array transform functions

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::HashSet;

use crate::domain::value_objects::Value;

use super::{TransformError, TransformResult};

fn input_array(args: &[Value]) -> Result<Option<Vec<Value>>, TransformError> {
    match &args[0] {
        Value::Null => Ok(None),
        Value::Array(items) => Ok(Some(items.clone())),
        other => Err(TransformError::new(format!("expected an array, got {}", other))),
    }
}

/// Canonical key for identity comparisons; two values are "the same element"
/// when their JSON form matches
fn identity_key(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

pub fn first(args: &[Value]) -> TransformResult {
    Ok(input_array(args)?
        .and_then(|items| items.into_iter().next())
        .unwrap_or(Value::Null))
}

pub fn last(args: &[Value]) -> TransformResult {
    Ok(input_array(args)?
        .and_then(|items| items.into_iter().next_back())
        .unwrap_or(Value::Null))
}

pub fn unique(args: &[Value]) -> TransformResult {
    let Some(items) = input_array(args)? else {
        return Ok(Value::Null);
    };
    let mut seen = HashSet::new();
    let deduped: Vec<Value> = items
        .into_iter()
        .filter(|v| seen.insert(identity_key(v)))
        .collect();
    Ok(Value::Array(deduped))
}

fn flatten_into(items: Vec<Value>, depth: i64, out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) if depth > 0 => flatten_into(inner, depth - 1, out),
            other => out.push(other),
        }
    }
}

/// `flatten(array, depth = 1)`
pub fn flatten(args: &[Value]) -> TransformResult {
    let Some(items) = input_array(args)? else {
        return Ok(Value::Null);
    };
    let depth = args.get(1).and_then(Value::as_i64).unwrap_or(1).max(0);
    let mut out = Vec::new();
    flatten_into(items, depth, &mut out);
    Ok(Value::Array(out))
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.coerce_string().cmp(&b.coerce_string()),
    }
}

/// `sort(array, order = "asc", key?)`; `key` is a dotted path into elements
pub fn sort(args: &[Value]) -> TransformResult {
    let Some(mut items) = input_array(args)? else {
        return Ok(Value::Null);
    };
    let descending = args
        .get(1)
        .map(Value::coerce_string)
        .map(|o| o.eq_ignore_ascii_case("desc"))
        .unwrap_or(false);
    let key = args.get(2).filter(|v| !v.is_null()).map(Value::coerce_string);

    items.sort_by(|a, b| {
        let ordering = match &key {
            Some(path) => {
                let null = Value::Null;
                let ka = a.get_path(path).unwrap_or(&null);
                let kb = b.get_path(path).unwrap_or(&null);
                compare(ka, kb)
            }
            None => compare(a, b),
        };
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
    Ok(Value::Array(items))
}

pub fn chunk(args: &[Value]) -> TransformResult {
    let Some(items) = input_array(args)? else {
        return Ok(Value::Null);
    };
    let size = args
        .get(1)
        .and_then(Value::as_i64)
        .filter(|n| *n > 0)
        .ok_or_else(|| TransformError::new("chunk size must be a positive number"))?
        as usize;
    let chunks: Vec<Value> = items
        .chunks(size)
        .map(|c| Value::Array(c.to_vec()))
        .collect();
    Ok(Value::Array(chunks))
}

/// `group_by(array, key)` groups elements by the string form of a key path
pub fn group_by(args: &[Value]) -> TransformResult {
    let Some(items) = input_array(args)? else {
        return Ok(Value::Null);
    };
    let key = args
        .get(1)
        .map(Value::coerce_string)
        .ok_or_else(|| TransformError::new("group_by requires a key"))?;

    let mut groups: BTreeMap<String, Value> = BTreeMap::new();
    for item in items {
        let group = item
            .get_path(&key)
            .map(Value::coerce_string)
            .unwrap_or_default();
        match groups.entry(group).or_insert_with(|| Value::Array(Vec::new())) {
            Value::Array(bucket) => bucket.push(item),
            _ => unreachable!(),
        }
    }
    Ok(Value::Object(groups))
}

fn numeric_items(items: &[Value]) -> Vec<f64> {
    items.iter().filter_map(Value::as_f64).collect()
}

pub fn sum(args: &[Value]) -> TransformResult {
    let Some(items) = input_array(args)? else {
        return Ok(Value::Null);
    };
    Ok(Value::Float(numeric_items(&items).iter().sum()))
}

pub fn avg(args: &[Value]) -> TransformResult {
    let Some(items) = input_array(args)? else {
        return Ok(Value::Null);
    };
    let numbers = numeric_items(&items);
    if numbers.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64))
}

pub fn max(args: &[Value]) -> TransformResult {
    let Some(items) = input_array(args)? else {
        return Ok(Value::Null);
    };
    Ok(numeric_items(&items)
        .into_iter()
        .fold(None::<f64>, |acc, x| Some(acc.map_or(x, |m| m.max(x))))
        .map_or(Value::Null, Value::Float))
}

pub fn min(args: &[Value]) -> TransformResult {
    let Some(items) = input_array(args)? else {
        return Ok(Value::Null);
    };
    Ok(numeric_items(&items)
        .into_iter()
        .fold(None::<f64>, |acc, x| Some(acc.map_or(x, |m| m.min(x))))
        .map_or(Value::Null, Value::Float))
}

/// Removes nulls
pub fn compact(args: &[Value]) -> TransformResult {
    let Some(items) = input_array(args)? else {
        return Ok(Value::Null);
    };
    Ok(Value::Array(items.into_iter().filter(|v| !v.is_null()).collect()))
}

fn other_set(args: &[Value]) -> Result<HashSet<String>, TransformError> {
    match &args[1] {
        Value::Array(items) => Ok(items.iter().map(identity_key).collect()),
        Value::Null => Ok(HashSet::new()),
        other => Err(TransformError::new(format!("expected an array, got {}", other))),
    }
}

/// Elements of the first array absent from the second, order preserved
pub fn difference(args: &[Value]) -> TransformResult {
    let Some(items) = input_array(args)? else {
        return Ok(Value::Null);
    };
    let exclude = other_set(args)?;
    Ok(Value::Array(
        items
            .into_iter()
            .filter(|v| !exclude.contains(&identity_key(v)))
            .collect(),
    ))
}

pub fn intersection(args: &[Value]) -> TransformResult {
    let Some(items) = input_array(args)? else {
        return Ok(Value::Null);
    };
    let keep = other_set(args)?;
    let mut seen = HashSet::new();
    Ok(Value::Array(
        items
            .into_iter()
            .filter(|v| keep.contains(&identity_key(v)) && seen.insert(identity_key(v)))
            .collect(),
    ))
}

pub fn union(args: &[Value]) -> TransformResult {
    let Some(items) = input_array(args)? else {
        return Ok(Value::Null);
    };
    let second = match &args[1] {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => {
            return Err(TransformError::new(format!("expected an array, got {}", other)));
        }
    };
    let mut seen = HashSet::new();
    Ok(Value::Array(
        items
            .into_iter()
            .chain(second)
            .filter(|v| seen.insert(identity_key(v)))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(ns: &[i64]) -> Value {
        Value::Array(ns.iter().map(|n| Value::Int(*n)).collect())
    }

    #[test]
    fn test_first_last_on_empty() {
        assert_eq!(first(&[ints(&[])]).unwrap(), Value::Null);
        assert_eq!(last(&[ints(&[])]).unwrap(), Value::Null);
        assert_eq!(first(&[ints(&[7, 8])]).unwrap(), Value::Int(7));
        assert_eq!(last(&[ints(&[7, 8])]).unwrap(), Value::Int(8));
    }

    #[test]
    fn test_unique_preserves_order() {
        assert_eq!(unique(&[ints(&[3, 1, 3, 2, 1])]).unwrap(), ints(&[3, 1, 2]));
    }

    #[test]
    fn test_flatten_depth() {
        let nested = Value::Array(vec![
            Value::Int(1),
            Value::Array(vec![Value::Int(2), Value::Array(vec![Value::Int(3)])]),
        ]);
        assert_eq!(
            flatten(&[nested.clone()]).unwrap(),
            Value::Array(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Array(vec![Value::Int(3)])
            ])
        );
        assert_eq!(
            flatten(&[nested, Value::Int(2)]).unwrap(),
            ints(&[1, 2, 3])
        );
    }

    #[test]
    fn test_sort_by_key_desc() {
        let mut a = Value::empty_object();
        a.set_path("n", Value::Int(1));
        let mut b = Value::empty_object();
        b.set_path("n", Value::Int(9));
        let sorted = sort(&[
            Value::Array(vec![a.clone(), b.clone()]),
            Value::String("desc".into()),
            Value::String("n".into()),
        ])
        .unwrap();
        assert_eq!(sorted, Value::Array(vec![b, a]));
    }

    #[test]
    fn test_chunk() {
        let chunked = chunk(&[ints(&[1, 2, 3, 4, 5]), Value::Int(2)]).unwrap();
        assert_eq!(
            chunked,
            Value::Array(vec![ints(&[1, 2]), ints(&[3, 4]), ints(&[5])])
        );
        assert!(chunk(&[ints(&[1]), Value::Int(0)]).is_err());
    }

    #[test]
    fn test_group_by() {
        let mut a = Value::empty_object();
        a.set_path("kind", Value::String("x".into()));
        let mut b = Value::empty_object();
        b.set_path("kind", Value::String("y".into()));
        let grouped = group_by(&[
            Value::Array(vec![a.clone(), b.clone(), a.clone()]),
            Value::String("kind".into()),
        ])
        .unwrap();
        let x_bucket = grouped.get_path("x").unwrap().as_array().unwrap();
        assert_eq!(x_bucket.len(), 2);
    }

    #[test]
    fn test_numeric_aggregates() {
        let items = Value::Array(vec![
            Value::Int(1),
            Value::Null,
            Value::Float(2.0),
            Value::String("3".into()),
        ]);
        assert_eq!(sum(&[items.clone()]).unwrap(), Value::Float(6.0));
        assert_eq!(avg(&[items.clone()]).unwrap(), Value::Float(2.0));
        assert_eq!(max(&[items.clone()]).unwrap(), Value::Float(3.0));
        assert_eq!(min(&[items]).unwrap(), Value::Float(1.0));
        assert_eq!(avg(&[ints(&[])]).unwrap(), Value::Null);
    }

    #[test]
    fn test_set_operations() {
        assert_eq!(
            difference(&[ints(&[1, 2, 3]), ints(&[2])]).unwrap(),
            ints(&[1, 3])
        );
        assert_eq!(
            intersection(&[ints(&[1, 2, 3]), ints(&[2, 3, 4])]).unwrap(),
            ints(&[2, 3])
        );
        assert_eq!(
            union(&[ints(&[1, 2]), ints(&[2, 3])]).unwrap(),
            ints(&[1, 2, 3])
        );
    }

    #[test]
    fn test_compact() {
        let items = Value::Array(vec![Value::Int(1), Value::Null, Value::Int(2)]);
        assert_eq!(compact(&[items]).unwrap(), ints(&[1, 2]));
    }
}
