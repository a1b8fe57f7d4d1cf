//! Object transform functions

use std::collections::BTreeMap;

use crate::domain::value_objects::Value;

use super::{TransformError, TransformRegistry, TransformResult};

fn input_object(args: &[Value]) -> Result<Option<BTreeMap<String, Value>>, TransformError> {
    match &args[0] {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map.clone())),
        other => Err(TransformError::new(format!("expected an object, got {}", other))),
    }
}

fn key_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(Value::coerce_string).collect(),
        Value::Null => Vec::new(),
        single => vec![single.coerce_string()],
    }
}

pub fn keys(args: &[Value]) -> TransformResult {
    Ok(input_object(args)?.map_or(Value::Null, |map| {
        Value::Array(map.keys().map(|k| Value::String(k.clone())).collect())
    }))
}

pub fn values(args: &[Value]) -> TransformResult {
    Ok(input_object(args)?
        .map_or(Value::Null, |map| Value::Array(map.into_values().collect())))
}

/// `[key, value]` pairs in key order
pub fn entries(args: &[Value]) -> TransformResult {
    Ok(input_object(args)?.map_or(Value::Null, |map| {
        Value::Array(
            map.into_iter()
                .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
                .collect(),
        )
    }))
}

pub fn pick(args: &[Value]) -> TransformResult {
    let Some(map) = input_object(args)? else {
        return Ok(Value::Null);
    };
    let wanted = key_list(&args[1]);
    Ok(Value::Object(
        map.into_iter().filter(|(k, _)| wanted.contains(k)).collect(),
    ))
}

pub fn omit(args: &[Value]) -> TransformResult {
    let Some(map) = input_object(args)? else {
        return Ok(Value::Null);
    };
    let dropped = key_list(&args[1]);
    Ok(Value::Object(
        map.into_iter().filter(|(k, _)| !dropped.contains(k)).collect(),
    ))
}

/// `map_keys(object, transform_name)` runs a single-argument catalog
/// function (e.g. `string.upper`) over every key
pub fn map_keys(args: &[Value]) -> TransformResult {
    let Some(map) = input_object(args)? else {
        return Ok(Value::Null);
    };
    let function = args[1].coerce_string();
    let registry = TransformRegistry::standard();
    let mut out = BTreeMap::new();
    for (k, v) in map {
        let mapped = registry.call(&function, &[Value::String(k)])?;
        out.insert(mapped.coerce_string(), v);
    }
    Ok(Value::Object(out))
}

/// `map_values(object, transform_name)` runs a single-argument catalog
/// function over every value
pub fn map_values(args: &[Value]) -> TransformResult {
    let Some(map) = input_object(args)? else {
        return Ok(Value::Null);
    };
    let function = args[1].coerce_string();
    let registry = TransformRegistry::standard();
    let mut out = BTreeMap::new();
    for (k, v) in map {
        out.insert(k, registry.call(&function, &[v])?);
    }
    Ok(Value::Object(out))
}

fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut a), Value::Object(b)) => {
            for (k, v) in b {
                let merged = match a.remove(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => v,
                };
                a.insert(k, merged);
            }
            Value::Object(a)
        }
        // Anything else: the overlay wins.
        (_, overlay) => overlay,
    }
}

/// Recursive merge; the second object's leaves win on conflicts
pub fn merge(args: &[Value]) -> TransformResult {
    match (&args[0], &args[1]) {
        (Value::Null, b) => Ok(b.clone()),
        (a, Value::Null) => Ok(a.clone()),
        (Value::Object(_), Value::Object(_)) => {
            Ok(deep_merge(args[0].clone(), args[1].clone()))
        }
        _ => Err(TransformError::new("merge expects two objects")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        let mut v = Value::empty_object();
        for (k, val) in pairs {
            v.set_path(k, val.clone());
        }
        v
    }

    #[test]
    fn test_keys_values_entries() {
        let o = obj(&[("a", Value::Int(1)), ("b", Value::Int(2))]);
        assert_eq!(
            keys(&[o.clone()]).unwrap(),
            Value::Array(vec![Value::String("a".into()), Value::String("b".into())])
        );
        assert_eq!(
            values(&[o.clone()]).unwrap(),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
        let pairs = entries(&[o]).unwrap();
        assert_eq!(
            pairs,
            Value::Array(vec![
                Value::Array(vec![Value::String("a".into()), Value::Int(1)]),
                Value::Array(vec![Value::String("b".into()), Value::Int(2)]),
            ])
        );
    }

    #[test]
    fn test_pick_and_omit() {
        let o = obj(&[("a", Value::Int(1)), ("b", Value::Int(2)), ("c", Value::Int(3))]);
        let keys_wanted = Value::Array(vec![Value::String("a".into()), Value::String("c".into())]);
        assert_eq!(
            pick(&[o.clone(), keys_wanted.clone()]).unwrap(),
            obj(&[("a", Value::Int(1)), ("c", Value::Int(3))])
        );
        assert_eq!(omit(&[o, keys_wanted]).unwrap(), obj(&[("b", Value::Int(2))]));
    }

    #[test]
    fn test_map_keys_through_catalog() {
        let o = obj(&[("first", Value::Int(1))]);
        let mapped = map_keys(&[o, Value::String("string.upper".into())]).unwrap();
        assert_eq!(mapped, obj(&[("FIRST", Value::Int(1))]));
    }

    #[test]
    fn test_map_values_through_catalog() {
        let o = obj(&[("name", Value::String("kim".into()))]);
        let mapped = map_values(&[o, Value::String("string.upper".into())]).unwrap();
        assert_eq!(mapped, obj(&[("name", Value::String("KIM".into()))]));
    }

    #[test]
    fn test_deep_merge() {
        let base = obj(&[("a.x", Value::Int(1)), ("a.y", Value::Int(2)), ("b", Value::Int(3))]);
        let overlay = obj(&[("a.y", Value::Int(9)), ("c", Value::Int(4))]);
        let merged = merge(&[base, overlay]).unwrap();
        assert_eq!(merged.get_path("a.x"), Some(&Value::Int(1)));
        assert_eq!(merged.get_path("a.y"), Some(&Value::Int(9)));
        assert_eq!(merged.get_path("b"), Some(&Value::Int(3)));
        assert_eq!(merged.get_path("c"), Some(&Value::Int(4)));
    }
}
