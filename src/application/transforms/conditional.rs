//! Conditional transform functions
//!
//! These are the catalog's null handlers: unlike the rest of the library
//! they act on nulls instead of propagating them.

use crate::domain::value_objects::Value;

use super::{TransformError, TransformResult};

pub fn if_null(args: &[Value]) -> TransformResult {
    Ok(if args[0].is_null() {
        args[1].clone()
    } else {
        args[0].clone()
    })
}

/// Fallback when the input is null, an empty string, array or object
pub fn if_empty(args: &[Value]) -> TransformResult {
    Ok(if args[0].is_empty() {
        args[1].clone()
    } else {
        args[0].clone()
    })
}

/// `if_else(condition, then, else)` on truthiness
pub fn if_else(args: &[Value]) -> TransformResult {
    Ok(if args[0].is_truthy() {
        args[1].clone()
    } else {
        args[2].clone()
    })
}

/// `switch_case(input, cases, default?)` where `cases` maps the string form
/// of the input to a result
pub fn switch_case(args: &[Value]) -> TransformResult {
    let cases = match &args[1] {
        Value::Object(map) => map,
        other => {
            return Err(TransformError::new(format!(
                "switch_case expects a case object, got {}",
                other
            )));
        }
    };
    let key = args[0].coerce_string();
    Ok(cases
        .get(&key)
        .cloned()
        .or_else(|| args.get(2).cloned())
        .unwrap_or(Value::Null))
}

/// `in_range(input, min, max)` inclusive on both ends
pub fn in_range(args: &[Value]) -> TransformResult {
    if args[0].is_null() {
        return Ok(Value::Bool(false));
    }
    let (Some(value), Some(min), Some(max)) = (
        args[0].as_f64(),
        args[1].as_f64(),
        args[2].as_f64(),
    ) else {
        return Err(TransformError::new("in_range expects numeric arguments"));
    };
    Ok(Value::Bool(value >= min && value <= max))
}

pub fn in_array(args: &[Value]) -> TransformResult {
    let haystack = match &args[1] {
        Value::Array(items) => items,
        Value::Null => return Ok(Value::Bool(false)),
        other => {
            return Err(TransformError::new(format!(
                "in_array expects an array, got {}",
                other
            )));
        }
    };
    Ok(Value::Bool(haystack.contains(&args[0])))
}
