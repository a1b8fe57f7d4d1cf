//! Encoding transform functions

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::domain::value_objects::Value;

use super::{TransformError, TransformResult};

fn input_string(args: &[Value]) -> Option<String> {
    if args[0].is_null() {
        None
    } else {
        Some(args[0].coerce_string())
    }
}

pub fn base64_encode(args: &[Value]) -> TransformResult {
    Ok(input_string(args)
        .map_or(Value::Null, |s| Value::String(BASE64.encode(s.as_bytes()))))
}

pub fn base64_decode(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Null);
    };
    let bytes = BASE64
        .decode(input.trim())
        .map_err(|e| TransformError::new(format!("invalid base64: {}", e)))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| TransformError::new("decoded bytes are not valid UTF-8"))?;
    Ok(Value::String(text))
}

pub fn url_encode(args: &[Value]) -> TransformResult {
    Ok(input_string(args)
        .map_or(Value::Null, |s| Value::String(urlencoding::encode(&s).into_owned())))
}

pub fn url_decode(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Null);
    };
    urlencoding::decode(&input)
        .map(|s| Value::String(s.into_owned()))
        .map_err(|e| TransformError::new(format!("invalid percent-encoding: {}", e)))
}

pub fn json_parse(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Null);
    };
    let parsed: serde_json::Value = serde_json::from_str(&input)
        .map_err(|e| TransformError::new(format!("invalid JSON: {}", e)))?;
    Ok(Value::from(parsed))
}

pub fn json_stringify(args: &[Value]) -> TransformResult {
    if args[0].is_null() {
        return Ok(Value::String("null".to_string()));
    }
    serde_json::to_string(&args[0])
        .map(Value::String)
        .map_err(|e| TransformError::new(e.to_string()))
}
