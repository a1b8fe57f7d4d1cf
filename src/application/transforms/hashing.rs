//! Hash transform functions
//!
//! Digests of the string form of the input, rendered as lowercase hex.

use sha1::Digest as _;

use crate::domain::value_objects::Value;

use super::TransformResult;

fn input_string(args: &[Value]) -> Option<String> {
    if args[0].is_null() {
        None
    } else {
        Some(args[0].coerce_string())
    }
}

pub fn md5_hex(args: &[Value]) -> TransformResult {
    Ok(input_string(args).map_or(Value::Null, |s| {
        Value::String(format!("{:x}", md5::compute(s.as_bytes())))
    }))
}

pub fn sha1_hex(args: &[Value]) -> TransformResult {
    Ok(input_string(args).map_or(Value::Null, |s| {
        let digest = sha1::Sha1::digest(s.as_bytes());
        Value::String(hex::encode(digest))
    }))
}

pub fn sha256_hex(args: &[Value]) -> TransformResult {
    Ok(input_string(args).map_or(Value::Null, |s| {
        let digest = sha2::Sha256::digest(s.as_bytes());
        Value::String(hex::encode(digest))
    }))
}
