//! Transform library module
//!
//! Catalog of pure, null-safe functions addressable as
//! `category.function_name` from transform rules and sandbox expressions.
//! Every function is total: bad input yields an error value, never a panic,
//! and a null primary input propagates to a null output unless the function
//! exists specifically to handle nulls.

pub mod arrays;
pub mod conditional;
pub mod dates;
pub mod encoding;
pub mod hashing;
pub mod numbers;
pub mod objects;
pub mod strings;
pub mod validators;

use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

use crate::domain::value_objects::Value;

/// Failure inside a transform function
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransformError(pub String);

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type TransformResult = Result<Value, TransformError>;

type TransformFn = fn(&[Value]) -> TransformResult;

/// A registered function with its documented arity
pub struct TransformSpec {
    pub name: &'static str,
    /// Minimum argument count, including the primary input
    pub min_args: usize,
    /// Maximum argument count, including the primary input
    pub max_args: usize,
    func: TransformFn,
}

/// The function catalog
///
/// A single shared instance is built on first use; lookups are by the full
/// `category.function` name.
pub struct TransformRegistry {
    functions: HashMap<&'static str, TransformSpec>,
}

macro_rules! spec {
    ($map:expr, $name:literal, $min:expr, $max:expr, $func:expr) => {
        $map.insert(
            $name,
            TransformSpec {
                name: $name,
                min_args: $min,
                max_args: $max,
                func: $func,
            },
        );
    };
}

impl TransformRegistry {
    /// The shared catalog of standard functions
    pub fn standard() -> &'static TransformRegistry {
        static REGISTRY: OnceLock<TransformRegistry> = OnceLock::new();
        REGISTRY.get_or_init(TransformRegistry::build)
    }

    pub fn lookup(&self, name: &str) -> Option<&TransformSpec> {
        self.functions.get(name)
    }

    /// Invokes a function with arity checking
    pub fn call(&self, name: &str, args: &[Value]) -> TransformResult {
        let spec = self
            .lookup(name)
            .ok_or_else(|| TransformError::new(format!("unknown transform function '{}'", name)))?;
        if args.len() < spec.min_args || args.len() > spec.max_args {
            return Err(TransformError::new(format!(
                "'{}' expects {}..={} arguments, got {}",
                name, spec.min_args, spec.max_args, args.len()
            )));
        }
        (spec.func)(args)
    }

    fn build() -> Self {
        let mut f: HashMap<&'static str, TransformSpec> = HashMap::new();

        // string
        spec!(f, "string.upper", 1, 1, strings::upper);
        spec!(f, "string.lower", 1, 1, strings::lower);
        spec!(f, "string.trim", 1, 1, strings::trim);
        spec!(f, "string.replace", 3, 3, strings::replace);
        spec!(f, "string.split", 2, 2, strings::split);
        spec!(f, "string.join", 2, 2, strings::join);
        spec!(f, "string.pad_left", 2, 3, strings::pad_left);
        spec!(f, "string.pad_right", 2, 3, strings::pad_right);
        spec!(f, "string.truncate", 2, 2, strings::truncate);
        spec!(f, "string.slugify", 1, 1, strings::slugify);
        spec!(f, "string.camel_case", 1, 1, strings::camel_case);
        spec!(f, "string.snake_case", 1, 1, strings::snake_case);
        spec!(f, "string.kebab_case", 1, 1, strings::kebab_case);
        spec!(f, "string.jamo_decompose", 1, 1, strings::jamo_decompose);
        spec!(f, "string.jamo_initials", 1, 1, strings::jamo_initials);

        // number
        spec!(f, "number.parse_int", 1, 1, numbers::parse_int);
        spec!(f, "number.parse_float", 1, 1, numbers::parse_float);
        spec!(f, "number.round", 1, 2, numbers::round);
        spec!(f, "number.floor", 1, 1, numbers::floor);
        spec!(f, "number.ceil", 1, 1, numbers::ceil);
        spec!(f, "number.abs", 1, 1, numbers::abs);
        spec!(f, "number.fixed", 2, 2, numbers::fixed);
        spec!(f, "number.currency", 1, 3, numbers::currency);
        spec!(f, "number.percent", 1, 2, numbers::percent);
        spec!(f, "number.bytes", 1, 1, numbers::bytes);
        spec!(f, "number.clamp", 3, 3, numbers::clamp);
        spec!(f, "number.random", 0, 2, numbers::random);

        // date
        spec!(f, "date.parse", 1, 2, dates::parse);
        spec!(f, "date.format", 2, 2, dates::format);
        spec!(f, "date.add_days", 2, 2, dates::add_days);
        spec!(f, "date.add_months", 2, 2, dates::add_months);
        spec!(f, "date.add_years", 2, 2, dates::add_years);
        spec!(f, "date.diff", 3, 3, dates::diff);
        spec!(f, "date.to_millis", 1, 1, dates::to_millis);
        spec!(f, "date.from_millis", 1, 1, dates::from_millis);

        // array
        spec!(f, "array.first", 1, 1, arrays::first);
        spec!(f, "array.last", 1, 1, arrays::last);
        spec!(f, "array.unique", 1, 1, arrays::unique);
        spec!(f, "array.flatten", 1, 2, arrays::flatten);
        spec!(f, "array.sort", 1, 3, arrays::sort);
        spec!(f, "array.chunk", 2, 2, arrays::chunk);
        spec!(f, "array.group_by", 2, 2, arrays::group_by);
        spec!(f, "array.sum", 1, 1, arrays::sum);
        spec!(f, "array.avg", 1, 1, arrays::avg);
        spec!(f, "array.max", 1, 1, arrays::max);
        spec!(f, "array.min", 1, 1, arrays::min);
        spec!(f, "array.compact", 1, 1, arrays::compact);
        spec!(f, "array.difference", 2, 2, arrays::difference);
        spec!(f, "array.intersection", 2, 2, arrays::intersection);
        spec!(f, "array.union", 2, 2, arrays::union);

        // object
        spec!(f, "object.keys", 1, 1, objects::keys);
        spec!(f, "object.values", 1, 1, objects::values);
        spec!(f, "object.entries", 1, 1, objects::entries);
        spec!(f, "object.pick", 2, 2, objects::pick);
        spec!(f, "object.omit", 2, 2, objects::omit);
        spec!(f, "object.map_keys", 2, 2, objects::map_keys);
        spec!(f, "object.map_values", 2, 2, objects::map_values);
        spec!(f, "object.merge", 2, 2, objects::merge);

        // conditional
        spec!(f, "conditional.if_null", 2, 2, conditional::if_null);
        spec!(f, "conditional.if_empty", 2, 2, conditional::if_empty);
        spec!(f, "conditional.if_else", 3, 3, conditional::if_else);
        spec!(f, "conditional.switch_case", 2, 3, conditional::switch_case);
        spec!(f, "conditional.in_range", 3, 3, conditional::in_range);
        spec!(f, "conditional.in_array", 2, 2, conditional::in_array);

        // encoding
        spec!(f, "encoding.base64_encode", 1, 1, encoding::base64_encode);
        spec!(f, "encoding.base64_decode", 1, 1, encoding::base64_decode);
        spec!(f, "encoding.url_encode", 1, 1, encoding::url_encode);
        spec!(f, "encoding.url_decode", 1, 1, encoding::url_decode);
        spec!(f, "encoding.json_parse", 1, 1, encoding::json_parse);
        spec!(f, "encoding.json_stringify", 1, 1, encoding::json_stringify);

        // hash
        spec!(f, "hash.md5", 1, 1, hashing::md5_hex);
        spec!(f, "hash.sha1", 1, 1, hashing::sha1_hex);
        spec!(f, "hash.sha256", 1, 1, hashing::sha256_hex);

        // validator
        spec!(f, "validator.email", 1, 1, validators::email);
        spec!(f, "validator.url", 1, 1, validators::url);
        spec!(f, "validator.phone", 1, 1, validators::phone);
        spec!(f, "validator.uuid", 1, 1, validators::uuid);
        spec!(f, "validator.credit_card", 1, 1, validators::credit_card);
        spec!(f, "validator.ipv4", 1, 1, validators::ipv4);
        spec!(f, "validator.ipv6", 1, 1, validators::ipv6);
        spec!(f, "validator.postal_code", 2, 2, validators::postal_code);

        Self { functions: f }
    }
}
