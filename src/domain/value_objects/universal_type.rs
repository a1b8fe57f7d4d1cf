//! Universal type value object module
//!
//! This module defines the cross-connector type taxonomy. Every column of a
//! discovered or declared schema carries one of these types next to its
//! native type string, and the mapping validator reasons about
//! compatibility exclusively in this space.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of universal data types
///
/// A universal type abstracts over connector-native types (e.g. `VARCHAR`,
/// `NUMBER(10)`, `jsonb`) so that mappings between heterogeneous systems can
/// be checked without knowledge of either dialect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UniversalType {
    String,
    Text,
    Integer,
    Long,
    Float,
    Double,
    Decimal,
    Boolean,
    Date,
    Time,
    DateTime,
    Timestamp,
    Binary,
    Array,
    Object,
    Map,
    Json,
    Xml,
}

/// Category bucket for a universal type
///
/// Categories drive the coarse compatibility rules: values convert freely
/// within the text, numeric and datetime families, while conversions across
/// categories are rejected (except into `json`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TypeCategory {
    Text,
    Numeric,
    DateTime,
    Boolean,
    Binary,
    Complex,
}

impl UniversalType {
    /// Returns the category bucket this type belongs to
    pub fn category(&self) -> TypeCategory {
        match self {
            UniversalType::String | UniversalType::Text => TypeCategory::Text,
            UniversalType::Integer
            | UniversalType::Long
            | UniversalType::Float
            | UniversalType::Double
            | UniversalType::Decimal => TypeCategory::Numeric,
            UniversalType::Date
            | UniversalType::Time
            | UniversalType::DateTime
            | UniversalType::Timestamp => TypeCategory::DateTime,
            UniversalType::Boolean => TypeCategory::Boolean,
            UniversalType::Binary => TypeCategory::Binary,
            UniversalType::Array
            | UniversalType::Object
            | UniversalType::Map
            | UniversalType::Json
            | UniversalType::Xml => TypeCategory::Complex,
        }
    }

    /// Relative width of a numeric type, used for lossiness checks
    ///
    /// Returns `None` for non-numeric types. A conversion from a higher rank
    /// to a lower rank can lose range or precision.
    pub fn numeric_rank(&self) -> Option<u8> {
        match self {
            UniversalType::Integer => Some(1),
            UniversalType::Long => Some(2),
            UniversalType::Float => Some(3),
            UniversalType::Double => Some(4),
            UniversalType::Decimal => Some(5),
            _ => None,
        }
    }

    /// Checks whether a value of this type can be written to a target column
    /// of type `target`
    ///
    /// Compatibility holds when the types are equal, both are numeric, both
    /// are textual, both are in the datetime family, or the target is `json`
    /// (any source value can be serialised into it). Everything else is
    /// rejected; the mapping validator reports such pairs as errors.
    pub fn is_compatible(&self, target: UniversalType) -> bool {
        if *self == target || target == UniversalType::Json {
            return true;
        }
        matches!(
            (self.category(), target.category()),
            (TypeCategory::Numeric, TypeCategory::Numeric)
                | (TypeCategory::Text, TypeCategory::Text)
                | (TypeCategory::DateTime, TypeCategory::DateTime)
        )
    }

    /// Checks whether a compatible conversion to `target` can lose information
    ///
    /// Narrowing numeric conversions (e.g. long to integer, decimal to
    /// double), text to bounded string, and datetime to date or time are
    /// flagged. The validator downgrades these to warnings rather than errors.
    pub fn is_lossy(&self, target: UniversalType) -> bool {
        if !self.is_compatible(target) || *self == target {
            return false;
        }
        match (self.numeric_rank(), target.numeric_rank()) {
            (Some(from), Some(to)) => to < from,
            _ => matches!(
                (self, target),
                (UniversalType::Text, UniversalType::String)
                    | (UniversalType::DateTime, UniversalType::Date)
                    | (UniversalType::DateTime, UniversalType::Time)
                    | (UniversalType::Timestamp, UniversalType::Date)
                    | (UniversalType::Timestamp, UniversalType::Time)
            ),
        }
    }

    /// Returns every member of the closed set, in declaration order
    pub fn all() -> &'static [UniversalType] {
        &[
            UniversalType::String,
            UniversalType::Text,
            UniversalType::Integer,
            UniversalType::Long,
            UniversalType::Float,
            UniversalType::Double,
            UniversalType::Decimal,
            UniversalType::Boolean,
            UniversalType::Date,
            UniversalType::Time,
            UniversalType::DateTime,
            UniversalType::Timestamp,
            UniversalType::Binary,
            UniversalType::Array,
            UniversalType::Object,
            UniversalType::Map,
            UniversalType::Json,
            UniversalType::Xml,
        ]
    }
}

impl fmt::Display for UniversalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UniversalType::String => "string",
            UniversalType::Text => "text",
            UniversalType::Integer => "integer",
            UniversalType::Long => "long",
            UniversalType::Float => "float",
            UniversalType::Double => "double",
            UniversalType::Decimal => "decimal",
            UniversalType::Boolean => "boolean",
            UniversalType::Date => "date",
            UniversalType::Time => "time",
            UniversalType::DateTime => "datetime",
            UniversalType::Timestamp => "timestamp",
            UniversalType::Binary => "binary",
            UniversalType::Array => "array",
            UniversalType::Object => "object",
            UniversalType::Map => "map",
            UniversalType::Json => "json",
            UniversalType::Xml => "xml",
        };
        write!(f, "{}", name)
    }
}
