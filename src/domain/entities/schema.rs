//! Schema entity module
//!
//! A Schema describes the shape a System exposes: columns with native and
//! universal types, indexes, constraints and relationships. Schemas are
//! versioned per `(system_id, name)` and may be hand-declared or discovered
//! from the endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::error::CoreError;
use crate::domain::value_objects::UniversalType;

/// Reserved SQL keywords rejected as column names
///
/// The list covers the words that break quoting-free SQL generation across
/// the supported relational dialects. Dialect-specific exotica is handled by
/// the connectors themselves.
const RESERVED_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "from", "where", "join", "table", "index", "group",
    "order", "having", "union", "create", "drop", "alter", "grant", "revoke", "into", "values",
    "and", "or", "not", "null", "primary", "foreign", "key", "references", "constraint", "default",
];

/// Structural format of the data a schema describes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchemaFormat {
    Relational,
    Document,
    KeyValue,
    Columnar,
    Stream,
    Object,
    Graph,
}

/// One column (or field) of a schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    /// Type name as the source system spells it (e.g. `VARCHAR(255)`)
    pub native_data_type: String,
    pub universal_type: UniversalType,
    pub nullable: bool,
    pub primary_key: bool,
    pub default_value: Option<serde_json::Value>,
    pub max_length: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub comment: Option<String>,
}

impl Column {
    /// Creates a column with the given name and types; nullable, no default
    pub fn new(
        name: impl Into<String>,
        native_data_type: impl Into<String>,
        universal_type: UniversalType,
    ) -> Self {
        Self {
            name: name.into(),
            native_data_type: native_data_type.into(),
            universal_type,
            nullable: true,
            primary_key: false,
            default_value: None,
            max_length: None,
            precision: None,
            scale: None,
            comment: None,
        }
    }

    /// A column is required when it is non-nullable and carries no default
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default_value.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstraintDef {
    pub name: String,
    pub kind: String,
    pub columns: Vec<String>,
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationshipDef {
    pub name: String,
    pub source_columns: Vec<String>,
    pub target_schema_id: Uuid,
    pub target_columns: Vec<String>,
}

/// Entry in a schema's change log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaChange {
    pub changed_at: DateTime<Utc>,
    pub changed_by: Option<Uuid>,
    pub description: String,
}

/// Describes the shape exposed by a System
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    pub id: Uuid,
    pub system_id: Uuid,
    pub name: String,
    /// Monotonically increasing revision, unique per `(system_id, name)`
    pub version: i64,
    pub schema_format: SchemaFormat,
    pub columns: Vec<Column>,
    pub indexes: Vec<IndexDef>,
    pub constraints: Vec<ConstraintDef>,
    pub relationships: Vec<RelationshipDef>,
    /// True when the schema was produced by connector discovery rather than
    /// declared by an operator
    pub discovered: bool,
    pub change_log: Vec<SchemaChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schema {
    /// Creates a new version-1 schema for a system
    pub fn new(system_id: Uuid, name: impl Into<String>, schema_format: SchemaFormat) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            system_id,
            name: name.into(),
            version: 1,
            schema_format,
            columns: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
            relationships: Vec::new(),
            discovered: false,
            change_log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns that must be populated by any mapping targeting this schema
    pub fn required_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_required())
    }

    pub fn primary_key_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    /// Validates the structural invariants of the schema
    ///
    /// Checks that at least one column exists, column names are unique and
    /// not reserved SQL keywords, and at least one primary-key column is
    /// declared.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.columns.is_empty() {
            return Err(CoreError::validation(format!(
                "schema '{}' has no columns",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(CoreError::validation(format!(
                    "schema '{}' declares column '{}' more than once",
                    self.name, column.name
                )));
            }
            if RESERVED_KEYWORDS.contains(&column.name.to_ascii_lowercase().as_str()) {
                return Err(CoreError::validation(format!(
                    "column name '{}' is a reserved SQL keyword",
                    column.name
                )));
            }
        }

        if self.primary_key_columns().next().is_none() {
            return Err(CoreError::validation(format!(
                "schema '{}' declares no primary-key column",
                self.name
            )));
        }

        Ok(())
    }

    /// Appends a change-log entry and bumps the revision
    pub fn record_change(&mut self, changed_by: Option<Uuid>, description: impl Into<String>) {
        self.version += 1;
        self.updated_at = Utc::now();
        self.change_log.push(SchemaChange {
            changed_at: self.updated_at,
            changed_by,
            description: description.into(),
        });
    }
}
