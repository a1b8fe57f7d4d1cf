//! System entity module
//!
//! A System represents one external endpoint the platform can read from or
//! write to: a relational database, a document store, a message broker, an
//! object store or an HTTP service. Connection details are stored as an
//! opaque encrypted blob; the core never sees plaintext credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::UniversalType;

/// The kind of endpoint a System points at
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SystemType {
    Postgresql,
    Mysql,
    Oracle,
    Sqlserver,
    Sqlite,
    Mongodb,
    Redis,
    Elasticsearch,
    Kafka,
    S3,
    Ftp,
    Sftp,
    HttpApi,
    LocalFile,
}

impl SystemType {
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            SystemType::Postgresql
                | SystemType::Mysql
                | SystemType::Oracle
                | SystemType::Sqlserver
                | SystemType::Sqlite
        )
    }

    /// Maps a connector-native type name to its universal type
    ///
    /// Matching is case-insensitive and ignores length/precision suffixes
    /// (`VARCHAR(255)` matches `varchar`). Unknown native types fall back to
    /// `string` for relational systems and `json` for document systems, so a
    /// discovered schema never fails outright on an exotic column.
    pub fn to_universal(&self, native: &str) -> UniversalType {
        let base = native
            .split('(')
            .next()
            .unwrap_or(native)
            .trim()
            .to_ascii_lowercase();
        match self {
            SystemType::Postgresql
            | SystemType::Mysql
            | SystemType::Oracle
            | SystemType::Sqlserver
            | SystemType::Sqlite => match base.as_str() {
                "char" | "varchar" | "nvarchar" | "varchar2" | "nvarchar2" | "character varying" => {
                    UniversalType::String
                }
                "text" | "clob" | "nclob" | "longtext" | "mediumtext" | "ntext" => UniversalType::Text,
                "int" | "integer" | "smallint" | "tinyint" | "mediumint" | "int4" | "int2"
                | "serial" => UniversalType::Integer,
                "bigint" | "int8" | "bigserial" | "long" | "number" => UniversalType::Long,
                "real" | "float4" => UniversalType::Float,
                "double" | "double precision" | "float" | "float8" | "binary_double" => {
                    UniversalType::Double
                }
                "decimal" | "numeric" | "money" => UniversalType::Decimal,
                "bool" | "boolean" | "bit" => UniversalType::Boolean,
                "date" => UniversalType::Date,
                "time" => UniversalType::Time,
                "datetime" | "datetime2" | "smalldatetime" => UniversalType::DateTime,
                "timestamp" | "timestamptz" | "timestamp with time zone"
                | "timestamp without time zone" => UniversalType::Timestamp,
                "bytea" | "blob" | "binary" | "varbinary" | "raw" | "image" => UniversalType::Binary,
                "json" | "jsonb" => UniversalType::Json,
                "xml" | "xmltype" => UniversalType::Xml,
                "array" => UniversalType::Array,
                _ => UniversalType::String,
            },
            SystemType::Mongodb => match base.as_str() {
                "string" => UniversalType::String,
                "int" | "int32" => UniversalType::Integer,
                "long" | "int64" => UniversalType::Long,
                "double" => UniversalType::Double,
                "decimal" | "decimal128" => UniversalType::Decimal,
                "bool" | "boolean" => UniversalType::Boolean,
                "date" | "timestamp" => UniversalType::Timestamp,
                "bindata" | "binary" => UniversalType::Binary,
                "array" => UniversalType::Array,
                "object" | "document" => UniversalType::Object,
                _ => UniversalType::Json,
            },
            SystemType::Redis => match base.as_str() {
                "string" => UniversalType::String,
                "hash" => UniversalType::Map,
                "list" | "set" | "zset" => UniversalType::Array,
                _ => UniversalType::String,
            },
            SystemType::Elasticsearch => match base.as_str() {
                "keyword" => UniversalType::String,
                "text" => UniversalType::Text,
                "integer" | "short" | "byte" => UniversalType::Integer,
                "long" => UniversalType::Long,
                "float" | "half_float" => UniversalType::Float,
                "double" | "scaled_float" => UniversalType::Double,
                "boolean" => UniversalType::Boolean,
                "date" => UniversalType::DateTime,
                "binary" => UniversalType::Binary,
                "object" => UniversalType::Object,
                "nested" => UniversalType::Array,
                _ => UniversalType::Json,
            },
            // Brokers, object stores and file endpoints exchange serialised
            // documents; their payloads are typed by the declared schema.
            SystemType::Kafka
            | SystemType::S3
            | SystemType::Ftp
            | SystemType::Sftp
            | SystemType::HttpApi
            | SystemType::LocalFile => match base.as_str() {
                "string" => UniversalType::String,
                "text" => UniversalType::Text,
                "integer" | "int" => UniversalType::Integer,
                "long" => UniversalType::Long,
                "float" => UniversalType::Float,
                "double" => UniversalType::Double,
                "decimal" => UniversalType::Decimal,
                "boolean" | "bool" => UniversalType::Boolean,
                "date" => UniversalType::Date,
                "time" => UniversalType::Time,
                "datetime" => UniversalType::DateTime,
                "timestamp" => UniversalType::Timestamp,
                "binary" | "bytes" => UniversalType::Binary,
                "array" => UniversalType::Array,
                "object" => UniversalType::Object,
                "map" => UniversalType::Map,
                "xml" => UniversalType::Xml,
                _ => UniversalType::Json,
            },
        }
    }

    /// Maps a universal type to the canonical native type for this connector
    ///
    /// The returned name round-trips through [`SystemType::to_universal`]
    /// for the integer, text and timezone-free datetime families.
    pub fn from_universal(&self, universal: UniversalType) -> &'static str {
        match self {
            t if t.is_relational() => match universal {
                UniversalType::String => "varchar",
                UniversalType::Text => "text",
                UniversalType::Integer => "integer",
                UniversalType::Long => "bigint",
                UniversalType::Float => "real",
                UniversalType::Double => "double precision",
                UniversalType::Decimal => "decimal",
                UniversalType::Boolean => "boolean",
                UniversalType::Date => "date",
                UniversalType::Time => "time",
                UniversalType::DateTime => "datetime",
                UniversalType::Timestamp => "timestamp",
                UniversalType::Binary => "blob",
                UniversalType::Array => "array",
                UniversalType::Object | UniversalType::Map | UniversalType::Json => "json",
                UniversalType::Xml => "xml",
            },
            SystemType::Mongodb => match universal {
                UniversalType::String | UniversalType::Text => "string",
                UniversalType::Integer => "int",
                UniversalType::Long => "long",
                UniversalType::Float | UniversalType::Double => "double",
                UniversalType::Decimal => "decimal",
                UniversalType::Boolean => "bool",
                UniversalType::Date
                | UniversalType::Time
                | UniversalType::DateTime
                | UniversalType::Timestamp => "date",
                UniversalType::Binary => "bindata",
                UniversalType::Array => "array",
                UniversalType::Object | UniversalType::Map => "object",
                UniversalType::Json | UniversalType::Xml => "string",
            },
            SystemType::Redis => match universal {
                UniversalType::Array => "list",
                UniversalType::Object | UniversalType::Map => "hash",
                _ => "string",
            },
            SystemType::Elasticsearch => match universal {
                UniversalType::String => "keyword",
                UniversalType::Text => "text",
                UniversalType::Integer => "integer",
                UniversalType::Long => "long",
                UniversalType::Float => "float",
                UniversalType::Double => "double",
                UniversalType::Decimal => "scaled_float",
                UniversalType::Boolean => "boolean",
                UniversalType::Date
                | UniversalType::Time
                | UniversalType::DateTime
                | UniversalType::Timestamp => "date",
                UniversalType::Binary => "binary",
                UniversalType::Array => "nested",
                UniversalType::Object | UniversalType::Map | UniversalType::Json => "object",
                UniversalType::Xml => "text",
            },
            _ => match universal {
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
            },
        }
    }
}

/// Outcome of the most recent connection probe against a System
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeStatus {
    pub checked_at: DateTime<Utc>,
    pub ok: bool,
    pub latency_ms: Option<u64>,
    pub message: Option<String>,
}

/// Represents one external endpoint registered with the platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct System {
    /// Opaque unique identifier
    pub id: Uuid,
    /// Unique human-readable name
    pub name: String,
    pub description: Option<String>,
    pub system_type: SystemType,
    /// Encrypted connection details; opaque to the core
    pub connection_info: Vec<u8>,
    pub active: bool,
    pub last_probe: Option<ProbeStatus>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, managed by the persistence gateway
    pub version: u64,
}

impl System {
    /// Creates a new System with a fresh id and version 1
    pub fn new(name: impl Into<String>, system_type: SystemType, connection_info: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            system_type,
            connection_info,
            active: true,
            last_probe: None,
            created_by: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }
}
