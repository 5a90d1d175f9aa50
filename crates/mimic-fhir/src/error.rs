//! Error types for record and search parameter parsing.

use thiserror::Error;

use crate::resource::ResourceType;

/// Errors raised while parsing a single stored record.
///
/// A record that fails to parse is skipped by the loader; it never makes the
/// whole collection unavailable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordParseError {
    /// The line is not valid JSON or does not fit the record shape.
    #[error("invalid record JSON: {0}")]
    Json(String),

    /// The record has no `id` or an empty one.
    #[error("record has no id")]
    MissingId,

    /// The `resourceType` value is not a served resource type.
    #[error("unknown resource type: {0}")]
    UnknownType(String),

    /// The record belongs to a different collection than the one being loaded.
    #[error("expected {expected} record, found {found}")]
    WrongType {
        /// Type of the collection being loaded.
        expected: ResourceType,
        /// Type declared by the record.
        found: ResourceType,
    },

    /// A record with the same id was already loaded into the collection.
    #[error("duplicate id: {0}")]
    DuplicateId(String),
}

impl From<serde_json::Error> for RecordParseError {
    fn from(err: serde_json::Error) -> Self {
        RecordParseError::Json(err.to_string())
    }
}

/// Errors raised while parsing a single search parameter value.
///
/// These never escape a search: the query layer turns them into a filter
/// that matches nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    /// The value does not fit the parameter's grammar.
    #[error("invalid value for {param}: '{value}'")]
    InvalidValue {
        /// Parameter name.
        param: String,
        /// Offending raw value.
        value: String,
    },

    /// The value is empty.
    #[error("empty value for {0}")]
    EmptyValue(String),

    /// A reference names a resource type that is not served.
    #[error("unknown resource type in reference: {0}")]
    UnknownReferenceType(String),
}

/// Result type for search parameter parsing.
pub type ParamResult<T> = std::result::Result<T, ParamError>;
