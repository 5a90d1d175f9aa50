//! # mimic-fhir
//!
//! Typed FHIR R4 records and search parameters for the MIMIC-IV Clinical
//! Database Demo on FHIR.
//!
//! This crate provides:
//! - **Records**: a fixed typed field set per resource plus an `extra` bag for
//!   everything else, parsed from one NDJSON line at a time
//! - **References**: typed `(kind, target type, target id)` edges derived once
//!   when a record is parsed
//! - **Search parameters**: raw `(name, value)` query pairs parsed into a small
//!   closed set of typed filters
//!
//! ## Record Usage
//!
//! ```rust
//! use mimic_fhir::{Record, ReferenceKind, ResourceType};
//!
//! let line = r#"{"resourceType":"Observation","id":"o1","status":"final",
//!     "subject":{"reference":"Patient/p1"}}"#;
//! let record = Record::from_json_line(line).unwrap();
//!
//! assert_eq!(record.resource_type(), ResourceType::Observation);
//! let subject = record.reference(ReferenceKind::Subject).unwrap();
//! assert_eq!(subject.target_id, "p1");
//! ```
//!
//! ## Search Parameter Usage
//!
//! ```rust
//! use mimic_fhir::{ResourceType, SearchQuery};
//!
//! let query = SearchQuery::parse(
//!     ResourceType::Observation,
//!     [("subject", "Patient/p1"), ("category", "laboratory"), ("_count", "10")],
//! );
//! assert_eq!(query.count, 10);
//! assert_eq!(query.filters.len(), 2);
//! ```
//!
//! ## Search Parameter Quick Reference
//!
//! | Parameter | Kind | Example |
//! |-----------|------|---------|
//! | `_id` | token | `_id=abc,def` |
//! | `subject`, `patient`, `encounter` | reference | `subject=Patient/p1` |
//! | `category`, `code`, `status`, `gender`, `identifier`, `class` | token | `code=http://loinc.org\|718-7` |
//! | `date`, `birthdate` | date | `date=ge2180-07-01` |
//! | `_count`, `_offset` | paging | `_count=0` |

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod error;
pub mod params;
mod record;
mod resource;

pub use error::{ParamError, ParamResult, RecordParseError};
pub use params::{
    DateField, DatePrefix, DateValue, ReferenceTarget, SearchFilter, SearchParamKind,
    SearchQuery, TokenField, TokenValue, DEFAULT_COUNT, supported_params,
};
pub use record::{
    CodeableConcept, Coding, Identifier, Period, Record, Reference, ReferenceField,
    ReferenceKind, ResourceBody,
};
pub use resource::ResourceType;
