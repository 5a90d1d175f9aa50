//! Typed FHIR records.
//!
//! A [`Record`] keeps a fixed set of typed fields that search, indexing and
//! risk scoring need, and an explicit `extra` bag with every other top-level
//! key so the record serializes back without losing unknown data.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::RecordParseError;
use crate::resource::ResourceType;

// =============================================================================
// FHIR datatypes
// =============================================================================

/// A FHIR `Coding`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    /// Code system URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Code within the system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human readable text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// A FHIR `CodeableConcept`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeableConcept {
    /// Codings, first one is the primary.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,
    /// Free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    /// Returns the text, falling back to the first coding's display.
    pub fn label(&self) -> Option<&str> {
        self.text
            .as_deref()
            .or_else(|| self.coding.iter().find_map(|c| c.display.as_deref()))
    }
}

/// A FHIR `Identifier`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    /// Namespace URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Identifier value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A FHIR `Period`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    /// Start timestamp as stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// End timestamp as stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

/// A FHIR `Reference` as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceField {
    /// Literal reference, e.g. `Patient/123`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Display text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

// =============================================================================
// Stored body
// =============================================================================

/// The stored body of a record: typed known fields plus the `extra` bag.
///
/// Field names follow FHIR JSON (`camelCase`). Fields that only exist on some
/// resource types are simply absent on the others.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBody {
    /// `resourceType` as stored.
    pub resource_type: String,
    /// Logical id.
    #[serde(default)]
    pub id: String,

    /// Workflow status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Business identifiers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,
    /// Categories. Accepts a single concept (Procedure) or an array.
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub category: Vec<CodeableConcept>,
    /// What was observed, diagnosed or ordered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,
    /// Observation interpretation flags (H, L, HH, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interpretation: Vec<CodeableConcept>,
    /// Encounter class (`Coding` in R4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<Coding>,
    /// Administrative gender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// Birth date as stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,

    /// Who the record is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<ReferenceField>,
    /// Patient link on resources without `subject`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<ReferenceField>,
    /// Encounter the record belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<ReferenceField>,
    /// MedicationAdministration encounter link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ReferenceField>,
    /// Organization responsible for an encounter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_provider: Option<ReferenceField>,
    /// Organization managing a location or patient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managing_organization: Option<ReferenceField>,
    /// Medication administered, dispensed or ordered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medication_reference: Option<ReferenceField>,
    /// Order an administration fulfils.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ReferenceField>,
    /// Orders a dispense fulfils.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorizing_prescription: Vec<ReferenceField>,
    /// Specimen an observation was made on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specimen: Option<ReferenceField>,

    /// Observation or administration time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<String>,
    /// Administration interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_period: Option<Period>,
    /// Encounter interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
    /// Procedure time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_date_time: Option<String>,
    /// Procedure interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_period: Option<Period>,
    /// Order time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authored_on: Option<String>,
    /// Dispense time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_handed_over: Option<String>,
    /// Condition recording time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_date: Option<String>,
    /// Condition onset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onset_date_time: Option<String>,

    /// Every top-level key without a typed field above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<CodeableConcept>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(CodeableConcept),
        Many(Vec<CodeableConcept>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(concept) => vec![concept],
        OneOrMany::Many(concepts) => concepts,
    })
}

// =============================================================================
// References
// =============================================================================

/// Relationship carried by a reference field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceKind {
    /// `subject`
    Subject,
    /// `patient`
    Patient,
    /// `encounter` or `context`
    Encounter,
    /// `serviceProvider`
    ServiceProvider,
    /// `managingOrganization`
    ManagingOrganization,
    /// `medicationReference`
    Medication,
    /// `request` or `authorizingPrescription`
    Request,
    /// `specimen`
    Specimen,
}

impl ReferenceKind {
    /// Returns the kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Subject => "subject",
            ReferenceKind::Patient => "patient",
            ReferenceKind::Encounter => "encounter",
            ReferenceKind::ServiceProvider => "service-provider",
            ReferenceKind::ManagingOrganization => "managing-organization",
            ReferenceKind::Medication => "medication",
            ReferenceKind::Request => "request",
            ReferenceKind::Specimen => "specimen",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed reference from a record to another record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Relationship kind.
    pub kind: ReferenceKind,
    /// Type of the referenced record.
    pub target_type: ResourceType,
    /// Id of the referenced record.
    pub target_id: String,
}

impl Reference {
    /// Splits a literal reference into `(type, id)`.
    ///
    /// Accepts `Type/id`, absolute URLs ending in `Type/id` and versioned
    /// `Type/id/_history/n`. Contained (`#x`) references and unknown types
    /// yield `None`.
    ///
    /// ```rust
    /// use mimic_fhir::{Reference, ResourceType};
    ///
    /// assert_eq!(
    ///     Reference::parse_target("Patient/p1"),
    ///     Some((ResourceType::Patient, "p1"))
    /// );
    /// assert_eq!(Reference::parse_target("#med1"), None);
    /// ```
    pub fn parse_target(literal: &str) -> Option<(ResourceType, &str)> {
        let literal = match literal.find("/_history/") {
            Some(pos) => &literal[..pos],
            None => literal,
        };
        let (head, id) = literal.rsplit_once('/')?;
        let type_name = head.rsplit('/').next().unwrap_or(head);
        if id.is_empty() {
            return None;
        }
        let target_type = type_name.parse::<ResourceType>().ok()?;
        Some((target_type, id))
    }

    fn from_field(kind: ReferenceKind, field: &ReferenceField) -> Option<Self> {
        let literal = field.reference.as_deref()?;
        let (target_type, target_id) = Self::parse_target(literal)?;
        Some(Self {
            kind,
            target_type,
            target_id: target_id.to_string(),
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}/{}", self.kind, self.target_type, self.target_id)
    }
}

// =============================================================================
// Record
// =============================================================================

/// One immutable stored resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    resource_type: ResourceType,
    body: ResourceBody,
    references: Vec<Reference>,
}

impl Record {
    /// Parses one NDJSON line.
    pub fn from_json_line(line: &str) -> Result<Self, RecordParseError> {
        let body: ResourceBody = serde_json::from_str(line)?;
        Self::from_body(body)
    }

    /// Builds a record from a JSON value.
    pub fn from_value(value: Value) -> Result<Self, RecordParseError> {
        let body: ResourceBody = serde_json::from_value(value)?;
        Self::from_body(body)
    }

    /// Validates a parsed body and derives its references.
    pub fn from_body(body: ResourceBody) -> Result<Self, RecordParseError> {
        let resource_type = body.resource_type.parse::<ResourceType>()?;
        if body.id.trim().is_empty() {
            return Err(RecordParseError::MissingId);
        }
        let references = derive_references(&body);
        Ok(Self {
            resource_type,
            body,
            references,
        })
    }

    /// Returns the logical id.
    pub fn id(&self) -> &str {
        &self.body.id
    }

    /// Returns the resource type.
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Returns the stored body.
    pub fn body(&self) -> &ResourceBody {
        &self.body
    }

    /// Returns the untyped top-level fields.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.body.extra
    }

    /// Returns all typed references in field order.
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Returns the first reference of the given kind.
    pub fn reference(&self, kind: ReferenceKind) -> Option<&Reference> {
        self.references.iter().find(|r| r.kind == kind)
    }

    /// Returns all references of the given kind.
    pub fn references_of(&self, kind: ReferenceKind) -> impl Iterator<Item = &Reference> {
        self.references.iter().filter(move |r| r.kind == kind)
    }

    /// Returns the timestamp that places this record on the clinical timeline.
    ///
    /// Order of preference: effective, period start, performed, authored,
    /// handed over, recorded, onset.
    pub fn clinical_time(&self) -> Option<&str> {
        let b = &self.body;
        b.effective_date_time
            .as_deref()
            .or_else(|| b.effective_period.as_ref().and_then(|p| p.start.as_deref()))
            .or_else(|| b.period.as_ref().and_then(|p| p.start.as_deref()))
            .or(b.performed_date_time.as_deref())
            .or_else(|| b.performed_period.as_ref().and_then(|p| p.start.as_deref()))
            .or(b.authored_on.as_deref())
            .or(b.when_handed_over.as_deref())
            .or(b.recorded_date.as_deref())
            .or(b.onset_date_time.as_deref())
    }

    /// Returns the interpretation codes of an observation.
    pub fn interpretation_codes(&self) -> impl Iterator<Item = &str> {
        self.body
            .interpretation
            .iter()
            .flat_map(|c| c.coding.iter())
            .filter_map(|c| c.code.as_deref())
    }

    /// Returns a display name for people and places.
    ///
    /// Patients use `name[0].given[0] family`; organizations and locations use
    /// their `name` string.
    pub fn display_name(&self) -> Option<String> {
        match self.body.extra.get("name")? {
            Value::String(name) => Some(name.clone()),
            Value::Array(names) => {
                let first = names.first()?;
                let family = first.get("family").and_then(Value::as_str);
                let given = first
                    .get("given")
                    .and_then(Value::as_array)
                    .and_then(|g| g.first())
                    .and_then(Value::as_str);
                let joined = [given, family]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                (!joined.is_empty()).then_some(joined)
            }
            _ => None,
        }
    }

    /// Serializes the record back to a JSON value.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.body).unwrap_or(Value::Null)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

fn derive_references(body: &ResourceBody) -> Vec<Reference> {
    let singles = [
        (ReferenceKind::Subject, &body.subject),
        (ReferenceKind::Patient, &body.patient),
        (ReferenceKind::Encounter, &body.encounter),
        (ReferenceKind::Encounter, &body.context),
        (ReferenceKind::ServiceProvider, &body.service_provider),
        (ReferenceKind::ManagingOrganization, &body.managing_organization),
        (ReferenceKind::Medication, &body.medication_reference),
        (ReferenceKind::Request, &body.request),
        (ReferenceKind::Specimen, &body.specimen),
    ];

    let mut references: Vec<Reference> = singles
        .into_iter()
        .filter_map(|(kind, field)| field.as_ref().and_then(|f| Reference::from_field(kind, f)))
        .collect();

    references.extend(
        body.authorizing_prescription
            .iter()
            .filter_map(|f| Reference::from_field(ReferenceKind::Request, f)),
    );

    references
}
