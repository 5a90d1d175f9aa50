//! Search parameter parsing.
//!
//! Raw query pairs arrive as strings. [`SearchQuery::parse`] turns them into a
//! closed set of typed [`SearchFilter`]s for one resource type:
//!
//! - names the type does not support are dropped (forward-compatible query
//!   strings keep working)
//! - empty values are dropped
//! - values that do not fit the parameter's grammar become
//!   [`SearchFilter::Unsatisfiable`], which matches nothing
//!
//! Date values use the FHIR prefix grammar and are parsed with `nom`:
//!
//! ```text
//! date      = [prefix] year ["-" month ["-" day ["T" hh ":" mm [":" ss ["." frac]] [tz]]]]
//! prefix    = "eq" | "ne" | "gt" | "lt" | "ge" | "le" | "sa" | "eb" | "ap"
//! tz        = "Z" | ("+" | "-") hh ":" mm
//! ```

use std::fmt;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1, take_while_m_n},
    character::complete::{char, one_of},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    sequence::{pair, preceded, tuple},
    IResult,
};
use serde::Serialize;

use crate::error::{ParamError, ParamResult};
use crate::record::{Coding, Record, Reference, ReferenceKind};
use crate::resource::ResourceType;

/// Page size used when `_count` is absent or unparseable.
pub const DEFAULT_COUNT: usize = 100;

/// FHIR search parameter type, as reported in capability listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamKind {
    /// Code or identifier match.
    Token,
    /// Link to another record.
    Reference,
    /// Prefixed date comparison.
    Date,
}

/// Supported search parameters for a resource type, besides `_id`,
/// `_count` and `_offset`.
pub fn supported_params(resource_type: ResourceType) -> &'static [(&'static str, SearchParamKind)] {
    use SearchParamKind::{Date, Reference, Token};

    match resource_type {
        ResourceType::Patient => &[
            ("gender", Token),
            ("birthdate", Date),
            ("identifier", Token),
        ],
        ResourceType::Organization | ResourceType::Location => &[("identifier", Token)],
        ResourceType::Encounter => &[
            ("subject", Reference),
            ("patient", Reference),
            ("status", Token),
            ("class", Token),
            ("date", Date),
        ],
        ResourceType::Condition => &[
            ("subject", Reference),
            ("patient", Reference),
            ("encounter", Reference),
            ("category", Token),
            ("code", Token),
            ("date", Date),
        ],
        ResourceType::Observation => &[
            ("subject", Reference),
            ("patient", Reference),
            ("encounter", Reference),
            ("category", Token),
            ("code", Token),
            ("status", Token),
            ("date", Date),
        ],
        ResourceType::Procedure => &[
            ("subject", Reference),
            ("patient", Reference),
            ("encounter", Reference),
            ("code", Token),
            ("status", Token),
            ("date", Date),
        ],
        ResourceType::Medication => &[("code", Token), ("status", Token)],
        ResourceType::MedicationRequest
        | ResourceType::MedicationAdministration
        | ResourceType::MedicationDispense => &[
            ("subject", Reference),
            ("patient", Reference),
            ("encounter", Reference),
            ("status", Token),
            ("date", Date),
        ],
        ResourceType::MedicationStatement => &[
            ("subject", Reference),
            ("patient", Reference),
            ("status", Token),
        ],
        ResourceType::Specimen => &[("subject", Reference), ("patient", Reference)],
    }
}

fn lookup_param(resource_type: ResourceType, name: &str) -> Option<SearchParamKind> {
    supported_params(resource_type)
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, kind)| *kind)
}

// =============================================================================
// Filters
// =============================================================================

/// Token-valued fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenField {
    /// `category` codings.
    Category,
    /// `code` codings.
    Code,
    /// `status` string.
    Status,
    /// `gender` string.
    Gender,
    /// `identifier` system/value pairs.
    Identifier,
    /// Encounter `class` coding.
    Class,
}

impl TokenField {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "category" => Some(TokenField::Category),
            "code" => Some(TokenField::Code),
            "status" => Some(TokenField::Status),
            "gender" => Some(TokenField::Gender),
            "identifier" => Some(TokenField::Identifier),
            "class" => Some(TokenField::Class),
            _ => None,
        }
    }
}

/// A `[system|]code` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenValue {
    /// Required system, when given.
    pub system: Option<String>,
    /// Required code; `None` for `system|` (any code in the system).
    pub code: Option<String>,
}

impl TokenValue {
    fn parse(raw: &str) -> Self {
        match raw.split_once('|') {
            Some((system, code)) => Self {
                system: (!system.is_empty()).then(|| system.to_string()),
                code: (!code.is_empty()).then(|| code.to_string()),
            },
            None => Self {
                system: None,
                code: Some(raw.to_string()),
            },
        }
    }

    fn matches_pair(&self, system: Option<&str>, code: Option<&str>) -> bool {
        if let Some(ref wanted) = self.system {
            if system != Some(wanted.as_str()) {
                return false;
            }
        }
        match self.code {
            Some(ref wanted) => code == Some(wanted.as_str()),
            None => true,
        }
    }
}

/// Date-valued fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    /// The record's clinical time (`date`).
    Clinical,
    /// Patient `birthDate` (`birthdate`).
    BirthDate,
}

/// FHIR comparison prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DatePrefix {
    /// Equal (default).
    #[default]
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
    /// Starts after.
    Sa,
    /// Ends before.
    Eb,
    /// Approximately equal.
    Ap,
}

impl fmt::Display for DatePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DatePrefix::Eq => "eq",
            DatePrefix::Ne => "ne",
            DatePrefix::Gt => "gt",
            DatePrefix::Lt => "lt",
            DatePrefix::Ge => "ge",
            DatePrefix::Le => "le",
            DatePrefix::Sa => "sa",
            DatePrefix::Eb => "eb",
            DatePrefix::Ap => "ap",
        };
        f.write_str(s)
    }
}

/// A date or date-time with its implicit range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateValue {
    /// First instant covered.
    pub start: DateTime<Utc>,
    /// First instant after the covered range.
    pub end: DateTime<Utc>,
}

impl DateValue {
    /// Parses a FHIR date, partial date or date-time.
    ///
    /// Missing time zones are read as UTC.
    pub fn parse(raw: &str) -> Option<Self> {
        all_consuming(date_value)(raw.trim()).ok().map(|(_, v)| v)
    }

    /// Returns true if the instant falls in the range under `prefix`.
    pub fn compare(&self, prefix: DatePrefix, instant: DateTime<Utc>) -> bool {
        let within = self.start <= instant && instant < self.end;
        match prefix {
            DatePrefix::Eq | DatePrefix::Ap => within,
            DatePrefix::Ne => !within,
            DatePrefix::Gt | DatePrefix::Sa => instant >= self.end,
            DatePrefix::Lt | DatePrefix::Eb => instant < self.start,
            DatePrefix::Ge => instant >= self.start,
            DatePrefix::Le => instant < self.end,
        }
    }
}

/// Target of a reference search value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
    /// Target type, when the value was typed (`Patient/p1`).
    pub resource_type: Option<ResourceType>,
    /// Target id.
    pub id: String,
}

impl ReferenceTarget {
    fn parse(param: &str, raw: &str) -> ParamResult<Self> {
        if let Some((resource_type, id)) = Reference::parse_target(raw) {
            return Ok(Self {
                resource_type: Some(resource_type),
                id: id.to_string(),
            });
        }
        if raw.contains('/') {
            let type_name = raw.rsplit('/').nth(1).unwrap_or(raw);
            return Err(ParamError::UnknownReferenceType(type_name.to_string()));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(ParamError::InvalidValue {
                param: param.to_string(),
                value: raw.to_string(),
            });
        }
        Ok(Self {
            resource_type: None,
            id: raw.to_string(),
        })
    }

    /// Returns true if the reference points at this target.
    pub fn matches(&self, reference: &Reference) -> bool {
        reference.target_id == self.id
            && self
                .resource_type
                .map_or(true, |rt| rt == reference.target_type)
    }
}

/// A typed search predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFilter {
    /// `_id`: any of the ids.
    Id(Vec<String>),
    /// Reference match on any of `kinds` to any of `targets`.
    Reference {
        /// Parameter name (`subject`, `patient`, `encounter`).
        param: &'static str,
        /// Reference kinds the parameter covers.
        kinds: Vec<ReferenceKind>,
        /// Accepted targets.
        targets: Vec<ReferenceTarget>,
    },
    /// Token match: any of the values.
    Token {
        /// Field compared.
        field: TokenField,
        /// Accepted values.
        values: Vec<TokenValue>,
    },
    /// Date comparison.
    Date {
        /// Field compared.
        field: DateField,
        /// Comparison prefix.
        prefix: DatePrefix,
        /// Range compared against.
        value: DateValue,
    },
    /// A value that could not be parsed; matches nothing.
    Unsatisfiable(ParamError),
}

impl SearchFilter {
    /// Evaluates the filter against one record.
    ///
    /// `Err` means the record's own data could not be read for this filter
    /// (e.g. a malformed stored timestamp); callers treat that as no match.
    pub fn matches(&self, record: &Record) -> Result<bool, String> {
        match self {
            SearchFilter::Id(ids) => Ok(ids.iter().any(|id| id == record.id())),
            SearchFilter::Reference { kinds, targets, .. } => Ok(record
                .references()
                .iter()
                .filter(|r| kinds.contains(&r.kind))
                .any(|r| targets.iter().any(|t| t.matches(r)))),
            SearchFilter::Token { field, values } => Ok(token_matches(*field, values, record)),
            SearchFilter::Date {
                field,
                prefix,
                value,
            } => {
                let stored = match field {
                    DateField::Clinical => record.clinical_time(),
                    DateField::BirthDate => record.body().birth_date.as_deref(),
                };
                let Some(stored) = stored else {
                    return Ok(false);
                };
                let parsed = DateValue::parse(stored)
                    .ok_or_else(|| format!("unreadable timestamp '{stored}'"))?;
                Ok(value.compare(*prefix, parsed.start))
            }
            SearchFilter::Unsatisfiable(_) => Ok(false),
        }
    }

    /// Returns true if no record can match.
    pub fn is_unsatisfiable(&self) -> bool {
        matches!(self, SearchFilter::Unsatisfiable(_))
    }
}

fn token_matches(field: TokenField, values: &[TokenValue], record: &Record) -> bool {
    let body = record.body();
    let codings: Vec<&Coding> = match field {
        TokenField::Category => body.category.iter().flat_map(|c| c.coding.iter()).collect(),
        TokenField::Code => body.code.iter().flat_map(|c| c.coding.iter()).collect(),
        TokenField::Class => body.class.iter().collect(),
        TokenField::Status => {
            return plain_matches(values, body.status.as_deref());
        }
        TokenField::Gender => {
            return plain_matches(values, body.gender.as_deref());
        }
        TokenField::Identifier => {
            return body.identifier.iter().any(|ident| {
                values
                    .iter()
                    .any(|v| v.matches_pair(ident.system.as_deref(), ident.value.as_deref()))
            });
        }
    };
    codings.iter().any(|coding| {
        values
            .iter()
            .any(|v| v.matches_pair(coding.system.as_deref(), coding.code.as_deref()))
    })
}

fn plain_matches(values: &[TokenValue], stored: Option<&str>) -> bool {
    values
        .iter()
        .any(|v| v.system.is_none() && v.code.as_deref() == stored && stored.is_some())
}

// =============================================================================
// Query
// =============================================================================

/// A parsed search request for one resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Resource type searched.
    pub resource_type: ResourceType,
    /// Filters, all of which must match.
    pub filters: Vec<SearchFilter>,
    /// Page size; 0 returns only the total.
    pub count: usize,
    /// Leading matches skipped.
    pub offset: usize,
    params: Vec<(String, String)>,
}

impl SearchQuery {
    /// An unfiltered query with default paging.
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            filters: Vec::new(),
            count: DEFAULT_COUNT,
            offset: 0,
            params: Vec::new(),
        }
    }

    /// Parses raw query pairs.
    ///
    /// Repeated parameters are combined with AND; comma-separated values
    /// within one parameter are combined with OR.
    pub fn parse<I, K, V>(resource_type: ResourceType, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut query = Self::new(resource_type);
        for (name, raw) in pairs {
            query.push_param(name.as_ref(), raw.as_ref());
        }
        query
    }

    /// Adds one raw parameter.
    pub fn with_param(mut self, name: &str, raw: &str) -> Self {
        self.push_param(name, raw);
        self
    }

    fn push_param(&mut self, name: &str, raw: &str) {
        let name = name.trim();
        let raw = raw.trim();

        match name {
            "_count" => {
                self.count = parse_count(raw);
                return;
            }
            "_offset" => {
                self.offset = raw.parse::<usize>().unwrap_or(0);
                return;
            }
            _ => {}
        }

        if raw.is_empty() {
            return;
        }

        let filter = if name == "_id" {
            Some(SearchFilter::Id(split_values(raw).map(str::to_string).collect()))
        } else {
            lookup_param(self.resource_type, name).map(|kind| build_filter(name, kind, raw))
        };

        if let Some(filter) = filter {
            self.filters.push(filter);
            self.params.push((name.to_string(), raw.to_string()));
        }
    }

    /// Returns the recognized parameters plus effective paging, sorted by
    /// name then value.
    ///
    /// Two queries with the same canonical parameters return the same result.
    pub fn canonical_params(&self) -> Vec<(String, String)> {
        let mut params = self.params.clone();
        params.push(("_count".to_string(), self.count.to_string()));
        params.push(("_offset".to_string(), self.offset.to_string()));
        params.sort();
        params
    }

    /// Returns true if some filter can never match.
    pub fn is_unsatisfiable(&self) -> bool {
        self.filters.iter().any(SearchFilter::is_unsatisfiable)
    }
}

fn parse_count(raw: &str) -> usize {
    match raw.parse::<i64>() {
        Ok(n) if n < 0 => 0,
        Ok(n) => usize::try_from(n).unwrap_or(usize::MAX),
        Err(_) => DEFAULT_COUNT,
    }
}

fn split_values(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|v| !v.is_empty())
}

fn build_filter(name: &str, kind: SearchParamKind, raw: &str) -> SearchFilter {
    let built = match kind {
        SearchParamKind::Reference => build_reference(name, raw),
        SearchParamKind::Token => build_token(name, raw),
        SearchParamKind::Date => build_date(name, raw),
    };
    built.unwrap_or_else(SearchFilter::Unsatisfiable)
}

fn build_reference(name: &str, raw: &str) -> ParamResult<SearchFilter> {
    let (param, kinds): (&'static str, Vec<ReferenceKind>) = match name {
        "subject" => ("subject", vec![ReferenceKind::Subject]),
        "patient" => ("patient", vec![ReferenceKind::Subject, ReferenceKind::Patient]),
        "encounter" => ("encounter", vec![ReferenceKind::Encounter]),
        other => {
            return Err(ParamError::InvalidValue {
                param: other.to_string(),
                value: raw.to_string(),
            })
        }
    };
    let targets = split_values(raw)
        .map(|v| ReferenceTarget::parse(name, v))
        .collect::<ParamResult<Vec<_>>>()?;
    if targets.is_empty() {
        return Err(ParamError::EmptyValue(name.to_string()));
    }
    if name != "encounter" {
        if let Some(rt) = targets.iter().find_map(|t| t.resource_type) {
            if rt != ResourceType::Patient {
                return Err(ParamError::InvalidValue {
                    param: name.to_string(),
                    value: raw.to_string(),
                });
            }
        }
    }
    Ok(SearchFilter::Reference {
        param,
        kinds,
        targets,
    })
}

fn build_token(name: &str, raw: &str) -> ParamResult<SearchFilter> {
    let field = TokenField::from_name(name).ok_or_else(|| ParamError::InvalidValue {
        param: name.to_string(),
        value: raw.to_string(),
    })?;
    let values: Vec<TokenValue> = split_values(raw).map(TokenValue::parse).collect();
    if values.is_empty() {
        return Err(ParamError::EmptyValue(name.to_string()));
    }
    Ok(SearchFilter::Token { field, values })
}

fn build_date(name: &str, raw: &str) -> ParamResult<SearchFilter> {
    let field = if name == "birthdate" {
        DateField::BirthDate
    } else {
        DateField::Clinical
    };
    let (prefix, value) = all_consuming(prefixed_date)(raw)
        .map(|(_, parsed)| parsed)
        .map_err(|_| ParamError::InvalidValue {
            param: name.to_string(),
            value: raw.to_string(),
        })?;
    Ok(SearchFilter::Date {
        field,
        prefix,
        value,
    })
}

// =============================================================================
// Date grammar
// =============================================================================

fn prefixed_date(input: &str) -> IResult<&str, (DatePrefix, DateValue)> {
    pair(map(opt(date_prefix), Option::unwrap_or_default), date_value)(input)
}

fn date_prefix(input: &str) -> IResult<&str, DatePrefix> {
    alt((
        value(DatePrefix::Eq, tag("eq")),
        value(DatePrefix::Ne, tag("ne")),
        value(DatePrefix::Gt, tag("gt")),
        value(DatePrefix::Lt, tag("lt")),
        value(DatePrefix::Ge, tag("ge")),
        value(DatePrefix::Le, tag("le")),
        value(DatePrefix::Sa, tag("sa")),
        value(DatePrefix::Eb, tag("eb")),
        value(DatePrefix::Ap, tag("ap")),
    ))(input)
}

fn digits<'a>(n: usize) -> impl Fn(&'a str) -> IResult<&'a str, u32> {
    move |input: &'a str| {
        map_res(take_while_m_n(n, n, |c: char| c.is_ascii_digit()), |d: &str| {
            d.parse::<u32>()
        })(input)
    }
}

struct TimeOfDay {
    hour: u32,
    minute: u32,
    second: Option<u32>,
    offset_secs: Option<i32>,
}

fn time_zone(input: &str) -> IResult<&str, i32> {
    alt((
        value(0, char('Z')),
        map(
            tuple((one_of("+-"), digits(2), char(':'), digits(2))),
            |(sign, h, _, m)| {
                let secs = (h * 3600 + m * 60) as i32;
                if sign == '-' {
                    -secs
                } else {
                    secs
                }
            },
        ),
    ))(input)
}

fn time_of_day(input: &str) -> IResult<&str, TimeOfDay> {
    map(
        tuple((
            digits(2),
            char(':'),
            digits(2),
            opt(preceded(
                char(':'),
                pair(
                    digits(2),
                    opt(recognize(pair(
                        char('.'),
                        take_while1(|c: char| c.is_ascii_digit()),
                    ))),
                ),
            )),
            opt(time_zone),
        )),
        |(hour, _, minute, seconds, offset_secs)| TimeOfDay {
            hour,
            minute,
            second: seconds.map(|(s, _)| s),
            offset_secs,
        },
    )(input)
}

fn date_value(input: &str) -> IResult<&str, DateValue> {
    let (rest, (year, month, day, time)) = tuple((
        digits(4),
        opt(preceded(char('-'), digits(2))),
        opt(preceded(char('-'), digits(2))),
        opt(preceded(char('T'), time_of_day)),
    ))(input)?;

    let invalid = || nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify));

    if (day.is_some() && month.is_none()) || (time.is_some() && day.is_none()) {
        return Err(invalid());
    }

    let year = year as i32;
    let range = match (month, day, time) {
        (None, _, _) => {
            let start = utc_midnight(year, 1, 1).ok_or_else(invalid)?;
            let end = utc_midnight(year + 1, 1, 1).ok_or_else(invalid)?;
            (start, end)
        }
        (Some(m), None, _) => {
            let start = utc_midnight(year, m, 1).ok_or_else(invalid)?;
            let (ny, nm) = if m == 12 { (year + 1, 1) } else { (year, m + 1) };
            let end = utc_midnight(ny, nm, 1).ok_or_else(invalid)?;
            (start, end)
        }
        (Some(m), Some(d), None) => {
            let start = utc_midnight(year, m, d).ok_or_else(invalid)?;
            (start, start + Duration::days(1))
        }
        (Some(m), Some(d), Some(t)) => {
            let offset = FixedOffset::east_opt(t.offset_secs.unwrap_or(0)).ok_or_else(invalid)?;
            let local = NaiveDate::from_ymd_opt(year, m, d)
                .and_then(|date| date.and_hms_opt(t.hour, t.minute, t.second.unwrap_or(0)))
                .ok_or_else(invalid)?;
            let start = offset
                .from_local_datetime(&local)
                .single()
                .ok_or_else(invalid)?
                .with_timezone(&Utc);
            let width = if t.second.is_some() {
                Duration::seconds(1)
            } else {
                Duration::minutes(1)
            };
            (start, start + width)
        }
    };

    Ok((
        rest,
        DateValue {
            start: range.0,
            end: range.1,
        },
    ))
}

fn utc_midnight(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obs(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn lab() -> Record {
        obs(json!({
            "resourceType": "Observation",
            "id": "o1",
            "status": "final",
            "category": [{"coding": [{"system": "http://terminology.hl7.org/CodeSystem/observation-category", "code": "laboratory"}]}],
            "code": {"coding": [{"system": "http://loinc.org", "code": "718-7"}]},
            "subject": {"reference": "Patient/p1"},
            "effectiveDateTime": "2180-07-23T12:36:00-04:00"
        }))
    }

    // Paging

    #[test]
    fn test_count_defaults() {
        let q = SearchQuery::parse(ResourceType::Observation, Vec::<(&str, &str)>::new());
        assert_eq!(q.count, DEFAULT_COUNT);
        assert_eq!(q.offset, 0);
    }

    #[test]
    fn test_count_negative_clamps_to_zero() {
        let q = SearchQuery::parse(ResourceType::Observation, [("_count", "-5")]);
        assert_eq!(q.count, 0);
    }

    #[test]
    fn test_count_unparseable_uses_default() {
        let q = SearchQuery::parse(ResourceType::Observation, [("_count", "ten"), ("_offset", "x")]);
        assert_eq!(q.count, DEFAULT_COUNT);
        assert_eq!(q.offset, 0);
    }

    // Recognition

    #[test]
    fn test_unknown_params_ignored() {
        let q = SearchQuery::parse(
            ResourceType::Observation,
            [("_format", "json"), ("value-quantity", "gt5"), ("code:text", "blood")],
        );
        assert!(q.filters.is_empty());
        assert_eq!(q.canonical_params().len(), 2);
    }

    #[test]
    fn test_params_not_supported_by_type_ignored() {
        let q = SearchQuery::parse(ResourceType::Patient, [("category", "laboratory")]);
        assert!(q.filters.is_empty());
    }

    #[test]
    fn test_empty_value_ignored() {
        let q = SearchQuery::parse(ResourceType::Observation, [("subject", "  ")]);
        assert!(q.filters.is_empty());
    }

    // Reference values

    #[test]
    fn test_reference_typed_and_bare() {
        let q = SearchQuery::parse(ResourceType::Observation, [("subject", "Patient/p1,p2")]);
        match &q.filters[0] {
            SearchFilter::Reference { targets, kinds, .. } => {
                assert_eq!(kinds, &vec![ReferenceKind::Subject]);
                assert_eq!(targets[0].resource_type, Some(ResourceType::Patient));
                assert_eq!(targets[1].resource_type, None);
                assert_eq!(targets[1].id, "p2");
            }
            other => panic!("unexpected filter {other:?}"),
        }
    }

    #[test]
    fn test_reference_unknown_type_unsatisfiable() {
        let q = SearchQuery::parse(ResourceType::Observation, [("subject", "Group/g1")]);
        assert!(q.is_unsatisfiable());
    }

    #[test]
    fn test_subject_must_be_patient() {
        let q = SearchQuery::parse(ResourceType::Observation, [("subject", "Encounter/e1")]);
        assert!(q.is_unsatisfiable());
    }

    #[test]
    fn test_reference_matching() {
        let record = lab();
        let q = SearchQuery::parse(ResourceType::Observation, [("subject", "p1")]);
        assert_eq!(q.filters[0].matches(&record), Ok(true));
        let q = SearchQuery::parse(ResourceType::Observation, [("patient", "Patient/p2")]);
        assert_eq!(q.filters[0].matches(&record), Ok(false));
    }

    // Tokens

    #[test]
    fn test_token_code_and_system() {
        let record = lab();
        let q = SearchQuery::parse(ResourceType::Observation, [("code", "http://loinc.org|718-7")]);
        assert_eq!(q.filters[0].matches(&record), Ok(true));
        let q = SearchQuery::parse(ResourceType::Observation, [("code", "http://snomed.info/sct|718-7")]);
        assert_eq!(q.filters[0].matches(&record), Ok(false));
        let q = SearchQuery::parse(ResourceType::Observation, [("code", "http://loinc.org|")]);
        assert_eq!(q.filters[0].matches(&record), Ok(true));
    }

    #[test]
    fn test_token_or_values() {
        let record = lab();
        let q = SearchQuery::parse(
            ResourceType::Observation,
            [("category", "vital-signs,laboratory")],
        );
        assert_eq!(q.filters[0].matches(&record), Ok(true));
    }

    #[test]
    fn test_status_token() {
        let record = lab();
        let q = SearchQuery::parse(ResourceType::Observation, [("status", "final")]);
        assert_eq!(q.filters[0].matches(&record), Ok(true));
        let q = SearchQuery::parse(ResourceType::Observation, [("status", "amended")]);
        assert_eq!(q.filters[0].matches(&record), Ok(false));
    }

    // Dates

    #[test]
    fn test_date_value_precisions() {
        let year = DateValue::parse("2180").unwrap();
        assert_eq!(year.start.to_rfc3339(), "2180-01-01T00:00:00+00:00");
        assert_eq!(year.end.to_rfc3339(), "2181-01-01T00:00:00+00:00");

        let month = DateValue::parse("2180-12").unwrap();
        assert_eq!(month.end.to_rfc3339(), "2181-01-01T00:00:00+00:00");

        let day = DateValue::parse("2180-07-23").unwrap();
        assert_eq!(day.end.to_rfc3339(), "2180-07-24T00:00:00+00:00");

        let instant = DateValue::parse("2180-07-23T12:36:00-04:00").unwrap();
        assert_eq!(instant.start.to_rfc3339(), "2180-07-23T16:36:00+00:00");
    }

    #[test]
    fn test_date_value_rejects_garbage() {
        assert!(DateValue::parse("yesterday").is_none());
        assert!(DateValue::parse("2180-13-01").is_none());
        assert!(DateValue::parse("2180-02-30").is_none());
        assert!(DateValue::parse("2180-07-23T25:00").is_none());
        assert!(DateValue::parse("2180-07-23 12:00").is_none());
    }

    #[test]
    fn test_date_prefixes() {
        let record = lab();
        let check = |raw: &str| {
            let q = SearchQuery::parse(ResourceType::Observation, [("date", raw)]);
            q.filters[0].matches(&record).unwrap()
        };
        assert!(check("2180-07-23"));
        assert!(check("ge2180-07"));
        assert!(check("lt2181"));
        assert!(check("gt2180-07-22"));
        assert!(!check("gt2180-07-23"));
        assert!(!check("lt2180-07-23"));
        assert!(check("le2180-07-23"));
        assert!(check("ne2179"));
        assert!(!check("eq2179"));
    }

    #[test]
    fn test_bad_date_unsatisfiable() {
        let q = SearchQuery::parse(ResourceType::Observation, [("date", "gx2180")]);
        assert!(q.is_unsatisfiable());
    }

    #[test]
    fn test_unreadable_stored_date_reports_error() {
        let record = obs(json!({
            "resourceType": "Observation",
            "id": "o2",
            "effectiveDateTime": "sometime"
        }));
        let q = SearchQuery::parse(ResourceType::Observation, [("date", "2180")]);
        assert!(q.filters[0].matches(&record).is_err());
    }

    // Canonical form

    #[test]
    fn test_canonical_params_order_independent() {
        let a = SearchQuery::parse(
            ResourceType::Observation,
            [("subject", "p1"), ("category", "laboratory")],
        );
        let b = SearchQuery::parse(
            ResourceType::Observation,
            [("category", "laboratory"), ("subject", "p1"), ("_count", "100")],
        );
        assert_eq!(a.canonical_params(), b.canonical_params());
    }

    #[test]
    fn test_canonical_params_include_paging() {
        let q = SearchQuery::parse(ResourceType::Encounter, [("_offset", "5"), ("_count", "10")]);
        assert_eq!(
            q.canonical_params(),
            vec![
                ("_count".to_string(), "10".to_string()),
                ("_offset".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn test_supported_params_cover_original_server() {
        let names: Vec<&str> = supported_params(ResourceType::Observation)
            .iter()
            .map(|(n, _)| *n)
            .collect();
        assert!(names.contains(&"subject"));
        assert!(names.contains(&"category"));
        assert!(supported_params(ResourceType::Encounter)
            .iter()
            .any(|(n, _)| *n == "subject"));
    }
}
