//! Per-patient risk summaries.
//!
//! A summary walks the patient's references into four collections and
//! scores them with the fixed table in [`weights`]:
//!
//! | Factor | Source | Points |
//! |--------|--------|--------|
//! | Baseline | every patient | 30 |
//! | Critical result | Observation interpretation HH, LL, AA, C, CRT, CR | 5 each |
//! | Abnormal result | Observation interpretation H, L, A, HU, LU, POS, R | 2 each |
//! | Condition | each Condition | 3 each |
//! | Encounter acuity | class ACUTE 5, EMER 4, IMP 3, OBSENC 2 | per Encounter |
//! | Active order | MedicationRequest with status `active` | 1 each |
//!
//! The score is capped at 95. A collection that is not loaded contributes
//! nothing.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use mimic_fhir::{DateValue, Record, ResourceType, SearchQuery};
use mimic_fhir_engine::QueryEngine;
use serde::Serialize;

use crate::error::{IntelError, IntelResult};

/// Scoring constants.
pub mod weights {
    /// Points every patient starts with.
    pub const BASELINE: u32 = 30;

    /// Points per observation with a critical interpretation.
    pub const CRITICAL_RESULT: u32 = 5;

    /// Points per observation with an abnormal interpretation.
    pub const ABNORMAL_RESULT: u32 = 2;

    /// Points per condition.
    pub const CONDITION: u32 = 3;

    /// Points per active medication request.
    pub const ACTIVE_ORDER: u32 = 1;

    /// Highest reachable score.
    pub const MAX_SCORE: u32 = 95;

    /// Interpretation codes counted as critical.
    pub const CRITICAL_CODES: &[&str] = &["HH", "LL", "AA", "C", "CRT", "CR"];

    /// Interpretation codes counted as abnormal.
    pub const ABNORMAL_CODES: &[&str] = &["H", "L", "A", "HU", "LU", "POS", "R"];

    /// Points for one encounter of the given class code.
    pub fn encounter_class(code: &str) -> u32 {
        match code {
            "ACUTE" => 5,
            "EMER" => 4,
            "IMP" => 3,
            "OBSENC" => 2,
            _ => 0,
        }
    }

    /// Lower bound of the moderate level.
    pub const MODERATE_FROM: u32 = 40;
    /// Lower bound of the high level.
    pub const HIGH_FROM: u32 = 60;
    /// Lower bound of the critical level.
    pub const CRITICAL_FROM: u32 = 80;
}

/// Most alerts carried by a summary.
pub const MAX_ALERTS: usize = 3;

// =============================================================================
// Types
// =============================================================================

/// Risk band derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Below 40.
    Low,
    /// 40 to 59.
    Moderate,
    /// 60 to 79.
    High,
    /// 80 and above.
    Critical,
}

impl RiskLevel {
    /// Level for a score.
    pub fn from_score(score: u32) -> Self {
        if score >= weights::CRITICAL_FROM {
            RiskLevel::Critical
        } else if score >= weights::HIGH_FROM {
            RiskLevel::High
        } else if score >= weights::MODERATE_FROM {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = IntelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "moderate" => Ok(RiskLevel::Moderate),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            _ => Err(IntelError::InvalidParameter {
                name: "level".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// A scoring factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskFactor {
    /// Fixed starting points.
    Baseline,
    /// Observations with a critical interpretation.
    CriticalResults,
    /// Observations with an abnormal interpretation.
    AbnormalResults,
    /// Recorded conditions.
    Conditions,
    /// Encounter classes.
    EncounterAcuity,
    /// Active medication requests.
    ActiveOrders,
}

/// Points one factor added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactorContribution {
    /// The factor.
    pub factor: RiskFactor,
    /// Records that counted toward it.
    pub count: usize,
    /// Points added.
    pub points: u32,
}

/// Record counts behind a summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivityCounts {
    /// Observations for the patient.
    pub observations: usize,
    /// Conditions for the patient.
    pub conditions: usize,
    /// Encounters for the patient.
    pub encounters: usize,
    /// Medication requests for the patient.
    pub medication_requests: usize,
}

/// Name and basic attributes of the patient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Demographics {
    /// Display name.
    pub name: Option<String>,
    /// Administrative gender.
    pub gender: Option<String>,
    /// Birth date as stored.
    pub birth_date: Option<String>,
}

/// Derived risk picture for one patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskSummary {
    /// Patient id.
    pub patient_id: String,
    /// Capped score.
    pub score: u32,
    /// Band for the score.
    pub level: RiskLevel,
    /// Contribution of every factor, baseline first.
    pub factors: Vec<FactorContribution>,
    /// Record counts.
    pub counts: ActivityCounts,
    /// Latest clinical timestamp across observations, encounters and
    /// conditions.
    pub last_activity: Option<String>,
    /// Label of the first condition.
    pub primary_concern: Option<String>,
    /// Distinct condition labels, at most [`MAX_ALERTS`].
    pub alerts: Vec<String>,
    /// Patient attributes.
    pub demographics: Demographics,
}

impl RiskSummary {
    /// Points from one factor.
    pub fn points(&self, factor: RiskFactor) -> u32 {
        self.factors
            .iter()
            .filter(|c| c.factor == factor)
            .map(|c| c.points)
            .sum()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Computes [`RiskSummary`] values from the dataset.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    engine: QueryEngine,
}

impl RiskEngine {
    /// Creates a risk engine over a query engine.
    pub fn new(engine: QueryEngine) -> Self {
        Self { engine }
    }

    /// Returns the query engine.
    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Summarizes one patient.
    ///
    /// # Errors
    ///
    /// Returns the engine's `NotFound` if no such patient exists and
    /// `Unavailable` if patients did not load.
    pub fn summarize(&self, patient_id: &str) -> IntelResult<RiskSummary> {
        let patient = self.engine.read(ResourceType::Patient, patient_id)?;

        let observations = self.records_for(ResourceType::Observation, patient_id);
        let conditions = self.records_for(ResourceType::Condition, patient_id);
        let encounters = self.records_for(ResourceType::Encounter, patient_id);
        let requests = self.records_for(ResourceType::MedicationRequest, patient_id);

        let (critical, abnormal) = classify_results(&observations);
        let acuity: u32 = encounters
            .iter()
            .filter_map(|e| e.body().class.as_ref()?.code.as_deref())
            .map(weights::encounter_class)
            .sum();
        let acute_encounters = encounters
            .iter()
            .filter(|e| {
                e.body()
                    .class
                    .as_ref()
                    .and_then(|c| c.code.as_deref())
                    .is_some_and(|code| weights::encounter_class(code) > 0)
            })
            .count();
        let active_orders = requests
            .iter()
            .filter(|r| r.body().status.as_deref() == Some("active"))
            .count();

        let factors = vec![
            FactorContribution {
                factor: RiskFactor::Baseline,
                count: 1,
                points: weights::BASELINE,
            },
            contribution(RiskFactor::CriticalResults, critical, weights::CRITICAL_RESULT),
            contribution(RiskFactor::AbnormalResults, abnormal, weights::ABNORMAL_RESULT),
            contribution(RiskFactor::Conditions, conditions.len(), weights::CONDITION),
            FactorContribution {
                factor: RiskFactor::EncounterAcuity,
                count: acute_encounters,
                points: acuity,
            },
            contribution(RiskFactor::ActiveOrders, active_orders, weights::ACTIVE_ORDER),
        ];

        let raw: u32 = factors.iter().map(|c| c.points).sum();
        let score = raw.min(weights::MAX_SCORE);

        let mut alerts: Vec<String> = Vec::new();
        for label in conditions.iter().filter_map(|c| condition_label(c)) {
            if alerts.len() == MAX_ALERTS {
                break;
            }
            if !alerts.iter().any(|a| a == label) {
                alerts.push(label.to_string());
            }
        }

        let body = patient.body();
        Ok(RiskSummary {
            patient_id: patient.id().to_string(),
            score,
            level: RiskLevel::from_score(score),
            factors,
            counts: ActivityCounts {
                observations: observations.len(),
                conditions: conditions.len(),
                encounters: encounters.len(),
                medication_requests: requests.len(),
            },
            last_activity: latest_activity(
                observations.iter().chain(&encounters).chain(&conditions),
            ),
            primary_concern: conditions
                .first()
                .and_then(|c| condition_label(c))
                .map(str::to_string),
            alerts,
            demographics: Demographics {
                name: patient.display_name(),
                gender: body.gender.clone(),
                birth_date: body.birth_date.clone(),
            },
        })
    }

    /// Records of `resource_type` referring to the patient; empty if the
    /// type is not loaded.
    fn records_for(&self, resource_type: ResourceType, patient_id: &str) -> Vec<Arc<Record>> {
        let query = SearchQuery::new(resource_type)
            .with_param("patient", &format!("Patient/{patient_id}"));
        match self.engine.matching(&query) {
            Ok(records) => records,
            Err(err) => {
                tracing::debug!(
                    resource_type = %resource_type,
                    patient = patient_id,
                    error = %err,
                    "risk factor skipped"
                );
                Vec::new()
            }
        }
    }
}

fn contribution(factor: RiskFactor, count: usize, each: u32) -> FactorContribution {
    let count_points = u32::try_from(count).unwrap_or(u32::MAX);
    FactorContribution {
        factor,
        count,
        points: count_points.saturating_mul(each),
    }
}

/// Counts `(critical, abnormal)` observations; critical wins per record.
fn classify_results(observations: &[Arc<Record>]) -> (usize, usize) {
    let mut critical = 0;
    let mut abnormal = 0;
    for observation in observations {
        let codes: Vec<&str> = observation.interpretation_codes().collect();
        if codes.iter().any(|c| weights::CRITICAL_CODES.contains(c)) {
            critical += 1;
        } else if codes.iter().any(|c| weights::ABNORMAL_CODES.contains(c)) {
            abnormal += 1;
        }
    }
    (critical, abnormal)
}

fn condition_label(condition: &Record) -> Option<&str> {
    condition.body().code.as_ref()?.label()
}

fn latest_activity<'a>(records: impl Iterator<Item = &'a Arc<Record>>) -> Option<String> {
    records
        .filter_map(|r| {
            let raw = r.clinical_time()?;
            let parsed = DateValue::parse(raw)?;
            Some((parsed.start, raw))
        })
        .max_by_key(|(start, _)| *start)
        .map(|(_, raw)| raw.to_string())
}
