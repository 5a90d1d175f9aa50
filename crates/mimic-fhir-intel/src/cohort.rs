//! Cohort ranking: every patient's risk summary, highest score first.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{IntelError, IntelResult};
use crate::risk::{RiskLevel, RiskSummary};

/// Every patient ranked by score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CohortReport {
    /// Summaries sorted by score descending, then patient id.
    pub patients: Vec<Arc<RiskSummary>>,
    /// Patients per level.
    pub by_level: BTreeMap<RiskLevel, usize>,
}

impl CohortReport {
    /// Ranks summaries.
    pub fn from_summaries(mut patients: Vec<Arc<RiskSummary>>) -> Self {
        patients.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.patient_id.cmp(&b.patient_id))
        });

        let mut by_level: BTreeMap<RiskLevel, usize> = [
            RiskLevel::Low,
            RiskLevel::Moderate,
            RiskLevel::High,
            RiskLevel::Critical,
        ]
        .into_iter()
        .map(|level| (level, 0))
        .collect();
        for summary in &patients {
            *by_level.entry(summary.level).or_default() += 1;
        }

        Self { patients, by_level }
    }

    /// Number of ranked patients.
    pub fn len(&self) -> usize {
        self.patients.len()
    }

    /// Returns true if no patient was ranked.
    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    /// Applies a filter and returns the selected slice.
    pub fn select(&self, filter: &CohortFilter) -> CohortView {
        let matching: Vec<Arc<RiskSummary>> = self
            .patients
            .iter()
            .filter(|s| filter.min_level.map_or(true, |min| s.level >= min))
            .cloned()
            .collect();
        let total = matching.len();
        let patients = match filter.limit {
            Some(limit) => matching.into_iter().take(limit).collect(),
            None => matching,
        };
        CohortView {
            total,
            patients,
            by_level: self.by_level.clone(),
        }
    }
}

/// Selection applied to a ranked cohort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortFilter {
    /// Keep patients at or above this level.
    pub min_level: Option<RiskLevel>,
    /// Keep at most this many patients.
    pub limit: Option<usize>,
}

impl CohortFilter {
    /// Parses `level` and `_count` parameters; other names are ignored.
    ///
    /// # Errors
    ///
    /// [`IntelError::InvalidParameter`] for an unknown level or a
    /// non-numeric count.
    pub fn parse<I, K, V>(params: I) -> IntelResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filter = Self::default();
        for (name, value) in params {
            let value = value.as_ref().trim();
            match name.as_ref() {
                "level" if !value.is_empty() => filter.min_level = Some(value.parse()?),
                "_count" if !value.is_empty() => {
                    let limit = value
                        .parse::<i64>()
                        .map_err(|_| IntelError::InvalidParameter {
                            name: "_count".to_string(),
                            value: value.to_string(),
                        })?;
                    filter.limit = Some(usize::try_from(limit).unwrap_or(0));
                }
                _ => {}
            }
        }
        Ok(filter)
    }
}

/// A filtered slice of a cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CohortView {
    /// Patients matching the filter, before the limit.
    pub total: usize,
    /// Selected summaries, in rank order.
    pub patients: Vec<Arc<RiskSummary>>,
    /// Patients per level across the whole cohort.
    pub by_level: BTreeMap<RiskLevel, usize>,
}

/// Summarizes every patient id and ranks them.
///
/// With the `parallel` feature and `parallel` set, summaries are computed
/// with rayon; the ranking is the same either way.
pub fn rank<F>(patient_ids: &[String], parallel: bool, summarize: F) -> IntelResult<CohortReport>
where
    F: Fn(&str) -> IntelResult<Arc<RiskSummary>> + Sync,
{
    let summaries = summarize_all(patient_ids, parallel, &summarize)?;
    Ok(CohortReport::from_summaries(summaries))
}

#[cfg(feature = "parallel")]
fn summarize_all<F>(ids: &[String], parallel: bool, summarize: &F) -> IntelResult<Vec<Arc<RiskSummary>>>
where
    F: Fn(&str) -> IntelResult<Arc<RiskSummary>> + Sync,
{
    use rayon::prelude::*;

    if parallel {
        ids.par_iter().map(|id| summarize(id.as_str())).collect()
    } else {
        ids.iter().map(|id| summarize(id.as_str())).collect()
    }
}

#[cfg(not(feature = "parallel"))]
fn summarize_all<F>(ids: &[String], _parallel: bool, summarize: &F) -> IntelResult<Vec<Arc<RiskSummary>>>
where
    F: Fn(&str) -> IntelResult<Arc<RiskSummary>> + Sync,
{
    ids.iter().map(|id| summarize(id.as_str())).collect()
}
