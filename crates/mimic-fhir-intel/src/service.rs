//! Cached service facade.
//!
//! [`ClinicalService`] is what a transport layer talks to. Searches, risk
//! summaries and cohort rankings all go through one shared [`QueryCache`],
//! keyed by canonical request form, so clearing a scope affects every path
//! that produced entries in it.

use std::sync::Arc;
use std::time::Instant;

use mimic_fhir::{supported_params, Record, ResourceType, SearchParamKind, SearchQuery};
use mimic_fhir_engine::{
    CacheKey, CacheStats, CacheStatus, ClearScope, Dataset, DatasetLayout,
    DatasetStats, EngineConfig, EngineError, ExecutionStats, QueryCache, QueryEngine, QueryPlan,
    SearchOutcome, SearchResult,
};
use serde::Serialize;

use crate::cohort::{self, CohortFilter, CohortReport, CohortView};
use crate::error::IntelResult;
use crate::risk::{RiskEngine, RiskSummary};

/// Operation name for per-patient summaries.
pub const RISK_SUMMARY_OPERATION: &str = "$risk-summary";

/// Operation name for cohort ranking.
pub const COHORT_OPERATION: &str = "$cohort";

/// FHIR release the dataset is exported in.
pub const FHIR_VERSION: &str = "4.0.1";

/// A value stored in the shared cache.
#[derive(Debug, Clone)]
pub enum CachedValue {
    /// One page of a search.
    Search(Arc<SearchResult>),
    /// A patient's risk summary.
    Summary(Arc<RiskSummary>),
    /// The full cohort ranking.
    Cohort(Arc<CohortReport>),
}

impl CachedValue {
    fn into_search(self) -> Option<Arc<SearchResult>> {
        match self {
            CachedValue::Search(result) => Some(result),
            _ => None,
        }
    }

    fn into_summary(self) -> Option<Arc<RiskSummary>> {
        match self {
            CachedValue::Summary(summary) => Some(summary),
            _ => None,
        }
    }

    fn into_cohort(self) -> Option<Arc<CohortReport>> {
        match self {
            CachedValue::Cohort(report) => Some(report),
            _ => None,
        }
    }
}

/// Reads, searches and derived operations over one dataset, with caching.
///
/// The service is `Sync`; share it behind an `Arc` between request handlers.
///
/// # Example
///
/// ```ignore
/// use mimic_fhir::ResourceType;
/// use mimic_fhir_engine::{DatasetLayout, EngineConfig};
/// use mimic_fhir_intel::ClinicalService;
///
/// let service = ClinicalService::open(&DatasetLayout::from_env(), EngineConfig::default());
///
/// let outcome = service.search(ResourceType::Observation, [("subject", "Patient/p1")])?;
/// let (summary, _) = service.risk_summary("p1")?;
/// println!("{} results, score {}", outcome.result.total, summary.score);
/// ```
#[derive(Debug)]
pub struct ClinicalService {
    engine: QueryEngine,
    risk: RiskEngine,
    cache: QueryCache<CachedValue>,
}

impl ClinicalService {
    /// Loads the dataset described by `layout` and wraps it.
    pub fn open(layout: &DatasetLayout, config: EngineConfig) -> Self {
        Self::from_dataset(Arc::new(Dataset::open(layout)), config)
    }

    /// Wraps an already loaded dataset.
    ///
    /// Without a cache section in `config` the default cache is used; pass
    /// [`CacheConfig::disabled`](mimic_fhir_engine::CacheConfig::disabled) to turn caching off.
    pub fn from_dataset(dataset: Arc<Dataset>, config: EngineConfig) -> Self {
        let cache = QueryCache::new(config.cache.clone().unwrap_or_default());
        let engine = QueryEngine::with_config(dataset, config);
        let risk = RiskEngine::new(engine.clone());
        Self {
            engine,
            risk,
            cache,
        }
    }

    /// Returns the query engine.
    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Reads one record by type name and id.
    pub fn read(&self, type_name: &str, id: &str) -> IntelResult<Arc<Record>> {
        Ok(self.engine.read_named(type_name, id)?)
    }

    /// Runs a search through the cache.
    ///
    /// `stats.cache_hit` tells whether the page came from an earlier
    /// identical request; `stats.scanned` is zero on a hit.
    pub fn search<I, K, V>(&self, resource_type: ResourceType, params: I) -> IntelResult<SearchOutcome>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let query = SearchQuery::parse(resource_type, params);
        self.run_search(&query)
    }

    /// Like [`search`](Self::search), with the type given by name.
    pub fn search_named<I, K, V>(&self, type_name: &str, params: I) -> IntelResult<SearchOutcome>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let resource_type = type_name
            .parse::<ResourceType>()
            .map_err(|_| EngineError::UnsupportedType(type_name.to_string()))?;
        self.search(resource_type, params)
    }

    /// Runs a parsed search through the cache.
    pub fn run_search(&self, query: &SearchQuery) -> IntelResult<SearchOutcome> {
        let start = Instant::now();
        let key = CacheKey::for_search(query);

        let mut scanned = 0;
        let (value, status) = self.cache.try_get_or_compute(&key, || {
            let outcome = self.engine.search(query)?;
            scanned = outcome.stats.scanned;
            Ok::<_, EngineError>(CachedValue::Search(outcome.result))
        })?;

        let result = match value.into_search() {
            Some(result) => result,
            None => {
                tracing::warn!(key = %key, "cache entry holds a different value kind");
                let outcome = self.engine.search(query)?;
                scanned = outcome.stats.scanned;
                outcome.result
            }
        };

        Ok(SearchOutcome {
            result,
            stats: ExecutionStats::new(start.elapsed(), scanned, status.is_hit()),
        })
    }

    /// Risk summary for one patient, cached per patient id.
    pub fn risk_summary(&self, patient_id: &str) -> IntelResult<(Arc<RiskSummary>, CacheStatus)> {
        let key = CacheKey::for_operation(RISK_SUMMARY_OPERATION, [("patient", patient_id)]);
        let (value, status) = self.cache.try_get_or_compute(&key, || {
            self.risk
                .summarize(patient_id)
                .map(|summary| CachedValue::Summary(Arc::new(summary)))
        })?;

        match value.into_summary() {
            Some(summary) => Ok((summary, status)),
            None => {
                tracing::warn!(key = %key, "cache entry holds a different value kind");
                Ok((Arc::new(self.risk.summarize(patient_id)?), CacheStatus::Bypass))
            }
        }
    }

    /// Every patient ranked by risk, filtered by `level` and `_count`.
    ///
    /// The full ranking is cached once; filters are applied per call.
    /// Individual summaries are shared with [`risk_summary`](Self::risk_summary).
    pub fn cohort<I, K, V>(&self, params: I) -> IntelResult<(CohortView, CacheStatus)>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let filter = CohortFilter::parse(params)?;
        let key = CacheKey::for_operation(COHORT_OPERATION, std::iter::empty::<(&str, &str)>());

        let (value, status) = self
            .cache
            .try_get_or_compute(&key, || self.rank_cohort().map(|r| CachedValue::Cohort(Arc::new(r))))?;

        let report = match value.into_cohort() {
            Some(report) => report,
            None => {
                tracing::warn!(key = %key, "cache entry holds a different value kind");
                Arc::new(self.rank_cohort()?)
            }
        };
        Ok((report.select(&filter), status))
    }

    fn rank_cohort(&self) -> IntelResult<CohortReport> {
        let ids: Vec<String> = self
            .engine
            .dataset()
            .store()
            .all(ResourceType::Patient)?
            .map(|p| p.id().to_string())
            .collect();
        tracing::info!(patients = ids.len(), "ranking cohort");

        cohort::rank(&ids, self.engine.config().parallel, |id| {
            self.risk_summary(id).map(|(summary, _)| summary)
        })
    }

    /// Loaded types with their interactions and search parameters.
    pub fn capabilities(&self) -> CapabilityStatement {
        let store = self.engine.dataset().store();
        let resources = store
            .available_types()
            .into_iter()
            .map(|rt| {
                let mut search_params = vec![SearchParamCapability {
                    name: "_id",
                    kind: SearchParamKind::Token,
                }];
                search_params.extend(
                    supported_params(rt)
                        .iter()
                        .map(|&(name, kind)| SearchParamCapability { name, kind }),
                );
                ResourceCapability {
                    resource_type: rt,
                    records: store.collection(rt).map(|c| c.len()).unwrap_or(0),
                    interactions: vec!["read", "search-type"],
                    search_params,
                }
            })
            .collect();

        CapabilityStatement {
            fhir_version: FHIR_VERSION,
            resources,
            operations: vec![RISK_SUMMARY_OPERATION, COHORT_OPERATION],
        }
    }

    /// Returns the plan a search would use.
    pub fn explain(&self, query: &SearchQuery) -> IntelResult<QueryPlan> {
        Ok(self.engine.explain(query)?)
    }

    /// Cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Removes cached entries in `scope`; returns how many were removed.
    pub fn clear_cache(&self, scope: &ClearScope) -> usize {
        let removed = self.cache.clear(scope);
        tracing::info!(?scope, removed, "cache cleared");
        removed
    }

    /// Load and index statistics.
    pub fn dataset_stats(&self) -> DatasetStats {
        self.engine.dataset().stats()
    }
}

/// What the service can answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityStatement {
    /// FHIR release.
    pub fhir_version: &'static str,
    /// One entry per loaded type.
    pub resources: Vec<ResourceCapability>,
    /// Derived operations.
    pub operations: Vec<&'static str>,
}

impl CapabilityStatement {
    /// Capability entry for a type, if it loaded.
    pub fn resource(&self, resource_type: ResourceType) -> Option<&ResourceCapability> {
        self.resources
            .iter()
            .find(|r| r.resource_type == resource_type)
    }
}

/// Capabilities of one resource type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCapability {
    /// The type.
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Records loaded.
    pub records: usize,
    /// Supported interactions.
    pub interactions: Vec<&'static str>,
    /// Supported search parameters.
    pub search_params: Vec<SearchParamCapability>,
}

/// One search parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchParamCapability {
    /// Parameter name.
    pub name: &'static str,
    /// Parameter type.
    #[serde(rename = "type")]
    pub kind: SearchParamKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_fhir_engine::{CacheConfig, Collection, RecordStore};
    use serde_json::json;

    fn service(config: EngineConfig) -> ClinicalService {
        let patients = Collection::from_records(
            ResourceType::Patient,
            [Record::from_value(json!({"resourceType": "Patient", "id": "p1"})).unwrap()],
        );
        let observations = Collection::from_records(
            ResourceType::Observation,
            (0..3).map(|i| {
                Record::from_value(json!({
                    "resourceType": "Observation",
                    "id": format!("o{i}"),
                    "subject": {"reference": "Patient/p1"},
                }))
                .unwrap()
            }),
        );
        let dataset = Dataset::from_store(RecordStore::from_collections([patients, observations]));
        ClinicalService::from_dataset(Arc::new(dataset), config)
    }

    #[test]
    fn test_search_hit_on_repeat() {
        let service = service(EngineConfig::default());
        let first = service
            .search(ResourceType::Observation, [("subject", "p1")])
            .unwrap();
        let second = service
            .search(ResourceType::Observation, [("subject", "p1")])
            .unwrap();
        assert!(!first.stats.cache_hit);
        assert_eq!(first.stats.scanned, 3);
        assert!(second.stats.cache_hit);
        assert_eq!(second.stats.scanned, 0);
        assert!(Arc::ptr_eq(&first.result, &second.result));
    }

    #[test]
    fn test_disabled_cache_always_computes() {
        let service = service(EngineConfig::builder().with_cache(CacheConfig::disabled()).build());
        for _ in 0..2 {
            let outcome = service
                .search(ResourceType::Observation, [("subject", "p1")])
                .unwrap();
            assert!(!outcome.stats.cache_hit);
        }
        assert_eq!(service.cache_stats().entries, 0);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let service = service(EngineConfig::default());
        assert!(service.risk_summary("missing").is_err());
        assert!(service.risk_summary("missing").is_err());
        assert_eq!(service.cache_stats().entries, 0);
    }

    #[test]
    fn test_search_named_unknown_type() {
        let service = service(EngineConfig::default());
        let err = service
            .search_named("Bundle", std::iter::empty::<(&str, &str)>())
            .unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn test_capabilities_serialize() {
        let service = service(EngineConfig::default());
        let caps = serde_json::to_value(service.capabilities()).unwrap();
        assert_eq!(caps["fhirVersion"], "4.0.1");
        assert_eq!(caps["resources"][0]["type"], "Patient");
        assert_eq!(caps["resources"][0]["searchParams"][0]["name"], "_id");
        assert_eq!(caps["operations"][1], "$cohort");
    }
}
