//! Search execution over the loaded dataset.

use std::sync::Arc;
use std::time::Instant;

use mimic_fhir::{Record, ResourceType, SearchFilter, SearchQuery};

use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::error::{EngineError, EngineResult};
use crate::planner::{AccessPath, QueryPlan, QueryPlanner};
use crate::result::{ExecutionStats, SearchOutcome, SearchResult};
use crate::store::Collection;

/// Executes reads and searches against an immutable [`Dataset`].
///
/// The engine holds no mutable state; it can be shared freely across
/// threads. Caching is layered on top by the caller.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use mimic_fhir::{ResourceType, SearchQuery};
/// use mimic_fhir_engine::{Dataset, DatasetLayout, QueryEngine};
///
/// let dataset = Arc::new(Dataset::open(&DatasetLayout::from_env()));
/// let engine = QueryEngine::new(dataset);
///
/// let query = SearchQuery::parse(ResourceType::Observation, [("subject", "Patient/p1")]);
/// let outcome = engine.search(&query)?;
/// println!("{} observations", outcome.result.total);
/// ```
#[derive(Debug, Clone)]
pub struct QueryEngine {
    dataset: Arc<Dataset>,
    planner: QueryPlanner,
    config: EngineConfig,
}

impl QueryEngine {
    /// Creates an engine with default configuration.
    pub fn new(dataset: Arc<Dataset>) -> Self {
        Self::with_config(dataset, EngineConfig::default())
    }

    /// Creates an engine with custom configuration.
    pub fn with_config(dataset: Arc<Dataset>, config: EngineConfig) -> Self {
        Self {
            dataset,
            planner: QueryPlanner::new(),
            config,
        }
    }

    /// Returns the dataset.
    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reads one record by id.
    pub fn read(&self, resource_type: ResourceType, id: &str) -> EngineResult<Arc<Record>> {
        self.dataset.store().get(resource_type, id).cloned()
    }

    /// Reads one record, with the type given by name.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnsupportedType`] if the name is not a served type.
    pub fn read_named(&self, type_name: &str, id: &str) -> EngineResult<Arc<Record>> {
        let resource_type = type_name
            .parse::<ResourceType>()
            .map_err(|_| EngineError::UnsupportedType(type_name.to_string()))?;
        self.read(resource_type, id)
    }

    /// Runs a search and returns the requested page plus the total.
    ///
    /// Results are in collection order. An unparseable filter value gives
    /// an empty result, not an error.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unavailable`] if the type did not load.
    pub fn search(&self, query: &SearchQuery) -> EngineResult<SearchOutcome> {
        let start = Instant::now();
        let plan = self.planner.plan(&self.dataset, query)?;
        let collection = self.dataset.store().collection(query.resource_type)?;

        let (matches, scanned) = self.execute(collection, query, &plan);
        let total = matches.len();
        let count = self.config.effective_count(query.count);
        let records = matches
            .into_iter()
            .skip(query.offset)
            .take(count)
            .cloned()
            .collect();

        Ok(SearchOutcome {
            result: Arc::new(SearchResult::new(query.resource_type, total, records)),
            stats: ExecutionStats::new(start.elapsed(), scanned, false),
        })
    }

    /// Every record matching the filters, ignoring paging.
    pub fn matching(&self, query: &SearchQuery) -> EngineResult<Vec<Arc<Record>>> {
        let plan = self.planner.plan(&self.dataset, query)?;
        let collection = self.dataset.store().collection(query.resource_type)?;
        let (matches, _) = self.execute(collection, query, &plan);
        Ok(matches.into_iter().cloned().collect())
    }

    /// Number of matching records.
    pub fn count(&self, query: &SearchQuery) -> EngineResult<usize> {
        let plan = self.planner.plan(&self.dataset, query)?;
        let collection = self.dataset.store().collection(query.resource_type)?;
        Ok(self.execute(collection, query, &plan).0.len())
    }

    /// Returns the plan a search would use.
    pub fn explain(&self, query: &SearchQuery) -> EngineResult<QueryPlan> {
        self.planner.plan(&self.dataset, query)
    }

    fn execute<'c>(
        &self,
        collection: &'c Collection,
        query: &SearchQuery,
        plan: &QueryPlan,
    ) -> (Vec<&'c Arc<Record>>, usize) {
        match plan.access {
            AccessPath::Empty => (Vec::new(), 0),
            AccessPath::IndexLookup { filter, .. } => {
                let positions = plan.candidates().unwrap_or(&[]);
                let rest: Vec<&SearchFilter> = query
                    .filters
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != filter)
                    .map(|(_, f)| f)
                    .collect();
                let matches = positions
                    .iter()
                    .filter_map(|p| collection.at(*p))
                    .filter(|record| matches_all(&rest, record))
                    .collect();
                (matches, positions.len())
            }
            AccessPath::FullScan => {
                let filters: Vec<&SearchFilter> = query.filters.iter().collect();
                (self.scan(collection, &filters), collection.len())
            }
        }
    }

    #[cfg(feature = "parallel")]
    fn scan<'c>(&self, collection: &'c Collection, filters: &[&SearchFilter]) -> Vec<&'c Arc<Record>> {
        use rayon::prelude::*;

        if self.config.parallel {
            collection
                .as_slice()
                .par_iter()
                .filter(|record| matches_all(filters, record))
                .collect()
        } else {
            collection
                .iter()
                .filter(|record| matches_all(filters, record))
                .collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn scan<'c>(&self, collection: &'c Collection, filters: &[&SearchFilter]) -> Vec<&'c Arc<Record>> {
        collection
            .iter()
            .filter(|record| matches_all(filters, record))
            .collect()
    }
}

fn matches_all(filters: &[&SearchFilter], record: &Record) -> bool {
    filters.iter().all(|filter| match filter.matches(record) {
        Ok(matched) => matched,
        Err(reason) => {
            tracing::debug!(
                resource_type = %record.resource_type(),
                id = record.id(),
                %reason,
                "record skipped by filter"
            );
            false
        }
    })
}
