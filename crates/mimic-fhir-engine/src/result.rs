//! Search result types.

use std::sync::Arc;
use std::time::Duration;

use mimic_fhir::{Record, ResourceType};

/// One page of matching records plus the total match count.
///
/// # Example
///
/// ```ignore
/// let outcome = engine.search(&query)?;
///
/// println!("{} of {} records", outcome.result.len(), outcome.result.total);
/// for record in outcome.result.iter() {
///     println!("{}", record.id());
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Type searched.
    pub resource_type: ResourceType,
    /// Matches before paging.
    pub total: usize,
    /// The requested page, in collection order.
    pub records: Vec<Arc<Record>>,
}

impl SearchResult {
    /// Creates a result.
    pub fn new(resource_type: ResourceType, total: usize, records: Vec<Arc<Record>>) -> Self {
        Self {
            resource_type,
            total,
            records,
        }
    }

    /// A result with no matches.
    pub fn empty(resource_type: ResourceType) -> Self {
        Self::new(resource_type, 0, Vec::new())
    }

    /// Number of records in the page.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the page is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates the page.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Record>> {
        self.records.iter()
    }

    /// Ids in the page.
    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.id()).collect()
    }
}

impl<'a> IntoIterator for &'a SearchResult {
    type Item = &'a Arc<Record>;
    type IntoIter = std::slice::Iter<'a, Arc<Record>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Statistics from one search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Total execution duration.
    pub duration: Duration,
    /// Records evaluated against the filters.
    pub scanned: usize,
    /// Whether the result was served from cache.
    pub cache_hit: bool,
}

impl ExecutionStats {
    /// Creates new execution stats.
    pub fn new(duration: Duration, scanned: usize, cache_hit: bool) -> Self {
        Self {
            duration,
            scanned,
            cache_hit,
        }
    }
}

/// A shared search result with the stats of the call that produced it.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// The result, shared with the cache.
    pub result: Arc<SearchResult>,
    /// Statistics for this call.
    pub stats: ExecutionStats,
}
