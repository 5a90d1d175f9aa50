//! Query planner for searches.
//!
//! Chooses how a search reads its collection:
//!
//! - an index lookup when at least one reference filter is fully covered by
//!   the [`ReferenceIndex`] (the filter with the fewest candidates wins)
//! - nothing at all when some filter value could not be parsed
//! - a full scan otherwise

use std::fmt;

use mimic_fhir::{ResourceType, SearchFilter, SearchQuery};

use crate::dataset::Dataset;
use crate::error::EngineResult;
use crate::index::ReferenceIndex;

/// How the engine reads candidate records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPath {
    /// Candidates come from the reverse index for one reference filter.
    IndexLookup {
        /// Position of the driving filter in the query.
        filter: usize,
        /// Parameter name of the driving filter.
        param: &'static str,
    },
    /// Every record is evaluated.
    FullScan,
    /// A filter can never match; nothing is read.
    Empty,
}

/// A complete execution plan for a search.
///
/// # Example
///
/// ```ignore
/// let plan = engine.explain(&query)?;
///
/// println!("Estimated candidates: {}", plan.estimated_candidates);
/// for step in &plan.steps {
///     println!("{step}");
/// }
/// ```
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Type searched.
    pub resource_type: ResourceType,
    /// Chosen access path.
    pub access: AccessPath,
    /// Ordered execution steps.
    pub steps: Vec<QueryStep>,
    /// Records that will be evaluated against the filters.
    pub estimated_candidates: usize,
    /// Notes on planning decisions.
    pub hints: Vec<String>,
    candidates: Option<Vec<usize>>,
}

impl QueryPlan {
    fn new(resource_type: ResourceType, access: AccessPath) -> Self {
        Self {
            resource_type,
            access,
            steps: Vec::new(),
            estimated_candidates: 0,
            hints: Vec::new(),
            candidates: None,
        }
    }

    /// Adds a step to the plan.
    pub fn add_step(&mut self, step: QueryStep) {
        self.steps.push(step);
    }

    /// Adds a planning note.
    pub fn add_hint(&mut self, hint: impl Into<String>) {
        self.hints.push(hint.into());
    }

    /// Returns true if the plan reads the index.
    pub fn uses_index(&self) -> bool {
        matches!(self.access, AccessPath::IndexLookup { .. })
    }

    /// Candidate positions chosen by an index lookup, in load order.
    pub(crate) fn candidates(&self) -> Option<&[usize]> {
        self.candidates.as_deref()
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Query Plan for: {}", self.resource_type)?;
        writeln!(f, "Estimated candidates: {}", self.estimated_candidates)?;
        writeln!(f)?;

        writeln!(f, "Steps:")?;
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, step)?;
        }

        if !self.hints.is_empty() {
            writeln!(f)?;
            writeln!(f, "Hints:")?;
            for hint in &self.hints {
                writeln!(f, "  - {}", hint)?;
            }
        }

        Ok(())
    }
}

/// A single step in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStep {
    /// Operation name (e.g., "IndexLookup", "FullScan", "Filter", "Page").
    pub operation: String,
    /// What the step works on.
    pub detail: String,
    /// Estimated rows leaving the step.
    pub estimated_rows: usize,
}

impl QueryStep {
    /// Creates a new query step.
    pub fn new(
        operation: impl Into<String>,
        detail: impl Into<String>,
        estimated_rows: usize,
    ) -> Self {
        Self {
            operation: operation.into(),
            detail: detail.into(),
            estimated_rows,
        }
    }
}

impl fmt::Display for QueryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (est. {} rows)",
            self.operation, self.detail, self.estimated_rows
        )
    }
}

/// Generates plans from parsed queries.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryPlanner;

impl QueryPlanner {
    /// Creates a planner.
    pub fn new() -> Self {
        Self
    }

    /// Plans a search.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unavailable`](crate::EngineError::Unavailable) if the
    /// searched type did not load.
    pub fn plan(&self, dataset: &Dataset, query: &SearchQuery) -> EngineResult<QueryPlan> {
        let collection = dataset.store().collection(query.resource_type)?;

        if let Some(bad) = query.filters.iter().find_map(|f| match f {
            SearchFilter::Unsatisfiable(err) => Some(err),
            _ => None,
        }) {
            let mut plan = QueryPlan::new(query.resource_type, AccessPath::Empty);
            plan.add_step(QueryStep::new("Empty", bad.to_string(), 0));
            plan.add_hint("unparseable parameter value; result is empty");
            return Ok(plan);
        }

        let best = query
            .filters
            .iter()
            .enumerate()
            .filter_map(|(i, filter)| {
                index_candidates(dataset.index(), query.resource_type, filter)
                    .map(|positions| (i, filter, positions))
            })
            .min_by_key(|(_, _, positions)| positions.len());

        let mut plan = match best {
            Some((i, filter, positions)) => {
                let param = match filter {
                    SearchFilter::Reference { param, .. } => *param,
                    _ => "",
                };
                let mut plan = QueryPlan::new(
                    query.resource_type,
                    AccessPath::IndexLookup { filter: i, param },
                );
                plan.estimated_candidates = positions.len();
                plan.add_step(QueryStep::new("IndexLookup", param, positions.len()));
                plan.candidates = Some(positions);
                plan
            }
            None => {
                let mut plan = QueryPlan::new(query.resource_type, AccessPath::FullScan);
                plan.estimated_candidates = collection.len();
                plan.add_step(QueryStep::new(
                    "FullScan",
                    query.resource_type.as_str(),
                    collection.len(),
                ));
                let uncovered = query.filters.iter().any(|f| {
                    matches!(f, SearchFilter::Reference { kinds, .. }
                        if kinds.iter().any(|k| !dataset.index().covers(query.resource_type, *k)))
                });
                if uncovered {
                    plan.add_hint("reference target type not loaded; scanning");
                }
                plan
            }
        };

        let remaining = query.filters.len() - usize::from(plan.uses_index());
        if remaining > 0 {
            plan.add_step(QueryStep::new(
                "Filter",
                format!("{remaining} predicate(s)"),
                plan.estimated_candidates,
            ));
        }
        plan.add_step(QueryStep::new(
            "Page",
            format!("_count={} _offset={}", query.count, query.offset),
            plan.estimated_candidates
                .saturating_sub(query.offset)
                .min(query.count),
        ));

        Ok(plan)
    }
}

/// Load-order candidate positions for a reference filter, when the index
/// fully covers it.
fn index_candidates(
    index: &ReferenceIndex,
    source: ResourceType,
    filter: &SearchFilter,
) -> Option<Vec<usize>> {
    let SearchFilter::Reference {
        param,
        kinds,
        targets,
    } = filter
    else {
        return None;
    };

    let default_target = if *param == "encounter" {
        ResourceType::Encounter
    } else {
        ResourceType::Patient
    };

    let mut positions = Vec::new();
    for kind in kinds {
        for target in targets {
            let target_type = target.resource_type.unwrap_or(default_target);
            positions.extend_from_slice(index.positions(source, *kind, target_type, &target.id)?);
        }
    }
    positions.sort_unstable();
    positions.dedup();
    Some(positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Collection, RecordStore};
    use mimic_fhir::Record;
    use serde_json::json;

    fn dataset() -> Dataset {
        let patients = Collection::from_records(
            ResourceType::Patient,
            (1..=3).map(|i| {
                Record::from_value(json!({"resourceType": "Patient", "id": format!("p{i}")}))
                    .unwrap()
            }),
        );
        let observations = Collection::from_records(
            ResourceType::Observation,
            (0..10).map(|i| {
                Record::from_value(json!({
                    "resourceType": "Observation",
                    "id": format!("o{i}"),
                    "status": "final",
                    "subject": {"reference": format!("Patient/p{}", i % 2 + 1)},
                    "encounter": {"reference": "Encounter/e1"},
                }))
                .unwrap()
            }),
        );
        Dataset::from_store(RecordStore::from_collections([patients, observations]))
    }

    #[test]
    fn test_plan_uses_index_for_subject() {
        let dataset = dataset();
        let query = SearchQuery::parse(
            ResourceType::Observation,
            [("subject", "Patient/p1"), ("status", "final")],
        );
        let plan = QueryPlanner::new().plan(&dataset, &query).unwrap();
        assert_eq!(
            plan.access,
            AccessPath::IndexLookup {
                filter: 0,
                param: "subject"
            }
        );
        assert_eq!(plan.estimated_candidates, 5);
        assert_eq!(plan.candidates().unwrap(), &[0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_plan_picks_smallest_candidate_list() {
        let dataset = dataset();
        let query = SearchQuery::parse(
            ResourceType::Observation,
            [("subject", "p1,p2"), ("patient", "p3")],
        );
        let plan = QueryPlanner::new().plan(&dataset, &query).unwrap();
        assert_eq!(
            plan.access,
            AccessPath::IndexLookup {
                filter: 1,
                param: "patient"
            }
        );
        assert_eq!(plan.estimated_candidates, 0);
    }

    #[test]
    fn test_plan_scans_unresolved_kind() {
        let dataset = dataset();
        let query = SearchQuery::parse(ResourceType::Observation, [("encounter", "e1")]);
        let plan = QueryPlanner::new().plan(&dataset, &query).unwrap();
        assert_eq!(plan.access, AccessPath::FullScan);
        assert_eq!(plan.estimated_candidates, 10);
        assert!(!plan.hints.is_empty());
    }

    #[test]
    fn test_plan_empty_for_bad_value() {
        let dataset = dataset();
        let query = SearchQuery::parse(ResourceType::Observation, [("date", "soon")]);
        let plan = QueryPlanner::new().plan(&dataset, &query).unwrap();
        assert_eq!(plan.access, AccessPath::Empty);
    }

    #[test]
    fn test_plan_unavailable_type() {
        let dataset = dataset();
        let query = SearchQuery::new(ResourceType::Encounter);
        assert!(QueryPlanner::new().plan(&dataset, &query).is_err());
    }

    #[test]
    fn test_plan_display() {
        let dataset = dataset();
        let query = SearchQuery::parse(ResourceType::Observation, [("subject", "p2")]);
        let plan = QueryPlanner::new().plan(&dataset, &query).unwrap();
        let text = plan.to_string();
        assert!(text.contains("Query Plan for: Observation"));
        assert!(text.contains("IndexLookup: subject (est. 5 rows)"));
        assert!(text.contains("Page: _count=100 _offset=0"));
    }
}
