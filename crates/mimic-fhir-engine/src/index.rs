//! Reverse reference index.
//!
//! Built once from a complete [`RecordStore`]: for every source type it maps
//! `(kind, target type, target id)` to the load-order positions of the
//! records holding that reference. The index is never patched afterwards.

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use mimic_fhir::{ReferenceKind, ResourceType};
use serde::Serialize;

use crate::store::RecordStore;

type EdgeGroup = (ReferenceKind, ResourceType);

#[derive(Debug, Default)]
struct SourceIndex {
    edges: HashMap<EdgeGroup, HashMap<String, Vec<usize>>>,
    unresolved: HashSet<ReferenceKind>,
}

/// Reverse lookup from a referenced record to the records that point at it.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    sources: HashMap<ResourceType, SourceIndex>,
    stats: IndexStats,
}

impl ReferenceIndex {
    /// Scans every available collection once.
    ///
    /// Edges to an id missing from a loaded target type are kept, so
    /// lookups agree with a full scan, and counted as dangling. Edges to a
    /// type that is not loaded are dropped and mark `(source type, kind)`
    /// unresolved, which sends searches on that pair to a full scan.
    pub fn build(store: &RecordStore) -> Self {
        let mut index = Self::default();

        for source_type in store.available_types() {
            let Ok(collection) = store.collection(source_type) else {
                continue;
            };
            let mut source = SourceIndex::default();

            for (position, record) in collection.iter().enumerate() {
                for reference in record.references() {
                    let target = match store.collection(reference.target_type) {
                        Ok(target) => target,
                        Err(_) => {
                            source.unresolved.insert(reference.kind);
                            index.stats.unresolved_edges += 1;
                            continue;
                        }
                    };
                    let dangling = target.position(&reference.target_id).is_none();

                    let positions = source
                        .edges
                        .entry((reference.kind, reference.target_type))
                        .or_default()
                        .entry(reference.target_id.clone())
                        .or_default();
                    // A record may repeat a reference (e.g. several
                    // authorizing prescriptions).
                    if positions.last() != Some(&position) {
                        positions.push(position);
                        index.stats.edges += 1;
                        if dangling {
                            index.stats.dangling_edges += 1;
                        }
                    }
                }
            }

            for kind in &source.unresolved {
                index
                    .stats
                    .unresolved
                    .entry(source_type)
                    .or_default()
                    .push(*kind);
            }
            index.sources.insert(source_type, source);
        }

        for kinds in index.stats.unresolved.values_mut() {
            kinds.sort();
        }

        tracing::info!(
            edges = index.stats.edges,
            dangling = index.stats.dangling_edges,
            unresolved = index.stats.unresolved_edges,
            "reference index built"
        );
        index
    }

    /// Returns true if lookups for `(source, kind)` are complete.
    ///
    /// False when the source type is not loaded or an edge of this kind
    /// pointed at a type that is not loaded.
    pub fn covers(&self, source: ResourceType, kind: ReferenceKind) -> bool {
        self.sources
            .get(&source)
            .is_some_and(|s| !s.unresolved.contains(&kind))
    }

    /// Load-order positions of `source` records referring to the target.
    ///
    /// Returns `None` when the pair is not covered.
    pub fn positions(
        &self,
        source: ResourceType,
        kind: ReferenceKind,
        target_type: ResourceType,
        target_id: &str,
    ) -> Option<&[usize]> {
        if !self.covers(source, kind) {
            return None;
        }
        let found = self
            .sources
            .get(&source)
            .and_then(|s| s.edges.get(&(kind, target_type)))
            .and_then(|by_id| by_id.get(target_id))
            .map(Vec::as_slice);
        Some(found.unwrap_or(&[]))
    }

    /// Ids of `source` records referring to the target, in load order.
    ///
    /// Empty when nothing refers to it or the pair is not covered.
    pub fn lookup<'s>(
        &self,
        store: &'s RecordStore,
        source: ResourceType,
        target_type: ResourceType,
        target_id: &str,
        kind: ReferenceKind,
    ) -> Vec<&'s str> {
        let (Some(positions), Ok(collection)) = (
            self.positions(source, kind, target_type, target_id),
            store.collection(source),
        ) else {
            return Vec::new();
        };
        positions
            .iter()
            .filter_map(|p| collection.at(*p))
            .map(|r| r.id())
            .collect()
    }

    /// Every kept edge of a source type as `(position, kind, target type, target id)`.
    pub fn edges(
        &self,
        source: ResourceType,
    ) -> impl Iterator<Item = (usize, ReferenceKind, ResourceType, &str)> + '_ {
        self.sources
            .get(&source)
            .into_iter()
            .flat_map(|s| s.edges.iter())
            .flat_map(|((kind, target_type), by_id)| {
                by_id.iter().flat_map(move |(id, positions)| {
                    positions
                        .iter()
                        .map(move |p| (*p, *kind, *target_type, id.as_str()))
                })
            })
    }

    /// Build statistics.
    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }
}

/// Statistics from the index build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Edges kept.
    pub edges: usize,
    /// Kept edges whose target id does not exist.
    pub dangling_edges: usize,
    /// Edges dropped because the target type is not loaded.
    pub unresolved_edges: usize,
    /// Reference kinds that fall back to a full scan, per source type.
    pub unresolved: BTreeMap<ResourceType, Vec<ReferenceKind>>,
}
