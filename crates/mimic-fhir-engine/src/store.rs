//! In-memory record collections loaded once from NDJSON.
//!
//! Each served type is backed by one or more NDJSON files, concatenated in
//! layout order. Loading is all-or-nothing at the file level: a missing or
//! unreadable file makes the whole type unavailable. Individual bad lines
//! are skipped and counted.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use mimic_fhir::{Record, RecordParseError, ResourceType};
use serde::Serialize;

use crate::config::DatasetLayout;
use crate::error::{EngineError, EngineResult, LoadError};

// =============================================================================
// Collection
// =============================================================================

/// All records of one type, in load order, keyed by id.
#[derive(Debug, Clone)]
pub struct Collection {
    resource_type: ResourceType,
    records: Vec<Arc<Record>>,
    positions: HashMap<String, usize>,
    skipped: usize,
}

impl Collection {
    /// Creates an empty collection.
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            records: Vec::new(),
            positions: HashMap::new(),
            skipped: 0,
        }
    }

    /// Loads a collection from NDJSON files, in order.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if no paths are given or any file is missing
    /// or unreadable. Lines that fail to parse are skipped.
    pub fn load(resource_type: ResourceType, paths: &[PathBuf]) -> Result<Self, LoadError> {
        if paths.is_empty() {
            return Err(LoadError::NoSources(resource_type));
        }

        let mut collection = Self::new(resource_type);
        for path in paths {
            collection.load_file(path)?;
        }
        Ok(collection)
    }

    /// Builds a collection from already parsed records.
    ///
    /// Records of another type and duplicate ids are skipped, as on load.
    pub fn from_records<I>(resource_type: ResourceType, records: I) -> Self
    where
        I: IntoIterator<Item = Record>,
    {
        let mut collection = Self::new(resource_type);
        for record in records {
            if let Err(err) = collection.push(record) {
                tracing::warn!(resource_type = %resource_type, error = %err, "skipping record");
                collection.skipped += 1;
            }
        }
        collection
    }

    fn load_file(&mut self, path: &Path) -> Result<(), LoadError> {
        let file = File::open(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => LoadError::MissingSource {
                path: path.to_path_buf(),
            },
            _ => LoadError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;

        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }

            let parsed = Record::from_json_line(&line).and_then(|record| self.push(record));
            if let Err(err) = parsed {
                tracing::warn!(
                    resource_type = %self.resource_type,
                    path = %path.display(),
                    line = n + 1,
                    error = %err,
                    "skipping record"
                );
                self.skipped += 1;
            }
        }
        Ok(())
    }

    fn push(&mut self, record: Record) -> Result<(), RecordParseError> {
        if record.resource_type() != self.resource_type {
            return Err(RecordParseError::WrongType {
                expected: self.resource_type,
                found: record.resource_type(),
            });
        }
        if self.positions.contains_key(record.id()) {
            return Err(RecordParseError::DuplicateId(record.id().to_string()));
        }
        self.positions
            .insert(record.id().to_string(), self.records.len());
        self.records.push(Arc::new(record));
        Ok(())
    }

    /// Returns the collection's type.
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Returns the record with this id.
    pub fn get(&self, id: &str) -> Option<&Arc<Record>> {
        self.position(id).map(|pos| &self.records[pos])
    }

    /// Returns the load-order position of an id.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Returns the record at a load-order position.
    pub fn at(&self, position: usize) -> Option<&Arc<Record>> {
        self.records.get(position)
    }

    /// Records in load order.
    pub fn as_slice(&self) -> &[Arc<Record>] {
        &self.records
    }

    /// Iterates records in load order.
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Record>> {
        self.records.iter()
    }

    /// Number of loaded records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing was loaded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of lines or records skipped.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Arc<Record>;
    type IntoIter = std::slice::Iter<'a, Arc<Record>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// =============================================================================
// Store
// =============================================================================

/// Every served collection, loaded once and immutable afterwards.
#[derive(Debug, Default)]
pub struct RecordStore {
    collections: BTreeMap<ResourceType, Collection>,
    failures: BTreeMap<ResourceType, LoadError>,
}

impl RecordStore {
    /// Loads every resource type in the layout.
    ///
    /// Types that fail to load are recorded as unavailable and logged;
    /// loading continues with the others.
    pub fn open(layout: &DatasetLayout) -> Self {
        let loaded = load_all(layout);

        let mut store = Self::default();
        for (resource_type, outcome) in loaded {
            match outcome {
                Ok(collection) => {
                    store.collections.insert(resource_type, collection);
                }
                Err(err) => {
                    tracing::warn!(resource_type = %resource_type, error = %err, "collection unavailable");
                    store.failures.insert(resource_type, err);
                }
            }
        }
        store
    }

    /// Builds a store from prepared collections.
    ///
    /// Types without a collection are unavailable.
    pub fn from_collections<I>(collections: I) -> Self
    where
        I: IntoIterator<Item = Collection>,
    {
        let mut store = Self::default();
        for collection in collections {
            store
                .collections
                .insert(collection.resource_type(), collection);
        }
        for rt in ResourceType::ALL {
            if !store.collections.contains_key(&rt) {
                store.failures.insert(rt, LoadError::NoSources(rt));
            }
        }
        store
    }

    /// Returns a loaded collection.
    pub fn collection(&self, resource_type: ResourceType) -> EngineResult<&Collection> {
        self.collections
            .get(&resource_type)
            .ok_or(EngineError::Unavailable(resource_type))
    }

    /// Returns one record.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unavailable`] if the type failed to load,
    /// [`EngineError::NotFound`] if the id is absent.
    pub fn get(&self, resource_type: ResourceType, id: &str) -> EngineResult<&Arc<Record>> {
        self.collection(resource_type)?
            .get(id)
            .ok_or_else(|| EngineError::not_found(resource_type, id))
    }

    /// Iterates a type's records in load order.
    pub fn all(
        &self,
        resource_type: ResourceType,
    ) -> EngineResult<impl Iterator<Item = &Arc<Record>> + '_> {
        Ok(self.collection(resource_type)?.iter())
    }

    /// Returns true if the type loaded.
    pub fn is_available(&self, resource_type: ResourceType) -> bool {
        self.collections.contains_key(&resource_type)
    }

    /// Loaded types, in capability-listing order.
    pub fn available_types(&self) -> Vec<ResourceType> {
        ResourceType::ALL
            .into_iter()
            .filter(|rt| self.is_available(*rt))
            .collect()
    }

    /// Why a type is unavailable.
    pub fn load_error(&self, resource_type: ResourceType) -> Option<&LoadError> {
        self.failures.get(&resource_type)
    }

    /// Per-type load statistics.
    pub fn stats(&self) -> StoreStats {
        let collections = ResourceType::ALL
            .into_iter()
            .map(|rt| {
                let stats = match self.collections.get(&rt) {
                    Some(c) => CollectionStats {
                        available: true,
                        records: c.len(),
                        skipped: c.skipped(),
                        error: None,
                    },
                    None => CollectionStats {
                        available: false,
                        records: 0,
                        skipped: 0,
                        error: self.failures.get(&rt).map(ToString::to_string),
                    },
                };
                (rt, stats)
            })
            .collect();
        StoreStats { collections }
    }
}

fn load_one(layout: &DatasetLayout, resource_type: ResourceType) -> Result<Collection, LoadError> {
    let start = Instant::now();
    let collection = Collection::load(resource_type, &layout.paths(resource_type))?;
    tracing::info!(
        resource_type = %resource_type,
        records = collection.len(),
        skipped = collection.skipped(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "collection loaded"
    );
    Ok(collection)
}

#[cfg(feature = "parallel")]
fn load_all(layout: &DatasetLayout) -> Vec<(ResourceType, Result<Collection, LoadError>)> {
    use rayon::prelude::*;

    ResourceType::ALL
        .par_iter()
        .map(|rt| (*rt, load_one(layout, *rt)))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn load_all(layout: &DatasetLayout) -> Vec<(ResourceType, Result<Collection, LoadError>)> {
    ResourceType::ALL
        .iter()
        .map(|rt| (*rt, load_one(layout, *rt)))
        .collect()
}

/// Load statistics for one type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    /// Whether the type loaded.
    pub available: bool,
    /// Records kept.
    pub records: usize,
    /// Lines or records skipped.
    pub skipped: usize,
    /// Load failure, when unavailable.
    pub error: Option<String>,
}

/// Load statistics for the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Statistics per type.
    pub collections: BTreeMap<ResourceType, CollectionStats>,
}

impl StoreStats {
    /// Records kept across all types.
    pub fn total_records(&self) -> usize {
        self.collections.values().map(|c| c.records).sum()
    }

    /// Records skipped across all types.
    pub fn total_skipped(&self) -> usize {
        self.collections.values().map(|c| c.skipped).sum()
    }
}
