//! The loaded store together with its reference index.

use std::path::Path;

use mimic_fhir::{ReferenceKind, ResourceType};
use serde::Serialize;

use crate::config::DatasetLayout;
use crate::error::EngineResult;
use crate::index::{IndexStats, ReferenceIndex};
use crate::store::{RecordStore, StoreStats};

/// Immutable dataset shared by every query after startup.
#[derive(Debug)]
pub struct Dataset {
    store: RecordStore,
    index: ReferenceIndex,
}

impl Dataset {
    /// Loads every configured type, then builds the index.
    pub fn open(layout: &DatasetLayout) -> Self {
        Self::from_store(RecordStore::open(layout))
    }

    /// Loads the layout described by a JSON manifest.
    ///
    /// # Errors
    ///
    /// [`EngineError::Load`](crate::EngineError::Load) if the manifest
    /// cannot be read or parsed. Per-type load failures still only mark
    /// that type unavailable.
    pub fn from_manifest(path: impl AsRef<Path>) -> EngineResult<Self> {
        let layout = DatasetLayout::from_json_file(path)?;
        Ok(Self::open(&layout))
    }

    /// Indexes a complete store.
    pub fn from_store(store: RecordStore) -> Self {
        let index = ReferenceIndex::build(&store);
        Self { store, index }
    }

    /// Returns the record store.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Returns the reference index.
    pub fn index(&self) -> &ReferenceIndex {
        &self.index
    }

    /// Ids of `source` records referring to the target, in load order.
    pub fn lookup(
        &self,
        source: ResourceType,
        target_type: ResourceType,
        target_id: &str,
        kind: ReferenceKind,
    ) -> Vec<&str> {
        self.index
            .lookup(&self.store, source, target_type, target_id, kind)
    }

    /// Store and index statistics.
    pub fn stats(&self) -> DatasetStats {
        DatasetStats {
            store: self.store.stats(),
            index: self.index.stats().clone(),
        }
    }
}

/// Combined store and index statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetStats {
    /// Per-type load statistics.
    pub store: StoreStats,
    /// Index build statistics.
    pub index: IndexStats,
}
