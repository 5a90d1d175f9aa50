//! # mimic-fhir-engine
//!
//! In-memory query engine for the MIMIC-IV Clinical Database Demo on FHIR.
//!
//! This crate loads the dataset's NDJSON collections once, indexes their
//! references and answers FHIR-style reads and searches against them.
//!
//! ## Key Features
//!
//! - **Load once** - every collection is parsed at startup; a missing file
//!   only takes its own type offline
//! - **Reverse reference index** - `subject`, `patient` and `encounter`
//!   searches read only the records that point at the target
//! - **Typed filters** - parameters are parsed at the boundary by
//!   [`mimic_fhir::SearchQuery`]
//! - **Shared cache** - [`QueryCache`] computes each key at most once and
//!   never evicts
//! - **Optional parallelism** - Enable `parallel` feature for multi-threaded
//!   loading and scans
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mimic_fhir::{ResourceType, SearchQuery};
//! use mimic_fhir_engine::{Dataset, DatasetLayout, QueryEngine};
//!
//! let dataset = Arc::new(Dataset::open(&DatasetLayout::from_env()));
//! let engine = QueryEngine::new(dataset);
//!
//! let query = SearchQuery::parse(
//!     ResourceType::Observation,
//!     [("subject", "Patient/p1"), ("category", "laboratory")],
//! );
//! let outcome = engine.search(&query)?;
//! println!("{} of {} labs", outcome.result.len(), outcome.result.total);
//!
//! println!("{}", engine.explain(&query)?);
//! ```
//!
//! ## Feature Flags
//!
//! - `parallel` - Loads collections and runs full scans using rayon
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     mimic-fhir-engine                         │
//! │                                                               │
//! │  DatasetLayout ──► RecordStore ──► ReferenceIndex = Dataset   │
//! │                                                               │
//! │  QueryEngine                                                  │
//! │  ├── plan (index lookup / full scan / empty)                  │
//! │  ├── evaluate remaining typed filters                         │
//! │  └── page and return SearchOutcome with stats                 │
//! │                                                               │
//! │  QueryCache<V>  (owned by the caller, shared by all paths)    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod cache;
mod config;
mod dataset;
mod engine;
mod error;
mod index;
mod planner;
mod result;
mod store;

// Public re-exports
pub use cache::{
    CacheKey, CacheScope, CacheStats, CacheStatus, ClearScope, EntryInfo, QueryCache, ScopeStats,
};
pub use config::{
    CacheConfig, DatasetLayout, EngineConfig, EngineConfigBuilder, DATA_DIR_ENV, DEFAULT_DATA_DIR,
};
pub use dataset::{Dataset, DatasetStats};
pub use engine::QueryEngine;
pub use error::{EngineError, EngineResult, LoadError};
pub use index::{IndexStats, ReferenceIndex};
pub use planner::{AccessPath, QueryPlan, QueryPlanner, QueryStep};
pub use result::{ExecutionStats, SearchOutcome, SearchResult};
pub use store::{Collection, CollectionStats, RecordStore, StoreStats};
