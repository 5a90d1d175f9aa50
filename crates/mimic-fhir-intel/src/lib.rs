//! # mimic-fhir-intel
//!
//! Clinical intelligence on top of [`mimic_fhir_engine`]: per-patient risk
//! summaries, cohort ranking and a cached service facade.
//!
//! ## Key Features
//!
//! - **Risk summaries** - an explainable score built from lab
//!   interpretations, conditions, encounter acuity and active orders
//! - **Cohort ranking** - every patient sorted by score, filterable by level
//! - **One cache for everything** - searches, summaries and cohorts share a
//!   [`QueryCache`](mimic_fhir_engine::QueryCache) and can be cleared by scope
//! - **Capability listing** - loaded types with their search parameters
//!
//! ## Quick Start
//!
//! ```ignore
//! use mimic_fhir::ResourceType;
//! use mimic_fhir_engine::{ClearScope, DatasetLayout, EngineConfig};
//! use mimic_fhir_intel::ClinicalService;
//!
//! let service = ClinicalService::open(&DatasetLayout::from_env(), EngineConfig::default());
//!
//! let (summary, status) = service.risk_summary("p1")?;
//! println!("{} {} ({:?})", summary.patient_id, summary.level, status);
//!
//! let (cohort, _) = service.cohort([("level", "high"), ("_count", "10")])?;
//! for patient in &cohort.patients {
//!     println!("{:>3} {}", patient.score, patient.patient_id);
//! }
//!
//! service.clear_cache(&ClearScope::Resource(ResourceType::Observation));
//! ```
//!
//! ## Feature Flags
//!
//! - `parallel` - Ranks cohorts with rayon and enables the engine's
//!   parallel scans

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod cohort;
mod error;
mod risk;
mod service;

// Public re-exports
pub use cohort::{rank, CohortFilter, CohortReport, CohortView};
pub use error::{IntelError, IntelResult};
pub use risk::{
    weights, ActivityCounts, Demographics, FactorContribution, RiskEngine, RiskFactor, RiskLevel,
    RiskSummary, MAX_ALERTS,
};
pub use service::{
    CachedValue, CapabilityStatement, ClinicalService, ResourceCapability, SearchParamCapability,
    COHORT_OPERATION, FHIR_VERSION, RISK_SUMMARY_OPERATION,
};
