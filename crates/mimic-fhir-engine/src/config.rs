//! Configuration types for the dataset and the query engine.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use mimic_fhir::ResourceType;
use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Environment variable overriding the dataset directory.
pub const DATA_DIR_ENV: &str = "MIMIC_FHIR_DATA_DIR";

/// Dataset directory used when nothing else is configured.
pub const DEFAULT_DATA_DIR: &str = "data/mimic-iv-clinical-database-demo-on-fhir-2.1.0/fhir";

/// NDJSON file stems for each resource type in the MIMIC-IV demo export.
///
/// Files of one type are concatenated in the listed order.
const MIMIC_FILES: &[(ResourceType, &[&str])] = &[
    (ResourceType::Patient, &["MimicPatient"]),
    (ResourceType::Organization, &["MimicOrganization"]),
    (ResourceType::Location, &["MimicLocation"]),
    (
        ResourceType::Encounter,
        &["MimicEncounter", "MimicEncounterED", "MimicEncounterICU"],
    ),
    (ResourceType::Condition, &["MimicCondition", "MimicConditionED"]),
    (
        ResourceType::Observation,
        &[
            "MimicObservationLabevents",
            "MimicObservationChartevents",
            "MimicObservationDatetimeevents",
            "MimicObservationOutputevents",
            "MimicObservationED",
            "MimicObservationVitalSignsED",
            "MimicObservationMicroTest",
            "MimicObservationMicroOrg",
            "MimicObservationMicroSusc",
        ],
    ),
    (
        ResourceType::Procedure,
        &["MimicProcedure", "MimicProcedureED", "MimicProcedureICU"],
    ),
    (ResourceType::Medication, &["MimicMedication", "MimicMedicationMix"]),
    (ResourceType::MedicationRequest, &["MimicMedicationRequest"]),
    (
        ResourceType::MedicationAdministration,
        &[
            "MimicMedicationAdministration",
            "MimicMedicationAdministrationICU",
        ],
    ),
    (
        ResourceType::MedicationDispense,
        &["MimicMedicationDispense", "MimicMedicationDispenseED"],
    ),
    (
        ResourceType::MedicationStatement,
        &["MimicMedicationStatementED"],
    ),
    (ResourceType::Specimen, &["MimicSpecimen", "MimicSpecimenLab"]),
];

/// Where each resource type's NDJSON files live.
///
/// # Example
///
/// ```rust
/// use mimic_fhir::ResourceType;
/// use mimic_fhir_engine::DatasetLayout;
///
/// let layout = DatasetLayout::new("/data/fhir")
///     .with_files(ResourceType::Patient, ["Patients.ndjson"]);
///
/// let paths = layout.paths(ResourceType::Patient);
/// assert_eq!(paths[0].to_str(), Some("/data/fhir/Patients.ndjson"));
/// assert_eq!(layout.paths(ResourceType::Encounter).len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetLayout {
    /// Directory the file names are relative to.
    pub data_dir: PathBuf,
    /// File names per type. Types without an entry are not loaded.
    #[serde(default = "mimic_file_map")]
    pub files: BTreeMap<ResourceType, Vec<String>>,
}

fn mimic_file_map() -> BTreeMap<ResourceType, Vec<String>> {
    MIMIC_FILES
        .iter()
        .map(|(rt, stems)| {
            let names = stems.iter().map(|s| format!("{s}.ndjson")).collect();
            (*rt, names)
        })
        .collect()
}

impl Default for DatasetLayout {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}

impl DatasetLayout {
    /// Creates a layout with the MIMIC file mapping under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            files: mimic_file_map(),
        }
    }

    /// Creates a layout with no files configured.
    pub fn empty(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            files: BTreeMap::new(),
        }
    }

    /// Creates the default layout, taking the directory from
    /// `MIMIC_FHIR_DATA_DIR` when set.
    pub fn from_env() -> Self {
        match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::new(PathBuf::from(dir)),
            _ => Self::default(),
        }
    }

    /// Reads a JSON manifest.
    ///
    /// `files` may be omitted to keep the MIMIC mapping. A relative
    /// `data_dir` is resolved against the manifest's directory.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let manifest_error = |reason: String| LoadError::Manifest {
            path: path.to_path_buf(),
            reason,
        };

        let text = fs::read_to_string(path).map_err(|e| manifest_error(e.to_string()))?;
        let mut layout: Self =
            serde_json::from_str(&text).map_err(|e| manifest_error(e.to_string()))?;

        if layout.data_dir.is_relative() {
            if let Some(parent) = path.parent() {
                layout.data_dir = parent.join(&layout.data_dir);
            }
        }
        Ok(layout)
    }

    /// Replaces the file list of one type.
    pub fn with_files<I, S>(mut self, resource_type: ResourceType, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files
            .insert(resource_type, files.into_iter().map(Into::into).collect());
        self
    }

    /// Stops loading a type.
    pub fn without(mut self, resource_type: ResourceType) -> Self {
        self.files.remove(&resource_type);
        self
    }

    /// Absolute paths of a type's files, in load order.
    pub fn paths(&self, resource_type: ResourceType) -> Vec<PathBuf> {
        self.files
            .get(&resource_type)
            .map(|names| names.iter().map(|n| self.data_dir.join(n)).collect())
            .unwrap_or_default()
    }
}

/// Configuration for the query engine.
///
/// # Example
///
/// ```rust
/// use mimic_fhir_engine::{CacheConfig, EngineConfig};
///
/// let config = EngineConfig::builder()
///     .with_cache(CacheConfig::default())
///     .with_max_count(1_000)
///     .with_parallel(true)
///     .build();
///
/// assert_eq!(config.max_count, Some(1_000));
/// ```
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Cache configuration (None = the default [`CacheConfig`]).
    pub cache: Option<CacheConfig>,
    /// Upper bound applied to `_count` (None = unlimited).
    pub max_count: Option<usize>,
    /// Use rayon where available (requires `parallel` feature).
    pub parallel: bool,
}

impl EngineConfig {
    /// Creates a new builder for EngineConfig.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Applies `max_count` to a requested page size.
    pub fn effective_count(&self, requested: usize) -> usize {
        match self.max_count {
            Some(max) => requested.min(max),
            None => requested,
        }
    }
}

/// Builder for EngineConfig.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    cache: Option<CacheConfig>,
    max_count: Option<usize>,
    parallel: bool,
}

impl EngineConfigBuilder {
    /// Enables caching with the given configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Caps the page size.
    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    /// Enables or disables parallel work.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Builds the EngineConfig.
    pub fn build(self) -> EngineConfig {
        EngineConfig {
            cache: self.cache,
            max_count: self.max_count,
            parallel: self.parallel,
        }
    }
}

/// Configuration for the result cache.
///
/// Entries are never evicted; only `clear` removes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Slots reserved up front.
    pub initial_capacity: usize,
    /// When false every request is computed and nothing is stored.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1_024,
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// A configuration that stores nothing.
    pub fn disabled() -> Self {
        Self {
            initial_capacity: 0,
            enabled: false,
        }
    }
}
