//! Error types for loading and querying the dataset.

use std::io;
use std::path::PathBuf;

use mimic_fhir::ResourceType;
use thiserror::Error;

/// Errors that make a whole resource type unavailable.
///
/// Raised once at startup; a failing type never affects the others.
#[derive(Error, Debug)]
pub enum LoadError {
    /// A configured source file does not exist.
    #[error("Source file missing: {}", path.display())]
    MissingSource {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// A source file exists but could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The dataset layout lists no files for the type.
    #[error("No source files configured for {0}")]
    NoSources(ResourceType),

    /// A dataset manifest could not be read or parsed.
    #[error("Invalid dataset manifest {}: {reason}", path.display())]
    Manifest {
        /// Manifest path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
}

/// Errors returned by store reads and searches.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No record with the id exists in an available collection.
    #[error("{resource_type}/{id} not found")]
    NotFound {
        /// Type searched.
        resource_type: ResourceType,
        /// Id requested.
        id: String,
    },

    /// The collection failed to load at startup.
    #[error("{0} is not available")]
    Unavailable(ResourceType),

    /// The name is not a served resource type.
    #[error("Unsupported resource type: {0}")]
    UnsupportedType(String),

    /// Loading failed.
    #[error("Load error: {0}")]
    Load(#[from] LoadError),
}

impl EngineError {
    /// Builds a [`EngineError::NotFound`].
    pub fn not_found(resource_type: ResourceType, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            resource_type,
            id: id.into(),
        }
    }

    /// HTTP status a transport layer should map this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::NotFound { .. } | EngineError::UnsupportedType(_) => 404,
            EngineError::Unavailable(_) => 503,
            EngineError::Load(_) => 500,
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
