//! Error types for aggregation and the service facade.

use mimic_fhir_engine::EngineError;
use thiserror::Error;

/// Errors raised by summaries, cohorts and service calls.
#[derive(Error, Debug)]
pub enum IntelError {
    /// Error from the query engine (not found, unavailable, ...).
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// An operation parameter could not be parsed.
    #[error("Invalid value for {name}: '{value}'")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Offending raw value.
        value: String,
    },
}

impl IntelError {
    /// HTTP status a transport layer should map this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            IntelError::Engine(err) => err.http_status(),
            IntelError::InvalidParameter { .. } => 400,
        }
    }
}

/// Result type for intel operations.
pub type IntelResult<T> = std::result::Result<T, IntelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_fhir::ResourceType;

    #[test]
    fn test_engine_error_passes_through() {
        let err: IntelError = EngineError::not_found(ResourceType::Patient, "p1").into();
        assert_eq!(err.to_string(), "Patient/p1 not found");
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn test_error_display_invalid_parameter() {
        let err = IntelError::InvalidParameter {
            name: "level".to_string(),
            value: "severe".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid value for level: 'severe'");
        assert_eq!(err.http_status(), 400);
    }
}
