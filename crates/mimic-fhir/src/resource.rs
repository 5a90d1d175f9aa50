//! The closed set of served FHIR resource types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RecordParseError;

/// A FHIR resource type served from the dataset.
///
/// Variant names are the FHIR type names, so `Display`, `FromStr` and serde
/// all use the same spelling (`"MedicationRequest"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// De-identified patients.
    Patient,
    /// Care organizations.
    Organization,
    /// Wards and units.
    Location,
    /// Hospital, ED and ICU stays.
    Encounter,
    /// Diagnoses.
    Condition,
    /// Lab results, chart events, vitals, microbiology.
    Observation,
    /// Procedures.
    Procedure,
    /// Medication definitions.
    Medication,
    /// Prescriptions (orders).
    MedicationRequest,
    /// Administrations (eMAR, ICU inputs).
    MedicationAdministration,
    /// Pharmacy dispenses.
    MedicationDispense,
    /// ED medication reconciliation.
    MedicationStatement,
    /// Lab and microbiology specimens.
    Specimen,
}

impl ResourceType {
    /// Every served type, in capability-listing order.
    pub const ALL: [ResourceType; 13] = [
        ResourceType::Patient,
        ResourceType::Organization,
        ResourceType::Location,
        ResourceType::Encounter,
        ResourceType::Condition,
        ResourceType::Observation,
        ResourceType::Procedure,
        ResourceType::Medication,
        ResourceType::MedicationRequest,
        ResourceType::MedicationAdministration,
        ResourceType::MedicationDispense,
        ResourceType::MedicationStatement,
        ResourceType::Specimen,
    ];

    /// Returns the FHIR type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Organization => "Organization",
            ResourceType::Location => "Location",
            ResourceType::Encounter => "Encounter",
            ResourceType::Condition => "Condition",
            ResourceType::Observation => "Observation",
            ResourceType::Procedure => "Procedure",
            ResourceType::Medication => "Medication",
            ResourceType::MedicationRequest => "MedicationRequest",
            ResourceType::MedicationAdministration => "MedicationAdministration",
            ResourceType::MedicationDispense => "MedicationDispense",
            ResourceType::MedicationStatement => "MedicationStatement",
            ResourceType::Specimen => "Specimen",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = RecordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .iter()
            .copied()
            .find(|rt| rt.as_str() == s)
            .ok_or_else(|| RecordParseError::UnknownType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for rt in ResourceType::ALL {
            assert_eq!(rt.as_str().parse::<ResourceType>().unwrap(), rt);
        }
    }

    #[test]
    fn test_unknown_type() {
        let err = "Bundle".parse::<ResourceType>().unwrap_err();
        assert_eq!(err, RecordParseError::UnknownType("Bundle".to_string()));
    }

    #[test]
    fn test_names_are_case_sensitive() {
        assert!("patient".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_serde_uses_type_name() {
        let json = serde_json::to_string(&ResourceType::MedicationRequest).unwrap();
        assert_eq!(json, "\"MedicationRequest\"");
    }
}
