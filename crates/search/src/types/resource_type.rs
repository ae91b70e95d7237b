//! Searchable resource types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The resource types exposed by the clinical store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    /// A person receiving care.
    Patient,
    /// A provider participating in care.
    Practitioner,
    /// A visit or interaction with a patient.
    Encounter,
    /// A measurement or finding.
    Observation,
    /// An order for a procedure or test.
    ServiceRequest,
}

impl ResourceType {
    /// All resource types in declaration order.
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Patient,
        ResourceType::Practitioner,
        ResourceType::Encounter,
        ResourceType::Observation,
        ResourceType::ServiceRequest,
    ];

    /// Returns the external type name (e.g. `"Observation"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Practitioner => "Practitioner",
            ResourceType::Encounter => "Encounter",
            ResourceType::Observation => "Observation",
            ResourceType::ServiceRequest => "ServiceRequest",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::UnsupportedResourceType {
                resource_type: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_types() {
        assert_eq!(
            "ServiceRequest".parse::<ResourceType>().unwrap(),
            ResourceType::ServiceRequest
        );
        assert_eq!(ResourceType::Observation.to_string(), "Observation");
    }

    #[test]
    fn test_parse_unknown_type() {
        let err = "Medication".parse::<ResourceType>().unwrap_err();
        assert!(err.to_string().contains("Medication"));
    }
}
