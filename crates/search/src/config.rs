//! Search engine configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{StorageResult, ValidationError};

/// Associates a coding system URI with the concept source its codes are
/// stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSystemMapping {
    /// Coding system URI as sent by callers.
    pub system: String,
    /// Concept source name in `concept_mapping.source`.
    pub source: String,
}

impl CodeSystemMapping {
    /// Creates a mapping.
    pub fn new(system: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            source: source.into(),
        }
    }
}

/// Configuration for the search engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Coding systems understood by the code system resolver.
    #[serde(default = "default_code_systems")]
    pub code_systems: Vec<CodeSystemMapping>,

    /// Relative width of the `ap` quantity window (0.1 is ±10%).
    #[serde(default = "default_approximate_tolerance")]
    pub approximate_tolerance: Decimal,

    /// Cache code resolutions across searches.
    #[serde(default = "default_true")]
    pub cache_concept_lookups: bool,

    /// Maximum number of cached code resolutions; the least recently used
    /// entry is evicted first.
    #[serde(default = "default_concept_cache_capacity")]
    pub concept_cache_capacity: usize,
}

fn default_code_systems() -> Vec<CodeSystemMapping> {
    vec![
        CodeSystemMapping::new("http://loinc.org", "LOINC"),
        CodeSystemMapping::new("http://snomed.info/sct", "SNOMED CT"),
        CodeSystemMapping::new("https://cielterminology.org", "CIEL"),
    ]
}

fn default_approximate_tolerance() -> Decimal {
    Decimal::new(1, 1)
}

fn default_concept_cache_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            code_systems: default_code_systems(),
            approximate_tolerance: default_approximate_tolerance(),
            cache_concept_lookups: true,
            concept_cache_capacity: default_concept_cache_capacity(),
        }
    }
}

impl SearchConfig {
    /// Adds or replaces the source for a coding system.
    pub fn with_code_system(mut self, system: impl Into<String>, source: impl Into<String>) -> Self {
        let mapping = CodeSystemMapping::new(system, source);
        self.code_systems.retain(|m| m.system != mapping.system);
        self.code_systems.push(mapping);
        self
    }

    /// Checks that values are within range.
    pub fn validate(&self) -> StorageResult<()> {
        if self.approximate_tolerance.is_sign_negative() || self.approximate_tolerance >= Decimal::ONE
        {
            return Err(ValidationError::InvalidConfiguration {
                field: "approximate_tolerance".to_string(),
                message: format!("{} is outside [0, 1)", self.approximate_tolerance),
            }
            .into());
        }
        if self.cache_concept_lookups && self.concept_cache_capacity == 0 {
            return Err(ValidationError::InvalidConfiguration {
                field: "concept_cache_capacity".to_string(),
                message: "must be at least 1 when caching is enabled".to_string(),
            }
            .into());
        }
        if let Some(blank) = self
            .code_systems
            .iter()
            .find(|m| m.system.is_empty() || m.source.is_empty())
        {
            return Err(ValidationError::InvalidConfiguration {
                field: "code_systems".to_string(),
                message: format!("blank mapping {:?}", blank),
            }
            .into());
        }
        Ok(())
    }
}
