//! Serialized search requests.

use serde::{Deserialize, Serialize};

use crate::error::{SearchError, StorageResult};
use crate::types::{ResourceType, SearchParameterMap};

/// A search request as read from a file or message body.
///
/// ```
/// use helios_search::request::SearchRequest;
/// use helios_search::types::ResourceType;
///
/// let request = SearchRequest::from_json(r#"{
///     "resource_type": "Observation",
///     "parameters": {
///         "entries": [{
///             "handler": "patient-reference",
///             "group": { "kind": "reference", "values": [[{ "id": "p1" }, { "id": "p2" }]] }
///         }],
///         "sort": { "parameter": "date", "direction": "Descending" }
///     }
/// }"#).unwrap();
///
/// assert_eq!(request.resource_type, ResourceType::Observation);
/// assert_eq!(request.parameters.entries().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// The resource type searched.
    pub resource_type: ResourceType,
    /// The parameters.
    #[serde(default)]
    pub parameters: SearchParameterMap,
}

impl SearchRequest {
    /// Creates a request.
    pub fn new(resource_type: ResourceType, parameters: SearchParameterMap) -> Self {
        Self {
            resource_type,
            parameters,
        }
    }

    /// Parses a request from JSON.
    pub fn from_json(json: &str) -> StorageResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            SearchError::QueryParseError {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Renders the request as pretty-printed JSON.
    pub fn to_json(&self) -> StorageResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            SearchError::QueryParseError {
                message: e.to_string(),
            }
            .into()
        })
    }
}
