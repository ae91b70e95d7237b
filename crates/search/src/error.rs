//! Error types for the search engine.
//!
//! Only structural and store failures are errors. Malformed parameter values,
//! unknown parameters and unresolvable chains degrade to "no match" or "no
//! constraint" inside the query builder and never reach the caller, so a
//! successful empty result and a failed query stay distinguishable.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all search operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Configuration or request validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Search structure errors
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors raised while validating configuration or caller input.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The resource type is not supported.
    #[error("unsupported resource type: {resource_type}")]
    UnsupportedResourceType { resource_type: String },

    /// A configuration value is out of range.
    #[error("invalid configuration for {field}: {message}")]
    InvalidConfiguration { field: String, message: String },
}

/// Errors related to the structure of a search request.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The root resource of an everything request does not exist.
    #[error("resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    /// Search request parsing failed.
    #[error("failed to parse search request: {message}")]
    QueryParseError { message: String },
}

/// Errors from the backing store.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Schema migration error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },

    /// A stored row could not be mapped to an entity.
    #[error("malformed row in {table}: {message}")]
    MalformedRow { table: String, message: String },
}

/// Result type alias for search operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Returns true if this error originated in the backing store.
    pub fn is_backend(&self) -> bool {
        matches!(self, StorageError::Backend(_))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_errors_are_flagged() {
        let err: StorageError = BackendError::QueryError {
            message: "disk I/O error".to_string(),
        }
        .into();
        assert!(err.is_backend());
        assert_eq!(err.to_string(), "query execution failed: disk I/O error");
    }

    #[test]
    fn test_search_error_display() {
        let err: StorageError = SearchError::NotFound {
            resource_type: "Patient".to_string(),
            id: "abc".to_string(),
        }
        .into();
        assert!(!err.is_backend());
        assert_eq!(err.to_string(), "resource not found: Patient/abc");
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_rusqlite_error_conversion() {
        let err: StorageError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(
            err,
            StorageError::Backend(BackendError::Internal { ref backend_name, .. })
                if backend_name == "sqlite"
        ));
    }
}
