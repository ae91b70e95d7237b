//! Helios Clinical Search Engine
//!
//! This crate translates structured search requests over clinical resources
//! (patients, practitioners, encounters, observations and service requests)
//! into SQL over a relational clinical store, and returns paginated results
//! with optional include and reverse-include expansion.
//!
//! # Architecture
//!
//! - [`types`] - Search parameter maps, value groups and clinical entities
//! - [`search`] - Parameter handlers, sorting, query assembly and includes
//! - [`core`] - Repository and translator traits at the engine's boundary
//! - [`engine`] - [`SearchEngine`] and its lazily evaluated [`SearchResults`]
//! - [`backends`] - Store implementations (SQLite)
//! - [`config`] - Engine configuration
//! - [`error`] - Error types for all operations
//!
//! # Boolean structure
//!
//! Every parameter's values form an AND of OR-groups:
//!
//! ```
//! use helios_search::types::{HandlerKey, ReferenceValue, SearchParameterMap, ValueGroup};
//!
//! // patient = P1 OR patient = P2
//! let either = SearchParameterMap::new().with(
//!     HandlerKey::PatientReference,
//!     ValueGroup::any_of([ReferenceValue::id("P1"), ReferenceValue::id("P2")]),
//! );
//!
//! // patient = P1 AND patient = P2, which no observation satisfies
//! let both = SearchParameterMap::new().with(
//!     HandlerKey::PatientReference,
//!     ValueGroup::single(ReferenceValue::id("P1")).and([ReferenceValue::id("P2")]),
//! );
//! # assert_eq!(either.entries().len(), 1);
//! # assert_eq!(both.entries().len(), 1);
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use helios_search::backends::sqlite::SqliteBackend;
//! use helios_search::config::SearchConfig;
//! use helios_search::core::FhirJsonTranslator;
//! use helios_search::engine::SearchEngine;
//! use helios_search::types::{
//!     IncludeDirective, ResourceType, SearchParameterMap, SortSpec,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::open("clinical.db")?;
//! let config = SearchConfig::default();
//! let translator = FhirJsonTranslator::new(&config);
//! let engine = SearchEngine::new(backend, translator, config)?;
//!
//! let map = SearchParameterMap::new()
//!     .with_sort(SortSpec::asc("family"))
//!     .with_include(IncludeDirective::rev_include(ResourceType::Observation, "patient"));
//! let results = engine.search(ResourceType::Patient, map);
//! for resource in results.page(0, 10)? {
//!     println!("{}", resource);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod request;
pub mod search;
pub mod types;

// Re-export commonly used types at crate root
pub use config::SearchConfig;
pub use engine::{SearchEngine, SearchResults};
pub use error::{StorageError, StorageResult};
pub use request::SearchRequest;
pub use types::{ResourceType, SearchParameterMap};

// Re-export core traits
pub use core::{ResourceTranslator, SearchRepository, SearchSession};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
