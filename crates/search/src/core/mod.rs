//! Core traits at the engine's boundary.
//!
//! - [`SearchRepository`] / [`SearchSession`] - Scoped reads against the store
//! - [`ResourceTranslator`] - Entity to external resource conversion

pub mod repository;
pub mod translator;

pub use repository::{ConceptLookup, SearchRepository, SearchSession};
pub use translator::{EntityTranslator, FhirJsonTranslator, ResourceTranslator};
