//! Repository traits consumed by the search engine.
//!
//! The engine never talks to a database directly. It hands assembled SQL to
//! a [`SearchSession`] obtained from a [`SearchRepository`], which scopes one
//! consistent read (connection plus read transaction) per engine operation.

use crate::error::StorageResult;
use crate::search::SqlFragment;
use crate::types::{Entity, EntityId, ResourceType};

/// A concept lookup issued by the code system resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConceptLookup {
    /// Any concept whose id, uuid or any mapped code equals `code`.
    Any {
        /// The code.
        code: String,
    },
    /// Concepts mapped to `code` within the named source.
    Mapped {
        /// Concept source name (e.g. `LOINC`).
        source: String,
        /// The code.
        code: String,
    },
}

/// One scoped read against the store.
pub trait SearchSession {
    /// Executes a query returning a single count.
    fn count(&self, query: &SqlFragment) -> StorageResult<usize>;

    /// Executes a query returning entity ids in row order.
    fn matching_ids(&self, query: &SqlFragment) -> StorageResult<Vec<EntityId>>;

    /// Executes a query returning `(anchor, related)` id pairs in row order.
    fn related_ids(&self, query: &SqlFragment) -> StorageResult<Vec<(EntityId, EntityId)>>;

    /// Finds the concepts denoted by a code.
    fn concept_ids(&self, lookup: &ConceptLookup) -> StorageResult<Vec<EntityId>>;

    /// Loads entities of one type, returned in the order of `ids`.
    ///
    /// Ids with no visible row are skipped.
    fn hydrate(&self, resource_type: ResourceType, ids: &[EntityId]) -> StorageResult<Vec<Entity>>;
}

/// Source of scoped read sessions.
pub trait SearchRepository: Send + Sync {
    /// Runs `f` inside one read scope. The scope is released on every exit
    /// path, including errors returned by `f`.
    fn read<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&dyn SearchSession) -> StorageResult<T>;

    /// Page size used when a caller gives no explicit window.
    fn preferred_page_size(&self) -> usize;
}
