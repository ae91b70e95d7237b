//! In-memory session for unit tests.

use std::cell::{Cell, RefCell};

use crate::core::{ConceptLookup, SearchSession};
use crate::error::StorageResult;
use crate::types::{Entity, EntityId, ResourceType};

use super::SqlFragment;

/// Serves a small concept table and canned id results, recording the SQL
/// it is asked to run.
///
/// Concept 5089 (uuid `5089AAAA`) is mapped to LOINC `5089-8` and
/// CIEL `5089`; concept 1065 (uuid `1065AAAA`) has no mappings.
#[derive(Default)]
pub(crate) struct FakeSession {
    pub(crate) lookups: Cell<usize>,
    pub(crate) ids: Vec<EntityId>,
    pub(crate) pairs: Vec<(EntityId, EntityId)>,
    pub(crate) executed: RefCell<Vec<SqlFragment>>,
}

impl FakeSession {
    pub(crate) fn with_ids(ids: Vec<EntityId>) -> Self {
        Self {
            ids,
            ..Self::default()
        }
    }
}

impl SearchSession for FakeSession {
    fn count(&self, query: &SqlFragment) -> StorageResult<usize> {
        self.executed.borrow_mut().push(query.clone());
        Ok(self.ids.len())
    }

    fn matching_ids(&self, query: &SqlFragment) -> StorageResult<Vec<EntityId>> {
        self.executed.borrow_mut().push(query.clone());
        Ok(self.ids.clone())
    }

    fn related_ids(&self, query: &SqlFragment) -> StorageResult<Vec<(EntityId, EntityId)>> {
        self.executed.borrow_mut().push(query.clone());
        Ok(self.pairs.clone())
    }

    fn concept_ids(&self, lookup: &ConceptLookup) -> StorageResult<Vec<EntityId>> {
        self.lookups.set(self.lookups.get() + 1);
        let ids = match lookup {
            ConceptLookup::Any { code } => match code.as_str() {
                "5089" | "5089AAAA" | "5089-8" => vec![5089],
                "1065" | "1065AAAA" => vec![1065],
                _ => vec![],
            },
            ConceptLookup::Mapped { source, code } => match (source.as_str(), code.as_str()) {
                ("LOINC", "5089-8") | ("CIEL", "5089") => vec![5089],
                _ => vec![],
            },
        };
        Ok(ids)
    }

    fn hydrate(&self, _resource_type: ResourceType, _ids: &[EntityId]) -> StorageResult<Vec<Entity>> {
        Ok(Vec::new())
    }
}
