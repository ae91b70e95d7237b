//! Include and reverse-include expansion.
//!
//! Given the primary ids of one page, forward includes follow a relation
//! from each primary to the entity it references; reverse includes find the
//! entities whose relation points back at a primary. Forward targets are
//! appended once each, in the order they are first reached, and never repeat
//! an entity already on the page. Reverse matches are appended as found.

use std::collections::{HashMap, HashSet};

use crate::core::SearchSession;
use crate::error::StorageResult;
use crate::types::{Entity, EntityId, IncludeDirective, IncludeType, ResourceType};

use super::query_builder::{SqlFragment, SqlParam, placeholders};
use super::registry::{self, Relation, entity_table};

/// Maximum number of anchor ids bound into one pair query.
const CHUNK_SIZE: usize = 500;

/// An entity identified by type and internal id.
pub type EntityRef = (ResourceType, EntityId);

/// The related entities found for one page of primaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    /// Forward-included entities, deduplicated.
    pub forward: Vec<EntityRef>,
    /// Reverse-included entities.
    pub reverse: Vec<EntityRef>,
}

impl Expansion {
    /// Number of expanded entities.
    pub fn len(&self) -> usize {
        self.forward.len() + self.reverse.len()
    }

    /// Returns true if nothing was expanded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Expands include directives against one page of primaries.
pub struct IncludeExpander;

impl IncludeExpander {
    /// Expands every directive for the primaries of `primary_type`.
    ///
    /// Forward directives are applied before reverse ones regardless of the
    /// order they were given in. Directives that do not apply to
    /// `primary_type` or name an unknown relation are skipped.
    pub fn expand<'a>(
        session: &dyn SearchSession,
        primary_type: ResourceType,
        primaries: &[EntityId],
        directives: impl IntoIterator<Item = &'a IncludeDirective>,
    ) -> StorageResult<Expansion> {
        let mut expansion = Expansion::default();
        if primaries.is_empty() {
            return Ok(expansion);
        }

        let (forward, reverse): (Vec<_>, Vec<_>) = directives
            .into_iter()
            .partition(|d| d.include_type == IncludeType::Include);

        let mut seen: HashSet<EntityRef> = primaries.iter().map(|id| (primary_type, *id)).collect();
        for directive in forward {
            let Some(relation) = Self::forward_relation(primary_type, directive) else {
                continue;
            };
            for (_, target) in Self::forward_pairs(session, &relation, primaries)? {
                let entity = (relation.target, target);
                if seen.insert(entity) {
                    expansion.forward.push(entity);
                }
            }
        }

        for directive in reverse {
            let Some(relation) = Self::reverse_relation(primary_type, directive) else {
                continue;
            };
            for (_, source) in Self::reverse_pairs(session, &relation, primaries)? {
                expansion.reverse.push((relation.source, source));
            }
        }

        tracing::debug!(
            primaries = primaries.len(),
            forward = expansion.forward.len(),
            reverse = expansion.reverse.len(),
            "Expanded includes"
        );
        Ok(expansion)
    }

    fn forward_relation(primary_type: ResourceType, directive: &IncludeDirective) -> Option<Relation> {
        if directive.source_type != primary_type {
            tracing::debug!(
                source = %directive.source_type,
                %primary_type,
                "Include does not start at the primary type; skipping"
            );
            return None;
        }
        let relation = registry::relation(directive.source_type, &directive.relation);
        if relation.is_none() {
            tracing::warn!(
                source = %directive.source_type,
                relation = %directive.relation,
                "Unknown include relation; skipping"
            );
        }
        relation
    }

    fn reverse_relation(primary_type: ResourceType, directive: &IncludeDirective) -> Option<Relation> {
        let Some(relation) = registry::relation(directive.source_type, &directive.relation) else {
            tracing::warn!(
                source = %directive.source_type,
                relation = %directive.relation,
                "Unknown reverse include relation; skipping"
            );
            return None;
        };
        if relation.target != primary_type {
            tracing::debug!(
                source = %directive.source_type,
                relation = %directive.relation,
                %primary_type,
                "Reverse include does not point at the primary type; skipping"
            );
            return None;
        }
        Some(relation)
    }

    /// `(primary, target)` pairs for a relation held by the primaries.
    fn forward_pairs(
        session: &dyn SearchSession,
        relation: &Relation,
        primaries: &[EntityId],
    ) -> StorageResult<Vec<(EntityId, EntityId)>> {
        let source = entity_table(relation.source);
        let target = entity_table(relation.target);
        let step = relation.join_step();
        let mut join = format!(
            "{} j1 ON j1.{} = t0.{}",
            step.table, step.column, step.parent_column
        );
        if let Some(live) = step.live_column {
            join.push_str(&format!(" AND j1.{live} = 0"));
        }
        let select = format!(
            "SELECT t0.{spk}, j1.{tpk} FROM {table} t0 JOIN {join} WHERE t0.{spk} IN",
            spk = source.pk,
            tpk = target.pk,
            table = source.table,
        );
        let order = format!("ORDER BY j1.{}", target.pk);
        related_pairs(session, &select, &order, primaries)
    }

    /// `(primary, source)` pairs for a relation pointing at the primaries.
    fn reverse_pairs(
        session: &dyn SearchSession,
        relation: &Relation,
        primaries: &[EntityId],
    ) -> StorageResult<Vec<(EntityId, EntityId)>> {
        let source = entity_table(relation.source);
        let target = entity_table(relation.target);
        let step = relation.join_step();
        let live = source
            .live_column
            .map(|c| format!("t0.{c} = 0 AND "))
            .unwrap_or_default();
        let select = format!(
            "SELECT j1.{tpk}, t0.{spk} FROM {table} t0 JOIN {joined} j1 ON j1.{col} = t0.{pcol} \
             WHERE {live}j1.{tpk} IN",
            tpk = target.pk,
            spk = source.pk,
            table = source.table,
            joined = step.table,
            col = step.column,
            pcol = step.parent_column,
        );
        let order = format!("ORDER BY t0.{}", source.pk);
        related_pairs(session, &select, &order, primaries)
    }
}

/// Runs `select (?, …) order` over `anchors` in chunks and returns the pairs
/// grouped by the anchors' order.
fn related_pairs(
    session: &dyn SearchSession,
    select: &str,
    order: &str,
    anchors: &[EntityId],
) -> StorageResult<Vec<(EntityId, EntityId)>> {
    let mut pairs = Vec::new();
    for chunk in anchors.chunks(CHUNK_SIZE) {
        let query = SqlFragment::with_params(
            format!("{} ({}) {}", select, placeholders(chunk.len()), order),
            chunk.iter().map(|id| SqlParam::integer(*id)).collect(),
        );
        pairs.extend(session.related_ids(&query)?);
    }

    let position: HashMap<EntityId, usize> = anchors
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();
    pairs.retain(|(anchor, _)| position.contains_key(anchor));
    pairs.sort_by_key(|(anchor, _)| position[anchor]);
    Ok(pairs)
}

/// Hydrates entities of mixed types, returned in the order of `refs`.
///
/// References without a visible row are skipped.
pub fn hydrate_refs(session: &dyn SearchSession, refs: &[EntityRef]) -> StorageResult<Vec<Entity>> {
    let mut by_type: Vec<(ResourceType, Vec<EntityId>)> = Vec::new();
    for (resource_type, id) in refs {
        match by_type.iter_mut().find(|(t, _)| t == resource_type) {
            Some((_, ids)) => {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
            None => by_type.push((*resource_type, vec![*id])),
        }
    }

    let mut loaded: HashMap<EntityRef, Entity> = HashMap::new();
    for (resource_type, ids) in by_type {
        for entity in session.hydrate(resource_type, &ids)? {
            loaded.insert((resource_type, entity.id()), entity);
        }
    }

    Ok(refs.iter().filter_map(|r| loaded.get(r).cloned()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::fake::FakeSession;

    #[test]
    fn test_reverse_include_groups_by_primary_order() {
        let session = FakeSession {
            pairs: vec![(2, 20), (1, 10), (2, 21), (1, 11)],
            ..FakeSession::default()
        };
        let directive = IncludeDirective::rev_include(ResourceType::Observation, "patient");
        let expansion =
            IncludeExpander::expand(&session, ResourceType::Patient, &[1, 2], [&directive]).unwrap();

        let ids: Vec<_> = expansion.reverse.iter().map(|(_, id)| *id).collect();
        assert_eq!(ids, vec![10, 11, 20, 21]);
        assert!(expansion.forward.is_empty());

        let executed = session.executed.borrow();
        assert_eq!(
            executed[0].sql,
            "SELECT j1.patient_id, t0.obs_id FROM obs t0 JOIN patient j1 \
             ON j1.patient_id = t0.patient_id WHERE t0.voided = 0 AND j1.patient_id IN (?, ?) \
             ORDER BY t0.obs_id"
        );
    }

    #[test]
    fn test_forward_include_deduplicates_targets() {
        let session = FakeSession {
            pairs: vec![(1, 7), (2, 7), (3, 8)],
            ..FakeSession::default()
        };
        let directive = IncludeDirective::include(ResourceType::Observation, "patient");
        let expansion =
            IncludeExpander::expand(&session, ResourceType::Observation, &[1, 2, 3], [&directive])
                .unwrap();
        assert_eq!(
            expansion.forward,
            vec![(ResourceType::Patient, 7), (ResourceType::Patient, 8)]
        );
    }

    #[test]
    fn test_forward_include_skips_entities_on_page() {
        let session = FakeSession {
            pairs: vec![(1, 2), (2, 3)],
            ..FakeSession::default()
        };
        let directive = IncludeDirective::include(ResourceType::Observation, "has-member");
        let expansion =
            IncludeExpander::expand(&session, ResourceType::Observation, &[1, 2], [&directive])
                .unwrap();
        assert_eq!(expansion.forward, vec![(ResourceType::Observation, 3)]);
    }

    #[test]
    fn test_inapplicable_directives_are_skipped() {
        let session = FakeSession {
            pairs: vec![(1, 7)],
            ..FakeSession::default()
        };
        let directives = [
            IncludeDirective::include(ResourceType::Encounter, "patient"),
            IncludeDirective::include(ResourceType::Patient, "shoe"),
            IncludeDirective::rev_include(ResourceType::Observation, "encounter"),
        ];
        let expansion =
            IncludeExpander::expand(&session, ResourceType::Patient, &[1], &directives).unwrap();
        assert!(expansion.is_empty());
        assert!(session.executed.borrow().is_empty());
    }

    #[test]
    fn test_large_pages_are_chunked() {
        let session = FakeSession::default();
        let primaries: Vec<EntityId> = (1..=1200).collect();
        let directive = IncludeDirective::rev_include(ResourceType::Observation, "patient");
        IncludeExpander::expand(&session, ResourceType::Patient, &primaries, [&directive]).unwrap();
        let executed = session.executed.borrow();
        assert_eq!(executed.len(), 3);
        assert_eq!(executed[2].params.len(), 200);
    }
}
