//! Parameter-specific SQL handlers.
//!
//! [`translate_entry`] dispatches one [`ParamEntry`] by its [`HandlerKey`]:
//! the key selects the parameter searched and the value kind accepted, and
//! the catalog property behind that parameter selects the kind handler that
//! renders each value. OR-groups become disjunctions, AND-lists conjunctions.
//!
//! Nothing here fails on bad input. An entry whose handler, parameter or
//! value kind does not fit adds no constraint; a malformed value makes its
//! branch unsatisfiable. Only store errors (concept lookups) propagate.

mod date;
mod quantity;
mod reference;
mod string;
mod token;

pub use date::DateHandler;
pub use quantity::QuantityHandler;
pub use reference::ReferenceHandler;
pub use string::StringHandler;
pub use token::TokenHandler;

use rust_decimal::Decimal;

use crate::core::SearchSession;
use crate::error::StorageResult;
use crate::types::{
    DateRangeValue, OrGroup, ParamEntry, ParamGroup, QuantityValue, StringValue, TokenValue,
    ValueGroup, ValueKind,
};

use super::code_system::CodeSystemResolver;
use super::query_builder::{AndScope, QueryContext, SqlFragment};
use super::registry::{self, Property, PropertyKind, ResolvedProperty};

/// Collaborators available to handlers while translating.
pub struct HandlerEnv<'a> {
    /// Resolves coded tokens to concept ids.
    pub resolver: &'a CodeSystemResolver,
    /// The session concept lookups run in.
    pub session: &'a dyn SearchSession,
    /// Relative width of the `ap` quantity window.
    pub approximate_tolerance: Decimal,
}

/// A borrowed non-reference value.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ValueRef<'v> {
    Token(&'v TokenValue),
    Quantity(&'v QuantityValue),
    String(&'v StringValue),
    Date(&'v DateRangeValue),
}

/// Translates one entry and conjoins its predicate onto `query`.
///
/// `index` is the entry's position in its map; together with the OR-group
/// index it forms the AND scope joins are planned in.
pub fn translate_entry(
    query: &mut QueryContext,
    index: usize,
    entry: &ParamEntry,
    env: &HandlerEnv<'_>,
) -> StorageResult<()> {
    let root = query.root().resource_type;
    let kind = entry.group.kind();

    if !entry.handler.accepts(kind) {
        tracing::warn!(
            handler = %entry.handler,
            ?kind,
            "Handler does not accept this value kind; ignoring parameter"
        );
        return Ok(());
    }
    let Some(name) = entry.parameter_name() else {
        tracing::warn!(handler = %entry.handler, "Handler requires a qualifier; ignoring parameter");
        return Ok(());
    };

    let predicate = match &entry.group {
        ParamGroup::Reference(group) => {
            let Some(relation) = registry::relation(root, &name) else {
                tracing::warn!(resource_type = %root, parameter = %name, "Unknown reference; ignoring parameter");
                return Ok(());
            };
            and_of_ors(query, index, group, |query, scope, value| {
                ReferenceHandler::build_sql(query, scope, &relation, value, env)
            })?
        }
        group => {
            let Some(resolved) = registry::resolve(root, &name) else {
                tracing::warn!(resource_type = %root, parameter = %name, "Unknown parameter; ignoring");
                return Ok(());
            };
            if !fits(resolved.property.kind, kind) {
                tracing::warn!(
                    resource_type = %root,
                    parameter = %name,
                    ?kind,
                    "Value kind does not fit parameter; ignoring"
                );
                return Ok(());
            }
            translate_property(query, index, &resolved, group, env)?
        }
    };

    query.push_predicate(predicate);
    Ok(())
}

fn translate_property(
    query: &mut QueryContext,
    index: usize,
    resolved: &ResolvedProperty,
    group: &ParamGroup,
    env: &HandlerEnv<'_>,
) -> StorageResult<SqlFragment> {
    let property = &resolved.property;
    let path = &resolved.path;

    match group {
        // Concept tokens of one OR-group resolve to a single id union.
        ParamGroup::Token(group) if property.kind == PropertyKind::Concept => {
            and_of_or_groups(query, index, group, |query, scope, tokens| {
                let alias = query.join_path(path, scope);
                let concepts = env.resolver.resolve_any(env.session, tokens)?;
                Ok(TokenHandler::build_concept_sql(
                    &property.expr.render(&alias),
                    &concepts,
                ))
            })
        }
        ParamGroup::Token(group) => and_of_ors(query, index, group, |query, scope, v| {
            let alias = query.join_path(path, scope);
            property_predicate(&alias, property, ValueRef::Token(v), env)
        }),
        ParamGroup::Quantity(group) => and_of_ors(query, index, group, |query, scope, v| {
            let alias = query.join_path(path, scope);
            property_predicate(&alias, property, ValueRef::Quantity(v), env)
        }),
        ParamGroup::String(group) => and_of_ors(query, index, group, |query, scope, v| {
            let alias = query.join_path(path, scope);
            property_predicate(&alias, property, ValueRef::String(v), env)
        }),
        ParamGroup::Date(group) => and_of_ors(query, index, group, |query, scope, v| {
            let alias = query.join_path(path, scope);
            property_predicate(&alias, property, ValueRef::Date(v), env)
        }),
        ParamGroup::Reference(_) => Ok(SqlFragment::default()),
    }
}

/// Renders one value against `property` read through `alias`.
pub(crate) fn property_predicate(
    alias: &str,
    property: &Property,
    value: ValueRef<'_>,
    env: &HandlerEnv<'_>,
) -> StorageResult<SqlFragment> {
    let column = property.expr.render(alias);
    let fragment = match (property.kind, value) {
        (PropertyKind::String, ValueRef::String(v)) => {
            Some(StringHandler::build_sql(alias, &property.expr, v))
        }
        (PropertyKind::Token(rule), ValueRef::Token(v)) => {
            TokenHandler::build_sql(alias, &property.expr, rule, v)
        }
        (PropertyKind::Concept, ValueRef::Token(v)) => {
            let concepts = env.resolver.resolve(env.session, v)?;
            Some(TokenHandler::build_concept_sql(&column, &concepts))
        }
        (PropertyKind::Date, ValueRef::Date(v)) => DateHandler::build_sql(&column, v),
        (PropertyKind::Quantity { unit_column }, ValueRef::Quantity(v)) => {
            let unit = unit_column.map(|u| format!("{}.{}", alias, u));
            QuantityHandler::build_sql(&column, unit.as_deref(), v, env.approximate_tolerance)
        }
        _ => None,
    };

    Ok(fragment.unwrap_or_else(|| {
        tracing::warn!(
            parameter = property.name,
            ?value,
            "Malformed search value; branch cannot match"
        );
        SqlFragment::unsatisfiable()
    }))
}

fn fits(property: PropertyKind, value: ValueKind) -> bool {
    matches!(
        (property, value),
        (PropertyKind::String, ValueKind::String)
            | (PropertyKind::Token(_) | PropertyKind::Concept, ValueKind::Token)
            | (PropertyKind::Date, ValueKind::Date)
            | (PropertyKind::Quantity { .. }, ValueKind::Quantity)
    )
}

/// Conjoins one predicate per OR-group, each built from the whole group.
fn and_of_or_groups<T>(
    query: &mut QueryContext,
    index: usize,
    group: &ValueGroup<T>,
    mut build: impl FnMut(&mut QueryContext, AndScope, &OrGroup<T>) -> StorageResult<SqlFragment>,
) -> StorageResult<SqlFragment> {
    let mut conjunction = SqlFragment::default();
    for (position, or_group) in group.or_groups().iter().enumerate() {
        let disjunction = if or_group.is_empty() {
            SqlFragment::unsatisfiable()
        } else {
            let scope = AndScope {
                entry: index,
                group: position,
            };
            build(query, scope, or_group)?
        };
        conjunction = conjunction.and(disjunction);
    }
    Ok(conjunction)
}

/// Conjoins OR-groups whose values are translated one at a time.
fn and_of_ors<T>(
    query: &mut QueryContext,
    index: usize,
    group: &ValueGroup<T>,
    mut build: impl FnMut(&mut QueryContext, AndScope, &T) -> StorageResult<SqlFragment>,
) -> StorageResult<SqlFragment> {
    and_of_or_groups(query, index, group, |query, scope, values| {
        let mut disjunction = SqlFragment::default();
        for value in values {
            disjunction = disjunction.or(build(query, scope, value)?);
        }
        Ok(disjunction)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::search::fake::FakeSession;
    use crate::types::{HandlerKey, ReferenceValue, ResourceType, SearchParameterMap};

    fn translate(resource_type: ResourceType, map: &SearchParameterMap) -> QueryContext {
        let resolver = CodeSystemResolver::new(&SearchConfig::default());
        let session = FakeSession::default();
        let env = HandlerEnv {
            resolver: &resolver,
            session: &session,
            approximate_tolerance: Decimal::new(1, 1),
        };
        let mut query = QueryContext::new(resource_type);
        for (index, entry) in map.entries().iter().enumerate() {
            translate_entry(&mut query, index, entry, &env).unwrap();
        }
        query
    }

    #[test]
    fn test_single_value_degenerates_to_one_predicate() {
        let map = SearchParameterMap::new().with(
            HandlerKey::Gender,
            ValueGroup::single(TokenValue::code("male")),
        );
        let query = translate(ResourceType::Patient, &map);
        let clause = query.where_clause();
        assert_eq!(clause.sql, "(t0.voided = 0) AND (t0.gender = ?)");
    }

    #[test]
    fn test_reference_and_groups_use_separate_joins() {
        let map = SearchParameterMap::new().with(
            HandlerKey::PatientReference,
            ValueGroup::single(ReferenceValue::id("p1")).and([ReferenceValue::id("p2")]),
        );
        let query = translate(ResourceType::Observation, &map);
        assert_eq!(query.join_count(), 2);
        let clause = query.where_clause();
        assert!(clause.sql.contains("j1.uuid = ?"));
        assert!(clause.sql.contains("j2.uuid = ?"));
    }

    #[test]
    fn test_reference_or_group_shares_join() {
        let map = SearchParameterMap::new().with(
            HandlerKey::PatientReference,
            ValueGroup::any_of([ReferenceValue::id("p1"), ReferenceValue::id("p2")]),
        );
        let query = translate(ResourceType::Observation, &map);
        assert_eq!(query.join_count(), 1);
        assert_eq!(
            query.where_clause().sql,
            "(t0.voided = 0) AND ((j1.uuid = ?) OR (j1.uuid = ?))"
        );
    }

    #[test]
    fn test_chained_identifier_joins_through_patient() {
        let map = SearchParameterMap::new().with(
            HandlerKey::PatientReference,
            ValueGroup::single(ReferenceValue::chained("identifier", "10001V")),
        );
        let query = translate(ResourceType::Observation, &map);
        let from = query.from_clause();
        assert!(from.contains("LEFT JOIN patient j1 ON j1.patient_id = t0.patient_id"));
        assert!(from.contains("LEFT JOIN patient_identifier j2 ON j2.patient_id = j1.patient_id"));
        assert!(query.where_clause().sql.contains("j2.identifier = ?"));
    }

    #[test]
    fn test_unknown_chain_is_unsatisfiable() {
        let map = SearchParameterMap::new().with(
            HandlerKey::PatientReference,
            ValueGroup::single(ReferenceValue::chained("shoe-size", "42")),
        );
        let query = translate(ResourceType::Observation, &map);
        assert!(query.where_clause().sql.contains("1 = 0"));
    }

    #[test]
    fn test_reference_type_mismatch_is_unsatisfiable() {
        let map = SearchParameterMap::new().with(
            HandlerKey::PatientReference,
            ValueGroup::single(ReferenceValue::parse("Encounter/e1")),
        );
        let query = translate(ResourceType::Observation, &map);
        assert!(query.where_clause().sql.contains("1 = 0"));
    }

    #[test]
    fn test_coded_or_group_resolves_to_union() {
        let map = SearchParameterMap::new().with(
            HandlerKey::Coded,
            ValueGroup::any_of([TokenValue::code("5089"), TokenValue::code("1065AAAA")]),
        );
        let query = translate(ResourceType::Observation, &map);
        let clause = query.where_clause();
        assert_eq!(clause.sql, "(t0.voided = 0) AND (t0.concept_id IN (?, ?))");
    }

    #[test]
    fn test_unknown_parameter_adds_no_constraint() {
        let map = SearchParameterMap::new().with_qualified(
            HandlerKey::Common,
            "_shoeSize",
            ValueGroup::single(TokenValue::code("42")),
        );
        let query = translate(ResourceType::Patient, &map);
        assert_eq!(query.where_clause().sql, "t0.voided = 0");
    }

    #[test]
    fn test_handler_kind_mismatch_adds_no_constraint() {
        let map = SearchParameterMap::new().with(
            HandlerKey::Gender,
            ValueGroup::single(StringValue::prefix("male")),
        );
        let query = translate(ResourceType::Patient, &map);
        assert_eq!(query.where_clause().sql, "t0.voided = 0");
    }

    #[test]
    fn test_parameter_not_on_resource_adds_no_constraint() {
        let map = SearchParameterMap::new().with(
            HandlerKey::Gender,
            ValueGroup::single(TokenValue::code("male")),
        );
        let query = translate(ResourceType::Observation, &map);
        assert_eq!(query.where_clause().sql, "t0.voided = 0");
    }

    #[test]
    fn test_malformed_quantity_is_unsatisfiable_branch() {
        let map = SearchParameterMap::new().with(
            HandlerKey::Quantity,
            ValueGroup::any_of([QuantityValue::new("abc"), QuantityValue::new("70")]),
        );
        let query = translate(ResourceType::Observation, &map);
        let clause = query.where_clause();
        assert!(clause.sql.contains("(1 = 0) OR (t0.value_numeric >= ?"));
    }

    #[test]
    fn test_empty_or_group_is_unsatisfiable() {
        let map = SearchParameterMap::new().with(
            HandlerKey::Status,
            ValueGroup::single(TokenValue::code("final")).and(Vec::<TokenValue>::new()),
        );
        let query = translate(ResourceType::Observation, &map);
        assert!(query.where_clause().sql.ends_with("(1 = 0))"));
    }

    #[test]
    fn test_address_qualifier() {
        let map = SearchParameterMap::new().with_qualified(
            HandlerKey::Address,
            "city",
            ValueGroup::single(StringValue::prefix("Eld")),
        );
        let query = translate(ResourceType::Patient, &map);
        assert!(query.from_clause().contains("LEFT JOIN patient_address j1"));
        assert!(query.where_clause().sql.contains("j1.city COLLATE NOCASE LIKE ?"));
    }
}
