//! Reference parameter SQL handler.

use crate::error::StorageResult;
use crate::search::registry::{self, PropertyKind, Relation};
use crate::types::{DateRangeValue, QuantityValue, ReferenceValue, StringValue, TokenValue};

use super::super::query_builder::{AndScope, QueryContext, SqlFragment, SqlParam};
use super::{HandlerEnv, ValueRef, property_predicate};

/// Handles reference parameter SQL generation.
pub struct ReferenceHandler;

impl ReferenceHandler {
    /// Builds SQL for one reference value following `relation`.
    ///
    /// Without a chain the referenced row's uuid must equal the value. With a
    /// chain the value is compared against the named property of the
    /// referenced row, read the way that property's kind is read: strings as
    /// a prefix, tokens and concepts as codes, dates as a period and
    /// quantities with an optional comparator.
    ///
    /// Joins are planned within `scope`, so values of one OR-group share the
    /// joined row while separate AND-groups each join their own.
    pub fn build_sql(
        query: &mut QueryContext,
        scope: AndScope,
        relation: &Relation,
        value: &ReferenceValue,
        env: &HandlerEnv<'_>,
    ) -> StorageResult<SqlFragment> {
        if let Some(expected) = value.resource_type {
            if expected != relation.target {
                tracing::debug!(
                    relation = relation.name,
                    %expected,
                    target = %relation.target,
                    "Reference type does not match relation target"
                );
                return Ok(SqlFragment::unsatisfiable());
            }
        }

        let step = relation.join_step();
        let Some(chain) = value.chain() else {
            let alias = query.join_path(&[step], scope);
            return Ok(SqlFragment::with_params(
                format!("{}.uuid = ?", alias),
                vec![SqlParam::string(&value.id)],
            ));
        };

        let Some(resolved) = registry::resolve(relation.target, chain) else {
            tracing::warn!(
                relation = relation.name,
                chain,
                "Unknown chained parameter; branch cannot match"
            );
            return Ok(SqlFragment::unsatisfiable());
        };

        let mut path = Vec::with_capacity(resolved.path.len() + 1);
        path.push(step);
        path.extend(resolved.path.iter().copied());
        let alias = query.join_path(&path, scope);
        let property = &resolved.property;

        match property.kind {
            PropertyKind::String => {
                let v = StringValue::prefix(&value.id);
                property_predicate(&alias, property, ValueRef::String(&v), env)
            }
            PropertyKind::Token(_) | PropertyKind::Concept => {
                let v = TokenValue::parse(&value.id);
                property_predicate(&alias, property, ValueRef::Token(&v), env)
            }
            PropertyKind::Date => {
                let v = DateRangeValue::on(&value.id);
                property_predicate(&alias, property, ValueRef::Date(&v), env)
            }
            PropertyKind::Quantity { .. } => {
                let v = QuantityValue::parse(&value.id);
                property_predicate(&alias, property, ValueRef::Quantity(&v), env)
            }
        }
    }
}
