//! Sort pipeline.
//!
//! Turns a (possibly chained) [`SortSpec`] into `ORDER BY` terms over the
//! root alias. Keys that do not resolve on the root type are dropped and the
//! walk continues with the next key. The primary key always closes the
//! ordering so that repeated id queries page consistently.

use std::fmt;

use crate::types::{ResourceType, SortDirection, SortSpec};

use super::query_builder::ROOT_ALIAS;
use super::registry::{self, ColumnExpr, JoinStep, PropertyKind, entity_table};

/// One `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    /// Expression over the root alias.
    pub expr: String,
    /// Sort direction.
    pub direction: SortDirection,
}

impl OrderTerm {
    /// Creates a term.
    pub fn new(expr: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            expr: expr.into(),
            direction,
        }
    }
}

impl fmt::Display for OrderTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDirection::Ascending => write!(f, "{} ASC", self.expr),
            SortDirection::Descending => write!(f, "{} DESC", self.expr),
        }
    }
}

/// Builds the effective ordering for a search.
pub struct SortPipeline;

impl SortPipeline {
    /// The ordering used when no sort is requested: ascending primary key.
    pub fn base_ordering(resource_type: ResourceType) -> Vec<OrderTerm> {
        let pk = entity_table(resource_type).pk;
        vec![OrderTerm::new(
            format!("{}.{}", ROOT_ALIAS, pk),
            SortDirection::Ascending,
        )]
    }

    /// Prepends the resolvable keys of `sort` to `base`.
    pub fn apply(
        resource_type: ResourceType,
        sort: Option<&SortSpec>,
        base: Vec<OrderTerm>,
    ) -> Vec<OrderTerm> {
        let mut terms = Vec::new();
        for spec in sort.into_iter().flat_map(|s| s.iter()) {
            match Self::term(resource_type, spec) {
                Some(term) => terms.push(term),
                None => tracing::debug!(
                    resource_type = %resource_type,
                    parameter = %spec.parameter,
                    "Dropping unresolvable sort key"
                ),
            }
        }
        terms.extend(base);
        terms
    }

    fn term(resource_type: ResourceType, spec: &SortSpec) -> Option<OrderTerm> {
        let resolved = registry::resolve(resource_type, &spec.parameter)?;
        if resolved.property.kind == PropertyKind::Concept {
            return None;
        }

        let expr = if resolved.path.is_empty() {
            resolved.property.expr.render(ROOT_ALIAS)
        } else if resolved.is_to_many() {
            let aggregate = match spec.direction {
                SortDirection::Ascending => "MIN",
                SortDirection::Descending => "MAX",
            };
            correlated(&resolved.path, &resolved.property.expr, Some(aggregate))
        } else {
            correlated(&resolved.path, &resolved.property.expr, None)
        };
        Some(OrderTerm::new(expr, spec.direction))
    }
}

/// Renders a scalar subquery selecting `expr` from the rows reached from the
/// root alias through `path`, aggregated when the path fans out.
fn correlated(path: &[JoinStep], expr: &ColumnExpr, aggregate: Option<&str>) -> String {
    let mut from = String::new();
    let mut filter = String::new();
    let mut parent = ROOT_ALIAS.to_string();

    for (depth, step) in path.iter().enumerate() {
        let alias = format!("s{}", depth + 1);
        let mut on = format!("{alias}.{} = {parent}.{}", step.column, step.parent_column);
        if let Some(live) = step.live_column {
            on.push_str(&format!(" AND {alias}.{live} = 0"));
        }
        if depth == 0 {
            from = format!("{} {alias}", step.table);
            filter = on;
        } else {
            from.push_str(&format!(" JOIN {} {alias} ON {on}", step.table));
        }
        parent = alias;
    }

    let selected = match aggregate {
        Some(aggregate) => format!("{aggregate}({})", expr.render(&parent)),
        None => expr.render(&parent),
    };
    format!("(SELECT {selected} FROM {from} WHERE {filter})")
}

/// Renders terms as an `ORDER BY` body.
pub fn render(terms: &[OrderTerm]) -> String {
    terms
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
