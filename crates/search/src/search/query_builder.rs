//! SQL fragments and the shared query-building context.
//!
//! Handlers attach predicates to a [`QueryContext`] rooted at the searched
//! entity's table (alias `t0`). Joined tables are planned by the context so
//! that handlers never name aliases themselves.
//!
//! # Join reuse
//!
//! A join path is keyed by the path itself and the AND scope it is used in.
//! Values inside one OR-group share their joins, so `family = A OR family = B`
//! joins `patient_name` once. Each AND-group gets fresh joins, so
//! `identifier = A AND identifier = B` requires two distinct matching rows
//! rather than one row equal to both, which is empty for a single-valued field.

use std::collections::HashMap;

use serde::Serialize;

use crate::types::ResourceType;

use super::registry::{EntityTable, JoinStep, entity_table};

/// Alias of the root entity table.
pub const ROOT_ALIAS: &str = "t0";

/// A fragment of SQL with bound parameters.
///
/// Placeholders are anonymous (`?`), so parameters are kept in the order
/// their placeholders appear in the SQL text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SqlFragment {
    /// The SQL clause.
    pub sql: String,
    /// Bound parameter values.
    pub params: Vec<SqlParam>,
}

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    /// String parameter.
    String(String),
    /// Integer parameter.
    Integer(i64),
    /// Float parameter.
    Float(f64),
}

impl SqlParam {
    /// Creates a string parameter.
    pub fn string(s: impl Into<String>) -> Self {
        SqlParam::String(s.into())
    }

    /// Creates an integer parameter.
    pub fn integer(i: i64) -> Self {
        SqlParam::Integer(i)
    }

    /// Creates a float parameter.
    pub fn float(f: f64) -> Self {
        SqlParam::Float(f)
    }
}

const UNSATISFIABLE: &str = "1 = 0";

impl SqlFragment {
    /// Creates a new SQL fragment.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Creates a fragment with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A predicate no row satisfies.
    pub fn unsatisfiable() -> Self {
        Self::new(UNSATISFIABLE)
    }

    /// Returns true if this fragment is the unsatisfiable predicate.
    pub fn is_unsatisfiable(&self) -> bool {
        self.sql == UNSATISFIABLE
    }

    /// Combines with another fragment using AND.
    pub fn and(mut self, other: SqlFragment) -> Self {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql = format!("({}) AND ({})", self.sql, other.sql);
        } else if !other.sql.is_empty() {
            self.sql = other.sql;
        }
        self.params.extend(other.params);
        self
    }

    /// Combines with another fragment using OR.
    pub fn or(mut self, other: SqlFragment) -> Self {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql = format!("({}) OR ({})", self.sql, other.sql);
        } else if !other.sql.is_empty() {
            self.sql = other.sql;
        }
        self.params.extend(other.params);
        self
    }

    /// Returns true if this fragment is empty.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Renders `?, ?, ?` for `n` placeholders.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Identifies the AND-group a predicate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AndScope {
    /// Index of the parameter entry.
    pub entry: usize,
    /// Index of the OR-group within the entry.
    pub group: usize,
}

/// Collects joins and predicates for one assembled query.
#[derive(Debug)]
pub struct QueryContext {
    root: &'static EntityTable,
    joins: Vec<String>,
    aliases: HashMap<(Vec<JoinStep>, AndScope), String>,
    predicates: SqlFragment,
}

impl QueryContext {
    /// Creates a context rooted at `resource_type`'s table.
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            root: entity_table(resource_type),
            joins: Vec::new(),
            aliases: HashMap::new(),
            predicates: SqlFragment::default(),
        }
    }

    /// The root table.
    pub fn root(&self) -> &'static EntityTable {
        self.root
    }

    /// Returns the alias reaching the end of `path` within `scope`,
    /// planning any joins not yet present for that scope.
    pub fn join_path(&mut self, path: &[JoinStep], scope: AndScope) -> String {
        let mut parent = ROOT_ALIAS.to_string();
        for depth in 1..=path.len() {
            let key = (path[..depth].to_vec(), scope);
            if let Some(alias) = self.aliases.get(&key) {
                parent = alias.clone();
                continue;
            }

            let step = &path[depth - 1];
            let alias = format!("j{}", self.joins.len() + 1);
            let mut on = format!(
                "{alias}.{} = {parent}.{}",
                step.column, step.parent_column
            );
            if let Some(live) = step.live_column {
                on.push_str(&format!(" AND {alias}.{live} = 0"));
            }
            self.joins
                .push(format!("LEFT JOIN {} {alias} ON {on}", step.table));
            self.aliases.insert(key, alias.clone());
            parent = alias;
        }
        parent
    }

    /// Conjoins a predicate.
    pub fn push_predicate(&mut self, predicate: SqlFragment) {
        let current = std::mem::take(&mut self.predicates);
        self.predicates = current.and(predicate);
    }

    /// Number of planned joins.
    pub fn join_count(&self) -> usize {
        self.joins.len()
    }

    /// Renders the `FROM` clause body, root table and joins.
    pub fn from_clause(&self) -> String {
        let mut from = format!("{} {}", self.root.table, ROOT_ALIAS);
        for join in &self.joins {
            from.push(' ');
            from.push_str(join);
        }
        from
    }

    /// Renders the `WHERE` clause body, including the root's live filter.
    pub fn where_clause(&self) -> SqlFragment {
        let base = match self.root.live_column {
            Some(live) => SqlFragment::new(format!("{}.{} = 0", ROOT_ALIAS, live)),
            None => SqlFragment::new("1 = 1"),
        };
        base.and(self.predicates.clone())
    }
}
