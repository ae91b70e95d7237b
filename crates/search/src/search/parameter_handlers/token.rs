//! Token parameter SQL handler.

use std::collections::BTreeSet;

use crate::search::registry::{ColumnExpr, TokenRule};
use crate::types::{EntityId, TokenValue};

use super::super::query_builder::{SqlFragment, SqlParam, placeholders};

/// Handles token parameter SQL generation.
pub struct TokenHandler;

impl TokenHandler {
    /// Builds SQL comparing a plain coded column against a token.
    ///
    /// Returns `None` if the code is not valid for the rule (e.g. an unknown
    /// gender).
    pub fn build_sql(
        alias: &str,
        expr: &ColumnExpr,
        rule: TokenRule,
        token: &TokenValue,
    ) -> Option<SqlFragment> {
        let column = expr.render(alias);
        let code = Self::normalise(rule, &token.code)?;

        let fragment = match rule {
            TokenRule::IgnoreCase => SqlFragment::with_params(
                format!("{} = ? COLLATE NOCASE", column),
                vec![SqlParam::string(code)],
            ),
            TokenRule::Identifier { type_column } => {
                let value = SqlFragment::with_params(
                    format!("{} = ?", column),
                    vec![SqlParam::string(code)],
                );
                match token.system() {
                    Some(system) => value.and(SqlFragment::with_params(
                        format!("{}.{} = ?", alias, type_column),
                        vec![SqlParam::string(system)],
                    )),
                    None => value,
                }
            }
            TokenRule::Exact | TokenRule::Gender | TokenRule::UpperSnake => {
                SqlFragment::with_params(format!("{} = ?", column), vec![SqlParam::string(code)])
            }
        };
        Some(fragment)
    }

    /// Builds SQL restricting a concept column to resolved concept ids.
    ///
    /// An empty set yields the unsatisfiable predicate.
    pub fn build_concept_sql(column: &str, concepts: &BTreeSet<EntityId>) -> SqlFragment {
        if concepts.is_empty() {
            return SqlFragment::unsatisfiable();
        }
        SqlFragment::with_params(
            format!("{} IN ({})", column, placeholders(concepts.len())),
            concepts.iter().map(|id| SqlParam::integer(*id)).collect(),
        )
    }

    /// Maps a caller code to its stored form.
    pub fn normalise(rule: TokenRule, code: &str) -> Option<String> {
        match rule {
            TokenRule::Gender => {
                let stored = match code.to_ascii_lowercase().as_str() {
                    "male" | "m" => "M",
                    "female" | "f" => "F",
                    "other" | "o" => "O",
                    "unknown" | "u" => "U",
                    _ => return None,
                };
                Some(stored.to_string())
            }
            TokenRule::UpperSnake => Some(code.to_ascii_uppercase().replace('-', "_")),
            TokenRule::Exact | TokenRule::IgnoreCase | TokenRule::Identifier { .. } => {
                Some(code.to_string())
            }
        }
    }
}
