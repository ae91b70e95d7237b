//! String parameter SQL handler.

use crate::search::registry::ColumnExpr;
use crate::types::{StringMatch, StringValue};

use super::super::query_builder::{SqlFragment, SqlParam};

/// Handles string parameter SQL generation.
pub struct StringHandler;

impl StringHandler {
    /// Builds SQL comparing `expr` on `alias` against a string value.
    ///
    /// Default behavior is case-insensitive prefix match. A composite
    /// expression such as a full name matches when any of its parts or the
    /// assembled string matches.
    pub fn build_sql(alias: &str, expr: &ColumnExpr, value: &StringValue) -> SqlFragment {
        match (expr, value.mode) {
            (ColumnExpr::FullName { given, family }, StringMatch::Prefix) => {
                let parts = [
                    ColumnExpr::Column(given),
                    ColumnExpr::Column(family),
                    *expr,
                ];
                parts
                    .iter()
                    .map(|part| Self::compare(&part.render(alias), value))
                    .fold(SqlFragment::default(), SqlFragment::or)
            }
            _ => Self::compare(&expr.render(alias), value),
        }
    }

    fn compare(column: &str, value: &StringValue) -> SqlFragment {
        match value.mode {
            StringMatch::Exact => SqlFragment::with_params(
                format!("{} = ?", column),
                vec![SqlParam::string(&value.value)],
            ),
            StringMatch::Contains => SqlFragment::with_params(
                format!("{} COLLATE NOCASE LIKE ? ESCAPE '\\'", column),
                vec![SqlParam::string(format!(
                    "%{}%",
                    escape_like(&value.value)
                ))],
            ),
            StringMatch::Prefix => SqlFragment::with_params(
                format!("{} COLLATE NOCASE LIKE ? ESCAPE '\\'", column),
                vec![SqlParam::string(format!("{}%", escape_like(&value.value)))],
            ),
        }
    }
}

/// Escapes LIKE wildcards so caller text matches literally.
fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
