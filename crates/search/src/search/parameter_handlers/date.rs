//! Date range parameter SQL handler.

use crate::types::{DateBound, DateRangeValue};

use super::super::query_builder::{SqlFragment, SqlParam};

const STORED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Handles date range SQL generation.
pub struct DateHandler;

impl DateHandler {
    /// Builds SQL for a date range against the column expression `column`.
    ///
    /// Each bound covers the whole period of its precision:
    /// - "2024" covers the entire year
    /// - "2024-01-15" covers [00:00:00, 24:00:00) of that day
    /// - "2024-01-15T10:30:00" covers only that second
    ///
    /// The stored value is normalised with `datetime()` so date-only columns
    /// compare against the same timestamp format.
    ///
    /// Returns `None` if a bound is malformed.
    pub fn build_sql(column: &str, value: &DateRangeValue) -> Option<SqlFragment> {
        let lower = match value.lower.as_deref() {
            Some(raw) => Some(DateBound::parse(raw)?),
            None => None,
        };
        let upper = match value.upper.as_deref() {
            Some(raw) => Some(DateBound::parse(raw)?),
            None => None,
        };
        let stored = format!("datetime({})", column);

        let fragment = match (lower, upper) {
            (Some(lower), Some(upper)) => SqlFragment::with_params(
                format!("{stored} >= ? AND {stored} < ?"),
                vec![
                    SqlParam::string(lower.start.format(STORED_FORMAT).to_string()),
                    SqlParam::string(upper.end.format(STORED_FORMAT).to_string()),
                ],
            ),
            (Some(lower), None) => SqlFragment::with_params(
                format!("{stored} >= ?"),
                vec![SqlParam::string(
                    lower.start.format(STORED_FORMAT).to_string(),
                )],
            ),
            (None, Some(upper)) => SqlFragment::with_params(
                format!("{stored} < ?"),
                vec![SqlParam::string(upper.end.format(STORED_FORMAT).to_string())],
            ),
            (None, None) => SqlFragment::new(format!("{} IS NOT NULL", column)),
        };
        Some(fragment)
    }
}
