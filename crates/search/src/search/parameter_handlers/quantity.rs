//! Quantity parameter SQL handler.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::types::{QuantityComparator, QuantityValue};

use super::super::query_builder::{SqlFragment, SqlParam};

/// Handles quantity parameter SQL generation.
pub struct QuantityHandler;

impl QuantityHandler {
    /// Builds SQL comparing `column` against a quantity.
    ///
    /// `eq` matches within half a unit of the value's last significant
    /// decimal place (`5.4` matches `[5.35, 5.45)`), `ne` is the complement of
    /// that window and `ap` widens it to `tolerance` of the value. A unit on
    /// the value is compared against `unit_column` when the property has one.
    ///
    /// Returns `None` if the value is not a decimal.
    pub fn build_sql(
        column: &str,
        unit_column: Option<&str>,
        value: &QuantityValue,
        tolerance: Decimal,
    ) -> Option<SqlFragment> {
        let number = value.decimal()?;
        let numeric = Self::build_numeric_condition(column, number, value.comparator, tolerance)?;

        match (unit_column, value.unit.as_deref()) {
            (Some(unit_column), Some(unit)) => Some(numeric.and(SqlFragment::with_params(
                format!("{} = ? COLLATE NOCASE", unit_column),
                vec![SqlParam::string(unit)],
            ))),
            _ => Some(numeric),
        }
    }

    fn build_numeric_condition(
        column: &str,
        value: Decimal,
        comparator: QuantityComparator,
        tolerance: Decimal,
    ) -> Option<SqlFragment> {
        let single = |op: &str| -> Option<SqlFragment> {
            Some(SqlFragment::with_params(
                format!("{} {} ?", column, op),
                vec![SqlParam::float(value.to_f64()?)],
            ))
        };

        match comparator {
            QuantityComparator::Eq => {
                let (low, high) = Self::precision_window(value)?;
                Some(SqlFragment::with_params(
                    format!("{column} >= ? AND {column} < ?"),
                    vec![SqlParam::float(low), SqlParam::float(high)],
                ))
            }
            QuantityComparator::Ne => {
                let (low, high) = Self::precision_window(value)?;
                Some(SqlFragment::with_params(
                    format!("({column} < ? OR {column} >= ?)"),
                    vec![SqlParam::float(low), SqlParam::float(high)],
                ))
            }
            QuantityComparator::Lt => single("<"),
            QuantityComparator::Le => single("<="),
            QuantityComparator::Gt => single(">"),
            QuantityComparator::Ge => single(">="),
            QuantityComparator::Ap => {
                let margin = (value.abs() * tolerance).max(Decimal::new(1, 4));
                Some(SqlFragment::with_params(
                    format!("{column} BETWEEN ? AND ?"),
                    vec![
                        SqlParam::float((value - margin).to_f64()?),
                        SqlParam::float((value + margin).to_f64()?),
                    ],
                ))
            }
        }
    }

    /// `value ± 10^-scale / 2`.
    fn precision_window(value: Decimal) -> Option<(f64, f64)> {
        let half = Decimal::try_new(5, value.scale() + 1).ok()?;
        Some(((value - half).to_f64()?, (value + half).to_f64()?))
    }
}
