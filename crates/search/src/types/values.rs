//! Typed parameter values.
//!
//! Each value kind keeps its raw caller input and parses lazily, so that a
//! malformed value can be recognised by the handler translating it and
//! reduced to an unsatisfiable branch instead of failing the request.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ResourceType;

/// A coded value, optionally qualified by a coding system URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenValue {
    /// Coding system URI. `None` or empty means unqualified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// The code.
    pub code: String,
}

impl TokenValue {
    /// Creates an unqualified token.
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            system: None,
            code: code.into(),
        }
    }

    /// Creates a token qualified by a coding system.
    pub fn with_system(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            code: code.into(),
        }
    }

    /// Parses `system|code`, `|code` or `code`.
    pub fn parse(s: &str) -> Self {
        match s.split_once('|') {
            Some((system, code)) => Self {
                system: Some(system.to_string()),
                code: code.to_string(),
            },
            None => Self::code(s),
        }
    }

    /// Returns the coding system if the token is qualified.
    pub fn system(&self) -> Option<&str> {
        self.system.as_deref().filter(|s| !s.is_empty())
    }
}

/// A reference to another resource, optionally filtered through a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceValue {
    /// Expected type of the referenced resource, if the caller gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<ResourceType>,
    /// The referenced identity, or the chained property's value.
    pub id: String,
    /// A property on the referenced resource to filter on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

impl ReferenceValue {
    /// Creates a reference matching the target's identity.
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            resource_type: None,
            id: id.into(),
            chain: None,
        }
    }

    /// Creates a chained reference: the target's `chain` property must match `value`.
    pub fn chained(chain: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            resource_type: None,
            id: value.into(),
            chain: Some(chain.into()),
        }
    }

    /// Parses `Type/id` or a bare `id`. Unknown type prefixes stay part of the id.
    pub fn parse(s: &str) -> Self {
        if let Some((prefix, id)) = s.split_once('/') {
            if let Ok(resource_type) = prefix.parse::<ResourceType>() {
                return Self {
                    resource_type: Some(resource_type),
                    id: id.to_string(),
                    chain: None,
                };
            }
        }
        Self::id(s)
    }

    /// Returns the chain if one is set.
    pub fn chain(&self) -> Option<&str> {
        self.chain.as_deref().filter(|c| !c.is_empty())
    }
}

/// Comparators for quantity values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuantityComparator {
    /// Equal within the implicit precision of the value (default).
    #[default]
    Eq,
    /// Outside the `eq` window.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Approximately equal.
    Ap,
}

impl fmt::Display for QuantityComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuantityComparator::Eq => "eq",
            QuantityComparator::Ne => "ne",
            QuantityComparator::Lt => "lt",
            QuantityComparator::Le => "le",
            QuantityComparator::Gt => "gt",
            QuantityComparator::Ge => "ge",
            QuantityComparator::Ap => "ap",
        };
        f.write_str(s)
    }
}

impl FromStr for QuantityComparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eq" => Ok(QuantityComparator::Eq),
            "ne" => Ok(QuantityComparator::Ne),
            "lt" => Ok(QuantityComparator::Lt),
            "le" => Ok(QuantityComparator::Le),
            "gt" => Ok(QuantityComparator::Gt),
            "ge" => Ok(QuantityComparator::Ge),
            "ap" => Ok(QuantityComparator::Ap),
            _ => Err(format!("unknown quantity comparator: {}", s)),
        }
    }
}

/// A numeric value with an optional comparator and unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityValue {
    /// The comparator.
    #[serde(default)]
    pub comparator: QuantityComparator,
    /// The decimal as given by the caller, possibly in scientific notation.
    pub value: String,
    /// Unit the stored value must carry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl QuantityValue {
    /// Creates an `eq` quantity.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            comparator: QuantityComparator::Eq,
            value: value.into(),
            unit: None,
        }
    }

    /// Sets the comparator.
    pub fn with_comparator(mut self, comparator: QuantityComparator) -> Self {
        self.comparator = comparator;
        self
    }

    /// Sets the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Parses `[comparator]number[|unit]`, e.g. `ap5.4|mg`.
    pub fn parse(s: &str) -> Self {
        let (number, unit) = match s.split_once('|') {
            Some((n, u)) if !u.is_empty() => (n, Some(u.to_string())),
            Some((n, _)) => (n, None),
            None => (s, None),
        };
        let (comparator, number) = match number.get(..2).map(str::parse::<QuantityComparator>) {
            Some(Ok(c)) => (c, &number[2..]),
            _ => (QuantityComparator::Eq, number),
        };
        Self {
            comparator,
            value: number.to_string(),
            unit,
        }
    }

    /// Parses the decimal, accepting scientific notation (`1e2`).
    pub fn decimal(&self) -> Option<Decimal> {
        let raw = self.value.trim();
        if raw.contains(['e', 'E']) {
            Decimal::from_scientific(&raw.to_lowercase()).ok()
        } else {
            Decimal::from_str(raw).ok()
        }
    }
}

/// Granularity of a date bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DatePrecision {
    /// `YYYY`
    Year,
    /// `YYYY-MM`
    Month,
    /// `YYYY-MM-DD`
    Day,
    /// A full timestamp.
    Second,
}

/// A parsed date bound covering `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateBound {
    /// First instant covered.
    pub start: NaiveDateTime,
    /// First instant no longer covered.
    pub end: NaiveDateTime,
    /// Precision the bound was given in.
    pub precision: DatePrecision,
}

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})(?:-(\d{2})(?:-(\d{2})(?:[T ](\d{2}):(\d{2})(?::(\d{2})(?:\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?)?)?)?$",
    )
    .expect("date pattern is valid")
});

impl DateBound {
    /// Parses a date or timestamp into the range it covers.
    ///
    /// A year, month or day covers the whole period. A timestamp covers the
    /// single second it names; an explicit offset is normalised to UTC.
    pub fn parse(s: &str) -> Option<Self> {
        let caps = DATE_PATTERN.captures(s.trim())?;
        let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

        let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
        let Some(month) = number(2) else {
            let start = NaiveDate::from_ymd_opt(year, 1, 1)?.and_time(NaiveTime::MIN);
            let end = NaiveDate::from_ymd_opt(year + 1, 1, 1)?.and_time(NaiveTime::MIN);
            return Some(Self::span(start, end, DatePrecision::Year));
        };
        let Some(day) = number(3) else {
            let first = NaiveDate::from_ymd_opt(year, month, 1)?;
            let next = first.checked_add_months(Months::new(1))?;
            return Some(Self::span(
                first.and_time(NaiveTime::MIN),
                next.and_time(NaiveTime::MIN),
                DatePrecision::Month,
            ));
        };
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let Some(hour) = number(4) else {
            let start = date.and_time(NaiveTime::MIN);
            return Some(Self::span(start, start + Duration::days(1), DatePrecision::Day));
        };

        let time = NaiveTime::from_hms_opt(hour, number(5)?, number(6).unwrap_or(0))?;
        let mut instant = date.and_time(time);
        if let Some(offset) = caps.get(7).map(|m| m.as_str()).filter(|o| *o != "Z") {
            let stamp = format!("{}{}", instant.format("%Y-%m-%dT%H:%M:%S"), offset);
            instant = DateTime::parse_from_str(&stamp, "%Y-%m-%dT%H:%M:%S%#z")
                .ok()?
                .naive_utc();
        }
        Some(Self::span(
            instant,
            instant + Duration::seconds(1),
            DatePrecision::Second,
        ))
    }

    fn span(start: NaiveDateTime, end: NaiveDateTime, precision: DatePrecision) -> Self {
        Self {
            start,
            end,
            precision,
        }
    }
}

/// A date range with independently optional bounds.
///
/// A row matches when its timestamp is not before the start of `lower` and
/// is before the end of `upper`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DateRangeValue {
    /// Lower bound, inclusive of its whole precision period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<String>,
    /// Upper bound, inclusive of its whole precision period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<String>,
}

impl DateRangeValue {
    /// Matches anything within the period named by `date`.
    pub fn on(date: impl Into<String>) -> Self {
        let date = date.into();
        Self {
            lower: Some(date.clone()),
            upper: Some(date),
        }
    }

    /// Matches anything within or after `date`.
    pub fn from(date: impl Into<String>) -> Self {
        Self {
            lower: Some(date.into()),
            upper: None,
        }
    }

    /// Matches anything before the end of `date`.
    pub fn until(date: impl Into<String>) -> Self {
        Self {
            lower: None,
            upper: Some(date.into()),
        }
    }

    /// Matches anything from `lower` through the end of `upper`.
    pub fn between(lower: impl Into<String>, upper: impl Into<String>) -> Self {
        Self {
            lower: Some(lower.into()),
            upper: Some(upper.into()),
        }
    }
}

/// How a string value is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StringMatch {
    /// Case-insensitive prefix (default).
    #[default]
    Prefix,
    /// Case-sensitive equality.
    Exact,
    /// Case-insensitive substring.
    Contains,
}

/// A free-text value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringValue {
    /// The text.
    pub value: String,
    /// Comparison mode.
    #[serde(default)]
    pub mode: StringMatch,
}

impl StringValue {
    /// A case-insensitive prefix match.
    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            mode: StringMatch::Prefix,
        }
    }

    /// A case-sensitive exact match.
    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            mode: StringMatch::Exact,
        }
    }

    /// A case-insensitive substring match.
    pub fn contains(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            mode: StringMatch::Contains,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_token_parse() {
        let token = TokenValue::parse("http://loinc.org|5089-8");
        assert_eq!(token.system(), Some("http://loinc.org"));
        assert_eq!(token.code, "5089-8");

        let bare = TokenValue::parse("5089-8");
        assert_eq!(bare.system(), None);

        let empty_system = TokenValue::parse("|5089-8");
        assert_eq!(empty_system.system(), None);
    }

    #[test]
    fn test_reference_parse() {
        let typed = ReferenceValue::parse("Patient/abc");
        assert_eq!(typed.resource_type, Some(ResourceType::Patient));
        assert_eq!(typed.id, "abc");

        let bare = ReferenceValue::parse("abc");
        assert_eq!(bare.resource_type, None);
        assert_eq!(bare.chain(), None);

        let chained = ReferenceValue::chained("family", "Smith");
        assert_eq!(chained.chain(), Some("family"));
    }

    #[test]
    fn test_quantity_parse_with_comparator_and_unit() {
        let q = QuantityValue::parse("ap5.4|mg");
        assert_eq!(q.comparator, QuantityComparator::Ap);
        assert_eq!(q.value, "5.4");
        assert_eq!(q.unit.as_deref(), Some("mg"));

        let plain = QuantityValue::parse("70");
        assert_eq!(plain.comparator, QuantityComparator::Eq);
        assert_eq!(plain.unit, None);
    }

    #[test]
    fn test_quantity_scientific_notation() {
        let sci = QuantityValue::new("1e2").decimal().unwrap();
        let plain = QuantityValue::new("100").decimal().unwrap();
        assert_eq!(sci, plain);
        assert_eq!(QuantityValue::new("1.5E-1").decimal(), Decimal::from_str("0.15").ok());
        assert!(QuantityValue::new("abc").decimal().is_none());
    }

    #[test]
    fn test_date_bound_day_covers_whole_day() {
        let bound = DateBound::parse("2008-08-18").unwrap();
        assert_eq!(bound.precision, DatePrecision::Day);
        assert_eq!(bound.start, ts("2008-08-18 00:00:00"));
        assert_eq!(bound.end, ts("2008-08-19 00:00:00"));
    }

    #[test]
    fn test_date_bound_month_and_year() {
        let month = DateBound::parse("2024-12").unwrap();
        assert_eq!(month.end, ts("2025-01-01 00:00:00"));
        let year = DateBound::parse("2020").unwrap();
        assert_eq!(year.precision, DatePrecision::Year);
        assert_eq!(year.end, ts("2021-01-01 00:00:00"));
    }

    #[test]
    fn test_date_bound_timestamp() {
        let bound = DateBound::parse("2008-08-18T14:09:35").unwrap();
        assert_eq!(bound.precision, DatePrecision::Second);
        assert_eq!(bound.start, ts("2008-08-18 14:09:35"));
        assert_eq!(bound.end, ts("2008-08-18 14:09:36"));

        let offset = DateBound::parse("2008-08-18T14:09:35+02:00").unwrap();
        assert_eq!(offset.start, ts("2008-08-18 12:09:35"));

        let zulu = DateBound::parse("2008-08-18T14:09:35Z").unwrap();
        assert_eq!(zulu.start, ts("2008-08-18 14:09:35"));
    }

    #[test]
    fn test_date_bound_rejects_garbage() {
        assert!(DateBound::parse("18/08/2008").is_none());
        assert!(DateBound::parse("2008-13-01").is_none());
        assert!(DateBound::parse("").is_none());
    }
}
