//! OData `$filter` building
//!
//! Filters are immutable strings composed with explicit parentheses.
//! Values are rendered in the exact wire format Business Central expects.

use chrono::{DateTime, TimeZone, Timelike, Utc};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// Immutable OData `$filter` expression.
///
/// The empty filter (`ODataFilter::default()`) means "no filter" and is
/// dropped from the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ODataFilter(String);

impl ODataFilter {
    /// Wrap a hand-written filter expression.
    pub fn raw(expr: impl Into<String>) -> Self {
        Self(expr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// `(self) and (other)`
    pub fn and(&self, other: &ODataFilter) -> ODataFilter {
        ODataFilter(format!("({}) and ({})", self.0, other.0))
    }

    /// `(self) or (other)`
    pub fn or(&self, other: &ODataFilter) -> ODataFilter {
        ODataFilter(format!("({}) or ({})", self.0, other.0))
    }

    /// `not (self)`
    pub fn negate(&self) -> ODataFilter {
        ODataFilter(format!("not ({})", self.0))
    }
}

impl fmt::Display for ODataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ODataFilter {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ODataFilter {
    fn from(expr: &str) -> Self {
        Self::raw(expr)
    }
}

impl From<String> for ODataFilter {
    fn from(expr: String) -> Self {
        Self::raw(expr)
    }
}

impl BitAnd for ODataFilter {
    type Output = ODataFilter;

    fn bitand(self, rhs: ODataFilter) -> ODataFilter {
        self.and(&rhs)
    }
}

impl BitOr for ODataFilter {
    type Output = ODataFilter;

    fn bitor(self, rhs: ODataFilter) -> ODataFilter {
        self.or(&rhs)
    }
}

impl Not for ODataFilter {
    type Output = ODataFilter;

    fn not(self) -> ODataFilter {
        self.negate()
    }
}

/// A literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    String(String),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    /// Enum-like value, rendered quoted like a string.
    Symbol(String),
    /// Already formatted invariant number.
    Number(String),
}

impl FilterValue {
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Symbol(name.into())
    }

    pub fn to_odata_string(&self) -> String {
        match self {
            FilterValue::Null => "null".to_string(),
            FilterValue::String(s) | FilterValue::Symbol(s) => quote(s),
            FilterValue::Boolean(b) => b.to_string(),
            FilterValue::DateTime(dt) => format_round_trip(dt),
            FilterValue::Number(n) => n.clone(),
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

// Round-trip form with 100ns precision, e.g. 2024-01-15T10:30:00.0000000Z
fn format_round_trip(dt: &DateTime<Utc>) -> String {
    let ticks = dt.nanosecond() % 1_000_000_000 / 100;
    format!("{}.{:07}Z", dt.format("%Y-%m-%dT%H:%M:%S"), ticks)
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_odata_string())
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl From<&String> for FilterValue {
    fn from(value: &String) -> Self {
        FilterValue::String(value.clone())
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Boolean(value)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for FilterValue {
    fn from(value: DateTime<Tz>) -> Self {
        FilterValue::DateTime(value.with_timezone(&Utc))
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FilterValue::Null, Into::into)
    }
}

macro_rules! number_filter_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FilterValue {
                fn from(value: $t) -> Self {
                    FilterValue::Number(value.to_string())
                }
            }
        )*
    };
}

number_filter_value!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

// OData spells the non-finite doubles `NaN`, `INF` and `-INF`.
macro_rules! float_filter_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FilterValue {
                fn from(value: $t) -> Self {
                    let rendered = if value.is_nan() {
                        "NaN".to_string()
                    } else if value == <$t>::INFINITY {
                        "INF".to_string()
                    } else if value == <$t>::NEG_INFINITY {
                        "-INF".to_string()
                    } else {
                        value.to_string()
                    };
                    FilterValue::Number(rendered)
                }
            }
        )*
    };
}

float_filter_value!(f32, f64);

/// Factory for filter expressions.
pub struct Filter;

impl Filter {
    pub fn eq(field: &str, value: impl Into<FilterValue>) -> ODataFilter {
        compare(field, "eq", value.into())
    }

    pub fn ne(field: &str, value: impl Into<FilterValue>) -> ODataFilter {
        compare(field, "ne", value.into())
    }

    pub fn gt(field: &str, value: impl Into<FilterValue>) -> ODataFilter {
        compare(field, "gt", value.into())
    }

    pub fn ge(field: &str, value: impl Into<FilterValue>) -> ODataFilter {
        compare(field, "ge", value.into())
    }

    pub fn lt(field: &str, value: impl Into<FilterValue>) -> ODataFilter {
        compare(field, "lt", value.into())
    }

    pub fn le(field: &str, value: impl Into<FilterValue>) -> ODataFilter {
        compare(field, "le", value.into())
    }

    /// `contains(field, 'value')`
    pub fn contains(field: &str, value: &str) -> ODataFilter {
        function("contains", field, value)
    }

    pub fn starts_with(field: &str, value: &str) -> ODataFilter {
        function("startswith", field, value)
    }

    pub fn ends_with(field: &str, value: &str) -> ODataFilter {
        function("endswith", field, value)
    }

    /// `field in (v1,v2,...)`
    pub fn in_list<I, V>(field: &str, values: I) -> ODataFilter
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        let rendered: Vec<String> = values
            .into_iter()
            .map(|v| v.into().to_odata_string())
            .collect();
        ODataFilter(format!("{} in ({})", field, rendered.join(",")))
    }

    pub fn is_null(field: &str) -> ODataFilter {
        ODataFilter(format!("{} eq null", field))
    }

    pub fn is_not_null(field: &str) -> ODataFilter {
        ODataFilter(format!("{} ne null", field))
    }
}

fn compare(field: &str, op: &str, value: FilterValue) -> ODataFilter {
    ODataFilter(format!("{} {} {}", field, op, value.to_odata_string()))
}

fn function(name: &str, field: &str, value: &str) -> ODataFilter {
    ODataFilter(format!("{}({}, {})", name, field, quote(value)))
}
