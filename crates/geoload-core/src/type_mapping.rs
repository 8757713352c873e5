//! Mapping from attribute value domains to PostgreSQL column types.

use std::fmt;

use chrono::NaiveDateTime;
use geoload_formats::AttributeValue;

/// The kind of values a column holds, inferred from its non-null values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDomain {
    Boolean,
    Integer,
    Float,
    DateTime,
    String,
    /// Values of incompatible kinds.
    Mixed,
    /// No non-null values at all.
    Empty,
}

impl ValueDomain {
    /// Infers the domain of a column. Nulls are ignored and integers mixed
    /// with floats widen to [`ValueDomain::Float`].
    pub fn infer<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a AttributeValue>,
    {
        values
            .into_iter()
            .filter_map(Self::of_value)
            .fold(ValueDomain::Empty, Self::merge)
    }

    fn of_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Null => None,
            AttributeValue::Bool(_) => Some(ValueDomain::Boolean),
            AttributeValue::Int(_) => Some(ValueDomain::Integer),
            AttributeValue::Float(_) => Some(ValueDomain::Float),
            AttributeValue::DateTime(_) => Some(ValueDomain::DateTime),
            AttributeValue::Text(_) => Some(ValueDomain::String),
        }
    }

    fn merge(self, other: Self) -> Self {
        use ValueDomain::{Empty, Float, Integer, Mixed};
        match (self, other) {
            (Empty, d) | (d, Empty) => d,
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => Mixed,
        }
    }
}

/// PostgreSQL column types the loader creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgType {
    Boolean,
    BigInt,
    DoublePrecision,
    Timestamp,
    Text,
}

impl PgType {
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            PgType::Boolean => "BOOLEAN",
            PgType::BigInt => "BIGINT",
            PgType::DoublePrecision => "DOUBLE PRECISION",
            PgType::Timestamp => "TIMESTAMP",
            PgType::Text => "TEXT",
        }
    }
}

impl fmt::Display for PgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Column type for a value domain. First match wins; everything that is not
/// boolean, integer, float or date/time is stored as text.
#[must_use]
pub fn pg_type(domain: ValueDomain) -> PgType {
    match domain {
        ValueDomain::Boolean => PgType::Boolean,
        ValueDomain::Integer => PgType::BigInt,
        ValueDomain::Float => PgType::DoublePrecision,
        ValueDomain::DateTime => PgType::Timestamp,
        ValueDomain::String | ValueDomain::Mixed | ValueDomain::Empty => PgType::Text,
    }
}

/// A bindable value. The variant always matches the column type so that
/// nulls are bound with the right parameter type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Bool(Option<bool>),
    BigInt(Option<i64>),
    Double(Option<f64>),
    Timestamp(Option<NaiveDateTime>),
    Text(Option<String>),
}

impl SqlValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        match self {
            SqlValue::Bool(v) => v.is_none(),
            SqlValue::BigInt(v) => v.is_none(),
            SqlValue::Double(v) => v.is_none(),
            SqlValue::Timestamp(v) => v.is_none(),
            SqlValue::Text(v) => v.is_none(),
        }
    }
}

/// Converts an attribute into the bindable value for a column of `pg_type`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn coerce(value: &AttributeValue, pg_type: PgType) -> SqlValue {
    match pg_type {
        PgType::Boolean => SqlValue::Bool(match value {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }),
        PgType::BigInt => SqlValue::BigInt(match value {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }),
        PgType::DoublePrecision => SqlValue::Double(match value {
            AttributeValue::Int(i) => Some(*i as f64),
            AttributeValue::Float(f) => Some(*f),
            _ => None,
        }),
        PgType::Timestamp => SqlValue::Timestamp(match value {
            AttributeValue::DateTime(dt) => Some(*dt),
            _ => None,
        }),
        PgType::Text => SqlValue::Text(match value {
            AttributeValue::Null => None,
            other => Some(other.to_string()),
        }),
    }
}
