//! Bindable SQL values and the parameter collector.
//!
//! Filters and mutations collect [`SqlValue`]s while building SQL text; the
//! executor binds them in order. Postgres placeholders are `$1..$n`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use uuid::Uuid;

/// A value destined for a bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Uuid(Uuid),
    Json(serde_json::Value),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Time(NaiveTime),
    Bytes(Vec<u8>),
    TextArray(Vec<String>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    BoolArray(Vec<bool>),
    UuidArray(Vec<Uuid>),
}

impl SqlValue {
    /// Bind this value onto a query, consuming and returning it.
    pub fn bind_to<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Decimal(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Uuid(v) => query.bind(*v),
            SqlValue::Json(v) => query.bind(v.clone()),
            SqlValue::Date(v) => query.bind(*v),
            SqlValue::Timestamp(v) => query.bind(*v),
            SqlValue::TimestampTz(v) => query.bind(*v),
            SqlValue::Time(v) => query.bind(*v),
            SqlValue::Bytes(v) => query.bind(v.clone()),
            SqlValue::TextArray(v) => query.bind(v.clone()),
            SqlValue::IntArray(v) => query.bind(v.clone()),
            SqlValue::FloatArray(v) => query.bind(v.clone()),
            SqlValue::BoolArray(v) => query.bind(v.clone()),
            SqlValue::UuidArray(v) => query.bind(v.clone()),
        }
    }

    /// Render for cursor encoding. The inverse lives in the input coercion
    /// path, keyed by the column's declared type.
    pub fn render(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Bool(v) => v.to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Float(v) => v.to_string(),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::Text(v) => v.clone(),
            SqlValue::Uuid(v) => v.to_string(),
            SqlValue::Json(v) => v.to_string(),
            SqlValue::Date(v) => v.format("%Y-%m-%d").to_string(),
            SqlValue::Timestamp(v) => v.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            SqlValue::TimestampTz(v) => v.to_rfc3339(),
            SqlValue::Time(v) => v.format("%H:%M:%S%.f").to_string(),
            SqlValue::Bytes(v) => v.iter().map(|b| format!("{b:02x}")).collect(),
            SqlValue::TextArray(v) => v.join(","),
            SqlValue::IntArray(v) => {
                v.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
            }
            SqlValue::FloatArray(v) => {
                v.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
            }
            SqlValue::BoolArray(v) => {
                v.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
            }
            SqlValue::UuidArray(v) => {
                v.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
            }
        }
    }
}

/// Collects parameters in order and hands out `$n` placeholders.
#[derive(Debug, Default)]
pub struct ParamCollector {
    values: Vec<SqlValue>,
}

impl ParamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value; returns its placeholder.
    pub fn push(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    /// Register a value with a type cast appended to the placeholder, e.g.
    /// `$3::interval`.
    pub fn push_cast(&mut self, value: SqlValue, cast: &str) -> String {
        self.values.push(value);
        format!("${}::{}", self.values.len(), cast)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Bind every collected value, in order, onto `query`.
    pub fn bind_all<'q>(
        &self,
        mut query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        for value in &self.values {
            query = value.bind_to(query);
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_sequential() {
        let mut params = ParamCollector::new();
        assert_eq!(params.push(SqlValue::Int(1)), "$1");
        assert_eq!(params.push(SqlValue::Text("x".into())), "$2");
        assert_eq!(params.push_cast(SqlValue::Text("1 day".into()), "interval"), "$3::interval");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn render_is_stable() {
        assert_eq!(SqlValue::Int(42).render(), "42");
        assert_eq!(SqlValue::Bool(true).render(), "true");
        assert_eq!(SqlValue::Bytes(vec![0xde, 0xad]).render(), "dead");
        let ts = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(SqlValue::Timestamp(ts).render(), "2024-05-01T12:30:00");
    }
}
