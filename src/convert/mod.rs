//! Value conversion between PostgreSQL and GraphQL.
//!
//! Outbound: database rows become [`Record`]s of GraphQL values (arrays and
//! composites arrive as jsonb thanks to the select-list casts, enums as
//! text, intervals as native `PgInterval`). Inbound: GraphQL input values
//! coerce into [`SqlValue`]s keyed by the column's declared type.

use async_graphql::{Name, Value};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::PgRow;
use sqlx::{Column as _, Row as _};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::meta::model::{
    ColumnEntry, CompositeAttribute, ScalarKind, TableEntry, TypeDescriptor,
};
use crate::sql::quote_ident;
use crate::sql::value::SqlValue;

/// One converted database row, preserving column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub columns: IndexMap<String, Value>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.columns.insert(name.into(), value);
    }

    /// The record as a GraphQL object value.
    pub fn to_object_value(&self) -> Value {
        Value::Object(
            self.columns
                .iter()
                .map(|(k, v)| (Name::new(k), v.clone()))
                .collect(),
        )
    }
}

/// Convert a fetched row into a [`Record`] using the table's column types.
/// Columns present in the row but unknown to the model are skipped.
pub fn row_to_record(table: &TableEntry, row: &PgRow) -> ApiResult<Record> {
    let mut record = Record::default();
    for col in row.columns() {
        let name = col.name();
        let Some(entry) = table.column(name) else {
            continue;
        };
        let value = decode_column(entry, row)?;
        record.insert(name, value);
    }
    Ok(record)
}

fn decode_column(column: &ColumnEntry, row: &PgRow) -> ApiResult<Value> {
    let name = column.name.as_str();
    let internal = |e: sqlx::Error| ApiError::Internal(format!("decode {name}: {e}"));

    match column.type_descriptor.base() {
        TypeDescriptor::Scalar(kind) => match kind {
            ScalarKind::Int32 | ScalarKind::SmallInt => {
                let v: Option<i32> = row.try_get(name).map_err(internal)?;
                Ok(v.map(Value::from).unwrap_or(Value::Null))
            }
            ScalarKind::Int64 => {
                let v: Option<i64> = row.try_get(name).map_err(internal)?;
                Ok(v.map(Value::from).unwrap_or(Value::Null))
            }
            ScalarKind::Float32 => {
                let v: Option<f32> = row.try_get(name).map_err(internal)?;
                Ok(v.map(|f| float_value(f as f64)).unwrap_or(Value::Null))
            }
            ScalarKind::Float64 => {
                let v: Option<f64> = row.try_get(name).map_err(internal)?;
                Ok(v.map(float_value).unwrap_or(Value::Null))
            }
            ScalarKind::Numeric { .. } => {
                let v: Option<Decimal> = row.try_get(name).map_err(internal)?;
                Ok(v
                    .and_then(|d| d.to_f64())
                    .map(float_value)
                    .unwrap_or(Value::Null))
            }
            ScalarKind::Bool => {
                let v: Option<bool> = row.try_get(name).map_err(internal)?;
                Ok(v.map(Value::from).unwrap_or(Value::Null))
            }
            ScalarKind::Uuid => {
                let v: Option<Uuid> = row.try_get(name).map_err(internal)?;
                Ok(v.map(|u| Value::String(u.to_string())).unwrap_or(Value::Null))
            }
            ScalarKind::Date => {
                let v: Option<NaiveDate> = row.try_get(name).map_err(internal)?;
                Ok(v
                    .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                    .unwrap_or(Value::Null))
            }
            ScalarKind::Timestamp => {
                let v: Option<NaiveDateTime> = row.try_get(name).map_err(internal)?;
                Ok(v
                    .map(|t| Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
                    .unwrap_or(Value::Null))
            }
            ScalarKind::TimestampTz => {
                let v: Option<DateTime<Utc>> = row.try_get(name).map_err(internal)?;
                Ok(v.map(|t| Value::String(t.to_rfc3339())).unwrap_or(Value::Null))
            }
            ScalarKind::Time => {
                let v: Option<NaiveTime> = row.try_get(name).map_err(internal)?;
                Ok(v
                    .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string()))
                    .unwrap_or(Value::Null))
            }
            ScalarKind::Interval => {
                let v: Option<PgInterval> = row.try_get(name).map_err(internal)?;
                Ok(v
                    .map(|i| Value::String(interval_to_iso8601(&i)))
                    .unwrap_or(Value::Null))
            }
            ScalarKind::Json | ScalarKind::Jsonb => {
                let v: Option<serde_json::Value> = row.try_get(name).map_err(internal)?;
                match v {
                    Some(json) => json_to_gql(json),
                    None => Ok(Value::Null),
                }
            }
            ScalarKind::Bytea => {
                let v: Option<Vec<u8>> = row.try_get(name).map_err(internal)?;
                Ok(v
                    .map(|b| Value::String(b.iter().map(|x| format!("{x:02x}")).collect()))
                    .unwrap_or(Value::Null))
            }
            // Selected with a ::text cast.
            _ => {
                let v: Option<String> = row.try_get(name).map_err(internal)?;
                Ok(v.map(Value::String).unwrap_or(Value::Null))
            }
        },
        TypeDescriptor::Enum { values, .. } => {
            let v: Option<String> = row.try_get(name).map_err(internal)?;
            match v {
                Some(raw) => {
                    if !values.contains(&raw) {
                        return Err(ApiError::InvalidEnum(format!("{name}: {raw}")));
                    }
                    Ok(Value::Enum(Name::new(raw)))
                }
                None => Ok(Value::Null),
            }
        }
        // Arrays and composites arrive as jsonb via to_jsonb() in the
        // select list.
        TypeDescriptor::Array(element) => {
            let v: Option<serde_json::Value> = row.try_get(name).map_err(internal)?;
            match v {
                Some(json) => typed_json_to_gql(element, json),
                None => Ok(Value::Null),
            }
        }
        TypeDescriptor::Composite { fields, .. } => {
            let v: Option<serde_json::Value> = row.try_get(name).map_err(internal)?;
            match v {
                Some(json) => composite_json_to_gql(fields, json),
                None => Ok(Value::Null),
            }
        }
        TypeDescriptor::Unknown(_) | TypeDescriptor::Domain(_) => {
            let v: Option<String> = row.try_get(name).map_err(internal)?;
            Ok(v.map(Value::String).unwrap_or(Value::Null))
        }
    }
}

fn float_value(f: f64) -> Value {
    async_graphql::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Plain JSON → GraphQL value, shape preserved.
pub fn json_to_gql(json: serde_json::Value) -> ApiResult<Value> {
    Value::from_json(json).map_err(|e| ApiError::InvalidJson(e.to_string()))
}

/// JSON representation of a typed value (from `to_jsonb`) → GraphQL value,
/// honoring the element descriptor so enums stay enums and nested arrays
/// recurse. Nulls are preserved.
fn typed_json_to_gql(descriptor: &TypeDescriptor, json: serde_json::Value) -> ApiResult<Value> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    match descriptor.base() {
        TypeDescriptor::Array(element) => match json {
            serde_json::Value::Array(items) => {
                let converted: ApiResult<Vec<Value>> = items
                    .into_iter()
                    .map(|item| typed_json_to_gql(element, item))
                    .collect();
                Ok(Value::List(converted?))
            }
            other => Err(ApiError::InvalidJson(format!(
                "expected array representation, got {other}"
            ))),
        },
        TypeDescriptor::Enum { values, .. } => match json {
            serde_json::Value::String(s) => {
                if !values.contains(&s) {
                    return Err(ApiError::InvalidEnum(s));
                }
                Ok(Value::Enum(Name::new(s)))
            }
            other => Err(ApiError::InvalidEnum(other.to_string())),
        },
        TypeDescriptor::Composite { fields, .. } => composite_json_to_gql(fields, json),
        _ => json_to_gql(json),
    }
}

/// Composite record (as a jsonb object) → GraphQL object in attribute
/// order; attributes missing from the payload become null.
fn composite_json_to_gql(
    fields: &[CompositeAttribute],
    json: serde_json::Value,
) -> ApiResult<Value> {
    let serde_json::Value::Object(mut map) = json else {
        return Err(ApiError::InvalidJson(format!(
            "expected composite object, got {json}"
        )));
    };
    let mut out = IndexMap::new();
    for attr in fields {
        let value = match map.remove(&attr.name) {
            Some(v) => typed_json_to_gql(&attr.type_descriptor, v)?,
            None => Value::Null,
        };
        out.insert(Name::new(&attr.name), value);
    }
    Ok(Value::Object(out))
}

/// ISO-8601 duration from a Postgres interval, fractional seconds kept.
pub fn interval_to_iso8601(interval: &PgInterval) -> String {
    let years = interval.months / 12;
    let months = interval.months % 12;
    let days = interval.days;

    let total_micros = interval.microseconds;
    let negative_time = total_micros < 0;
    let abs = total_micros.unsigned_abs();
    let hours = abs / 3_600_000_000;
    let minutes = (abs % 3_600_000_000) / 60_000_000;
    let micros = abs % 60_000_000;
    let secs = micros / 1_000_000;
    let frac = micros % 1_000_000;

    let mut out = String::from("P");
    if years != 0 {
        out.push_str(&format!("{years}Y"));
    }
    if months != 0 {
        out.push_str(&format!("{months}M"));
    }
    if days != 0 {
        out.push_str(&format!("{days}D"));
    }
    if hours != 0 || minutes != 0 || micros != 0 || out == "P" {
        out.push('T');
        let sign = if negative_time { "-" } else { "" };
        if hours != 0 {
            out.push_str(&format!("{sign}{hours}H"));
        }
        if minutes != 0 {
            out.push_str(&format!("{sign}{minutes}M"));
        }
        if frac != 0 {
            let mut frac_str = format!("{frac:06}");
            while frac_str.ends_with('0') {
                frac_str.pop();
            }
            out.push_str(&format!("{sign}{secs}.{frac_str}S"));
        } else {
            out.push_str(&format!("{sign}{secs}S"));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Input coercion
// ---------------------------------------------------------------------------

/// Names usable in `::type` casts, per scalar kind.
pub fn pg_type_name(kind: &ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Int32 => "int4",
        ScalarKind::Int64 => "int8",
        ScalarKind::SmallInt => "int2",
        ScalarKind::Float32 => "float4",
        ScalarKind::Float64 => "float8",
        ScalarKind::Numeric { .. } => "numeric",
        ScalarKind::Bool => "bool",
        ScalarKind::Text => "text",
        ScalarKind::Varchar(_) => "varchar",
        ScalarKind::Char(_) => "bpchar",
        ScalarKind::Uuid => "uuid",
        ScalarKind::Date => "date",
        ScalarKind::Timestamp => "timestamp",
        ScalarKind::TimestampTz => "timestamptz",
        ScalarKind::Time => "time",
        ScalarKind::TimeTz => "timetz",
        ScalarKind::Interval => "interval",
        ScalarKind::Json => "json",
        ScalarKind::Jsonb => "jsonb",
        ScalarKind::Bytea => "bytea",
        ScalarKind::Inet => "inet",
        ScalarKind::Cidr => "cidr",
        ScalarKind::MacAddr => "macaddr",
        ScalarKind::Bit => "bit",
        ScalarKind::VarBit => "varbit",
        ScalarKind::Xml => "xml",
    }
}

/// The SQL expression for a bound input parameter, adding the cast (or
/// record-population wrapper) the column type requires. `placeholder` is a
/// `$n` produced by the parameter collector.
pub fn input_expr(descriptor: &TypeDescriptor, schema: &str, placeholder: &str) -> String {
    match descriptor.base() {
        TypeDescriptor::Scalar(kind) => match kind {
            ScalarKind::TimeTz
            | ScalarKind::Interval
            | ScalarKind::Inet
            | ScalarKind::Cidr
            | ScalarKind::MacAddr
            | ScalarKind::Bit
            | ScalarKind::VarBit
            | ScalarKind::Xml => {
                format!("{placeholder}::{}", pg_type_name(kind))
            }
            _ => placeholder.to_string(),
        },
        TypeDescriptor::Enum { name, .. } => {
            format!("{placeholder}::{}.{}", quote_ident(schema), quote_ident(name))
        }
        TypeDescriptor::Composite { name, .. } => format!(
            "jsonb_populate_record(NULL::{}.{}, {placeholder}::jsonb)",
            quote_ident(schema),
            quote_ident(name)
        ),
        TypeDescriptor::Array(element) => match element.base() {
            // Typed vectors bind natively.
            TypeDescriptor::Scalar(kind)
                if matches!(
                    kind,
                    ScalarKind::Int32
                        | ScalarKind::Int64
                        | ScalarKind::SmallInt
                        | ScalarKind::Float32
                        | ScalarKind::Float64
                        | ScalarKind::Bool
                        | ScalarKind::Uuid
                        | ScalarKind::Text
                        | ScalarKind::Varchar(_)
                        | ScalarKind::Char(_)
                ) =>
            {
                placeholder.to_string()
            }
            TypeDescriptor::Scalar(kind) => {
                format!("{placeholder}::{}[]", pg_type_name(kind))
            }
            TypeDescriptor::Enum { name, .. } => format!(
                "{placeholder}::{}.{}[]",
                quote_ident(schema),
                quote_ident(name)
            ),
            _ => placeholder.to_string(),
        },
        _ => placeholder.to_string(),
    }
}

/// Coerce a GraphQL input value into a bindable [`SqlValue`] for the given
/// column type. `Value::Null` maps to [`SqlValue::Null`].
pub fn coerce_input(descriptor: &TypeDescriptor, value: &Value) -> ApiResult<SqlValue> {
    if matches!(value, Value::Null) {
        return Ok(SqlValue::Null);
    }
    match descriptor.base() {
        TypeDescriptor::Scalar(kind) => coerce_scalar(kind, value),
        TypeDescriptor::Enum { name, values } => {
            let raw = enum_input_string(value)
                .ok_or_else(|| ApiError::InvalidEnum(format!("{name}: {value}")))?;
            if !values.contains(&raw) {
                return Err(ApiError::InvalidEnum(format!("{name}: {raw}")));
            }
            Ok(SqlValue::Text(raw))
        }
        TypeDescriptor::Composite { .. } => {
            let json = value
                .clone()
                .into_json()
                .map_err(|e| ApiError::InvalidJson(e.to_string()))?;
            Ok(SqlValue::Json(json))
        }
        TypeDescriptor::Array(element) => coerce_array(element, value),
        TypeDescriptor::Unknown(_) | TypeDescriptor::Domain(_) => match value {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            other => Ok(SqlValue::Text(other.to_string())),
        },
    }
}

fn enum_input_string(value: &Value) -> Option<String> {
    match value {
        Value::Enum(name) => Some(name.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn coerce_scalar(kind: &ScalarKind, value: &Value) -> ApiResult<SqlValue> {
    let mismatch = || ApiError::Validation(format!("value {value} does not match column type"));
    match kind {
        ScalarKind::Int32 | ScalarKind::Int64 | ScalarKind::SmallInt => match value {
            Value::Number(n) => n.as_i64().map(SqlValue::Int).ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        ScalarKind::Float32 | ScalarKind::Float64 => match value {
            Value::Number(n) => n.as_f64().map(SqlValue::Float).ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        ScalarKind::Numeric { .. } => match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(SqlValue::Decimal(Decimal::from(i)))
                } else {
                    let f = n.as_f64().ok_or_else(mismatch)?;
                    Decimal::try_from(f).map(SqlValue::Decimal).map_err(|_| mismatch())
                }
            }
            Value::String(s) => s.parse::<Decimal>().map(SqlValue::Decimal).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ScalarKind::Bool => match value {
            Value::Boolean(b) => Ok(SqlValue::Bool(*b)),
            _ => Err(mismatch()),
        },
        ScalarKind::Text | ScalarKind::Varchar(_) | ScalarKind::Char(_) | ScalarKind::Xml => {
            match value {
                Value::String(s) => Ok(SqlValue::Text(s.clone())),
                _ => Err(mismatch()),
            }
        }
        ScalarKind::Uuid => match value {
            Value::String(s) => s
                .parse::<Uuid>()
                .map(SqlValue::Uuid)
                .map_err(|_| ApiError::InvalidUuid(s.clone())),
            _ => Err(mismatch()),
        },
        ScalarKind::Date => match value {
            Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(SqlValue::Date)
                .map_err(|_| ApiError::InvalidTimestamp(s.clone())),
            _ => Err(mismatch()),
        },
        ScalarKind::Timestamp => match value {
            Value::String(s) => parse_naive_datetime(s)
                .map(SqlValue::Timestamp)
                .ok_or_else(|| ApiError::InvalidTimestamp(s.clone())),
            _ => Err(mismatch()),
        },
        ScalarKind::TimestampTz => match value {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| SqlValue::TimestampTz(t.with_timezone(&Utc)))
                .ok()
                .or_else(|| {
                    parse_naive_datetime(s).map(|t| SqlValue::TimestampTz(t.and_utc()))
                })
                .ok_or_else(|| ApiError::InvalidTimestamp(s.clone())),
            _ => Err(mismatch()),
        },
        ScalarKind::Time => match value {
            Value::String(s) => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                .map(SqlValue::Time)
                .map_err(|_| ApiError::InvalidTimestamp(s.clone())),
            _ => Err(mismatch()),
        },
        ScalarKind::TimeTz | ScalarKind::Interval => match value {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            _ => Err(mismatch()),
        },
        ScalarKind::Json | ScalarKind::Jsonb => {
            // Strings that parse as JSON are preserved as parsed.
            let json = match value {
                Value::String(s) => serde_json::from_str(s)
                    .unwrap_or_else(|_| serde_json::Value::String(s.clone())),
                other => other
                    .clone()
                    .into_json()
                    .map_err(|e| ApiError::InvalidJson(e.to_string()))?,
            };
            Ok(SqlValue::Json(json))
        }
        ScalarKind::Bytea => match value {
            Value::String(s) => decode_bytea(s),
            _ => Err(mismatch()),
        },
        ScalarKind::Inet | ScalarKind::Cidr => match value {
            Value::String(s) => {
                let host = s.split('/').next().unwrap_or(s);
                host.parse::<std::net::IpAddr>()
                    .map(|_| SqlValue::Text(s.clone()))
                    .map_err(|_| ApiError::InvalidNetworkAddress(s.clone()))
            }
            _ => Err(mismatch()),
        },
        ScalarKind::MacAddr => match value {
            Value::String(s) => {
                let ok = s.len() == 17
                    && s.split(':').count() == 6
                    && s.split(':').all(|p| {
                        p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit())
                    });
                if ok {
                    Ok(SqlValue::Text(s.clone()))
                } else {
                    Err(ApiError::InvalidNetworkAddress(s.clone()))
                }
            }
            _ => Err(mismatch()),
        },
        ScalarKind::Bit | ScalarKind::VarBit => match value {
            Value::String(s) => {
                if s.chars().all(|c| c == '0' || c == '1') {
                    Ok(SqlValue::Text(s.clone()))
                } else {
                    Err(ApiError::Validation(format!("invalid bit string: {s}")))
                }
            }
            _ => Err(mismatch()),
        },
    }
}

/// Hex (even-length) or base64; lower-case hex is what we emit on output.
fn decode_bytea(s: &str) -> ApiResult<SqlValue> {
    let hex_candidate = s.strip_prefix("\\x").unwrap_or(s);
    if hex_candidate.len() % 2 == 0
        && !hex_candidate.is_empty()
        && hex_candidate.chars().all(|c| c.is_ascii_hexdigit())
    {
        let bytes = (0..hex_candidate.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex_candidate[i..i + 2], 16).unwrap())
            .collect();
        return Ok(SqlValue::Bytes(bytes));
    }
    BASE64
        .decode(s)
        .map(SqlValue::Bytes)
        .map_err(|_| ApiError::Validation(format!("bytea accepts hex or base64, got: {s}")))
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.naive_utc())
        })
}

pub fn coerce_array(element: &TypeDescriptor, value: &Value) -> ApiResult<SqlValue> {
    let Value::List(items) = value else {
        return Err(ApiError::Validation(format!("expected a list, got {value}")));
    };
    match element.base() {
        TypeDescriptor::Scalar(kind)
            if matches!(kind, ScalarKind::Int32 | ScalarKind::Int64 | ScalarKind::SmallInt) =>
        {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match coerce_scalar(kind, item)? {
                    SqlValue::Int(i) => out.push(i),
                    _ => unreachable!(),
                }
            }
            Ok(SqlValue::IntArray(out))
        }
        TypeDescriptor::Scalar(kind)
            if matches!(kind, ScalarKind::Float32 | ScalarKind::Float64) =>
        {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match coerce_scalar(kind, item)? {
                    SqlValue::Float(f) => out.push(f),
                    _ => unreachable!(),
                }
            }
            Ok(SqlValue::FloatArray(out))
        }
        TypeDescriptor::Scalar(ScalarKind::Bool) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match coerce_scalar(&ScalarKind::Bool, item)? {
                    SqlValue::Bool(b) => out.push(b),
                    _ => unreachable!(),
                }
            }
            Ok(SqlValue::BoolArray(out))
        }
        TypeDescriptor::Scalar(ScalarKind::Uuid) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match coerce_scalar(&ScalarKind::Uuid, item)? {
                    SqlValue::Uuid(u) => out.push(u),
                    _ => unreachable!(),
                }
            }
            Ok(SqlValue::UuidArray(out))
        }
        TypeDescriptor::Enum { name, values } => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let raw = enum_input_string(item)
                    .ok_or_else(|| ApiError::InvalidEnum(format!("{name}: {item}")))?;
                if !values.contains(&raw) {
                    return Err(ApiError::InvalidEnum(format!("{name}: {raw}")));
                }
                out.push(raw);
            }
            Ok(SqlValue::TextArray(out))
        }
        // Everything else travels as text[] and is cast by input_expr.
        _ => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    Value::Number(n) => out.push(n.to_string()),
                    Value::Boolean(b) => out.push(b.to_string()),
                    other => {
                        return Err(ApiError::Validation(format!(
                            "unsupported array element: {other}"
                        )));
                    }
                }
            }
            Ok(SqlValue::TextArray(out))
        }
    }
}

/// Coerce the string rendering used inside cursors back into a bindable
/// value, keyed by the column's declared type.
pub fn coerce_rendered(column: &ColumnEntry, raw: &str) -> ApiResult<SqlValue> {
    let as_value = match column.type_descriptor.base() {
        TypeDescriptor::Scalar(kind) if kind.is_numeric() => {
            if let Ok(i) = raw.parse::<i64>() {
                Value::Number(i.into())
            } else {
                let f = raw.parse::<f64>().map_err(|_| {
                    ApiError::InvalidCursor(format!("bad numeric value: {raw}"))
                })?;
                async_graphql::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| ApiError::InvalidCursor(format!("bad numeric value: {raw}")))?
            }
        }
        TypeDescriptor::Scalar(ScalarKind::Bool) => {
            Value::Boolean(raw.parse::<bool>().map_err(|_| {
                ApiError::InvalidCursor(format!("bad boolean value: {raw}"))
            })?)
        }
        _ => Value::String(raw.to_string()),
    };
    coerce_input(&column.type_descriptor, &as_value).map_err(|e| match e {
        ApiError::Validation(msg) => ApiError::InvalidCursor(msg),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scalar(kind: ScalarKind) -> TypeDescriptor {
        TypeDescriptor::Scalar(kind)
    }

    #[test]
    fn interval_rendering() {
        let i = PgInterval { months: 14, days: 3, microseconds: 3_661_500_000 };
        assert_eq!(interval_to_iso8601(&i), "P1Y2M3DT1H1M1.5S");

        let zero = PgInterval { months: 0, days: 0, microseconds: 0 };
        assert_eq!(interval_to_iso8601(&zero), "PT0S");
    }

    #[test]
    fn coerce_uuid_validates() {
        let ok = coerce_input(
            &scalar(ScalarKind::Uuid),
            &Value::String("6d1e4d3e-8f5a-4fbc-9c2e-54dfe7a1b802".into()),
        )
        .unwrap();
        assert!(matches!(ok, SqlValue::Uuid(_)));

        let err = coerce_input(&scalar(ScalarKind::Uuid), &Value::String("nope".into()))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_UUID");
    }

    #[test]
    fn coerce_json_parses_embedded_strings() {
        let parsed = coerce_input(
            &scalar(ScalarKind::Jsonb),
            &Value::String("{\"a\": 1}".into()),
        )
        .unwrap();
        assert_eq!(parsed, SqlValue::Json(serde_json::json!({"a": 1})));

        // A non-JSON string stays a JSON string.
        let passthrough =
            coerce_input(&scalar(ScalarKind::Jsonb), &Value::String("plain".into())).unwrap();
        assert_eq!(passthrough, SqlValue::Json(serde_json::json!("plain")));
    }

    #[test]
    fn coerce_bytea_accepts_hex_and_base64() {
        assert_eq!(
            coerce_input(&scalar(ScalarKind::Bytea), &Value::String("deadbeef".into())).unwrap(),
            SqlValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef])
        );
        let b64 = BASE64.encode([1u8, 2, 3]);
        assert_eq!(
            coerce_input(&scalar(ScalarKind::Bytea), &Value::String(b64)).unwrap(),
            SqlValue::Bytes(vec![1, 2, 3])
        );
    }

    #[test]
    fn coerce_enum_is_case_sensitive() {
        let ty = TypeDescriptor::Enum {
            name: "mood".into(),
            values: vec!["happy".into(), "sad".into()],
        };
        assert_eq!(
            coerce_input(&ty, &Value::String("happy".into())).unwrap(),
            SqlValue::Text("happy".into())
        );
        assert_eq!(
            coerce_input(&ty, &Value::String("HAPPY".into())).unwrap_err().code(),
            "INVALID_ENUM"
        );
    }

    #[test]
    fn coerce_timestamp_variants() {
        for raw in [
            "2024-05-01T12:30:00",
            "2024-05-01 12:30:00",
            "2024-05-01T12:30:00.250",
        ] {
            assert!(
                coerce_input(&scalar(ScalarKind::Timestamp), &Value::String(raw.into())).is_ok(),
                "{raw}"
            );
        }
        assert_eq!(
            coerce_input(&scalar(ScalarKind::Timestamp), &Value::String("not-a-time".into()))
                .unwrap_err()
                .code(),
            "INVALID_TIMESTAMP"
        );
    }

    #[test]
    fn coerce_network_addresses() {
        assert!(coerce_input(&scalar(ScalarKind::Inet), &Value::String("10.0.0.1".into())).is_ok());
        assert!(
            coerce_input(&scalar(ScalarKind::Cidr), &Value::String("10.0.0.0/24".into())).is_ok()
        );
        assert_eq!(
            coerce_input(&scalar(ScalarKind::Inet), &Value::String("nope".into()))
                .unwrap_err()
                .code(),
            "INVALID_NETWORK_ADDRESS"
        );
        assert!(
            coerce_input(&scalar(ScalarKind::MacAddr), &Value::String("08:00:2b:01:02:03".into()))
                .is_ok()
        );
    }

    #[test]
    fn typed_array_from_jsonb_preserves_nulls() {
        let element = scalar(ScalarKind::Int32);
        let json = serde_json::json!([1, null, 3]);
        let out = typed_json_to_gql(
            &TypeDescriptor::Array(Box::new(element)),
            json,
        )
        .unwrap();
        assert_eq!(
            out,
            Value::List(vec![Value::from(1), Value::Null, Value::from(3)])
        );
    }

    #[test]
    fn composite_fields_follow_attribute_order() {
        let fields = vec![
            CompositeAttribute {
                name: "street".into(),
                type_descriptor: scalar(ScalarKind::Text),
                order: 1,
                nullable: true,
            },
            CompositeAttribute {
                name: "zip".into(),
                type_descriptor: scalar(ScalarKind::Text),
                order: 2,
                nullable: true,
            },
        ];
        // Payload order reversed; missing values become null.
        let out = composite_json_to_gql(&fields, serde_json::json!({"zip": "1010"})).unwrap();
        let Value::Object(map) = out else { panic!() };
        let keys: Vec<_> = map.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["street", "zip"]);
        assert_eq!(map["street"], Value::Null);
    }

    #[test]
    fn input_expr_casts() {
        assert_eq!(input_expr(&scalar(ScalarKind::Int32), "public", "$1"), "$1");
        assert_eq!(
            input_expr(&scalar(ScalarKind::Interval), "public", "$2"),
            "$2::interval"
        );
        let e = TypeDescriptor::Enum { name: "mood".into(), values: vec![] };
        assert_eq!(input_expr(&e, "public", "$3"), "$3::\"public\".\"mood\"");
        let c = TypeDescriptor::Composite { name: "addr".into(), fields: vec![] };
        assert_eq!(
            input_expr(&c, "public", "$4"),
            "jsonb_populate_record(NULL::\"public\".\"addr\", $4::jsonb)"
        );
        let arr = TypeDescriptor::Array(Box::new(scalar(ScalarKind::Date)));
        assert_eq!(input_expr(&arr, "public", "$5"), "$5::date[]");
    }
}
