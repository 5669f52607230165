//! ORDER BY specs and cursor boundary predicates.

use async_graphql::Value;

use crate::convert::coerce_rendered;
use crate::error::{ApiError, ApiResult};
use crate::meta::model::TableEntry;
use crate::sql::ident::comparison_expr;
use crate::sql::value::ParamCollector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }
}

/// An ordered list of `(column, direction)` pairs, preserved in the order
/// the client supplied them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderSpec {
    pub fields: Vec<(String, Direction)>,
}

impl OrderSpec {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse a `TOrderByInput` argument value, validating column names.
    pub fn parse(table: &TableEntry, value: &Value) -> ApiResult<Self> {
        let Value::Object(entries) = value else {
            return Err(ApiError::Validation(format!(
                "orderBy must be an object, got {value}"
            )));
        };
        let mut fields = Vec::with_capacity(entries.len());
        for (key, dir) in entries {
            if table.column(key.as_str()).is_none() {
                return Err(ApiError::Validation(format!(
                    "unknown orderBy field {} on {}",
                    key, table.name
                )));
            }
            let direction = match dir {
                Value::Enum(name) => match name.as_str() {
                    "ASC" => Direction::Asc,
                    "DESC" => Direction::Desc,
                    other => {
                        return Err(ApiError::Validation(format!(
                            "bad order direction {other}"
                        )));
                    }
                },
                Value::String(s) if s == "ASC" => Direction::Asc,
                Value::String(s) if s == "DESC" => Direction::Desc,
                other => {
                    return Err(ApiError::Validation(format!("bad order direction {other}")));
                }
            };
            fields.push((key.to_string(), direction));
        }
        Ok(Self { fields })
    }

    /// The default order for cursor pagination: primary-key columns
    /// ascending, falling back to an `id` column if the table has no PK.
    pub fn default_for(table: &TableEntry) -> Option<Self> {
        let pk: Vec<(String, Direction)> = table
            .primary_key_columns()
            .iter()
            .map(|c| (c.name.clone(), Direction::Asc))
            .collect();
        if !pk.is_empty() {
            return Some(Self { fields: pk });
        }
        table
            .column("id")
            .map(|c| Self { fields: vec![(c.name.clone(), Direction::Asc)] })
    }

    pub fn reversed(&self) -> Self {
        Self {
            fields: self
                .fields
                .iter()
                .map(|(name, dir)| (name.clone(), dir.flipped()))
                .collect(),
        }
    }

    /// Render the ORDER BY list.
    pub fn to_sql(&self, table: &TableEntry) -> ApiResult<String> {
        let mut parts = Vec::with_capacity(self.fields.len());
        for (name, dir) in &self.fields {
            let column = table.column(name).ok_or_else(|| {
                ApiError::Validation(format!("unknown order column {name} on {}", table.name))
            })?;
            parts.push(format!("{} {}", comparison_expr(column), dir.as_sql()));
        }
        Ok(parts.join(", "))
    }
}

/// Build the boundary predicate for cursor pagination.
///
/// `decoded` holds the cursor's `(field, rendered value)` pairs; they must
/// match the ordering field-for-field. For `after` the predicate selects
/// rows strictly beyond the boundary row under that ordering; `before`
/// mirrors it. Mixed directions expand to the row-comparison form:
/// for each position i, equality on the prefix and the direction-aware
/// strict comparison at i, OR-joined.
pub fn build_cursor_predicate(
    table: &TableEntry,
    spec: &OrderSpec,
    decoded: &[(String, String)],
    after: bool,
    params: &mut ParamCollector,
) -> ApiResult<String> {
    if spec.fields.len() != decoded.len() {
        return Err(ApiError::InvalidCursor(format!(
            "cursor carries {} fields but the ordering has {}",
            decoded.len(),
            spec.fields.len()
        )));
    }
    for ((spec_name, _), (cursor_name, _)) in spec.fields.iter().zip(decoded) {
        if spec_name != cursor_name {
            return Err(ApiError::InvalidCursor(format!(
                "cursor field {cursor_name} does not match ordering field {spec_name}"
            )));
        }
    }

    // Bind each boundary value once and reuse the placeholder in every
    // disjunct that mentions it.
    let mut exprs = Vec::with_capacity(decoded.len());
    let mut placeholders = Vec::with_capacity(decoded.len());
    for (name, rendered) in decoded {
        let column = table.column(name).ok_or_else(|| {
            ApiError::InvalidCursor(format!("cursor references unknown column {name}"))
        })?;
        let value = coerce_rendered(column, rendered)?;
        exprs.push(comparison_expr(column));
        placeholders.push(params.push(value));
    }

    let mut disjuncts = Vec::with_capacity(spec.fields.len());
    for i in 0..spec.fields.len() {
        let mut conjuncts = Vec::with_capacity(i + 1);
        for j in 0..i {
            conjuncts.push(format!("{} = {}", exprs[j], placeholders[j]));
        }
        let (_, direction) = spec.fields[i];
        let forward = matches!(direction, Direction::Asc);
        let op = match (after, forward) {
            (true, true) | (false, false) => ">",
            _ => "<",
        };
        conjuncts.push(format!("{} {op} {}", exprs[i], placeholders[i]));
        disjuncts.push(format!("({})", conjuncts.join(" AND ")));
    }

    Ok(format!("({})", disjuncts.join(" OR ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::model::{ColumnEntry, ScalarKind, TypeDescriptor};
    use async_graphql::Name;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    fn table() -> TableEntry {
        let col = |name: &str, pk: bool| ColumnEntry {
            name: name.into(),
            type_descriptor: TypeDescriptor::Scalar(ScalarKind::Int32),
            is_primary_key: pk,
            is_nullable: false,
        };
        TableEntry {
            name: "customer".into(),
            is_view: false,
            columns: vec![col("customer_id", true), col("store_id", false)],
            foreign_keys: vec![],
        }
    }

    fn order_value(pairs: &[(&str, &str)]) -> Value {
        let mut map = IndexMap::new();
        for (k, v) in pairs {
            map.insert(Name::new(*k), Value::Enum(Name::new(*v)));
        }
        Value::Object(map)
    }

    #[test]
    fn parse_preserves_field_order() {
        let spec = OrderSpec::parse(
            &table(),
            &order_value(&[("store_id", "DESC"), ("customer_id", "ASC")]),
        )
        .unwrap();
        assert_eq!(
            spec.fields,
            vec![
                ("store_id".to_string(), Direction::Desc),
                ("customer_id".to_string(), Direction::Asc),
            ]
        );
        assert_eq!(
            spec.to_sql(&table()).unwrap(),
            "\"store_id\" DESC, \"customer_id\" ASC"
        );
    }

    #[test]
    fn default_order_uses_primary_key() {
        let spec = OrderSpec::default_for(&table()).unwrap();
        assert_eq!(spec.fields, vec![("customer_id".to_string(), Direction::Asc)]);
    }

    #[test]
    fn default_order_falls_back_to_id() {
        let mut t = table();
        for c in &mut t.columns {
            c.is_primary_key = false;
        }
        t.columns.push(ColumnEntry {
            name: "id".into(),
            type_descriptor: TypeDescriptor::Scalar(ScalarKind::Int64),
            is_primary_key: false,
            is_nullable: false,
        });
        let spec = OrderSpec::default_for(&t).unwrap();
        assert_eq!(spec.fields, vec![("id".to_string(), Direction::Asc)]);
    }

    #[test]
    fn no_orderable_columns_yields_none() {
        let mut t = table();
        for c in &mut t.columns {
            c.is_primary_key = false;
        }
        assert_eq!(OrderSpec::default_for(&t), None);
    }

    #[test]
    fn after_predicate_all_ascending() {
        let t = table();
        let spec = OrderSpec {
            fields: vec![
                ("store_id".to_string(), Direction::Asc),
                ("customer_id".to_string(), Direction::Asc),
            ],
        };
        let decoded = vec![
            ("store_id".to_string(), "2".to_string()),
            ("customer_id".to_string(), "10".to_string()),
        ];
        let mut params = ParamCollector::new();
        let pred = build_cursor_predicate(&t, &spec, &decoded, true, &mut params).unwrap();
        assert_eq!(
            pred,
            "((\"store_id\" > $1) OR (\"store_id\" = $1 AND \"customer_id\" > $2))"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn mixed_directions_flip_comparators() {
        let t = table();
        let spec = OrderSpec {
            fields: vec![
                ("store_id".to_string(), Direction::Desc),
                ("customer_id".to_string(), Direction::Asc),
            ],
        };
        let decoded = vec![
            ("store_id".to_string(), "2".to_string()),
            ("customer_id".to_string(), "10".to_string()),
        ];
        let mut params = ParamCollector::new();
        let after = build_cursor_predicate(&t, &spec, &decoded, true, &mut params).unwrap();
        assert_eq!(
            after,
            "((\"store_id\" < $1) OR (\"store_id\" = $1 AND \"customer_id\" > $2))"
        );

        let mut params = ParamCollector::new();
        let before = build_cursor_predicate(&t, &spec, &decoded, false, &mut params).unwrap();
        assert_eq!(
            before,
            "((\"store_id\" > $1) OR (\"store_id\" = $1 AND \"customer_id\" < $2))"
        );
    }

    #[test]
    fn cursor_field_mismatch_is_invalid_cursor() {
        let t = table();
        let spec = OrderSpec {
            fields: vec![("store_id".to_string(), Direction::Asc)],
        };
        let decoded = vec![("customer_id".to_string(), "1".to_string())];
        let mut params = ParamCollector::new();
        let err = build_cursor_predicate(&t, &spec, &decoded, true, &mut params).unwrap_err();
        assert_eq!(err.code(), "INVALID_CURSOR");
    }
}
