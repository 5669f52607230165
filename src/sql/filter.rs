//! WHERE-clause construction from GraphQL filter inputs.
//!
//! Every operator keyword maps to exactly one SQL form and every value is
//! bound as a parameter. Operators are validated against the column's
//! declared type before any SQL runs.

use async_graphql::Value;

use crate::convert::{coerce_array, coerce_input};
use crate::error::{ApiError, ApiResult};
use crate::meta::model::{ColumnEntry, ScalarKind, TableEntry, TypeDescriptor};
use crate::sql::ident::comparison_expr;
use crate::sql::value::{ParamCollector, SqlValue};

/// Build the WHERE clause for `filter` (the value of a `TFilter` argument).
/// Returns `None` when the filter is absent or empty.
pub fn build_where(
    table: &TableEntry,
    filter: Option<&Value>,
    params: &mut ParamCollector,
) -> ApiResult<Option<String>> {
    let Some(filter) = filter else {
        return Ok(None);
    };
    let clause = build_filter_object(table, filter, params)?;
    Ok(clause.filter(|c| !c.is_empty()))
}

fn build_filter_object(
    table: &TableEntry,
    filter: &Value,
    params: &mut ParamCollector,
) -> ApiResult<Option<String>> {
    let Value::Object(entries) = filter else {
        return Err(ApiError::Validation(format!(
            "filter must be an object, got {filter}"
        )));
    };

    let mut conditions: Vec<String> = Vec::new();
    for (key, value) in entries {
        if key.as_str() == "or" {
            let Value::List(branches) = value else {
                return Err(ApiError::Validation("`or` expects a list of filters".into()));
            };
            let mut parts = Vec::with_capacity(branches.len());
            for branch in branches {
                if let Some(clause) = build_filter_object(table, branch, params)? {
                    parts.push(format!("({clause})"));
                }
            }
            if !parts.is_empty() {
                conditions.push(format!("({})", parts.join(" OR ")));
            }
            continue;
        }

        let column = table.column(key.as_str()).ok_or_else(|| {
            ApiError::Validation(format!("unknown filter field {} on {}", key, table.name))
        })?;
        let Value::Object(ops) = value else {
            return Err(ApiError::Validation(format!(
                "filter for {} must be an object of operators",
                key
            )));
        };
        for (op, operand) in ops {
            conditions.push(build_operator(column, op.as_str(), operand, params)?);
        }
    }

    if conditions.is_empty() {
        Ok(None)
    } else {
        Ok(Some(conditions.join(" AND ")))
    }
}

/// The expression a JSON-typed column is compared through. `json` has no
/// equality or containment operators in Postgres, so it is read as jsonb.
fn json_expr(column: &ColumnEntry) -> String {
    match column.type_descriptor.as_scalar() {
        Some(ScalarKind::Json) => format!("{}::jsonb", crate::sql::quote_ident(&column.name)),
        _ => crate::sql::quote_ident(&column.name),
    }
}

/// The value-side expression paired with [`comparison_expr`]. Enum columns
/// compare as text, so their operands stay text; intervals need a cast.
fn operand_expr(column: &ColumnEntry, placeholder: String) -> String {
    match column.type_descriptor.base() {
        TypeDescriptor::Scalar(ScalarKind::Interval) => format!("{placeholder}::interval"),
        _ => placeholder,
    }
}

fn build_operator(
    column: &ColumnEntry,
    op: &str,
    operand: &Value,
    params: &mut ParamCollector,
) -> ApiResult<String> {
    let ty = column.type_descriptor.base();
    let lhs = comparison_expr(column);
    let mismatch = |why: &str| {
        ApiError::Validation(format!(
            "operator {op} is not valid for column {}: {why}",
            column.name
        ))
    };

    match op {
        "eq" | "neq" | "gt" | "gte" | "lt" | "lte" => {
            let sql_op = match op {
                "eq" => "=",
                "neq" => "<>",
                "gt" => ">",
                "gte" => ">=",
                "lt" => "<",
                _ => "<=",
            };
            if ty.is_composite() || column.type_descriptor.is_array() {
                return Err(mismatch("composite and array columns are not comparable"));
            }
            if column.type_descriptor.is_json() {
                if op != "eq" && op != "neq" {
                    return Err(mismatch("JSON supports only eq/neq comparisons"));
                }
                let value = coerce_input(&column.type_descriptor, operand)?;
                let ph = params.push(value);
                return Ok(format!("{} {sql_op} {ph}::jsonb", json_expr(column)));
            }
            let value = coerce_input(&column.type_descriptor, operand)?;
            let ph = params.push(value);
            Ok(format!("{lhs} {sql_op} {}", operand_expr(column, ph)))
        }

        "contains" => {
            if column.type_descriptor.is_json() {
                let value = coerce_input(&column.type_descriptor, operand)?;
                let ph = params.push(value);
                return Ok(format!("{} @> {ph}::jsonb", json_expr(column)));
            }
            if let TypeDescriptor::Array(element) = ty {
                let value = coerce_input(element, operand)?;
                let ph = params.push(value);
                return Ok(format!(
                    "{ph} = ANY({})",
                    crate::sql::quote_ident(&column.name)
                ));
            }
            if ty.is_textual() {
                let text = text_operand(column, operand)?;
                let ph = params.push(text);
                return Ok(format!("{lhs} LIKE '%' || {ph} || '%'"));
            }
            Err(mismatch("contains applies to strings, arrays and JSON"))
        }

        "startsWith" | "endsWith" => {
            if !ty.is_textual() {
                return Err(mismatch("pattern operators need a text column"));
            }
            let text = text_operand(column, operand)?;
            let ph = params.push(text);
            Ok(if op == "startsWith" {
                format!("{lhs} LIKE {ph} || '%'")
            } else {
                format!("{lhs} LIKE '%' || {ph}")
            })
        }

        "like" | "ilike" => {
            if !ty.is_textual() {
                return Err(mismatch("pattern operators need a text column"));
            }
            let text = text_operand(column, operand)?;
            let ph = params.push(text);
            Ok(format!("{lhs} {} {ph}", if op == "like" { "LIKE" } else { "ILIKE" }))
        }

        "in" | "notIn" => {
            if column.type_descriptor.is_array() || ty.is_composite() || ty.is_json() {
                return Err(mismatch("membership needs a scalar column"));
            }
            let Value::List(items) = operand else {
                return Err(mismatch("expected a list"));
            };
            // NULL never matches either way under three-valued logic; drop
            // it from the bound list so notIn keeps its intuitive meaning.
            let items: Vec<&Value> =
                items.iter().filter(|v| !matches!(v, Value::Null)).collect();
            if items.is_empty() {
                return Ok(if op == "in" { "FALSE".into() } else { "TRUE".into() });
            }
            let mut placeholders = Vec::with_capacity(items.len());
            for item in items {
                let value = coerce_input(&column.type_descriptor, item)?;
                placeholders.push(operand_expr(column, params.push(value)));
            }
            let list = placeholders.join(", ");
            Ok(if op == "in" {
                format!("{lhs} IN ({list})")
            } else {
                format!("{lhs} NOT IN ({list})")
            })
        }

        "isNull" | "isNotNull" => {
            let Value::Boolean(flag) = operand else {
                return Err(mismatch("expected a boolean"));
            };
            let wants_null = (op == "isNull") == *flag;
            let quoted = crate::sql::quote_ident(&column.name);
            Ok(if wants_null {
                format!("{quoted} IS NULL")
            } else {
                format!("{quoted} IS NOT NULL")
            })
        }

        "hasKey" => {
            if !column.type_descriptor.is_json() {
                return Err(mismatch("hasKey needs a JSON column"));
            }
            let Value::String(key) = operand else {
                return Err(mismatch("expected a string key"));
            };
            let ph = params.push(SqlValue::Text(key.clone()));
            Ok(format!("{} ? {ph}", json_expr(column)))
        }

        "path" => {
            if !column.type_descriptor.is_json() {
                return Err(mismatch("path needs a JSON column"));
            }
            let Value::List(segments) = operand else {
                return Err(mismatch("expected a list of path segments"));
            };
            let mut path = Vec::with_capacity(segments.len());
            for segment in segments {
                match segment {
                    Value::String(s) => path.push(s.clone()),
                    Value::Number(n) => path.push(n.to_string()),
                    other => return Err(mismatch(&format!("bad path segment {other}"))),
                }
            }
            let ph = params.push(SqlValue::TextArray(path));
            Ok(format!("{} #> {ph}::text[] IS NOT NULL", json_expr(column)))
        }

        "hasAny" => {
            let TypeDescriptor::Array(element) = ty else {
                return Err(mismatch("hasAny needs an array column"));
            };
            let value = coerce_array(element, operand)?;
            let quoted = crate::sql::quote_ident(&column.name);
            // Elements without a native binding travel as text[]; overlap
            // then compares the column through a text[] cast too.
            let textual = matches!(value, SqlValue::TextArray(_))
                && !matches!(
                    element.base(),
                    TypeDescriptor::Scalar(
                        ScalarKind::Text | ScalarKind::Varchar(_) | ScalarKind::Char(_)
                    )
                );
            let ph = params.push(value);
            Ok(if textual {
                format!("{quoted}::text[] && {ph}::text[]")
            } else {
                format!("{quoted} && {ph}")
            })
        }

        "length" => {
            if !column.type_descriptor.is_array() {
                return Err(mismatch("length needs an array column"));
            }
            let Value::Number(n) = operand else {
                return Err(mismatch("expected an integer"));
            };
            let len = n.as_i64().ok_or_else(|| mismatch("expected an integer"))?;
            let ph = params.push(SqlValue::Int(len));
            Ok(format!(
                "cardinality({}) = {ph}",
                crate::sql::quote_ident(&column.name)
            ))
        }

        unknown => Err(ApiError::Validation(format!(
            "unknown filter operator {unknown} on {}",
            column.name
        ))),
    }
}

fn text_operand(column: &ColumnEntry, operand: &Value) -> ApiResult<SqlValue> {
    match coerce_input(&column.type_descriptor, operand)? {
        SqlValue::Text(s) => Ok(SqlValue::Text(s)),
        _ => Err(ApiError::Validation(format!(
            "operator expects a string for column {}",
            column.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::model::{ColumnEntry, ForeignKey};
    use async_graphql::Name;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    fn table() -> TableEntry {
        let col = |name: &str, ty: TypeDescriptor| ColumnEntry {
            name: name.into(),
            type_descriptor: ty,
            is_primary_key: false,
            is_nullable: true,
        };
        TableEntry {
            name: "customer".into(),
            is_view: false,
            columns: vec![
                col("customer_id", TypeDescriptor::Scalar(ScalarKind::Int32)),
                col("first_name", TypeDescriptor::Scalar(ScalarKind::Varchar(Some(45)))),
                col("meta", TypeDescriptor::Scalar(ScalarKind::Jsonb)),
                col(
                    "tags",
                    TypeDescriptor::Array(Box::new(TypeDescriptor::Scalar(ScalarKind::Text))),
                ),
            ],
            foreign_keys: Vec::<ForeignKey>::new(),
        }
    }

    fn obj(pairs: Vec<(&str, Value)>) -> Value {
        let mut map = IndexMap::new();
        for (k, v) in pairs {
            map.insert(Name::new(k), v);
        }
        Value::Object(map)
    }

    #[test]
    fn eq_binds_a_parameter() {
        let table = table();
        let mut params = ParamCollector::new();
        let filter = obj(vec![(
            "first_name",
            obj(vec![("eq", Value::String("'; DROP TABLE customer; --".into()))]),
        )]);
        let clause = build_where(&table, Some(&filter), &mut params).unwrap().unwrap();
        assert_eq!(clause, "\"first_name\" = $1");
        // The hostile string never appears in the SQL text.
        assert!(!clause.contains("DROP"));
        assert_eq!(
            params.values(),
            &[SqlValue::Text("'; DROP TABLE customer; --".into())]
        );
    }

    #[test]
    fn in_and_not_in_enumerate_placeholders() {
        let table = table();
        let mut params = ParamCollector::new();
        let filter = obj(vec![(
            "customer_id",
            obj(vec![(
                "in",
                Value::List(vec![Value::from(1), Value::from(2), Value::from(3)]),
            )]),
        )]);
        let clause = build_where(&table, Some(&filter), &mut params).unwrap().unwrap();
        assert_eq!(clause, "\"customer_id\" IN ($1, $2, $3)");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn not_in_drops_nulls() {
        let table = table();
        let mut params = ParamCollector::new();
        let filter = obj(vec![(
            "customer_id",
            obj(vec![(
                "notIn",
                Value::List(vec![Value::from(1), Value::Null, Value::from(2)]),
            )]),
        )]);
        let clause = build_where(&table, Some(&filter), &mut params).unwrap().unwrap();
        assert_eq!(clause, "\"customer_id\" NOT IN ($1, $2)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn empty_in_list_is_false() {
        let table = table();
        let mut params = ParamCollector::new();
        let filter = obj(vec![("customer_id", obj(vec![("in", Value::List(vec![]))]))]);
        let clause = build_where(&table, Some(&filter), &mut params).unwrap().unwrap();
        assert_eq!(clause, "FALSE");
        assert!(params.is_empty());
    }

    #[test]
    fn string_operators_anchor_patterns() {
        let table = table();
        let mut params = ParamCollector::new();
        let filter = obj(vec![(
            "first_name",
            obj(vec![
                ("startsWith", Value::String("MARY".into())),
                ("endsWith", Value::String("N".into())),
                ("contains", Value::String("AR".into())),
            ]),
        )]);
        let clause = build_where(&table, Some(&filter), &mut params).unwrap().unwrap();
        assert_eq!(
            clause,
            "\"first_name\" LIKE $1 || '%' AND \"first_name\" LIKE '%' || $2 \
             AND \"first_name\" LIKE '%' || $3 || '%'"
        );
    }

    #[test]
    fn is_null_uses_no_parameters() {
        let table = table();
        let mut params = ParamCollector::new();
        let filter = obj(vec![(
            "first_name",
            obj(vec![("isNotNull", Value::Boolean(true))]),
        )]);
        let clause = build_where(&table, Some(&filter), &mut params).unwrap().unwrap();
        assert_eq!(clause, "\"first_name\" IS NOT NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn or_branches_are_parenthesized() {
        let table = table();
        let mut params = ParamCollector::new();
        let filter = obj(vec![(
            "or",
            Value::List(vec![
                obj(vec![("customer_id", obj(vec![("eq", Value::from(1))]))]),
                obj(vec![("customer_id", obj(vec![("eq", Value::from(2))]))]),
            ]),
        )]);
        let clause = build_where(&table, Some(&filter), &mut params).unwrap().unwrap();
        assert_eq!(
            clause,
            "((\"customer_id\" = $1) OR (\"customer_id\" = $2))"
        );
    }

    #[test]
    fn json_operators() {
        let table = table();
        let mut params = ParamCollector::new();
        let filter = obj(vec![(
            "meta",
            obj(vec![
                ("hasKey", Value::String("color".into())),
                ("contains", Value::String("{\"a\":1}".into())),
            ]),
        )]);
        let clause = build_where(&table, Some(&filter), &mut params).unwrap().unwrap();
        assert_eq!(clause, "\"meta\" ? $1 AND \"meta\" @> $2::jsonb");
    }

    #[test]
    fn array_operators() {
        let table = table();
        let mut params = ParamCollector::new();
        let filter = obj(vec![(
            "tags",
            obj(vec![
                ("contains", Value::String("vip".into())),
                ("length", Value::from(2)),
            ]),
        )]);
        let clause = build_where(&table, Some(&filter), &mut params).unwrap().unwrap();
        assert_eq!(clause, "$1 = ANY(\"tags\") AND cardinality(\"tags\") = $2");
    }

    #[test]
    fn operator_type_mismatch_is_validation() {
        let table = table();
        let mut params = ParamCollector::new();
        let filter = obj(vec![(
            "customer_id",
            obj(vec![("startsWith", Value::String("1".into()))]),
        )]);
        let err = build_where(&table, Some(&filter), &mut params).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn unknown_column_and_operator_rejected() {
        let table = table();
        let mut params = ParamCollector::new();
        let unknown_col = obj(vec![("nope", obj(vec![("eq", Value::from(1))]))]);
        assert!(build_where(&table, Some(&unknown_col), &mut params).is_err());

        let unknown_op = obj(vec![("customer_id", obj(vec![("wat", Value::from(1))]))]);
        assert!(build_where(&table, Some(&unknown_op), &mut params).is_err());
    }
}
