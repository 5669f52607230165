//! Identifier quoting and column-list building.
//!
//! Every identifier that reaches SQL text goes through [`quote_ident`];
//! values never do, they are always bound as parameters.

use crate::meta::model::{ColumnEntry, TableEntry, TypeDescriptor};

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Qualified `"schema"."table"` form.
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// The select-list expression for one column.
///
/// Types sqlx cannot decode natively are cast to text; arrays and
/// composites go through `to_jsonb` so element nulls and nesting survive.
pub fn select_expr(column: &ColumnEntry) -> String {
    let quoted = quote_ident(&column.name);
    match column.type_descriptor.base() {
        TypeDescriptor::Array(_) | TypeDescriptor::Composite { .. } => {
            format!("to_jsonb({quoted}) AS {quoted}")
        }
        TypeDescriptor::Enum { .. } | TypeDescriptor::Unknown(_) => {
            format!("{quoted}::text AS {quoted}")
        }
        TypeDescriptor::Scalar(kind) if kind.needs_text_cast() => {
            format!("{quoted}::text AS {quoted}")
        }
        _ => quoted,
    }
}

/// The expression a column is compared through in WHERE / ORDER BY
/// predicates. Enums and unknown types compare as text.
pub fn comparison_expr(column: &ColumnEntry) -> String {
    let quoted = quote_ident(&column.name);
    match column.type_descriptor.base() {
        TypeDescriptor::Enum { .. } | TypeDescriptor::Unknown(_) => format!("{quoted}::text"),
        TypeDescriptor::Scalar(kind) if kind.needs_text_cast() => format!("{quoted}::text"),
        _ => quoted,
    }
}

/// Ordered, quoted select list. An empty requested set selects every column
/// known for the table.
pub fn build_column_list(table: &TableEntry, requested: &[&str]) -> String {
    let exprs: Vec<String> = if requested.is_empty() {
        table.columns.iter().map(select_expr).collect()
    } else {
        table
            .columns
            .iter()
            .filter(|c| requested.contains(&c.name.as_str()))
            .map(select_expr)
            .collect()
    };
    if exprs.is_empty() {
        // Requested names matched nothing known; fall back to the full set.
        table.columns.iter().map(select_expr).collect::<Vec<_>>().join(", ")
    } else {
        exprs.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::model::{ColumnEntry, ScalarKind, TypeDescriptor};

    fn col(name: &str, ty: TypeDescriptor) -> ColumnEntry {
        ColumnEntry {
            name: name.into(),
            type_descriptor: ty,
            is_primary_key: false,
            is_nullable: true,
        }
    }

    #[test]
    fn quoting_doubles_embedded_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified("public", "customer"), "\"public\".\"customer\"");
    }

    #[test]
    fn select_expr_casts_by_type() {
        assert_eq!(
            select_expr(&col("a", TypeDescriptor::Scalar(ScalarKind::Int32))),
            "\"a\""
        );
        assert_eq!(
            select_expr(&col("a", TypeDescriptor::Scalar(ScalarKind::Inet))),
            "\"a\"::text AS \"a\""
        );
        assert_eq!(
            select_expr(&col(
                "a",
                TypeDescriptor::Array(Box::new(TypeDescriptor::Scalar(ScalarKind::Int32)))
            )),
            "to_jsonb(\"a\") AS \"a\""
        );
        assert_eq!(
            select_expr(&col(
                "mood",
                TypeDescriptor::Enum { name: "mood".into(), values: vec!["ok".into()] }
            )),
            "\"mood\"::text AS \"mood\""
        );
    }

    #[test]
    fn empty_request_selects_all() {
        let table = TableEntry {
            name: "t".into(),
            is_view: false,
            columns: vec![
                col("a", TypeDescriptor::Scalar(ScalarKind::Int32)),
                col("b", TypeDescriptor::Scalar(ScalarKind::Text)),
            ],
            foreign_keys: vec![],
        };
        assert_eq!(build_column_list(&table, &[]), "\"a\", \"b\"");
        assert_eq!(build_column_list(&table, &["b"]), "\"b\"");
        // Unknown names fall back to the full set.
        assert_eq!(build_column_list(&table, &["zzz"]), "\"a\", \"b\"");
    }
}
