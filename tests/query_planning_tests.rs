//! Cross-module planning properties: injection safety across the operator
//! table, and cursor round-trips under order reversal.

use std::collections::BTreeMap;

use async_graphql::{Name, Value};
use indexmap::IndexMap;

use lattice::meta::model::{
    ColumnEntry, DatabaseModel, ForeignKey, ScalarKind, TableEntry, TypeDescriptor,
};
use lattice::sql::{
    Direction, OrderSpec, ParamCollector, build_cursor_predicate, build_where, decode_cursor,
    encode_cursor,
};

const HOSTILE: [&str; 4] = [
    "'; DROP TABLE customer; --",
    "\";",
    "--",
    "Ω≈ç√∫'; SELECT pg_sleep(10); --",
];

fn customer_table() -> TableEntry {
    let col = |name: &str, ty: TypeDescriptor, pk: bool| ColumnEntry {
        name: name.into(),
        type_descriptor: ty,
        is_primary_key: pk,
        is_nullable: !pk,
    };
    TableEntry {
        name: "customer".into(),
        is_view: false,
        columns: vec![
            col("customer_id", TypeDescriptor::Scalar(ScalarKind::Int32), true),
            col("first_name", TypeDescriptor::Scalar(ScalarKind::Varchar(Some(45))), false),
            col("meta", TypeDescriptor::Scalar(ScalarKind::Jsonb), false),
            col(
                "tags",
                TypeDescriptor::Array(Box::new(TypeDescriptor::Scalar(ScalarKind::Text))),
                false,
            ),
            col("created_at", TypeDescriptor::Scalar(ScalarKind::Timestamp), false),
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

/// Every string operator, fed hostile input: the value must never appear in
/// the SQL text, only in the bound parameter list.
#[test]
fn no_user_string_reaches_sql_text() {
    let table = customer_table();
    let string_ops = ["eq", "neq", "contains", "startsWith", "endsWith", "like", "ilike"];

    for hostile in HOSTILE {
        for op in string_ops {
            let mut params = ParamCollector::new();
            let filter = obj(vec![(
                "first_name",
                obj(vec![(op, Value::String(hostile.to_string()))]),
            )]);
            let clause = build_where(&table, Some(&filter), &mut params)
                .unwrap_or_else(|e| panic!("{op}: {e}"))
                .unwrap();
            assert!(
                !clause.contains(hostile) && !clause.contains("DROP"),
                "{op} leaked value into SQL: {clause}"
            );
            assert_eq!(params.len(), 1, "{op} must bind exactly one parameter");
        }

        // List membership with hostile entries.
        let mut params = ParamCollector::new();
        let filter = obj(vec![(
            "first_name",
            obj(vec![(
                "in",
                Value::List(vec![
                    Value::String(hostile.to_string()),
                    Value::String("MARY".into()),
                ]),
            )]),
        )]);
        let clause = build_where(&table, Some(&filter), &mut params).unwrap().unwrap();
        assert!(!clause.contains(hostile), "in leaked value: {clause}");
        assert_eq!(params.len(), 2);

        // JSON and array operators.
        let mut params = ParamCollector::new();
        let filter = obj(vec![
            ("meta", obj(vec![("hasKey", Value::String(hostile.to_string()))])),
            ("tags", obj(vec![("contains", Value::String(hostile.to_string()))])),
        ]);
        let clause = build_where(&table, Some(&filter), &mut params).unwrap().unwrap();
        assert!(!clause.contains(hostile), "json/array leaked value: {clause}");
    }
}

/// Decoding the cursor of a boundary row and building predicates from it
/// yields the same partition as the boundary row itself; reversing the
/// order mirrors the comparators.
#[test]
fn cursor_round_trip_partitions_consistently() {
    let table = customer_table();
    let order = OrderSpec {
        fields: vec![
            ("first_name".to_string(), Direction::Asc),
            ("customer_id".to_string(), Direction::Asc),
        ],
    };

    let boundary = vec![
        ("first_name".to_string(), "MARY".to_string()),
        ("customer_id".to_string(), "7".to_string()),
    ];
    let cursor = encode_cursor(&boundary);
    let decoded = decode_cursor(&cursor).unwrap();
    assert_eq!(decoded, boundary);

    let mut params = ParamCollector::new();
    let after = build_cursor_predicate(&table, &order, &decoded, true, &mut params).unwrap();
    assert_eq!(
        after,
        "((\"first_name\" > $1) OR (\"first_name\" = $1 AND \"customer_id\" > $2))"
    );

    // The before-predicate is the exact mirror.
    let mut params = ParamCollector::new();
    let before = build_cursor_predicate(&table, &order, &decoded, false, &mut params).unwrap();
    assert_eq!(
        before,
        "((\"first_name\" < $1) OR (\"first_name\" = $1 AND \"customer_id\" < $2))"
    );

    // Reversing the ordering turns the after-predicate into the old
    // before-predicate.
    let reversed = order.reversed();
    let mut params = ParamCollector::new();
    let after_reversed =
        build_cursor_predicate(&table, &reversed, &decoded, true, &mut params).unwrap();
    assert_eq!(after_reversed, before);
}

/// A cursor built for one ordering is rejected under another.
#[test]
fn cursor_from_other_ordering_is_rejected() {
    let table = customer_table();
    let order = OrderSpec { fields: vec![("customer_id".to_string(), Direction::Asc)] };
    let cursor = encode_cursor(&[("first_name".to_string(), "MARY".to_string())]);
    let decoded = decode_cursor(&cursor).unwrap();

    let mut params = ParamCollector::new();
    let err = build_cursor_predicate(&table, &order, &decoded, true, &mut params).unwrap_err();
    assert_eq!(err.code(), "INVALID_CURSOR");
}

/// The role filter never grows the surface as privileges shrink, across a
/// chain P1 ⊆ P2 ⊆ P3.
#[test]
fn filter_monotonicity_across_privilege_chain() {
    use lattice::meta::filter_model;
    use lattice::meta::model::RolePrivileges;

    let mut tables = BTreeMap::new();
    tables.insert("customer".to_string(), customer_table());
    tables.insert(
        "address".to_string(),
        TableEntry {
            name: "address".into(),
            is_view: false,
            columns: vec![ColumnEntry {
                name: "address_id".into(),
                type_descriptor: TypeDescriptor::Scalar(ScalarKind::Int32),
                is_primary_key: true,
                is_nullable: false,
            }],
            foreign_keys: vec![],
        },
    );
    let model = DatabaseModel { schema: "public".into(), tables, ..Default::default() };

    let p1 = RolePrivileges { role: "a".into(), ..Default::default() };
    let mut p2 = p1.clone();
    p2.selectable.insert("customer".into());
    let mut p3 = p2.clone();
    p3.selectable.insert("address".into());
    p3.insertable.insert("customer".into());

    let f1 = filter_model(&model, &p1);
    let f2 = filter_model(&model, &p2);
    let f3 = filter_model(&model, &p3);

    assert!(f1.model.tables.is_empty());
    for (name, table) in &f2.model.tables {
        let bigger = f3.model.table(name).expect("table lost as privileges grew");
        for column in &table.columns {
            assert!(bigger.column(&column.name).is_some());
        }
    }
    assert!(f3.model.table("address").is_some());
}
