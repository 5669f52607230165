//! Mutation execution (C11).
//!
//! Create, update, delete, bulk-create and create-with-relationships, all
//! parameterized and executed under the request role. The relationship
//! variant runs one transaction end to end; nothing is observable outside
//! it until commit. Committed changes are published to the change broker.

use std::sync::Arc;

use async_graphql::Value;
use chrono::Utc;
use sqlx::{Postgres, Transaction};

use crate::convert::{self, Record, input_expr};
use crate::db::Database;
use crate::error::{ApiError, ApiResult};
use crate::graphql::subscriptions::{ChangeBroker, ChangeEvent, ChangeOp};
use crate::meta::model::{ColumnEntry, ScalarKind, TableEntry};
use crate::sql::{self, ParamCollector, qualified, quote_ident};

/// Suffixes splitting a relationship-aware input into its parts.
const CONNECT_SUFFIX: &str = "_connect";
const CREATE_SUFFIX: &str = "_create";
const CREATE_MANY_SUFFIX: &str = "_createMany";

#[derive(Clone)]
pub struct Mutator {
    db: Database,
    schema: String,
    broker: Arc<ChangeBroker>,
}

impl Mutator {
    pub fn new(db: Database, schema: impl Into<String>, broker: Arc<ChangeBroker>) -> Self {
        Self { db, schema: schema.into(), broker }
    }

    fn target(&self, table: &TableEntry) -> String {
        qualified(&self.schema, &table.name)
    }

    /// INSERT one row and return it.
    pub async fn create(
        &self,
        role: Option<&str>,
        table: &TableEntry,
        input: &Value,
    ) -> ApiResult<Record> {
        guard_not_view(table)?;
        let pairs = input_pairs(table, input)?;
        let pairs = with_timestamp_defaults(table, pairs);
        if pairs.is_empty() {
            return Err(ApiError::Validation(format!(
                "create on {} needs at least one non-null column",
                table.name
            )));
        }

        let mut tx = self.db.begin_as(role).await?;
        let record = self.insert_row(&mut tx, table, &pairs).await?;
        tx.commit().await.map_err(ApiError::mutation)?;

        self.publish(table, ChangeOp::Insert, record.clone(), None, Some(record.clone()));
        Ok(record)
    }

    /// UPDATE one row identified by its full primary key.
    pub async fn update(
        &self,
        role: Option<&str>,
        table: &TableEntry,
        input: &Value,
    ) -> ApiResult<Record> {
        guard_not_view(table)?;
        let pk_columns = table.primary_key_columns();
        if pk_columns.is_empty() {
            return Err(ApiError::Validation(format!(
                "{} has no primary key; update is not supported",
                table.name
            )));
        }

        let pairs = input_pairs(table, input)?;
        let mut key_pairs: Vec<(&ColumnEntry, Value)> = Vec::new();
        let mut set_pairs: Vec<(&ColumnEntry, Value)> = Vec::new();
        for (column, value) in pairs {
            if column.is_primary_key {
                if matches!(value, Value::Null) {
                    return Err(ApiError::Validation(format!(
                        "primary key column {} must not be null",
                        column.name
                    )));
                }
                key_pairs.push((column, value));
            } else {
                set_pairs.push((column, value));
            }
        }
        if key_pairs.len() != pk_columns.len() {
            return Err(ApiError::Validation(format!(
                "update on {} requires all primary key columns ({})",
                table.name,
                pk_columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
            )));
        }
        if set_pairs.is_empty() {
            return Err(ApiError::Validation("update requires at least one column to set".into()));
        }

        let mut params = ParamCollector::new();
        let mut assignments = Vec::with_capacity(set_pairs.len());
        for (column, value) in &set_pairs {
            let coerced = convert::coerce_input(&column.type_descriptor, value)?;
            let ph = params.push(coerced);
            assignments.push(format!(
                "{} = {}",
                quote_ident(&column.name),
                input_expr(&column.type_descriptor, &self.schema, &ph)
            ));
        }
        let mut conditions = Vec::with_capacity(key_pairs.len());
        for (column, value) in &key_pairs {
            let coerced = convert::coerce_input(&column.type_descriptor, value)?;
            let ph = params.push(coerced);
            conditions.push(format!("{} = {}", quote_ident(&column.name), ph));
        }

        let mut tx = self.db.begin_as(role).await?;

        // Pre-image for the change event.
        let old = self.select_by(&mut tx, table, &key_pairs).await?;

        let sql = format!(
            "UPDATE {} SET {} WHERE {} RETURNING {}",
            self.target(table),
            assignments.join(", "),
            conditions.join(" AND "),
            sql::build_column_list(table, &[])
        );
        tracing::debug!(sql = %sql, "executing update");
        let row = params
            .bind_all(sqlx::query(&sql))
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::mutation)?;
        let Some(row) = row else {
            return Err(ApiError::NotFound(format!("no matching row in {}", table.name)));
        };
        let record = convert::row_to_record(table, &row)?;
        tx.commit().await.map_err(ApiError::mutation)?;

        self.publish(table, ChangeOp::Update, record.clone(), old, Some(record.clone()));
        Ok(record)
    }

    /// DELETE one row by primary key value; true when a row went away.
    pub async fn delete(
        &self,
        role: Option<&str>,
        table: &TableEntry,
        id: &Value,
    ) -> ApiResult<bool> {
        guard_not_view(table)?;
        let pk_columns = table.primary_key_columns();
        let [pk] = pk_columns.as_slice() else {
            return Err(ApiError::Validation(format!(
                "delete needs a single-column primary key on {}",
                table.name
            )));
        };

        let mut params = ParamCollector::new();
        let coerced = convert::coerce_input(&pk.type_descriptor, id)?;
        let ph = params.push(coerced);

        let mut tx = self.db.begin_as(role).await?;
        let old = self
            .select_by(&mut tx, table, &[(pk, id.clone())])
            .await?;

        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.target(table),
            quote_ident(&pk.name),
            ph
        );
        tracing::debug!(sql = %sql, "executing delete");
        let result = params
            .bind_all(sqlx::query(&sql))
            .execute(&mut *tx)
            .await
            .map_err(ApiError::mutation)?;
        tx.commit().await.map_err(ApiError::mutation)?;

        let affected = result.rows_affected() > 0;
        if affected {
            if let Some(old) = old {
                self.publish(table, ChangeOp::Delete, old.clone(), Some(old), None);
            }
        }
        Ok(affected)
    }

    /// One multi-row INSERT; the result preserves input order. Fields
    /// missing from an individual row insert as SQL NULL.
    pub async fn bulk_create(
        &self,
        role: Option<&str>,
        table: &TableEntry,
        inputs: &[Value],
    ) -> ApiResult<Vec<Record>> {
        guard_not_view(table)?;
        if inputs.is_empty() {
            return Err(ApiError::Validation("bulk create needs at least one input".into()));
        }

        // Union of supplied fields, in table column order.
        let mut supplied: Vec<&ColumnEntry> = Vec::new();
        let mut parsed: Vec<Vec<(&ColumnEntry, Value)>> = Vec::with_capacity(inputs.len());
        for input in inputs {
            let pairs = input_pairs(table, input)?;
            for (column, _) in &pairs {
                if !supplied.iter().any(|c| c.name == column.name) {
                    supplied.push(column);
                }
            }
            parsed.push(pairs);
        }
        supplied.sort_by_key(|c| table.columns.iter().position(|tc| tc.name == c.name));
        if supplied.is_empty() {
            return Err(ApiError::Validation(
                "bulk create inputs name no columns at all".into(),
            ));
        }

        let mut params = ParamCollector::new();
        let mut tuples = Vec::with_capacity(parsed.len());
        for pairs in &parsed {
            let mut exprs = Vec::with_capacity(supplied.len());
            for column in &supplied {
                match pairs.iter().find(|(c, _)| c.name == column.name) {
                    Some((_, value)) if !matches!(value, Value::Null) => {
                        let coerced = convert::coerce_input(&column.type_descriptor, value)?;
                        let ph = params.push(coerced);
                        exprs.push(input_expr(&column.type_descriptor, &self.schema, &ph));
                    }
                    _ => exprs.push("NULL".to_string()),
                }
            }
            tuples.push(format!("({})", exprs.join(", ")));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {} RETURNING {}",
            self.target(table),
            supplied.iter().map(|c| quote_ident(&c.name)).collect::<Vec<_>>().join(", "),
            tuples.join(", "),
            sql::build_column_list(table, &[])
        );
        tracing::debug!(sql = %sql, rows = inputs.len(), "executing bulk insert");

        let mut tx = self.db.begin_as(role).await?;
        let rows = params
            .bind_all(sqlx::query(&sql))
            .fetch_all(&mut *tx)
            .await
            .map_err(ApiError::mutation)?;
        tx.commit().await.map_err(ApiError::mutation)?;

        let records: ApiResult<Vec<Record>> =
            rows.iter().map(|row| convert::row_to_record(table, row)).collect();
        let records = records?;
        for record in &records {
            self.publish(table, ChangeOp::Insert, record.clone(), None, Some(record.clone()));
        }
        Ok(records)
    }

    /// Create a parent together with connected/created relatives, all in
    /// one transaction: collect forward keys, insert `_create` parents,
    /// insert self, then insert `_createMany` children. Any failure rolls
    /// the whole thing back.
    pub async fn create_with_relationships(
        &self,
        role: Option<&str>,
        model: &crate::meta::DatabaseModel,
        table: &TableEntry,
        input: &Value,
    ) -> ApiResult<Record> {
        guard_not_view(table)?;
        let split = SplitInput::parse(model, table, input)?;

        let mut tx = self.db.begin_as(role).await?;
        let result = self
            .run_relationship_insert(&mut tx, model, table, split)
            .await;
        match result {
            Ok(record) => {
                tx.commit().await.map_err(ApiError::mutation)?;
                self.publish(table, ChangeOp::Insert, record.clone(), None, Some(record.clone()));
                Ok(record)
            }
            Err(err) => {
                // Explicit rollback; dropping the transaction would do the
                // same, but the intent reads better.
                let _ = tx.rollback().await;
                Err(match err {
                    e @ ApiError::MutationFailed(_) => e,
                    other => ApiError::MutationFailed(other.to_string()),
                })
            }
        }
    }

    async fn run_relationship_insert(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        model: &crate::meta::DatabaseModel,
        table: &TableEntry,
        split: SplitInput<'_>,
    ) -> ApiResult<Record> {
        let mut pairs = split.direct;

        // CollectForward: connected rows contribute their key directly.
        for connect in split.connects {
            let value = connect.key_value()?;
            let column = table.column(&connect.fk.column).ok_or_else(|| {
                ApiError::Internal(format!(
                    "unknown column {}.{}",
                    table.name, connect.fk.column
                ))
            })?;
            pairs.push((column, value));
        }

        // InsertParents: nested `_create` rows go in first so their keys
        // exist for the parent's FK columns.
        for create in split.creates {
            let target = model.table(&create.fk.referenced_table).ok_or_else(|| {
                ApiError::Internal(format!("unknown table {}", create.fk.referenced_table))
            })?;
            let child_pairs = input_pairs(target, &create.input)?;
            let child_pairs = with_timestamp_defaults(target, child_pairs);
            let child = self.insert_row(tx, target, &child_pairs).await?;
            let key = child.get(&create.fk.referenced_column).cloned().ok_or_else(|| {
                ApiError::Internal(format!(
                    "inserted {} row did not return {}",
                    target.name, create.fk.referenced_column
                ))
            })?;
            let column = table.column(&create.fk.column).ok_or_else(|| {
                ApiError::Internal(format!("unknown column {}.{}", table.name, create.fk.column))
            })?;
            pairs.push((column, key));
        }

        // InsertSelf.
        let pairs = with_timestamp_defaults(table, pairs);
        if pairs.is_empty() {
            return Err(ApiError::Validation(format!(
                "create on {} needs at least one non-null column",
                table.name
            )));
        }
        let parent = self.insert_row(tx, table, &pairs).await?;

        // InsertReverseChildren: each child points back at the parent.
        for create_many in split.create_manys {
            let source = model.table(&create_many.source_table).ok_or_else(|| {
                ApiError::Internal(format!("unknown table {}", create_many.source_table))
            })?;
            let parent_key = parent
                .get(&create_many.referenced_column)
                .cloned()
                .ok_or_else(|| {
                    ApiError::Internal(format!(
                        "parent row did not return {}",
                        create_many.referenced_column
                    ))
                })?;
            for child_input in &create_many.inputs {
                let mut child_pairs = input_pairs(source, child_input)?;
                let fk_col = source.column(&create_many.fk_column).ok_or_else(|| {
                    ApiError::Internal(format!(
                        "unknown column {}.{}",
                        source.name, create_many.fk_column
                    ))
                })?;
                child_pairs.retain(|(c, _)| c.name != fk_col.name);
                child_pairs.push((fk_col, parent_key.clone()));
                let child_pairs = with_timestamp_defaults(source, child_pairs);
                self.insert_row(tx, source, &child_pairs).await?;
            }
        }

        Ok(parent)
    }

    async fn insert_row(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        table: &TableEntry,
        pairs: &[(&ColumnEntry, Value)],
    ) -> ApiResult<Record> {
        let live: Vec<&(&ColumnEntry, Value)> =
            pairs.iter().filter(|(_, v)| !matches!(v, Value::Null)).collect();
        if live.is_empty() {
            return Err(ApiError::Validation(format!(
                "insert into {} needs at least one non-null column",
                table.name
            )));
        }

        let mut params = ParamCollector::new();
        let mut columns = Vec::with_capacity(live.len());
        let mut exprs = Vec::with_capacity(live.len());
        for (column, value) in live {
            let coerced = convert::coerce_input(&column.type_descriptor, value)?;
            let ph = params.push(coerced);
            columns.push(quote_ident(&column.name));
            exprs.push(input_expr(&column.type_descriptor, &self.schema, &ph));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            self.target(table),
            columns.join(", "),
            exprs.join(", "),
            sql::build_column_list(table, &[])
        );
        tracing::debug!(sql = %sql, "executing insert");

        let row = params
            .bind_all(sqlx::query(&sql))
            .fetch_one(&mut **tx)
            .await
            .map_err(ApiError::mutation)?;
        convert::row_to_record(table, &row)
    }

    async fn select_by(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        table: &TableEntry,
        keys: &[(&ColumnEntry, Value)],
    ) -> ApiResult<Option<Record>> {
        let mut params = ParamCollector::new();
        let mut conditions = Vec::with_capacity(keys.len());
        for (column, value) in keys {
            let coerced = convert::coerce_input(&column.type_descriptor, value)?;
            let ph = params.push(coerced);
            conditions.push(format!("{} = {}", quote_ident(&column.name), ph));
        }
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            sql::build_column_list(table, &[]),
            self.target(table),
            conditions.join(" AND ")
        );
        let row = params
            .bind_all(sqlx::query(&sql))
            .fetch_optional(&mut **tx)
            .await?;
        row.map(|r| convert::row_to_record(table, &r)).transpose()
    }

    fn publish(
        &self,
        table: &TableEntry,
        op: ChangeOp,
        data: Record,
        old: Option<Record>,
        new: Option<Record>,
    ) {
        self.broker.publish(ChangeEvent {
            table: table.name.clone(),
            op,
            timestamp: Utc::now(),
            data,
            old,
            new,
        });
    }
}

fn guard_not_view(table: &TableEntry) -> ApiResult<()> {
    if table.is_view {
        return Err(ApiError::Validation(format!("{} is a view; views are read-only", table.name)));
    }
    Ok(())
}

/// The object entries of an input value, resolved to model columns.
fn input_pairs<'a>(
    table: &'a TableEntry,
    input: &Value,
) -> ApiResult<Vec<(&'a ColumnEntry, Value)>> {
    let Value::Object(entries) = input else {
        return Err(ApiError::Validation(format!("input must be an object, got {input}")));
    };
    let mut pairs = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let column = table.column(key.as_str()).ok_or_else(|| {
            ApiError::Validation(format!("unknown column {} on {}", key, table.name))
        })?;
        pairs.push((column, value.clone()));
    }
    Ok(pairs)
}

/// Fill non-nullable timestamp/date columns missing from the input with
/// "now".
fn with_timestamp_defaults<'a>(
    table: &'a TableEntry,
    mut pairs: Vec<(&'a ColumnEntry, Value)>,
) -> Vec<(&'a ColumnEntry, Value)> {
    for column in &table.columns {
        if column.is_nullable || column.is_primary_key {
            continue;
        }
        if pairs.iter().any(|(c, _)| c.name == column.name) {
            continue;
        }
        let now = match column.type_descriptor.as_scalar() {
            Some(ScalarKind::TimestampTz) => Value::String(Utc::now().to_rfc3339()),
            Some(ScalarKind::Timestamp) => Value::String(
                Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            ),
            Some(ScalarKind::Date) => {
                Value::String(Utc::now().date_naive().format("%Y-%m-%d").to_string())
            }
            _ => continue,
        };
        pairs.push((column, now));
    }
    pairs
}

// ---------------------------------------------------------------------------
// Relationship input splitting
// ---------------------------------------------------------------------------

struct ConnectInput {
    fk: crate::meta::model::ForeignKey,
    input: Value,
    referenced_column: String,
}

impl ConnectInput {
    /// The referenced key out of a `_connect` payload: either the bare key
    /// value or an object carrying the referenced column.
    fn key_value(&self) -> ApiResult<Value> {
        match &self.input {
            Value::Object(map) => map
                .get(self.referenced_column.as_str())
                .cloned()
                .filter(|v| !matches!(v, Value::Null))
                .ok_or_else(|| {
                    ApiError::Validation(format!(
                        "connect input must carry {}",
                        self.referenced_column
                    ))
                }),
            Value::Null => Err(ApiError::Validation("connect input must not be null".into())),
            scalar => Ok(scalar.clone()),
        }
    }
}

struct CreateInput {
    fk: crate::meta::model::ForeignKey,
    input: Value,
}

struct CreateManyInput {
    source_table: String,
    fk_column: String,
    referenced_column: String,
    inputs: Vec<Value>,
}

/// A relationship-aware input split into direct columns, `_connect`,
/// `_create` and `_createMany` parts.
struct SplitInput<'a> {
    direct: Vec<(&'a ColumnEntry, Value)>,
    connects: Vec<ConnectInput>,
    creates: Vec<CreateInput>,
    create_manys: Vec<CreateManyInput>,
}

impl<'a> SplitInput<'a> {
    fn parse(
        model: &crate::meta::DatabaseModel,
        table: &'a TableEntry,
        input: &Value,
    ) -> ApiResult<Self> {
        let Value::Object(entries) = input else {
            return Err(ApiError::Validation(format!("input must be an object, got {input}")));
        };

        let mut direct = Vec::new();
        let mut connects = Vec::new();
        let mut creates = Vec::new();
        let mut create_manys = Vec::new();

        for (key, value) in entries {
            let key = key.as_str();
            if let Some(target) = key.strip_suffix(CREATE_MANY_SUFFIX) {
                let (source, fk) = reverse_relationship(model, table, target)?;
                let Value::List(items) = value else {
                    return Err(ApiError::Validation(format!("{key} expects a list")));
                };
                create_manys.push(CreateManyInput {
                    source_table: source,
                    fk_column: fk.column,
                    referenced_column: fk.referenced_column,
                    inputs: items.clone(),
                });
            } else if let Some(target) = key.strip_suffix(CONNECT_SUFFIX) {
                let fk = forward_relationship(table, target)?;
                connects.push(ConnectInput {
                    referenced_column: fk.referenced_column.clone(),
                    fk,
                    input: value.clone(),
                });
            } else if let Some(target) = key.strip_suffix(CREATE_SUFFIX) {
                let fk = forward_relationship(table, target)?;
                creates.push(CreateInput { fk, input: value.clone() });
            } else {
                let column = table.column(key).ok_or_else(|| {
                    ApiError::Validation(format!("unknown column {} on {}", key, table.name))
                })?;
                direct.push((column, value.clone()));
            }
        }

        Ok(Self { direct, connects, creates, create_manys })
    }
}

/// FK on `table` whose referenced table matches the relationship name.
fn forward_relationship(
    table: &TableEntry,
    target: &str,
) -> ApiResult<crate::meta::model::ForeignKey> {
    table
        .foreign_keys
        .iter()
        .find(|fk| fk.referenced_table == target)
        .cloned()
        .ok_or_else(|| {
            ApiError::Validation(format!("{} has no relationship to {target}", table.name))
        })
}

/// FK on another table pointing back at `table`, matched by the pluralized
/// relationship name.
fn reverse_relationship(
    model: &crate::meta::DatabaseModel,
    table: &TableEntry,
    target: &str,
) -> ApiResult<(String, crate::meta::model::ForeignKey)> {
    // `target` may be the child table name or its plural form.
    let singular = target.strip_suffix('s').unwrap_or(target);
    for candidate in [target, singular] {
        if let Some(child) = model.table(candidate) {
            if let Some(fk) =
                child.foreign_keys.iter().find(|fk| fk.referenced_table == table.name)
            {
                return Ok((child.name.clone(), fk.clone()));
            }
        }
    }
    Err(ApiError::Validation(format!("no table references {} as {target}", table.name)))
}

// The schema generator builds relationship input fields with the same
// suffixes.
pub fn relationship_suffixes() -> [&'static str; 3] {
    [CONNECT_SUFFIX, CREATE_SUFFIX, CREATE_MANY_SUFFIX]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::model::{DatabaseModel, ForeignKey, TypeDescriptor};
    use async_graphql::Name;
    use indexmap::IndexMap;
    use std::collections::BTreeMap;

    fn col(name: &str, kind: ScalarKind, pk: bool, nullable: bool) -> ColumnEntry {
        ColumnEntry {
            name: name.into(),
            type_descriptor: TypeDescriptor::Scalar(kind),
            is_primary_key: pk,
            is_nullable: nullable,
        }
    }

    fn model() -> DatabaseModel {
        let mut tables = BTreeMap::new();
        tables.insert(
            "customer".to_string(),
            TableEntry {
                name: "customer".into(),
                is_view: false,
                columns: vec![
                    col("customer_id", ScalarKind::Int32, true, false),
                    col("first_name", ScalarKind::Varchar(Some(45)), false, false),
                    col("address_id", ScalarKind::Int32, false, true),
                    col("create_date", ScalarKind::Date, false, false),
                ],
                foreign_keys: vec![ForeignKey {
                    column: "address_id".into(),
                    referenced_table: "address".into(),
                    referenced_column: "address_id".into(),
                }],
            },
        );
        tables.insert(
            "address".to_string(),
            TableEntry {
                name: "address".into(),
                is_view: false,
                columns: vec![
                    col("address_id", ScalarKind::Int32, true, false),
                    col("city", ScalarKind::Text, false, false),
                ],
                foreign_keys: vec![],
            },
        );
        tables.insert(
            "payment".to_string(),
            TableEntry {
                name: "payment".into(),
                is_view: false,
                columns: vec![
                    col("payment_id", ScalarKind::Int32, true, false),
                    col("customer_id", ScalarKind::Int32, false, false),
                    col("amount", ScalarKind::Numeric { precision: None, scale: None }, false, true),
                ],
                foreign_keys: vec![ForeignKey {
                    column: "customer_id".into(),
                    referenced_table: "customer".into(),
                    referenced_column: "customer_id".into(),
                }],
            },
        );
        DatabaseModel { schema: "public".into(), tables, ..Default::default() }
    }

    fn obj(pairs: Vec<(&str, Value)>) -> Value {
        let mut map = IndexMap::new();
        for (k, v) in pairs {
            map.insert(Name::new(k), v);
        }
        Value::Object(map)
    }

    #[test]
    fn split_input_partitions_by_suffix() {
        let model = model();
        let table = model.table("customer").unwrap();
        let input = obj(vec![
            ("first_name", Value::String("A".into())),
            ("address_create", obj(vec![("city", Value::String("X".into()))])),
            (
                "payments_createMany",
                Value::List(vec![obj(vec![("amount", Value::from(10))])]),
            ),
        ]);
        let split = SplitInput::parse(&model, table, &input).unwrap();
        assert_eq!(split.direct.len(), 1);
        assert_eq!(split.creates.len(), 1);
        assert_eq!(split.creates[0].fk.column, "address_id");
        assert_eq!(split.create_manys.len(), 1);
        assert_eq!(split.create_manys[0].source_table, "payment");
        assert_eq!(split.create_manys[0].fk_column, "customer_id");
    }

    #[test]
    fn split_input_rejects_unknown_relationships() {
        let model = model();
        let table = model.table("customer").unwrap();
        let input = obj(vec![("nothing_connect", obj(vec![("id", Value::from(1))]))]);
        assert!(SplitInput::parse(&model, table, &input).is_err());
    }

    #[test]
    fn connect_accepts_bare_scalar_or_object() {
        let fk = ForeignKey {
            column: "address_id".into(),
            referenced_table: "address".into(),
            referenced_column: "address_id".into(),
        };
        let bare = ConnectInput {
            fk: fk.clone(),
            referenced_column: "address_id".into(),
            input: Value::from(7),
        };
        assert_eq!(bare.key_value().unwrap(), Value::from(7));

        let object = ConnectInput {
            fk,
            referenced_column: "address_id".into(),
            input: obj(vec![("address_id", Value::from(9))]),
        };
        assert_eq!(object.key_value().unwrap(), Value::from(9));
    }

    #[test]
    fn timestamp_defaults_fill_missing_non_nullable_dates() {
        let model = model();
        let table = model.table("customer").unwrap();
        let pairs = vec![(
            table.column("first_name").unwrap(),
            Value::String("A".into()),
        )];
        let filled = with_timestamp_defaults(table, pairs);
        assert!(filled.iter().any(|(c, _)| c.name == "create_date"));
        // Already-supplied values win.
        let pairs = vec![
            (table.column("create_date").unwrap(), Value::String("2020-01-01".into())),
        ];
        let filled = with_timestamp_defaults(table, pairs);
        assert_eq!(
            filled.iter().filter(|(c, _)| c.name == "create_date").count(),
            1
        );
    }

    #[test]
    fn reverse_relationship_resolves_plural() {
        let model = model();
        let table = model.table("customer").unwrap();
        let (source, fk) = reverse_relationship(&model, table, "payments").unwrap();
        assert_eq!(source, "payment");
        assert_eq!(fk.column, "customer_id");
    }
}
