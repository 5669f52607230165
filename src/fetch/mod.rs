//! Query resolution against the database (C10).
//!
//! Translates resolver arguments into parameterized SQL, executes under the
//! request role, and converts rows. Relationship loads flow through the
//! per-request [`BatchLoader`] so one `IN` query serves a whole parent list.

pub mod loader;

use async_graphql::Value;
use sqlx::Row as _;

use crate::convert::{self, Record};
use crate::db::Database;
use crate::error::{ApiError, ApiResult};
use crate::meta::model::{ForeignKey, TableEntry};
use crate::sql::{
    self, OrderSpec, ParamCollector, build_cursor_predicate, build_where, decode_cursor,
    encode_cursor, qualified, quote_ident,
};

pub use loader::BatchLoader;

/// Default page size when the client supplies no limit.
pub const DEFAULT_LIMIT: i64 = 10;

/// Arguments of a plain list field.
#[derive(Debug, Clone, Default)]
pub struct FetchArgs {
    pub filter: Option<Value>,
    pub order_by: Option<Value>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Arguments of a connection field.
#[derive(Debug, Clone, Default)]
pub struct ConnectionArgs {
    pub filter: Option<Value>,
    pub order_by: Option<Value>,
    pub first: Option<i64>,
    pub after: Option<String>,
    pub last: Option<i64>,
    pub before: Option<String>,
    pub offset: Option<i64>,
}

impl ConnectionArgs {
    fn wants_cursor(&self) -> bool {
        self.first.is_some()
            || self.last.is_some()
            || self.after.is_some()
            || self.before.is_some()
    }
}

/// A resolved connection page.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPage {
    pub edges: Vec<Edge>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub total_count: i64,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub cursor: Option<String>,
    pub node: Record,
}

/// A relationship requested in the current selection, precomputed by the
/// schema layer so preloading needs no GraphQL types.
#[derive(Debug, Clone)]
pub enum RelationshipRequest {
    /// Parent rows hold `fk.column`; target rows are looked up by
    /// `fk.referenced_column`.
    Forward { fk: ForeignKey },
    /// Child rows in `source_table` hold `fk_column` pointing at the
    /// parent's `referenced_column`.
    Reverse { source_table: String, fk_column: String, referenced_column: String },
}

#[derive(Clone)]
pub struct DataFetcher {
    db: Database,
    schema: String,
}

impl DataFetcher {
    pub fn new(db: Database, schema: impl Into<String>) -> Self {
        Self { db, schema: schema.into() }
    }

    fn from_clause(&self, table: &TableEntry) -> String {
        qualified(&self.schema, &table.name)
    }

    /// Fetch rows for a list field. Result count never exceeds the limit;
    /// ordering is deterministic whenever `orderBy` was supplied.
    pub async fn resolve_table(
        &self,
        role: Option<&str>,
        table: &TableEntry,
        args: &FetchArgs,
    ) -> ApiResult<Vec<Record>> {
        let mut params = ParamCollector::new();
        let where_clause = build_where(table, args.filter.as_ref(), &mut params)?;
        let order = match &args.order_by {
            Some(value) => Some(OrderSpec::parse(table, value)?),
            None => None,
        };

        let mut sql = format!(
            "SELECT {} FROM {}",
            sql::build_column_list(table, &[]),
            self.from_clause(table)
        );
        if let Some(clause) = &where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        if let Some(order) = &order {
            if !order.is_empty() {
                sql.push_str(" ORDER BY ");
                sql.push_str(&order.to_sql(table)?);
            }
        }
        let limit = args.limit.unwrap_or(DEFAULT_LIMIT).max(0);
        sql.push_str(&format!(" LIMIT {limit}"));
        if let Some(offset) = args.offset.filter(|o| *o > 0) {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        self.fetch_records(role, table, &sql, &params).await
    }

    /// Fetch a connection page. Cursor pagination wins whenever any of
    /// first/last/after/before is present; a bare offset falls back to
    /// offset pagination.
    pub async fn resolve_connection(
        &self,
        role: Option<&str>,
        table: &TableEntry,
        args: &ConnectionArgs,
    ) -> ApiResult<ConnectionPage> {
        if args.wants_cursor() {
            self.resolve_cursor_page(role, table, args).await
        } else {
            self.resolve_offset_page(role, table, args).await
        }
    }

    async fn resolve_offset_page(
        &self,
        role: Option<&str>,
        table: &TableEntry,
        args: &ConnectionArgs,
    ) -> ApiResult<ConnectionPage> {
        let order = match &args.order_by {
            Some(value) => Some(OrderSpec::parse(table, value)?),
            None => None,
        };
        let offset = args.offset.unwrap_or(0).max(0);
        let limit = DEFAULT_LIMIT;

        let total_count = self.count(role, table, args.filter.as_ref()).await?;

        let mut params = ParamCollector::new();
        let where_clause = build_where(table, args.filter.as_ref(), &mut params)?;
        let mut sql = format!(
            "SELECT {} FROM {}",
            sql::build_column_list(table, &[]),
            self.from_clause(table)
        );
        if let Some(clause) = &where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        if let Some(order) = &order {
            if !order.is_empty() {
                sql.push_str(" ORDER BY ");
                sql.push_str(&order.to_sql(table)?);
            }
        }
        sql.push_str(&format!(" LIMIT {limit}"));
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let records = self.fetch_records(role, table, &sql, &params).await?;
        let fetched = records.len() as i64;

        let edges: Vec<Edge> = records
            .into_iter()
            .map(|node| Edge { cursor: order.as_ref().and_then(|o| row_cursor(o, &node)), node })
            .collect();

        Ok(ConnectionPage {
            start_cursor: edges.first().and_then(|e| e.cursor.clone()),
            end_cursor: edges.last().and_then(|e| e.cursor.clone()),
            has_next_page: offset + fetched < total_count,
            has_previous_page: offset > 0,
            total_count,
            edges,
        })
    }

    async fn resolve_cursor_page(
        &self,
        role: Option<&str>,
        table: &TableEntry,
        args: &ConnectionArgs,
    ) -> ApiResult<ConnectionPage> {
        let order = match &args.order_by {
            Some(value) => {
                let spec = OrderSpec::parse(table, value)?;
                if spec.is_empty() { None } else { Some(spec) }
            }
            None => None,
        };
        let order = match order.or_else(|| OrderSpec::default_for(table)) {
            Some(spec) => spec,
            None => return Err(ApiError::OrderRequired(table.name.clone())),
        };

        let backwards = args.last.is_some() && args.first.is_none();
        let limit = args.first.or(args.last).unwrap_or(DEFAULT_LIMIT).max(0);

        let total_count = self.count(role, table, args.filter.as_ref()).await?;

        let mut params = ParamCollector::new();
        let where_clause = build_where(table, args.filter.as_ref(), &mut params)?;
        let mut predicates: Vec<String> = where_clause.clone().into_iter().collect();

        if let Some(after) = &args.after {
            let decoded = decode_cursor(after)?;
            predicates.push(build_cursor_predicate(table, &order, &decoded, true, &mut params)?);
        }
        if let Some(before) = &args.before {
            let decoded = decode_cursor(before)?;
            predicates.push(build_cursor_predicate(table, &order, &decoded, false, &mut params)?);
        }

        let sql_order = if backwards { order.reversed() } else { order.clone() };
        let mut sql = format!(
            "SELECT {} FROM {}",
            sql::build_column_list(table, &[]),
            self.from_clause(table)
        );
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&sql_order.to_sql(table)?);
        sql.push_str(&format!(" LIMIT {limit}"));
        if let Some(offset) = args.offset.filter(|o| *o > 0) {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let mut records = self.fetch_records(role, table, &sql, &params).await?;
        if backwards {
            records.reverse();
        }

        let edges: Vec<Edge> = records
            .into_iter()
            .map(|node| Edge { cursor: row_cursor(&order, &node), node })
            .collect();

        // Page flags come from boundary-row existence checks so they stay
        // consistent with the page contents under the same ordering.
        let has_next_page = match edges.last() {
            Some(last) => {
                self.boundary_exists(role, table, args.filter.as_ref(), &order, &last.node, true)
                    .await?
            }
            None => false,
        };
        let has_previous_page = match edges.first() {
            Some(first) => {
                self.boundary_exists(role, table, args.filter.as_ref(), &order, &first.node, false)
                    .await?
            }
            None => false,
        };

        Ok(ConnectionPage {
            start_cursor: edges.first().and_then(|e| e.cursor.clone()),
            end_cursor: edges.last().and_then(|e| e.cursor.clone()),
            has_next_page,
            has_previous_page,
            total_count,
            edges,
        })
    }

    /// Exact count of the where-filtered set.
    pub async fn count(
        &self,
        role: Option<&str>,
        table: &TableEntry,
        filter: Option<&Value>,
    ) -> ApiResult<i64> {
        let mut params = ParamCollector::new();
        let where_clause = build_where(table, filter, &mut params)?;
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.from_clause(table));
        if let Some(clause) = &where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }

        let mut tx = self.db.begin_as(role).await?;
        let row = params.bind_all(sqlx::query(&sql)).fetch_one(&mut *tx).await?;
        tx.commit().await.map_err(ApiError::from)?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    /// Does a row exist beyond `boundary` in the given direction?
    async fn boundary_exists(
        &self,
        role: Option<&str>,
        table: &TableEntry,
        filter: Option<&Value>,
        order: &OrderSpec,
        boundary: &Record,
        after: bool,
    ) -> ApiResult<bool> {
        let decoded: Vec<(String, String)> = order
            .fields
            .iter()
            .map(|(name, _)| (name.clone(), render_value(boundary.get(name))))
            .collect();

        let mut params = ParamCollector::new();
        let mut predicates: Vec<String> = Vec::new();
        if let Some(clause) = build_where(table, filter, &mut params)? {
            predicates.push(clause);
        }
        predicates.push(build_cursor_predicate(table, order, &decoded, after, &mut params)?);

        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {})",
            self.from_clause(table),
            predicates.join(" AND ")
        );

        let mut tx = self.db.begin_as(role).await?;
        let row = params.bind_all(sqlx::query(&sql)).fetch_one(&mut *tx).await?;
        tx.commit().await.map_err(ApiError::from)?;
        Ok(row.try_get::<bool, _>(0)?)
    }

    /// Preload every requested relationship for a freshly fetched parent
    /// list: one `IN` query per relationship, skipping tables already
    /// preloaded in this request.
    pub async fn preload_relationships(
        &self,
        role: Option<&str>,
        model: &crate::meta::DatabaseModel,
        parent: &TableEntry,
        parents: &[Record],
        requests: &[RelationshipRequest],
        loader: &BatchLoader,
    ) -> ApiResult<()> {
        for request in requests {
            match request {
                RelationshipRequest::Forward { fk } => {
                    let Some(target) = model.table(&fk.referenced_table) else {
                        continue;
                    };
                    if !loader.mark_processed(&target.name) {
                        continue;
                    }
                    let values = parents
                        .iter()
                        .filter_map(|r| r.get(&fk.column))
                        .filter(|v| !matches!(v, Value::Null))
                        .cloned();
                    loader.queue_many(&target.name, &fk.referenced_column, values);
                    self.flush_slot(role, target, &fk.referenced_column, loader).await?;
                }
                RelationshipRequest::Reverse { source_table, fk_column, referenced_column } => {
                    let Some(source) = model.table(source_table) else {
                        continue;
                    };
                    if !loader.mark_processed(&source.name) {
                        continue;
                    }
                    let values = parents
                        .iter()
                        .filter_map(|r| r.get(referenced_column))
                        .filter(|v| !matches!(v, Value::Null))
                        .cloned();
                    loader.queue_many(&source.name, fk_column, values);
                    self.flush_slot(role, source, fk_column, loader).await?;
                }
            }
        }
        // Parent is never a preload target for its own page.
        loader.mark_processed(&parent.name);
        Ok(())
    }

    /// Drain one loader slot into a single `IN` query and cache the rows.
    async fn flush_slot(
        &self,
        role: Option<&str>,
        table: &TableEntry,
        key_column: &str,
        loader: &BatchLoader,
    ) -> ApiResult<()> {
        let pending = loader.drain_pending(&table.name, key_column);
        if pending.is_empty() {
            return Ok(());
        }
        let column = table.column(key_column).ok_or_else(|| {
            ApiError::Internal(format!("unknown key column {key_column} on {}", table.name))
        })?;

        let mut params = ParamCollector::new();
        let mut placeholders = Vec::with_capacity(pending.len());
        for value in &pending {
            let coerced = convert::coerce_input(&column.type_descriptor, value)?;
            placeholders.push(params.push(coerced));
        }
        let sql = format!(
            "SELECT {} FROM {} WHERE {} IN ({})",
            sql::build_column_list(table, &[]),
            self.from_clause(table),
            quote_ident(key_column),
            placeholders.join(", ")
        );

        tracing::debug!(
            table = %table.name,
            key_column = key_column,
            keys = pending.len(),
            "batch loading relationship"
        );
        let records = self.fetch_records(role, table, &sql, &params).await?;
        for value in &pending {
            loader.cache_miss(&table.name, key_column, value);
        }
        loader.cache(&table.name, key_column, records);
        Ok(())
    }

    /// Single parent → referenced row. Serves from the batch cache when the
    /// slot was prefetched, otherwise issues a one-off query.
    pub async fn resolve_forward_relationship(
        &self,
        role: Option<&str>,
        loader: &BatchLoader,
        parent: &Record,
        fk: &ForeignKey,
        target: &TableEntry,
    ) -> ApiResult<Option<Record>> {
        let Some(value) = parent.get(&fk.column).cloned() else {
            return Ok(None);
        };
        if matches!(value, Value::Null) {
            return Ok(None);
        }
        if loader.has_cached(&target.name, &fk.referenced_column) {
            if let Some(hit) = loader.lookup(&target.name, &fk.referenced_column, &value) {
                return Ok(Some(hit));
            }
            if loader
                .lookup_many(&target.name, &fk.referenced_column, &value)
                .is_some()
            {
                // Known miss from the prefetch.
                return Ok(None);
            }
        }

        let column = target.column(&fk.referenced_column).ok_or_else(|| {
            ApiError::Internal(format!(
                "foreign key references unknown column {}.{}",
                target.name, fk.referenced_column
            ))
        })?;
        let mut params = ParamCollector::new();
        let ph = params.push(convert::coerce_input(&column.type_descriptor, &value)?);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {} LIMIT 1",
            sql::build_column_list(target, &[]),
            self.from_clause(target),
            quote_ident(&fk.referenced_column),
            ph
        );
        let records = self.fetch_records(role, target, &sql, &params).await?;
        loader.cache_miss(&target.name, &fk.referenced_column, &value);
        loader.cache(&target.name, &fk.referenced_column, records.clone());
        Ok(records.into_iter().next())
    }

    /// Single parent → list of referencing rows, same batching discipline.
    pub async fn resolve_reverse_relationship(
        &self,
        role: Option<&str>,
        loader: &BatchLoader,
        parent: &Record,
        source: &TableEntry,
        fk_column: &str,
        referenced_column: &str,
    ) -> ApiResult<Vec<Record>> {
        let Some(value) = parent.get(referenced_column).cloned() else {
            return Ok(Vec::new());
        };
        if matches!(value, Value::Null) {
            return Ok(Vec::new());
        }
        if loader.has_cached(&source.name, fk_column) {
            if let Some(hits) = loader.lookup_many(&source.name, fk_column, &value) {
                return Ok(hits);
            }
        }

        let column = source.column(fk_column).ok_or_else(|| {
            ApiError::Internal(format!("unknown column {}.{}", source.name, fk_column))
        })?;
        let mut params = ParamCollector::new();
        let ph = params.push(convert::coerce_input(&column.type_descriptor, &value)?);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {}",
            sql::build_column_list(source, &[]),
            self.from_clause(source),
            quote_ident(fk_column),
            ph
        );
        let records = self.fetch_records(role, source, &sql, &params).await?;
        loader.cache_miss(&source.name, fk_column, &value);
        loader.cache(&source.name, fk_column, records.clone());
        Ok(records)
    }

    async fn fetch_records(
        &self,
        role: Option<&str>,
        table: &TableEntry,
        sql: &str,
        params: &ParamCollector,
    ) -> ApiResult<Vec<Record>> {
        tracing::debug!(sql = sql, "executing query");
        let mut tx = self.db.begin_as(role).await?;
        let rows = params.bind_all(sqlx::query(sql)).fetch_all(&mut *tx).await?;
        tx.commit().await.map_err(ApiError::from)?;
        rows.iter().map(|row| convert::row_to_record(table, row)).collect()
    }
}

/// Render a GraphQL value into the cursor's string form.
pub fn render_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Boolean(b)) => b.to_string(),
        Some(Value::Enum(name)) => name.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Cursor for a row under the given ordering.
pub fn row_cursor(order: &OrderSpec, record: &Record) -> Option<String> {
    if order.is_empty() {
        return None;
    }
    let pairs: Vec<(String, String)> = order
        .fields
        .iter()
        .map(|(name, _)| (name.clone(), render_value(record.get(name))))
        .collect();
    Some(encode_cursor(&pairs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Direction;
    use indexmap::IndexMap;

    fn record(pairs: &[(&str, Value)]) -> Record {
        let mut columns = IndexMap::new();
        for (k, v) in pairs {
            columns.insert((*k).to_string(), v.clone());
        }
        Record { columns }
    }

    #[test]
    fn row_cursor_round_trips_through_decode() {
        let order = OrderSpec {
            fields: vec![
                ("store_id".to_string(), Direction::Asc),
                ("customer_id".to_string(), Direction::Asc),
            ],
        };
        let row = record(&[("store_id", Value::from(2)), ("customer_id", Value::from(10))]);
        let cursor = row_cursor(&order, &row).unwrap();
        let decoded = decode_cursor(&cursor).unwrap();
        assert_eq!(
            decoded,
            vec![
                ("store_id".to_string(), "2".to_string()),
                ("customer_id".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn cursor_args_trigger_cursor_mode() {
        let mut args = ConnectionArgs::default();
        assert!(!args.wants_cursor());
        args.offset = Some(5);
        assert!(!args.wants_cursor());
        args.first = Some(10);
        assert!(args.wants_cursor());

        let mut args = ConnectionArgs::default();
        args.after = Some("abc".into());
        assert!(args.wants_cursor());
    }

    #[test]
    fn render_value_strips_quoting() {
        assert_eq!(render_value(Some(&Value::String("MARY".into()))), "MARY");
        assert_eq!(render_value(Some(&Value::from(3))), "3");
        assert_eq!(render_value(None), "");
    }
}
