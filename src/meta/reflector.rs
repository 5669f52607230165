//! Catalog reflection: builds a [`DatabaseModel`] from the live database.
//!
//! Each category (relations, columns, primary keys, foreign keys, enums,
//! composites) is read in one bulk query, so reflection cost does not grow
//! with table count. Identifiers used in catalog predicates are bound as
//! parameters, never interpolated.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::Row as _;

use crate::cache::TtlCache;
use crate::db::Database;
use crate::error::{ApiError, ApiResult};
use crate::meta::model::{
    ColumnEntry, CompositeAttribute, CustomComposite, CustomEnum, DatabaseModel, ForeignKey,
    ScalarKind, TableEntry, TypeDescriptor,
};

/// Scalar kind from a pg_type name (`udt_name` in information_schema).
pub fn kind_from_udt(udt: &str) -> Option<ScalarKind> {
    Some(match udt {
        "int2" => ScalarKind::SmallInt,
        "int4" => ScalarKind::Int32,
        "int8" => ScalarKind::Int64,
        "float4" => ScalarKind::Float32,
        "float8" => ScalarKind::Float64,
        "numeric" => ScalarKind::Numeric { precision: None, scale: None },
        "bool" => ScalarKind::Bool,
        "text" => ScalarKind::Text,
        "varchar" => ScalarKind::Varchar(None),
        "bpchar" => ScalarKind::Char(None),
        "uuid" => ScalarKind::Uuid,
        "date" => ScalarKind::Date,
        "timestamp" => ScalarKind::Timestamp,
        "timestamptz" => ScalarKind::TimestampTz,
        "time" => ScalarKind::Time,
        "timetz" => ScalarKind::TimeTz,
        "interval" => ScalarKind::Interval,
        "json" => ScalarKind::Json,
        "jsonb" => ScalarKind::Jsonb,
        "bytea" => ScalarKind::Bytea,
        "inet" => ScalarKind::Inet,
        "cidr" => ScalarKind::Cidr,
        "macaddr" | "macaddr8" => ScalarKind::MacAddr,
        "bit" => ScalarKind::Bit,
        "varbit" => ScalarKind::VarBit,
        "xml" => ScalarKind::Xml,
        _ => return None,
    })
}

/// Raw column shape straight out of information_schema.
#[derive(Debug, Clone)]
pub struct RawColumnType {
    pub data_type: String,
    pub udt_name: String,
    pub domain_name: Option<String>,
    pub char_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
}

/// Resolve a raw catalog type against the schema's custom types.
pub fn parse_type(
    raw: &RawColumnType,
    enums: &BTreeMap<String, CustomEnum>,
    composites: &BTreeMap<String, CustomComposite>,
) -> TypeDescriptor {
    let resolved = parse_base_type(raw, enums, composites);
    if raw.domain_name.is_some() {
        TypeDescriptor::Domain(Box::new(resolved))
    } else {
        resolved
    }
}

fn parse_base_type(
    raw: &RawColumnType,
    enums: &BTreeMap<String, CustomEnum>,
    composites: &BTreeMap<String, CustomComposite>,
) -> TypeDescriptor {
    match raw.data_type.as_str() {
        "ARRAY" => {
            // Array udt names are the element name with a leading underscore.
            let element = raw.udt_name.strip_prefix('_').unwrap_or(&raw.udt_name);
            TypeDescriptor::Array(Box::new(resolve_named(element, enums, composites)))
        }
        "USER-DEFINED" => resolve_named(&raw.udt_name, enums, composites),
        "character varying" => {
            TypeDescriptor::Scalar(ScalarKind::Varchar(raw.char_length.map(|l| l as u32)))
        }
        "character" => {
            TypeDescriptor::Scalar(ScalarKind::Char(raw.char_length.map(|l| l as u32)))
        }
        "numeric" => TypeDescriptor::Scalar(ScalarKind::Numeric {
            precision: raw.numeric_precision.map(|p| p as u32),
            scale: raw.numeric_scale.map(|s| s as u32),
        }),
        _ => match kind_from_udt(&raw.udt_name) {
            Some(kind) => TypeDescriptor::Scalar(kind),
            None => resolve_named(&raw.udt_name, enums, composites),
        },
    }
}

fn resolve_named(
    name: &str,
    enums: &BTreeMap<String, CustomEnum>,
    composites: &BTreeMap<String, CustomComposite>,
) -> TypeDescriptor {
    if let Some(kind) = kind_from_udt(name) {
        return TypeDescriptor::Scalar(kind);
    }
    if let Some(custom) = enums.get(name) {
        return TypeDescriptor::Enum { name: custom.name.clone(), values: custom.values.clone() };
    }
    if let Some(custom) = composites.get(name) {
        return TypeDescriptor::Composite {
            name: custom.name.clone(),
            fields: custom.attributes.clone(),
        };
    }
    TypeDescriptor::Unknown(name.to_string())
}

/// Reads the catalog and assembles [`DatabaseModel`]s, caching per schema.
pub struct SchemaReflector {
    db: Database,
    cache: TtlCache<String, Arc<DatabaseModel>>,
}

impl SchemaReflector {
    pub fn new(db: Database, ttl: Duration) -> Self {
        Self { db, cache: TtlCache::new(ttl) }
    }

    /// Reflect `schema`, serving from cache within the TTL.
    pub async fn reflect(&self, schema: &str) -> ApiResult<Arc<DatabaseModel>> {
        let db = self.db.clone();
        let schema_owned = schema.to_string();
        let model = self
            .cache
            .compute_if_absent(schema.to_string(), || async move {
                let model = reflect_schema(&db, &schema_owned).await?;
                Ok(Some(Arc::new(model)))
            })
            .await?;
        model.ok_or_else(|| ApiError::Internal("reflection yielded no model".into()))
    }

    /// Drop the cached model for `schema`.
    pub async fn invalidate(&self, schema: &str) {
        self.cache.remove(&schema.to_string()).await;
    }

    pub async fn custom_enums(&self, schema: &str) -> ApiResult<BTreeMap<String, CustomEnum>> {
        load_enums(&self.db, schema).await
    }

    pub async fn custom_composites(
        &self,
        schema: &str,
    ) -> ApiResult<BTreeMap<String, CustomComposite>> {
        let enums = load_enums(&self.db, schema).await?;
        load_composites(&self.db, schema, &enums).await
    }
}

/// One full reflection pass.
pub async fn reflect_schema(db: &Database, schema: &str) -> ApiResult<DatabaseModel> {
    let started = std::time::Instant::now();

    let enums = load_enums(db, schema).await?;
    let composites = load_composites(db, schema, &enums).await?;

    // 1. Relations: tables and views in one query.
    let relation_rows = sqlx::query(
        "SELECT table_name, table_type \
         FROM information_schema.tables \
         WHERE table_schema = $1 AND table_type IN ('BASE TABLE', 'VIEW') \
         ORDER BY table_name",
    )
    .bind(schema)
    .fetch_all(db.pool())
    .await?;

    let mut tables: BTreeMap<String, TableEntry> = BTreeMap::new();
    for row in &relation_rows {
        let name: String = row.try_get("table_name")?;
        let table_type: String = row.try_get("table_type")?;
        tables.insert(
            name.clone(),
            TableEntry {
                name,
                is_view: table_type == "VIEW",
                columns: Vec::new(),
                foreign_keys: Vec::new(),
            },
        );
    }

    // 2. All columns for those relations in one query.
    let column_rows = sqlx::query(
        "SELECT table_name, column_name, data_type, udt_name, domain_name, is_nullable, \
                character_maximum_length, numeric_precision, numeric_scale \
         FROM information_schema.columns \
         WHERE table_schema = $1 \
         ORDER BY table_name, ordinal_position",
    )
    .bind(schema)
    .fetch_all(db.pool())
    .await?;

    for row in &column_rows {
        let table_name: String = row.try_get("table_name")?;
        let Some(table) = tables.get_mut(&table_name) else {
            continue;
        };
        let raw = RawColumnType {
            data_type: row.try_get("data_type")?,
            udt_name: row.try_get("udt_name")?,
            domain_name: row.try_get("domain_name")?,
            char_length: row.try_get("character_maximum_length")?,
            numeric_precision: row.try_get("numeric_precision")?,
            numeric_scale: row.try_get("numeric_scale")?,
        };
        let is_nullable: String = row.try_get("is_nullable")?;
        table.columns.push(ColumnEntry {
            name: row.try_get("column_name")?,
            type_descriptor: parse_type(&raw, &enums, &composites),
            is_primary_key: false,
            is_nullable: is_nullable == "YES",
        });
    }

    // 3. Primary keys in one query.
    let pk_rows = sqlx::query(
        "SELECT tc.table_name, kcu.column_name \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON tc.constraint_name = kcu.constraint_name \
          AND tc.table_schema = kcu.table_schema \
         WHERE tc.table_schema = $1 AND tc.constraint_type = 'PRIMARY KEY'",
    )
    .bind(schema)
    .fetch_all(db.pool())
    .await?;

    for row in &pk_rows {
        let table_name: String = row.try_get("table_name")?;
        let column_name: String = row.try_get("column_name")?;
        if let Some(table) = tables.get_mut(&table_name) {
            if let Some(column) = table.columns.iter_mut().find(|c| c.name == column_name) {
                column.is_primary_key = true;
                column.is_nullable = false;
            }
        }
    }

    // 4. Foreign keys in one query.
    let fk_rows = sqlx::query(
        "SELECT tc.table_name, kcu.column_name, \
                ccu.table_name AS referenced_table, ccu.column_name AS referenced_column \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON tc.constraint_name = kcu.constraint_name \
          AND tc.table_schema = kcu.table_schema \
         JOIN information_schema.constraint_column_usage ccu \
           ON ccu.constraint_name = tc.constraint_name \
          AND ccu.table_schema = tc.table_schema \
         WHERE tc.table_schema = $1 AND tc.constraint_type = 'FOREIGN KEY'",
    )
    .bind(schema)
    .fetch_all(db.pool())
    .await?;

    let known: Vec<String> = tables.keys().cloned().collect();
    for row in &fk_rows {
        let table_name: String = row.try_get("table_name")?;
        let referenced_table: String = row.try_get("referenced_table")?;
        // Cross-schema references fall outside the surfaced model.
        if !known.contains(&referenced_table) {
            continue;
        }
        if let Some(table) = tables.get_mut(&table_name) {
            table.foreign_keys.push(ForeignKey {
                column: row.try_get("column_name")?,
                referenced_table,
                referenced_column: row.try_get("referenced_column")?,
            });
        }
    }

    let model = DatabaseModel { schema: schema.to_string(), tables, enums, composites };
    model.check_invariants().map_err(ApiError::Internal)?;

    tracing::info!(
        schema = schema,
        tables = model.tables.len(),
        enums = model.enums.len(),
        composites = model.composites.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "schema reflected"
    );
    Ok(model)
}

/// Custom enum types with their ordered value lists.
async fn load_enums(db: &Database, schema: &str) -> ApiResult<BTreeMap<String, CustomEnum>> {
    let rows = sqlx::query(
        "SELECT t.typname::text AS name, e.enumlabel::text AS value \
         FROM pg_type t \
         JOIN pg_enum e ON e.enumtypid = t.oid \
         JOIN pg_namespace n ON n.oid = t.typnamespace \
         WHERE n.nspname = $1 \
         ORDER BY t.typname, e.enumsortorder",
    )
    .bind(schema)
    .fetch_all(db.pool())
    .await?;

    let mut enums: BTreeMap<String, CustomEnum> = BTreeMap::new();
    for row in &rows {
        let name: String = row.try_get("name")?;
        let value: String = row.try_get("value")?;
        enums
            .entry(name.clone())
            .or_insert_with(|| CustomEnum { name, schema: schema.to_string(), values: Vec::new() })
            .values
            .push(value);
    }
    Ok(enums)
}

/// Custom composite types with attributes in ordinal order.
async fn load_composites(
    db: &Database,
    schema: &str,
    enums: &BTreeMap<String, CustomEnum>,
) -> ApiResult<BTreeMap<String, CustomComposite>> {
    let rows = sqlx::query(
        "SELECT t.typname::text AS name, a.attname::text AS attr, a.attnum AS ordinal, \
                a.attnotnull AS not_null, bt.typname::text AS attr_type \
         FROM pg_type t \
         JOIN pg_class c ON c.oid = t.typrelid \
         JOIN pg_namespace n ON n.oid = t.typnamespace \
         JOIN pg_attribute a ON a.attrelid = c.oid \
         JOIN pg_type bt ON bt.oid = a.atttypid \
         WHERE n.nspname = $1 AND c.relkind = 'c' \
           AND a.attnum > 0 AND NOT a.attisdropped \
         ORDER BY t.typname, a.attnum",
    )
    .bind(schema)
    .fetch_all(db.pool())
    .await?;

    let no_composites = BTreeMap::new();
    let mut composites: BTreeMap<String, CustomComposite> = BTreeMap::new();
    for row in &rows {
        let name: String = row.try_get("name")?;
        let attr_type: String = row.try_get("attr_type")?;
        let not_null: bool = row.try_get("not_null")?;
        let attribute = CompositeAttribute {
            name: row.try_get("attr")?,
            type_descriptor: resolve_named(&attr_type, enums, &no_composites),
            order: row.try_get::<i16, _>("ordinal")? as i32,
            nullable: !not_null,
        };
        composites
            .entry(name.clone())
            .or_insert_with(|| CustomComposite {
                name,
                schema: schema.to_string(),
                attributes: Vec::new(),
            })
            .attributes
            .push(attribute);
    }
    Ok(composites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(data_type: &str, udt: &str) -> RawColumnType {
        RawColumnType {
            data_type: data_type.into(),
            udt_name: udt.into(),
            domain_name: None,
            char_length: None,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    #[test]
    fn parses_builtin_scalars() {
        let none = BTreeMap::new();
        let cases = [
            ("integer", "int4", ScalarKind::Int32),
            ("bigint", "int8", ScalarKind::Int64),
            ("smallint", "int2", ScalarKind::SmallInt),
            ("boolean", "bool", ScalarKind::Bool),
            ("uuid", "uuid", ScalarKind::Uuid),
            ("jsonb", "jsonb", ScalarKind::Jsonb),
            ("timestamp with time zone", "timestamptz", ScalarKind::TimestampTz),
        ];
        for (data_type, udt, expected) in cases {
            assert_eq!(
                parse_type(&raw(data_type, udt), &none, &none),
                TypeDescriptor::Scalar(expected.clone()),
                "{data_type}"
            );
        }
    }

    #[test]
    fn parses_varchar_length_and_numeric_precision() {
        let none = BTreeMap::new();
        let mut vc = raw("character varying", "varchar");
        vc.char_length = Some(45);
        assert_eq!(
            parse_type(&vc, &none, &none),
            TypeDescriptor::Scalar(ScalarKind::Varchar(Some(45)))
        );

        let mut num = raw("numeric", "numeric");
        num.numeric_precision = Some(10);
        num.numeric_scale = Some(2);
        assert_eq!(
            parse_type(&num, &none, &none),
            TypeDescriptor::Scalar(ScalarKind::Numeric { precision: Some(10), scale: Some(2) })
        );
    }

    #[test]
    fn parses_arrays_enums_and_domains() {
        let mut enums = BTreeMap::new();
        enums.insert(
            "mood".to_string(),
            CustomEnum {
                name: "mood".into(),
                schema: "public".into(),
                values: vec!["happy".into(), "sad".into()],
            },
        );
        let none = BTreeMap::new();

        assert_eq!(
            parse_type(&raw("ARRAY", "_int4"), &enums, &none),
            TypeDescriptor::Array(Box::new(TypeDescriptor::Scalar(ScalarKind::Int32)))
        );

        assert_eq!(
            parse_type(&raw("USER-DEFINED", "mood"), &enums, &none),
            TypeDescriptor::Enum { name: "mood".into(), values: vec!["happy".into(), "sad".into()] }
        );

        let mut dom = raw("integer", "int4");
        dom.domain_name = Some("positive_int".into());
        assert_eq!(
            parse_type(&dom, &enums, &none),
            TypeDescriptor::Domain(Box::new(TypeDescriptor::Scalar(ScalarKind::Int32)))
        );

        assert_eq!(
            parse_type(&raw("USER-DEFINED", "geometry"), &enums, &none),
            TypeDescriptor::Unknown("geometry".into())
        );
    }
}
