//! Per-role privilege reading (C5).
//!
//! Reads table grants, column grants and RLS policies for a role from the
//! standard catalogs, cached per role with the schema TTL. A superuser role
//! short-circuits every later check as "everything".

use std::sync::Arc;
use std::time::Duration;

use sqlx::Row as _;

use crate::cache::TtlCache;
use crate::db::Database;
use crate::error::{ApiError, ApiResult};
use crate::meta::model::{RlsPolicy, RolePrivileges, TableOp};

fn op_from_privilege(privilege: &str) -> Option<TableOp> {
    match privilege {
        "SELECT" => Some(TableOp::Select),
        "INSERT" => Some(TableOp::Insert),
        "UPDATE" => Some(TableOp::Update),
        "DELETE" => Some(TableOp::Delete),
        // TRUNCATE / REFERENCES / TRIGGER do not shape the GraphQL surface.
        _ => None,
    }
}

pub struct RolePrivilegeService {
    db: Database,
    schema: String,
    cache: TtlCache<String, Arc<RolePrivileges>>,
}

impl RolePrivilegeService {
    pub fn new(db: Database, schema: impl Into<String>, ttl: Duration) -> Self {
        Self { db, schema: schema.into(), cache: TtlCache::new(ttl) }
    }

    /// Privileges for `role`, cached per role name.
    pub async fn get(&self, role: &str) -> ApiResult<Arc<RolePrivileges>> {
        let db = self.db.clone();
        let schema = self.schema.clone();
        let role_owned = role.to_string();
        let cached = self
            .cache
            .compute_if_absent(role.to_string(), || async move {
                let privileges = load_privileges(&db, &schema, &role_owned).await?;
                Ok(Some(Arc::new(privileges)))
            })
            .await?;
        cached.ok_or_else(|| ApiError::Internal("privilege load yielded nothing".into()))
    }

    pub async fn invalidate(&self, role: &str) {
        self.cache.remove(&role.to_string()).await;
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub async fn stats(&self) -> crate::cache::CacheStats {
        self.cache.stats().await
    }
}

/// One privilege pass for a role: existence + superuser flag, table grants,
/// column grants, then RLS policies.
pub async fn load_privileges(
    db: &Database,
    schema: &str,
    role: &str,
) -> ApiResult<RolePrivileges> {
    let role_row = sqlx::query("SELECT rolsuper FROM pg_roles WHERE rolname = $1")
        .bind(role)
        .fetch_optional(db.pool())
        .await?;

    let Some(role_row) = role_row else {
        return Err(ApiError::NotFound(format!("role {role} does not exist")));
    };
    let is_superuser: bool = role_row.try_get("rolsuper")?;
    if is_superuser {
        tracing::debug!(role = role, "superuser role, skipping grant reads");
        return Ok(RolePrivileges::superuser(role));
    }

    let mut privileges = RolePrivileges { role: role.to_string(), ..Default::default() };

    let table_rows = sqlx::query(
        "SELECT table_name, privilege_type \
         FROM information_schema.role_table_grants \
         WHERE grantee IN ($1, 'PUBLIC') AND table_schema = $2",
    )
    .bind(role)
    .bind(schema)
    .fetch_all(db.pool())
    .await?;

    for row in &table_rows {
        let table: String = row.try_get("table_name")?;
        let privilege: String = row.try_get("privilege_type")?;
        let Some(op) = op_from_privilege(&privilege) else {
            continue;
        };
        match op {
            TableOp::Select => privileges.selectable.insert(table),
            TableOp::Insert => privileges.insertable.insert(table),
            TableOp::Update => privileges.updatable.insert(table),
            TableOp::Delete => privileges.deletable.insert(table),
        };
    }

    let column_rows = sqlx::query(
        "SELECT table_name, column_name, privilege_type \
         FROM information_schema.role_column_grants \
         WHERE grantee IN ($1, 'PUBLIC') AND table_schema = $2",
    )
    .bind(role)
    .bind(schema)
    .fetch_all(db.pool())
    .await?;

    for row in &column_rows {
        let table: String = row.try_get("table_name")?;
        let column: String = row.try_get("column_name")?;
        let privilege: String = row.try_get("privilege_type")?;
        let Some(op) = op_from_privilege(&privilege) else {
            continue;
        };
        privileges
            .column_grants
            .entry((op, table))
            .or_default()
            .insert(column);
    }

    let policy_rows = sqlx::query(
        "SELECT policyname::text, tablename::text, schemaname::text, permissive::text, \
                roles::text[] AS roles, cmd::text, qual, with_check \
         FROM pg_policies \
         WHERE schemaname = $1",
    )
    .bind(schema)
    .fetch_all(db.pool())
    .await?;

    for row in &policy_rows {
        let roles: Vec<String> = row.try_get("roles")?;
        // A policy applies when it names the role or covers everyone.
        if !roles.iter().any(|r| r == role || r == "public") {
            continue;
        }
        let permissive: String = row.try_get("permissive")?;
        privileges.policies.push(RlsPolicy {
            policy_name: row.try_get("policyname")?,
            table: row.try_get("tablename")?,
            schema: row.try_get("schemaname")?,
            permissive: permissive == "PERMISSIVE",
            roles,
            command: row.try_get("cmd")?,
            using_expression: row.try_get("qual")?,
            with_check_expression: row.try_get("with_check")?,
        });
    }

    tracing::debug!(
        role = role,
        selectable = privileges.selectable.len(),
        insertable = privileges.insertable.len(),
        policies = privileges.policies.len(),
        "role privileges loaded"
    );
    Ok(privileges)
}
