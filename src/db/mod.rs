//! Database connection and role-scoped access.
//!
//! A single [`PgPool`] serves every request. Role-aware execution wraps each
//! unit of work in a transaction that applies `SET LOCAL ROLE`, so the role
//! never outlives the transaction and pooled connections return clean.

use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{ApiError, ApiResult};
use crate::sql::quote_ident;

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a pool without establishing a connection yet. Connections
    /// open on first use; schema generation and SQL building never need
    /// one.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect_lazy(url)?;
        Ok(Self { pool })
    }

    /// Connect with retry, waiting for the database to become available.
    pub async fn connect_with_retry(url: &str, max_wait: Duration) -> Result<Self> {
        let deadline = std::time::Instant::now() + max_wait;
        loop {
            match Self::connect(url).await {
                Ok(db) => return Ok(db),
                Err(e) if std::time::Instant::now() < deadline => {
                    tracing::warn!(error = %e, "database not ready, retrying in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction with the given role applied via `SET LOCAL ROLE`.
    ///
    /// The role must equal the role used to choose the GraphQL schema for
    /// the request. `None` (or an empty string) keeps the pool's login role.
    pub async fn begin_as(&self, role: Option<&str>) -> ApiResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(ApiError::from)?;
        if let Some(role) = role.filter(|r| !r.is_empty()) {
            // Role names cannot be bound as parameters; quote like any other
            // identifier.
            let stmt = format!("SET LOCAL ROLE {}", quote_ident(role));
            sqlx::query(&stmt)
                .execute(&mut *tx)
                .await
                .map_err(|e| ApiError::Validation(format!("cannot assume role {role}: {e}")))?;
        }
        Ok(tx)
    }

    /// Check connectivity; used by the health route.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
