//! Application configuration management

use std::env;

use anyhow::{Context, Result};

/// Supported database dialects. Only PostgreSQL today; the registry in
/// `schema_registry` is keyed by this so a second dialect slots in without
/// touching call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    Postgres,
}

impl DatabaseType {
    fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            other => anyhow::bail!("unsupported DATABASE_TYPE: {other}"),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (for generating URLs)
    pub host: Option<String>,

    /// Server port
    pub port: u16,

    /// Database connection URL (PostgreSQL)
    pub database_url: String,

    /// Database dialect
    pub database_type: DatabaseType,

    /// The single database schema surfaced through GraphQL
    pub allowed_schema: String,

    /// TTL for the reflected schema, role privileges and compiled
    /// per-role GraphQL schemas, in minutes
    pub schema_ttl_minutes: u64,

    /// When false, every request is served the full schema regardless of
    /// role
    pub role_based_schema: bool,

    /// Maximum GraphQL query depth accepted by the executor
    pub max_query_depth: usize,

    /// Maximum GraphQL query complexity accepted by the executor
    pub max_query_complexity: usize,

    /// Per-request time budget in seconds
    pub request_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is required")?;

        let database_type = match env::var("DATABASE_TYPE") {
            Ok(raw) => DatabaseType::parse(&raw)?,
            Err(_) => DatabaseType::Postgres,
        };

        Ok(Self {
            host: env::var("HOST").ok(),

            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .context("Invalid PORT")?,

            database_url,

            database_type,

            allowed_schema: env::var("ALLOWED_SCHEMA").unwrap_or_else(|_| "public".to_string()),

            schema_ttl_minutes: env::var("SCHEMA_TTL_MINUTES")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid SCHEMA_TTL_MINUTES")?,

            role_based_schema: env::var("ROLE_BASED_SCHEMA")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),

            max_query_depth: env::var("MAX_QUERY_DEPTH")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid MAX_QUERY_DEPTH")?,

            max_query_complexity: env::var("MAX_QUERY_COMPLEXITY")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("Invalid MAX_QUERY_COMPLEXITY")?,

            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid REQUEST_TIMEOUT_SECS")?,
        })
    }

    /// TTL as a [`std::time::Duration`] for the cache layer.
    pub fn schema_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.schema_ttl_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_database_type() {
        assert_eq!(DatabaseType::parse("postgres").unwrap(), DatabaseType::Postgres);
        assert_eq!(DatabaseType::parse("PostgreSQL").unwrap(), DatabaseType::Postgres);
        assert!(DatabaseType::parse("mysql").is_err());
    }
}
