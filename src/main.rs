//! Lattice — auto-generated GraphQL API over PostgreSQL.
//!
//! Reflects the configured database schema, derives a role-scoped GraphQL
//! schema per request role, and serves queries, mutations and
//! subscriptions at /graphql.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lattice::config::Config;
use lattice::db::Database;
use lattice::graphql::{self, AppState, SchemaService};
use lattice::meta::{FullSchemaService, RolePrivilegeService};
use lattice::schema_registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lattice=info,tower_http=info".into());
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(schema = %config.allowed_schema, "connecting to database");
    let db = Database::connect_with_retry(
        &config.database_url,
        std::time::Duration::from_secs(30),
    )
    .await?;
    tracing::info!("database connected");

    let bundle = schema_registry::dialect_bundle(&db, &config);
    let golden = FullSchemaService::new(bundle.reflector.clone(), config.allowed_schema.clone());
    let privileges = RolePrivilegeService::new(
        db.clone(),
        config.allowed_schema.clone(),
        config.schema_ttl(),
    );
    let schemas = Arc::new(SchemaService::new(
        golden,
        privileges,
        bundle.fetcher,
        bundle.mutator,
        bundle.broker,
        config.clone(),
    ));

    // Warm the golden reflection so the first request does not pay for it.
    match schemas.schema_for_role(None).await {
        Ok(_) => tracing::info!("golden schema compiled"),
        Err(e) => tracing::warn!(error = %e, "golden schema warm-up failed; will retry on demand"),
    }

    let state = AppState { config: config.clone(), db, schemas };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(graphql::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(port = config.port, "listening");
    tracing::info!("GraphQL playground: http://localhost:{}/graphql", config.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
}
