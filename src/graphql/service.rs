//! GraphQL HTTP surface: POST /graphql, GraphiQL on GET, and the WebSocket
//! upgrade on the same path.
//!
//! The role is an opaque string taken from the `x-role` header; it selects
//! the compiled schema for the request and is applied on the connection for
//! every statement the request runs.

use std::sync::Arc;
use std::time::Duration;

use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;

use crate::config::Config;
use crate::db::Database;
use crate::fetch::BatchLoader;
use crate::graphql::complexity;
use crate::graphql::schema::{RequestRole, SchemaService};
use crate::graphql::ws::{self, WsLimits};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub schemas: Arc<SchemaService>,
}

/// Router for /graphql, /health and the schema-refresh hook. Merge into
/// the app and call `.with_state(state)` on the combined router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/graphql", get(graphql_get).post(graphql_handler))
        .route("/health", get(health))
        .route("/admin/schema/refresh", axum::routing::post(refresh_schema))
}

const ROLE_HEADER: &str = "x-role";

fn extract_role(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ROLE_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn error_response(message: String) -> GraphQLResponse {
    async_graphql::Response::from_errors(vec![async_graphql::ServerError::new(message, None)])
        .into()
}

async fn graphql_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: GraphQLRequest,
) -> GraphQLResponse {
    let role = extract_role(&headers);
    // The role applied on the connection must be the one that chose the
    // schema, so resolvers get the effective role back, not the header.
    let (schema, effective_role) = match state.schemas.schema_for_role(role.as_deref()).await {
        Ok(resolved) => resolved,
        Err(e) => return error_response(e.to_string()),
    };

    let mut request = req.into_inner();

    // Depth/complexity budget, enforced before execution.
    match async_graphql::parser::parse_query(&request.query) {
        Ok(doc) => {
            if let Err(e) = complexity::check_limits(
                &doc,
                state.config.max_query_depth,
                state.config.max_query_complexity,
            ) {
                return error_response(e.to_string());
            }
        }
        Err(e) => return error_response(format!("parse error: {e}")),
    }

    request = request
        .data(RequestRole(effective_role))
        .data(Arc::new(BatchLoader::new()));

    let budget = Duration::from_secs(state.config.request_timeout_secs);
    match tokio::time::timeout(budget, schema.execute(request)).await {
        Ok(response) => response.into(),
        Err(_) => error_response(format!(
            "request exceeded the {}s time budget",
            state.config.request_timeout_secs
        )),
    }
}

/// GET /graphql: WebSocket upgrade when requested, GraphiQL for browsers,
/// 405 otherwise.
async fn graphql_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, axum::extract::ws::WebSocketUpgradeRejection>,
) -> axum::response::Response {
    if let Ok(ws) = ws {
        let role = extract_role(&headers);
        let (schema, effective_role) =
            match state.schemas.schema_for_role(role.as_deref()).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    return (
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                        axum::Json(serde_json::json!({ "error": e.to_string() })),
                    )
                        .into_response();
                }
            };
        let limits = WsLimits {
            max_depth: state.config.max_query_depth,
            max_complexity: state.config.max_query_complexity,
        };
        // Subscriptions run under the role that chose this schema.
        let session_role = RequestRole(effective_role);
        return ws
            .protocols(["graphql-transport-ws"])
            .on_upgrade(move |socket| ws::serve(socket, schema, session_role, limits))
            .into_response();
    }

    let accepts_html = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false);

    if accepts_html {
        axum::response::Html(
            GraphiQLSource::build()
                .endpoint("/graphql")
                .subscription_endpoint("/graphql")
                .finish(),
        )
        .into_response()
    } else {
        (
            axum::http::StatusCode::METHOD_NOT_ALLOWED,
            axum::Json(serde_json::json!({
                "error": "GET requests are not supported for GraphQL queries. Use POST with Content-Type: application/json"
            })),
        )
            .into_response()
    }
}

/// Drop every derived cache (golden model, role privileges, compiled
/// schemas) and recompile the golden schema immediately. DDL applied to the
/// database shows up here without waiting out the TTL.
async fn refresh_schema(State(state): State<AppState>) -> impl IntoResponse {
    state.schemas.clear().await;
    match state.schemas.schema_for_role(None).await {
        Ok(_) => axum::Json(serde_json::json!({ "status": "refreshed" })).into_response(),
        Err(e) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database_up = state.db.ping().await;
    let stats = state.schemas.cache_stats().await;
    let status = if database_up { "ok" } else { "degraded" };
    axum::Json(serde_json::json!({
        "status": status,
        "database": database_up,
        "schema_cache": {
            "entries": stats.entries,
            "hits": stats.hits,
            "misses": stats.misses,
        },
    }))
}
