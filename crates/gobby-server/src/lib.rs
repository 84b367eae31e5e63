//! HTTP/WS boundary for the Gobby daemon.
//!
//! One axum router over an explicit [`DaemonContext`]: hook ingestion at
//! `/hooks/execute`, the MCP proxy under `/mcp`, the task/project/config
//! REST surface, and the event stream at `/ws/events`.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ApiResult};
pub use state::DaemonContext;

/// Build the daemon's router.
#[must_use]
pub fn router(context: DaemonContext) -> Router {
    Router::new()
        // Hook ingestion
        .route("/hooks/execute", post(routes::hooks::execute))
        // MCP proxy
        .route("/mcp/servers", get(routes::mcp::list_servers).post(routes::mcp::add_server))
        .route("/mcp/servers/import", post(routes::mcp::import_servers))
        .route("/mcp/servers/{name}", delete(routes::mcp::remove_server))
        .route("/mcp/{server}/tools", get(routes::mcp::list_tools))
        .route("/mcp/tools/call", post(routes::mcp::call_tool))
        .route("/mcp/tools/schema", post(routes::mcp::tool_schema))
        .route("/mcp/tools/recommend", post(routes::mcp::recommend_tools))
        .route("/mcp/tools/search", post(routes::mcp::search_tools))
        .route("/mcp/tools/embed", post(routes::mcp::embed_tools))
        .route("/mcp/refresh", post(routes::mcp::refresh))
        // Tasks
        .route("/tasks", get(routes::tasks::list).post(routes::tasks::create))
        .route(
            "/tasks/{reference}",
            get(routes::tasks::get)
                .patch(routes::tasks::patch)
                .delete(routes::tasks::delete),
        )
        .route("/tasks/{reference}/close", post(routes::tasks::close))
        .route("/tasks/{reference}/reopen", post(routes::tasks::reopen))
        .route("/tasks/{reference}/de-escalate", post(routes::tasks::de_escalate))
        .route(
            "/tasks/{reference}/comments",
            get(routes::tasks::list_comments).post(routes::tasks::add_comment),
        )
        .route(
            "/tasks/{reference}/comments/{comment_id}",
            delete(routes::tasks::delete_comment),
        )
        .route(
            "/tasks/{reference}/dependencies",
            get(routes::tasks::list_dependencies).post(routes::tasks::add_dependency),
        )
        .route(
            "/tasks/{reference}/dependencies/{depends_on}",
            delete(routes::tasks::remove_dependency),
        )
        // Projects
        .route("/api/projects", get(routes::projects::list))
        .route(
            "/api/projects/{id}",
            get(routes::projects::get)
                .put(routes::projects::update)
                .delete(routes::projects::delete),
        )
        // Config & secrets
        .route(
            "/api/config/values",
            get(routes::config::get_values).put(routes::config::put_values),
        )
        .route("/api/config/values/validate", post(routes::config::validate_values))
        .route("/api/config/values/reset", post(routes::config::reset_values))
        .route(
            "/api/config/template",
            get(routes::config::get_template).put(routes::config::put_template),
        )
        .route(
            "/api/config/secrets",
            get(routes::config::list_secrets).post(routes::config::set_secret),
        )
        .route("/api/config/secrets/{name}", delete(routes::config::delete_secret))
        .route("/api/config/export", post(routes::config::export))
        .route("/api/config/import", post(routes::config::import))
        // Event stream
        .route("/ws/events", get(ws::events))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}
