//! MCP proxy endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;

use gobby_core::ProjectContext;
use gobby_storage::models::{McpServerConfig, McpTransport};

use crate::error::{ApiError, ApiResult};
use crate::state::DaemonContext;

/// `GET /mcp/servers`
pub async fn list_servers(State(context): State<DaemonContext>) -> Json<Value> {
    let servers = context.mcp.server_statuses().await;
    Json(json!({"servers": servers}))
}

/// `GET /mcp/{server}/tools`
pub async fn list_tools(
    State(context): State<DaemonContext>,
    Path(server): Path<String>,
) -> ApiResult<Json<Value>> {
    match context.mcp.list_tools(&server).await {
        Ok(tools) => Ok(Json(json!({"server": server, "tools": tools}))),
        Err(e) => Err(ApiError::from_mcp_listing(&e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct CallToolBody {
    server_name: String,
    tool_name: String,
    #[serde(default)]
    arguments: Value,
}

/// `POST /mcp/tools/call`
pub async fn call_tool(
    State(context): State<DaemonContext>,
    Json(body): Json<CallToolBody>,
) -> ApiResult<Json<Value>> {
    match context
        .mcp
        .call_tool(&body.server_name, &body.tool_name, body.arguments, None)
        .await
    {
        Ok(result) => Ok(Json(json!({
            "success": true,
            "server": body.server_name,
            "tool": body.tool_name,
            "result": result,
        }))),
        Err(e) => Err(ApiError::from_mcp_call(&e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ToolSchemaBody {
    server_name: String,
    tool_name: String,
}

/// `POST /mcp/tools/schema`
pub async fn tool_schema(
    State(context): State<DaemonContext>,
    Json(body): Json<ToolSchemaBody>,
) -> ApiResult<Json<Value>> {
    match context
        .mcp
        .get_tool_input_schema(&body.server_name, &body.tool_name)
        .await
    {
        Ok(schema) => Ok(Json(json!({
            "success": true,
            "server": body.server_name,
            "tool": {"name": body.tool_name, "inputSchema": schema},
        }))),
        Err(e) => Err(ApiError::from_mcp_listing(&e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct AddServerBody {
    name: String,
    transport: String,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    description: Option<String>,
}

fn default_true() -> bool {
    true
}

/// `POST /mcp/servers`
pub async fn add_server(
    State(context): State<DaemonContext>,
    Json(body): Json<AddServerBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let transport = McpTransport::parse(&body.transport)
        .ok_or_else(|| ApiError::bad_request(format!("unknown transport '{}'", body.transport)))?;
    match transport {
        McpTransport::Http | McpTransport::Websocket if body.url.is_none() => {
            return Err(ApiError::bad_request("url is required for this transport"));
        }
        McpTransport::Stdio if body.command.is_none() => {
            return Err(ApiError::bad_request("command is required for stdio"));
        }
        _ => {}
    }

    let config = McpServerConfig {
        name: body.name.clone(),
        project_id: body.project_id,
        transport,
        url: body.url,
        command: body.command,
        args: body.args,
        env: body.env,
        headers: body.headers,
        enabled: body.enabled,
        description: body.description,
    };
    context
        .mcp
        .add_server(config)
        .await
        .map_err(|e| ApiError::from_mcp_call(&e))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"success": true, "name": body.name})),
    ))
}

/// `DELETE /mcp/servers/{name}`
pub async fn remove_server(
    State(context): State<DaemonContext>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    context
        .mcp
        .remove_server(&name)
        .await
        .map_err(|e| ApiError::from_mcp_listing(&e))?;
    Ok(Json(json!({"success": true, "name": name})))
}

#[derive(Debug, Deserialize)]
pub struct ImportBody {
    /// Source project to copy servers from.
    from_project: String,
    /// Restrict to these server names (all when empty).
    #[serde(default)]
    servers: Vec<String>,
}

/// `POST /mcp/servers/import` — copy server configs between projects.
pub async fn import_servers(
    State(context): State<DaemonContext>,
    Json(body): Json<ImportBody>,
) -> ApiResult<Json<Value>> {
    let db_store = gobby_storage::mcp::McpStore::new(context.db.clone());
    let source = db_store.list_servers(Some(&body.from_project))?;

    let mut imported = Vec::new();
    for config in source {
        // Only project-scoped servers are importable; globals are
        // already visible everywhere.
        if config.project_id.as_deref() != Some(body.from_project.as_str()) {
            continue;
        }
        if !body.servers.is_empty() && !body.servers.contains(&config.name) {
            continue;
        }
        let mut copied = config.clone();
        copied.project_id = None;
        context
            .mcp
            .add_server(copied)
            .await
            .map_err(|e| ApiError::from_mcp_call(&e))?;
        imported.push(config.name);
    }

    Ok(Json(json!({"success": true, "imported": imported})))
}

#[derive(Debug, Deserialize)]
pub struct RefreshBody {
    server_name: String,
}

/// `POST /mcp/refresh` — re-list tools and diff by schema hash.
pub async fn refresh(
    State(context): State<DaemonContext>,
    Json(body): Json<RefreshBody>,
) -> ApiResult<Json<Value>> {
    match context.mcp.refresh_tools(&body.server_name).await {
        Ok(diff) => Ok(Json(json!({
            "success": true,
            "server": body.server_name,
            "new": diff.new,
            "changed": diff.changed,
            "unchanged": diff.unchanged,
            "removed": diff.removed,
        }))),
        Err(e) => Err(ApiError::from_mcp_listing(&e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct RecommendBody {
    task_description: String,
    #[serde(default)]
    cwd: Option<String>,
}

/// `POST /mcp/tools/recommend` — LLM-backed recommendation over cached
/// tools. Project-resolution failures answer HTTP 200 with a JSON error
/// object so CLI-side tooling can render them.
pub async fn recommend_tools(
    State(context): State<DaemonContext>,
    Json(body): Json<RecommendBody>,
) -> Json<Value> {
    let Some(project_id) = resolve_project(&body.cwd) else {
        return Json(json!({
            "success": false,
            "error": "Could not resolve project from cwd",
        }));
    };

    let db_store = gobby_storage::mcp::McpStore::new(context.db.clone());
    let servers = match db_store.list_servers(Some(&project_id)) {
        Ok(servers) => servers,
        Err(e) => {
            return Json(json!({"success": false, "error": e.to_string()}));
        }
    };

    let mut summary = String::new();
    let mut total_tools = 0usize;
    let mut server_names = Vec::new();
    for server in &servers {
        let tools = db_store
            .cached_tools(&server.name, server.project_id.as_deref())
            .unwrap_or_default();
        if tools.is_empty() {
            continue;
        }
        server_names.push(server.name.clone());
        summary.push_str(&format!("\n**{}**:\n", server.name));
        for tool in tools {
            total_tools += 1;
            summary.push_str(&format!(
                "  - {}\n    {}\n",
                tool.tool_name,
                tool.description.unwrap_or_default()
            ));
        }
    }

    if total_tools == 0 {
        return Json(json!({
            "success": false,
            "error": "No MCP tools available. Connect to MCP servers first.",
        }));
    }

    let prompt = format!(
        "The user is trying to: {}\n\nAvailable MCP tools:\n{summary}\n\
         Recommend which tool(s) would be most helpful and why. If none \
         are relevant, say so clearly.",
        body.task_description
    );
    match context.llm.generate(&prompt, None).await {
        Ok(recommendation) => Json(json!({
            "success": true,
            "task": body.task_description,
            "recommendation": recommendation.trim(),
            "available_servers": server_names,
            "total_tools": total_tools,
        })),
        Err(e) => Json(json!({
            "success": false,
            "task": body.task_description,
            "error": e.to_string(),
        })),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    query: String,
    #[serde(default)]
    cwd: Option<String>,
}

/// `POST /mcp/tools/search` — substring search over cached tools.
pub async fn search_tools(
    State(context): State<DaemonContext>,
    Json(body): Json<SearchBody>,
) -> Json<Value> {
    let Some(project_id) = resolve_project(&body.cwd) else {
        return Json(json!({
            "success": false,
            "error": "Could not resolve project from cwd",
        }));
    };

    let db_store = gobby_storage::mcp::McpStore::new(context.db.clone());
    let needle = body.query.to_lowercase();
    let mut matches = Vec::new();
    if let Ok(servers) = db_store.list_servers(Some(&project_id)) {
        for server in servers {
            let tools = db_store
                .cached_tools(&server.name, server.project_id.as_deref())
                .unwrap_or_default();
            for tool in tools {
                let haystack = format!(
                    "{} {}",
                    tool.tool_name,
                    tool.description.as_deref().unwrap_or_default()
                )
                .to_lowercase();
                if haystack.contains(&needle) {
                    matches.push(json!({
                        "server": server.name,
                        "name": tool.tool_name,
                        "description": tool.description,
                    }));
                }
            }
        }
    }
    Json(json!({"success": true, "query": body.query, "matches": matches}))
}

/// `POST /mcp/tools/embed` — semantic indexing hook; answers a JSON
/// error until an embedding provider is wired.
pub async fn embed_tools(Json(body): Json<SearchBody>) -> Json<Value> {
    if resolve_project(&body.cwd).is_none() {
        return Json(json!({
            "success": false,
            "error": "Could not resolve project from cwd",
        }));
    }
    Json(json!({
        "success": false,
        "error": "No embedding provider configured",
    }))
}

fn resolve_project(cwd: &Option<String>) -> Option<String> {
    let cwd = cwd.as_deref()?;
    ProjectContext::discover(std::path::Path::new(cwd)).map(|ctx| ctx.id.to_string())
}
