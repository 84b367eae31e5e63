//! `POST /hooks/execute` — the hook ingestion endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use gobby_adapters::adapter_for;
use gobby_core::SessionSource;

use crate::error::{ApiError, ApiResult};
use crate::state::DaemonContext;

/// Wire shape posted by every CLI-side hook dispatcher.
#[derive(Debug, Deserialize)]
pub struct ExecuteHookBody {
    /// CLI-specific hook name.
    #[serde(default)]
    pub hook_type: Option<String>,
    /// Which CLI is calling.
    #[serde(default)]
    pub source: Option<String>,
    /// The native payload, opaque until the adapter parses it.
    #[serde(default)]
    pub input_data: Value,
}

/// Translate, dispatch, translate back.
pub async fn execute(
    State(context): State<DaemonContext>,
    Json(body): Json<ExecuteHookBody>,
) -> ApiResult<Json<Value>> {
    let hook_type = body
        .hook_type
        .as_deref()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing hook_type"))?;
    let source_raw = body
        .source
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing source"))?;
    let source = SessionSource::parse(source_raw)
        .ok_or_else(|| ApiError::bad_request(format!("unknown source '{source_raw}'")))?;

    let Some(dispatcher) = &context.dispatcher else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "hook dispatcher not initialized",
        ));
    };

    let adapter = adapter_for(source);
    let native = gobby_hooks::handle_native(
        adapter.as_ref(),
        dispatcher.as_ref(),
        hook_type,
        &body.input_data,
    )
    .await;
    Ok(Json(native))
}
