//! Configuration and secret endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use gobby_config::{Config, template, validate};
use gobby_storage::models::SecretCategory;

use crate::error::{ApiError, ApiResult};
use crate::state::DaemonContext;

fn home(context: &DaemonContext) -> Option<&std::path::Path> {
    context.config_home.as_deref()
}

/// `GET /api/config/values` — the effective configuration as JSON.
pub async fn get_values(State(context): State<DaemonContext>) -> ApiResult<Json<Config>> {
    Ok(Json(gobby_config::load(home(&context))?))
}

/// `PUT /api/config/values` — replace the configuration (persisting only
/// non-default values).
pub async fn put_values(
    State(context): State<DaemonContext>,
    Json(config): Json<Config>,
) -> ApiResult<Json<Config>> {
    validate::check(&config)?;
    template::save(&config, home(&context))?;
    Ok(Json(config))
}

/// `POST /api/config/values/validate` — check a candidate config without
/// saving it.
pub async fn validate_values(Json(config): Json<Config>) -> ApiResult<Json<Value>> {
    match validate::check(&config) {
        Ok(()) => Ok(Json(json!({"valid": true}))),
        Err(e) => Ok(Json(json!({"valid": false, "error": e.to_string()}))),
    }
}

/// `POST /api/config/values/reset` — drop every override.
pub async fn reset_values(State(context): State<DaemonContext>) -> ApiResult<Json<Config>> {
    let defaults = Config::default();
    template::save(&defaults, home(&context))?;
    Ok(Json(defaults))
}

/// `GET /api/config/template` — the persisted non-default overlay as
/// YAML.
pub async fn get_template(State(context): State<DaemonContext>) -> ApiResult<String> {
    Ok(template::render(home(&context))?)
}

/// `PUT /api/config/template` — accept a YAML template; persist only
/// values that differ from the defaults.
pub async fn put_template(
    State(context): State<DaemonContext>,
    body: String,
) -> ApiResult<Json<Value>> {
    let config = template::parse(&body)?;
    template::save(&config, home(&context))?;
    Ok(Json(json!({"saved": true})))
}

/// `GET /api/config/secrets` — metadata only, never values.
pub async fn list_secrets(
    State(context): State<DaemonContext>,
) -> ApiResult<Json<Vec<gobby_storage::models::SecretInfo>>> {
    Ok(Json(context.secrets.list()?))
}

#[derive(Debug, Deserialize)]
pub struct SecretBody {
    name: String,
    value: String,
    #[serde(default)]
    category: Option<String>,
}

/// `POST /api/config/secrets`
pub async fn set_secret(
    State(context): State<DaemonContext>,
    Json(body): Json<SecretBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("secret name must not be empty"));
    }
    let category = body
        .category
        .as_deref()
        .map(|raw| {
            SecretCategory::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unknown category '{raw}'")))
        })
        .transpose()?
        .unwrap_or_default();
    context.secrets.set(&body.name, category, &body.value)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"saved": true, "name": body.name})),
    ))
}

/// `DELETE /api/config/secrets/{name}`
pub async fn delete_secret(
    State(context): State<DaemonContext>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    context.secrets.delete(&name)?;
    Ok(Json(json!({"deleted": true, "name": name})))
}

/// `POST /api/config/export` — the effective config plus secret
/// metadata (values stay sealed).
pub async fn export(State(context): State<DaemonContext>) -> ApiResult<Json<Value>> {
    let config = gobby_config::load(home(&context))?;
    let secrets = context.secrets.list()?;
    Ok(Json(json!({"config": config, "secrets": secrets})))
}

#[derive(Debug, Deserialize)]
pub struct ImportBody {
    config: Config,
}

/// `POST /api/config/import`
pub async fn import(
    State(context): State<DaemonContext>,
    Json(body): Json<ImportBody>,
) -> ApiResult<Json<Value>> {
    validate::check(&body.config)?;
    template::save(&body.config, home(&context))?;
    Ok(Json(json!({"imported": true})))
}

#[cfg(test)]
mod tests {
    use crate::router;
    use crate::state::test_support;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn call_raw(
        context: &crate::state::DaemonContext,
        method: &str,
        uri: &str,
        body: Option<String>,
        content_type: &str,
    ) -> (StatusCode, String) {
        let app = router(context.clone());
        let request = match body {
            Some(body) => Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", content_type)
                .body(Body::from(body))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn test_template_round_trip_persists_only_non_defaults() {
        let (context, _home) = test_support::context();

        let (status, _) = call_raw(
            &context,
            "PUT",
            "/api/config/template",
            Some("daemon:\n  port: 7777\n".to_string()),
            "application/yaml",
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call_raw(&context, "GET", "/api/config/template", None, "").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_yaml::Value = serde_yaml::from_str(&body).unwrap();
        assert_eq!(parsed["daemon"]["port"].as_u64(), Some(7777));
        // Only the non-default key survived.
        assert!(parsed.get("mcp").is_none_or(serde_yaml::Value::is_null));
    }

    #[tokio::test]
    async fn test_values_round_trip() {
        let (context, _home) = test_support::context();
        let (status, body) = call_raw(&context, "GET", "/api/config/values", None, "").await;
        assert_eq!(status, StatusCode::OK);
        let mut config: Value = serde_json::from_str(&body).unwrap();
        config["daemon"]["port"] = json!(9100);

        let (status, _) = call_raw(
            &context,
            "PUT",
            "/api/config/values",
            Some(config.to_string()),
            "application/json",
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call_raw(&context, "GET", "/api/config/values", None, "").await;
        let reloaded: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(reloaded["daemon"]["port"], json!(9100));
    }

    #[tokio::test]
    async fn test_invalid_template_is_400() {
        let (context, _home) = test_support::context();
        let (status, _) = call_raw(
            &context,
            "PUT",
            "/api/config/template",
            Some("daemon:\n  port: 0\n".to_string()),
            "application/yaml",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reset_clears_overrides() {
        let (context, _home) = test_support::context();
        call_raw(
            &context,
            "PUT",
            "/api/config/template",
            Some("daemon:\n  port: 7777\n".to_string()),
            "application/yaml",
        )
        .await;
        let (status, _) =
            call_raw(&context, "POST", "/api/config/values/reset", None, "").await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call_raw(&context, "GET", "/api/config/values", None, "").await;
        let config: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(config["daemon"]["port"], json!(8765));
    }

    #[tokio::test]
    async fn test_secrets_crud_without_value_leak() {
        let (context, _home) = test_support::context();
        let (status, _) = call_raw(
            &context,
            "POST",
            "/api/config/secrets",
            Some(json!({"name": "api_key", "value": "sk-hidden", "category": "llm"}).to_string()),
            "application/json",
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call_raw(&context, "GET", "/api/config/secrets", None, "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("api_key"));
        assert!(!body.contains("sk-hidden"));

        let (status, _) =
            call_raw(&context, "DELETE", "/api/config/secrets/api_key", None, "").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) =
            call_raw(&context, "DELETE", "/api/config/secrets/api_key", None, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
