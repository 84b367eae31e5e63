//! Project REST surface.

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value, json};

use gobby_storage::models::{HIDDEN_PROJECTS, Project};

use crate::error::{ApiError, ApiResult};
use crate::state::DaemonContext;

/// `GET /api/projects` — hidden system projects never appear.
pub async fn list(State(context): State<DaemonContext>) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(context.projects.list()?))
}

/// `GET /api/projects/{id}`
pub async fn get(
    State(context): State<DaemonContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Project>> {
    context
        .projects
        .get(&id)?
        .ok_or_else(|| ApiError::not_found(format!("project not found: {id}")))
        .map(Json)
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

/// `PUT /api/projects/{id}`
pub async fn update(
    State(context): State<DaemonContext>,
    Path(id): Path<String>,
    Json(body): Json<UpdateBody>,
) -> ApiResult<Json<Project>> {
    Ok(Json(context.projects.update(
        &id,
        body.name.as_deref(),
        body.path.as_deref(),
    )?))
}

/// `DELETE /api/projects/{id}` — hidden system projects answer 403.
pub async fn delete(
    State(context): State<DaemonContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    if HIDDEN_PROJECTS.contains(&id.as_str()) {
        return Err(ApiError::forbidden(format!(
            "project '{id}' is a system project and cannot be deleted"
        )));
    }
    context.projects.delete(&id)?;
    Ok(Json(json!({"deleted": true, "id": id})))
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

    async fn call(
        context: &crate::state::DaemonContext,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let app = router(context.clone());
        let request = match body {
            Some(body) => Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
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
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_personal_renders_as_personal_and_hidden_are_absent() {
        let (context, _home) = test_support::context();
        let (status, body) = call(&context, "GET", "/api/projects", None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"Personal"));
        assert!(!names.contains(&"_orphaned"));
        assert!(!names.contains(&"_migrated"));
    }

    #[tokio::test]
    async fn test_hidden_projects_undeletable_403() {
        let (context, _home) = test_support::context();
        for id in ["_orphaned", "_migrated"] {
            let (status, _) = call(&context, "DELETE", &format!("/api/projects/{id}"), None).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{id}");
        }
    }

    #[tokio::test]
    async fn test_update_and_delete_project() {
        let (context, _home) = test_support::context();
        context.projects.create("p1", "Alpha", None).unwrap();

        let (status, body) = call(
            &context,
            "PUT",
            "/api/projects/p1",
            Some(json!({"name": "Beta"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], json!("Beta"));

        let (status, _) = call(&context, "DELETE", "/api/projects/p1", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&context, "GET", "/api/projects/p1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
