//! Task REST surface.
//!
//! Task path parameters accept every reference form the store resolves:
//! UUID, unique UUID prefix, `#N`, bare `N`, or dotted path.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use gobby_storage::models::{DependencyType, Task, TaskStatus, ValidationStatus};
use gobby_storage::tasks::{CloseTask, CreateTask, TaskFilter, TaskUpdate, normalize_priority};

use crate::error::{ApiError, ApiResult};
use crate::state::DaemonContext;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    project_id: Option<String>,
    status: Option<String>,
    title_like: Option<String>,
    label: Option<String>,
    assignee: Option<String>,
    task_type: Option<String>,
    parent: Option<String>,
    ready: Option<bool>,
    blocked: Option<bool>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn list(
    State(context): State<DaemonContext>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let statuses = match query.status.as_deref() {
        None | Some("") => Vec::new(),
        Some(raw) => raw
            .split(',')
            .filter_map(TaskStatus::parse)
            .collect(),
    };
    let filter = TaskFilter {
        project_id: query.project_id,
        statuses,
        title_like: query.title_like,
        label: query.label,
        assignee: query.assignee,
        task_type: query.task_type,
        parent_task_id: query.parent,
        limit: query.limit,
        offset: query.offset,
        ..TaskFilter::default()
    };
    let tasks = if query.ready.unwrap_or(false) {
        context.tasks.list_ready(&filter)?
    } else if query.blocked.unwrap_or(false) {
        context.tasks.list_blocked(&filter)?
    } else {
        context.tasks.list(&filter)?
    };
    Ok(Json(tasks))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    project_id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parent_task_id: Option<String>,
    #[serde(default)]
    priority: Option<Value>,
    #[serde(default)]
    task_type: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    workflow_name: Option<String>,
    #[serde(default)]
    validation_criteria: Option<String>,
}

pub async fn create(
    State(context): State<DaemonContext>,
    Json(body): Json<CreateBody>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    if body.title.trim().is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    let parent_task_id = match &body.parent_task_id {
        Some(reference) => Some(
            context
                .tasks
                .resolve_reference(Some(&body.project_id), reference)?
                .id,
        ),
        None => None,
    };
    let task = context.tasks.create(&CreateTask {
        project_id: body.project_id,
        title: body.title,
        description: body.description,
        parent_task_id,
        priority: Some(normalize_priority(body.priority.as_ref())),
        task_type: body.task_type,
        labels: body.labels,
        assignee: body.assignee,
        workflow_name: body.workflow_name,
        validation_criteria: body.validation_criteria,
        ..CreateTask::default()
    })?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get(
    State(context): State<DaemonContext>,
    Path(reference): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(context.tasks.resolve_reference(None, &reference)?))
}

pub async fn patch(
    State(context): State<DaemonContext>,
    Path(reference): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Task>> {
    let task = context.tasks.resolve_reference(None, &reference)?;

    // Field presence decides "change"; an explicit null clears.
    let field = |key: &str| -> Option<Option<String>> {
        body.get(key).map(|v| v.as_str().map(str::to_string))
    };
    let changes = TaskUpdate {
        title: body
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string),
        description: field("description"),
        status: body
            .get("status")
            .and_then(Value::as_str)
            .and_then(TaskStatus::parse),
        priority: body.get("priority").map(|p| normalize_priority(Some(p))),
        task_type: field("task_type"),
        labels: body.get("labels").map(|v| {
            v.as_array().map(|labels| {
                labels
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
        }),
        assignee: field("assignee"),
        parent_task_id: match body.get("parent_task_id") {
            None => None,
            Some(Value::Null) => Some(None),
            Some(Value::String(reference)) => Some(Some(
                context
                    .tasks
                    .resolve_reference(Some(&task.project_id), reference)?
                    .id,
            )),
            Some(_) => return Err(ApiError::bad_request("parent_task_id must be a string")),
        },
        workflow_name: field("workflow_name"),
        validation_criteria: field("validation_criteria"),
        validation_status: body
            .get("validation_status")
            .and_then(Value::as_str)
            .and_then(ValidationStatus::parse),
        escalation_reason: field("escalation_reason"),
        ..TaskUpdate::default()
    };

    Ok(Json(context.tasks.update(&task.id, &changes)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    cascade: bool,
    #[serde(default)]
    unlink: bool,
}

pub async fn delete(
    State(context): State<DaemonContext>,
    Path(reference): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<Value>> {
    let task = context.tasks.resolve_reference(None, &reference)?;
    let deleted = context.tasks.delete(&task.id, query.cascade, query.unlink)?;
    Ok(Json(json!({"deleted": deleted, "task_id": task.id})))
}

#[derive(Debug, Default, Deserialize)]
pub struct CloseBody {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    commit_sha: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    force: bool,
}

pub async fn close(
    State(context): State<DaemonContext>,
    Path(reference): Path<String>,
    Json(body): Json<CloseBody>,
) -> ApiResult<Json<Task>> {
    let task = context.tasks.resolve_reference(None, &reference)?;
    let resolver = context.commit_resolver(&task.project_id);
    let closed = context.tasks.close(
        &task.id,
        &CloseTask {
            reason: body.reason.as_deref(),
            commit_sha: body.commit_sha.as_deref(),
            session_id: body.session_id.as_deref(),
            force: body.force,
        },
        resolver.as_ref(),
    )?;
    Ok(Json(closed))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReopenBody {
    #[serde(default)]
    reason: Option<String>,
}

pub async fn reopen(
    State(context): State<DaemonContext>,
    Path(reference): Path<String>,
    Json(body): Json<ReopenBody>,
) -> ApiResult<Json<Task>> {
    let task = context.tasks.resolve_reference(None, &reference)?;
    Ok(Json(context.tasks.reopen(&task.id, body.reason.as_deref())?))
}

pub async fn de_escalate(
    State(context): State<DaemonContext>,
    Path(reference): Path<String>,
) -> ApiResult<Json<Task>> {
    let task = context.tasks.resolve_reference(None, &reference)?;
    Ok(Json(context.tasks.de_escalate(&task.id)?))
}

// ------------------------------------------------------------------
// Comments

pub async fn list_comments(
    State(context): State<DaemonContext>,
    Path(reference): Path<String>,
) -> ApiResult<Json<Vec<gobby_storage::models::TaskComment>>> {
    let task = context.tasks.resolve_reference(None, &reference)?;
    Ok(Json(context.tasks.list_comments(&task.id)?))
}

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    body: String,
    #[serde(default)]
    author: Option<String>,
}

pub async fn add_comment(
    State(context): State<DaemonContext>,
    Path(reference): Path<String>,
    Json(body): Json<CommentBody>,
) -> ApiResult<(StatusCode, Json<gobby_storage::models::TaskComment>)> {
    let task = context.tasks.resolve_reference(None, &reference)?;
    let comment = context
        .tasks
        .add_comment(&task.id, &body.body, body.author.as_deref())?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn delete_comment(
    State(context): State<DaemonContext>,
    Path((_reference, comment_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    context.tasks.delete_comment(&comment_id)?;
    Ok(Json(json!({"deleted": true})))
}

// ------------------------------------------------------------------
// Dependencies

pub async fn list_dependencies(
    State(context): State<DaemonContext>,
    Path(reference): Path<String>,
) -> ApiResult<Json<Vec<gobby_storage::models::TaskDependency>>> {
    let task = context.tasks.resolve_reference(None, &reference)?;
    Ok(Json(context.dependencies.list_for_task(&task.id)?))
}

#[derive(Debug, Deserialize)]
pub struct DependencyBody {
    depends_on: String,
    #[serde(default)]
    dep_type: Option<String>,
}

pub async fn add_dependency(
    State(context): State<DaemonContext>,
    Path(reference): Path<String>,
    Json(body): Json<DependencyBody>,
) -> ApiResult<(StatusCode, Json<gobby_storage::models::TaskDependency>)> {
    let task = context.tasks.resolve_reference(None, &reference)?;
    let blocker = context
        .tasks
        .resolve_reference(Some(&task.project_id), &body.depends_on)?;
    let dep_type = body
        .dep_type
        .as_deref()
        .map(|raw| {
            DependencyType::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unknown dep_type '{raw}'")))
        })
        .transpose()?
        .unwrap_or_default();
    let dependency = context.dependencies.add(&task.id, &blocker.id, dep_type)?;
    Ok((StatusCode::CREATED, Json(dependency)))
}

pub async fn remove_dependency(
    State(context): State<DaemonContext>,
    Path((reference, depends_on)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let task = context.tasks.resolve_reference(None, &reference)?;
    let blocker = context
        .tasks
        .resolve_reference(Some(&task.project_id), &depends_on)?;
    context.dependencies.remove(&task.id, &blocker.id)?;
    Ok(Json(json!({"deleted": true})))
}
