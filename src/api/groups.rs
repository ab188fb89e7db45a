//! Task group routes.
//!
//! A group aggregates tasks that share template data; submitting the group
//! merges its data under each member's and submits them together.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use serde_json::Value;

use crate::model::{TaskGroup, TaskState};

use super::{respond, ApiError, AppState};

/// `GET /taskgroups`
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let list = state.db.list_groups().await?;
    Ok(respond(&headers, StatusCode::OK, &list))
}

/// `POST /taskgroups` — create the group and its member tasks, all `Created`.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(group): Json<TaskGroup>,
) -> Result<Response, ApiError> {
    let mut group = group;
    group.id = 0;
    group.state = TaskState::Created;
    let members = std::mem::take(&mut group.tasks);
    let mut created = state.db.create_group(&group).await?;
    for mut task in members {
        task.id = 0;
        task.state = TaskState::Created;
        task.task_group = Some(created.id);
        if task.kind.is_empty() {
            task.kind = created.kind.clone();
        }
        created.tasks.push(state.db.create_task(&task).await?);
    }
    state.publish("POST", "/taskgroups", &created);
    Ok(respond(&headers, StatusCode::CREATED, &created))
}

/// `GET /taskgroups/:id`
pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let group = state.db.get_group(id).await?.ok_or(ApiError::NotFound)?;
    Ok(respond(&headers, StatusCode::OK, &group))
}

/// `PUT /taskgroups/:id/submit` — merge group data under each member and
/// submit them. 202 on transition, 200 when already submitted.
pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let group = state.db.get_group(id).await?.ok_or(ApiError::NotFound)?;
    if group.state != TaskState::Created {
        return Ok(StatusCode::OK);
    }
    let members = group.tasks;
    for mut task in members {
        let data = std::mem::take(&mut task.data);
        task.data = merged(&group.data, data);
        state.db.save_task(&task).await?;
        if state.db.submit_task(task.id).await? {
            if let Some(task) = state.db.get_task(task.id).await? {
                state.publish("PUT", &format!("/tasks/{}", task.id), &task);
            }
        }
    }
    state.db.set_group_state(id, TaskState::Ready).await?;
    if let Some(group) = state.db.get_group(id).await? {
        state.publish("PUT", &format!("/taskgroups/{id}"), &group);
    }
    Ok(StatusCode::ACCEPTED)
}

/// `DELETE /taskgroups/:id` — members cascade.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let group = state.db.get_group(id).await?.ok_or(ApiError::NotFound)?;
    state.db.delete_group(id).await?;
    state.publish("DELETE", &format!("/taskgroups/{id}"), &group);
    Ok(StatusCode::NO_CONTENT)
}

/// Group data supplies defaults; the member's own keys win. Non-object
/// member data is kept as-is unless null.
fn merged(group: &Value, task: Value) -> Value {
    match (group, task) {
        (group, Value::Null) => group.clone(),
        (Value::Object(group), Value::Object(mut task)) => {
            for (key, value) in group {
                task.entry(key.clone()).or_insert_with(|| value.clone());
            }
            Value::Object(task)
        }
        (_, task) => task,
    }
}
