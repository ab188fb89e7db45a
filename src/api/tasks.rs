//! Task routes.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use kube::Api;
use serde::Deserialize;

use crate::model::{Task, TaskReport, TaskState};

use super::{respond, ApiError, AppState};

#[derive(Deserialize, Default)]
pub struct ListFilter {
    pub locator: Option<String>,
}

/// `GET /tasks?locator=…`
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<ListFilter>,
) -> Result<Response, ApiError> {
    let list = state.db.list_tasks(filter.locator.as_deref()).await?;
    Ok(respond(&headers, StatusCode::OK, &list))
}

/// `POST /tasks` — create in state `Created`.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(task): Json<Task>,
) -> Result<Response, ApiError> {
    let mut task = task;
    task.id = 0;
    task.state = TaskState::Created;
    task.pod.clear();
    task.retries = 0;
    let created = state.db.create_task(&task).await?;
    state.publish("POST", "/tasks", &created);
    Ok(respond(&headers, StatusCode::CREATED, &created))
}

/// `GET /tasks/:id` — associations eager-loaded.
pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let task = state.db.get_task(id).await?.ok_or(ApiError::NotFound)?;
    Ok(respond(&headers, StatusCode::OK, &task))
}

/// `PUT /tasks/:id` — allowed only while `Created`.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(task): Json<Task>,
) -> Result<StatusCode, ApiError> {
    let existing = state.db.get_task(id).await?.ok_or(ApiError::NotFound)?;
    if existing.state != TaskState::Created {
        return Err(ApiError::Conflict(format!(
            "task {id} is {}; edit requires Created",
            existing.state
        )));
    }
    let mut task = task;
    task.id = id;
    state.db.update_created_task(&task).await?;
    if let Some(updated) = state.db.get_task(id).await? {
        state.publish("PUT", &format!("/tasks/{id}"), &updated);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /tasks/:id` — cascades pod deletion if any.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let task = state.db.get_task(id).await?.ok_or(ApiError::NotFound)?;
    if !task.pod.is_empty() {
        let pods: Api<Pod> = Api::namespaced(state.client.clone(), &state.settings.namespace);
        match pods
            .delete(task.pod_name(), &DeleteParams::default().grace_period(0))
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(response)) if response.code == 404 => {}
            Err(err) => return Err(err.into()),
        }
    }
    if let Some(bucket) = task.bucket {
        if let Some(path) = state.db.get_bucket(bucket).await? {
            let _ = tokio::fs::remove_dir_all(&path).await;
        }
        state.db.delete_bucket(bucket).await?;
    }
    state.db.delete_task(id).await?;
    state.publish("DELETE", &format!("/tasks/{id}"), &task);
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /tasks/:id/submit` — `Created -> Ready`. 202 on transition, 200 when
/// already past `Created`.
pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.db.get_task(id).await?.ok_or(ApiError::NotFound)?;
    let submitted = state.db.submit_task(id).await?;
    if !submitted {
        return Ok(StatusCode::OK);
    }
    if let Some(task) = state.db.get_task(id).await? {
        state.publish("PUT", &format!("/tasks/{id}"), &task);
    }
    Ok(StatusCode::ACCEPTED)
}

/// `PUT /tasks/:id/cancel` — flag for the scheduler; idempotent.
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.db.get_task(id).await?.ok_or(ApiError::NotFound)?;
    state.db.cancel_task(id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// `POST /tasks/:id/report`
pub async fn create_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(report): Json<TaskReport>,
) -> Result<Response, ApiError> {
    state.db.get_task(id).await?.ok_or(ApiError::NotFound)?;
    let mut report = report;
    report.id = 0;
    report.task = id;
    let created = state.db.create_report(&report).await?;
    state.publish("POST", &format!("/tasks/{id}/report"), &created);
    Ok(respond(&headers, StatusCode::CREATED, &created))
}

/// `PUT /tasks/:id/report`
pub async fn update_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(report): Json<TaskReport>,
) -> Result<Response, ApiError> {
    let mut report = report;
    report.task = id;
    let updated = state.db.update_report(&report).await?;
    if !updated {
        return Err(ApiError::NotFound);
    }
    let report = state.db.get_report(id).await?.ok_or(ApiError::NotFound)?;
    state.publish("PUT", &format!("/tasks/{id}/report"), &report);
    Ok(respond(&headers, StatusCode::OK, &report))
}

/// `DELETE /tasks/:id/report`
pub async fn delete_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.db.delete_report(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /tasks/:id/bucket/*path` — read from the task's scratch area.
pub async fn bucket_get(
    State(state): State<AppState>,
    Path((id, path)): Path<(i64, String)>,
) -> Result<Response, ApiError> {
    let task = state.db.get_task(id).await?.ok_or(ApiError::NotFound)?;
    let Some(bucket) = task.bucket else {
        return Err(ApiError::NotFound);
    };
    let root = state.db.get_bucket(bucket).await?.ok_or(ApiError::NotFound)?;
    let target = bucket_join(&root, &path)?;
    let content = tokio::fs::read(&target)
        .await
        .map_err(|_| ApiError::NotFound)?;
    Ok(content.into_response())
}

/// `POST|PUT /tasks/:id/bucket/*path` — write into the task's scratch area.
/// The bucket is created lazily on first write.
pub async fn bucket_put(
    State(state): State<AppState>,
    Path((id, path)): Path<(i64, String)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let mut task = state.db.get_task(id).await?.ok_or(ApiError::NotFound)?;
    let root = match task.bucket {
        Some(bucket) => state.db.get_bucket(bucket).await?.ok_or(ApiError::NotFound)?,
        None => {
            let root = format!("{}/{}", state.settings.bucket_path, uuid::Uuid::new_v4());
            tokio::fs::create_dir_all(&root).await?;
            let bucket = state.db.create_bucket(&root).await?;
            task.bucket = Some(bucket);
            state.db.save_task(&task).await?;
            root
        }
    };
    let target = bucket_join(&root, &path)?;
    if let Some(parent) = std::path::Path::new(&target).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, &body).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Join a client-supplied path under the bucket root, refusing traversal.
fn bucket_join(root: &str, path: &str) -> Result<String, ApiError> {
    let relative = path.trim_start_matches('/');
    if relative
        .split('/')
        .any(|segment| segment == ".." || segment.is_empty())
    {
        return Err(ApiError::BadRequest(format!("path '{path}' not valid")));
    }
    Ok(format!("{root}/{relative}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_submit() {
        let state = testing::state().await;
        let app = super::super::router(state.clone());

        let response = app
            .clone()
            .oneshot(testing::request(
                "POST",
                "/tasks",
                Some(serde_json::json!({
                    "name": "seed",
                    "kind": "analyze",
                    "addon": "a1",
                    "application": {"id": 7},
                    "data": {},
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["state"], "Created");
        let id = created["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(testing::request("PUT", &format!("/tasks/{id}/submit"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // Already submitted: 200.
        let response = app
            .clone()
            .oneshot(testing::request("PUT", &format!("/tasks/{id}/submit"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let task = state.db.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Ready);
    }

    #[tokio::test]
    async fn test_update_rejected_after_created() {
        let state = testing::state().await;
        let app = super::super::router(state.clone());
        let created = state
            .db
            .create_task(&Task {
                state: TaskState::Ready,
                ..Default::default()
            })
            .await
            .unwrap();
        // create_task stores the given state only via save; force Ready.
        let mut task = created.clone();
        task.state = TaskState::Ready;
        state.db.save_task(&task).await.unwrap();

        let response = app
            .oneshot(testing::request(
                "PUT",
                &format!("/tasks/{}", created.id),
                Some(serde_json::json!({"name": "renamed"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cancel_sets_flag() {
        let state = testing::state().await;
        let app = super::super::router(state.clone());
        let created = state.db.create_task(&Task::default()).await.unwrap();

        let response = app
            .clone()
            .oneshot(testing::request(
                "PUT",
                &format!("/tasks/{}/cancel", created.id),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let task = state.db.get_task(created.id).await.unwrap().unwrap();
        assert!(task.canceled);

        // Idempotent.
        let response = app
            .oneshot(testing::request(
                "PUT",
                &format!("/tasks/{}/cancel", created.id),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_report_round_trip() {
        let state = testing::state().await;
        let app = super::super::router(state.clone());
        let created = state.db.create_task(&Task::default()).await.unwrap();

        let response = app
            .clone()
            .oneshot(testing::request(
                "POST",
                &format!("/tasks/{}/report", created.id),
                Some(serde_json::json!({"status": "Running", "total": 10, "completed": 2})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(testing::request(
                "PUT",
                &format!("/tasks/{}/report", created.id),
                Some(serde_json::json!({"status": "Running", "total": 10, "completed": 9})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["completed"], 9);

        let response = app
            .oneshot(testing::request(
                "DELETE",
                &format!("/tasks/{}/report", created.id),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.db.get_report(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_locator_filter() {
        let state = testing::state().await;
        let app = super::super::router(state.clone());
        for locator in ["app.1", "app.2"] {
            state
                .db
                .create_task(&Task {
                    locator: locator.to_string(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let response = app
            .oneshot(testing::request("GET", "/tasks?locator=app.1", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let list = body_json(response).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_bucket_join_rejects_traversal() {
        assert!(bucket_join("/tmp/bucket", "a/b.txt").is_ok());
        assert!(bucket_join("/tmp/bucket", "../etc/passwd").is_err());
        assert!(bucket_join("/tmp/bucket", "a/../../b").is_err());
    }
}
