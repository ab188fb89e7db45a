//! Application routes.
//!
//! Applications are owned by an external inventory flow; the hub carries the
//! narrow surface tasks route to: a name, a tag list, and watch events.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;

use crate::model::Application;

use super::{respond, ApiError, AppState};

/// `GET /applications`
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let list = state.db.list_applications().await?;
    Ok(respond(&headers, StatusCode::OK, &list))
}

/// `POST /applications`
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(application): Json<Application>,
) -> Result<Response, ApiError> {
    let mut application = application;
    application.id = 0;
    let created = state.db.create_application(&application).await?;
    state.publish("POST", "/applications", &created);
    Ok(respond(&headers, StatusCode::CREATED, &created))
}

/// `GET /applications/:id`
pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let application = state
        .db
        .get_application(id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(respond(&headers, StatusCode::OK, &application))
}

/// `DELETE /applications/:id`
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let application = state
        .db
        .get_application(id)
        .await?
        .ok_or(ApiError::NotFound)?;
    state.db.delete_application(id).await?;
    state.publish("DELETE", &format!("/applications/{id}"), &application);
    Ok(StatusCode::NO_CONTENT)
}
