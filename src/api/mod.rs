//! REST surface.
//!
//! Handlers are explicit projections per resource; mutating handlers publish
//! an event to the watch hub after the row is persisted. Responses negotiate
//! JSON or YAML by `Accept`.

pub mod applications;
pub mod groups;
pub mod tasks;
pub mod watch;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use kube::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::auth;
use crate::db::Database;
use crate::health::HealthState;
use crate::settings::Settings;

use watch::WatchHub;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub client: Client,
    pub settings: Settings,
    pub watches: Arc<WatchHub>,
    pub health: Arc<HealthState>,
}

impl AppState {
    /// Publish a mutation to the watch hub. The collection is derived from
    /// the request path the same way subscriptions derive theirs.
    pub fn publish<T: Serialize>(&self, method: &str, path: &str, object: &T) {
        let Some(collection) = watch::collection_of(method, path) else {
            return;
        };
        if let Ok(object) = serde_json::to_value(object) {
            self.watches.publish(&collection, method, &object);
        }
    }
}

/// REST error; maps onto HTTP statuses.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("not authorized")]
    NotAuthorized,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cluster error: {0}")]
    Kube(#[from] kube::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotAuthorized => StatusCode::UNAUTHORIZED,
            ApiError::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            ApiError::Database(_) | ApiError::Io(_) | ApiError::Internal(_) => {
                error!(error = %self, "Request failed.");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Kube(_) => {
                error!(error = %self, "Cluster request failed.");
                StatusCode::BAD_GATEWAY
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Serialize per the request's `Accept` header: YAML on
/// `application/x-yaml`, JSON otherwise.
pub fn respond<T: Serialize>(headers: &HeaderMap, status: StatusCode, value: &T) -> Response {
    let yaml = headers
        .get(header::ACCEPT)
        .and_then(|accept| accept.to_str().ok())
        .map(|accept| accept.contains("application/x-yaml"))
        .unwrap_or(false);
    if yaml {
        let body = serde_yaml::to_string(value).unwrap_or_default();
        (
            status,
            [(header::CONTENT_TYPE, "application/x-yaml")],
            body,
        )
            .into_response()
    } else {
        (status, Json(value)).into_response()
    }
}

/// Bearer-token middleware. Signature plus the addon-scope validator: a
/// token carrying a task claim dies with its task.
async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.settings.auth_required {
        return next.run(request).await;
    }
    let path = request.uri().path();
    if matches!(path, "/healthz" | "/readyz" | "/metrics") {
        return next.run(request).await;
    }
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let Some(token) = token else {
        return ApiError::NotAuthorized.into_response();
    };
    let claims = match auth::authenticate(&state.settings.token_key, token) {
        Ok(claims) => claims,
        Err(_) => return ApiError::NotAuthorized.into_response(),
    };
    if auth::validate_task_claim(&state.db, &claims).await.is_err() {
        return ApiError::NotAuthorized.into_response();
    }
    next.run(request).await
}

/// Build the REST router.
pub fn router(state: AppState) -> Router {
    let health = crate::health::create_router(state.health.clone());
    Router::new()
        .route("/tasks", get(tasks::list).post(tasks::create))
        .route(
            "/tasks/{id}",
            get(tasks::get).put(tasks::update).delete(tasks::delete),
        )
        .route("/tasks/{id}/submit", put(tasks::submit))
        .route("/tasks/{id}/cancel", put(tasks::cancel))
        .route(
            "/tasks/{id}/report",
            post(tasks::create_report)
                .put(tasks::update_report)
                .delete(tasks::delete_report),
        )
        .route(
            "/tasks/{id}/bucket/{*path}",
            get(tasks::bucket_get)
                .put(tasks::bucket_put)
                .post(tasks::bucket_put),
        )
        .route("/taskgroups", get(groups::list).post(groups::create))
        .route("/taskgroups/{id}", get(groups::get).delete(groups::delete))
        .route("/taskgroups/{id}/submit", put(groups::submit))
        .route(
            "/applications",
            get(applications::list).post(applications::create),
        )
        .route(
            "/applications/{id}",
            get(applications::get).delete(applications::delete),
        )
        .route("/watch/{collection}", get(watch::subscribe))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
        .merge(health)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Handler test fixtures: in-memory store plus a stubbed cluster that
    //! answers 404 to everything.

    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    pub async fn state() -> AppState {
        AppState {
            db: Database::connect(":memory:").await.expect("connect"),
            client: client(),
            settings: Settings::load(),
            watches: Arc::new(WatchHub::new()),
            health: Arc::new(HealthState::new()),
        }
    }

    pub fn client() -> Client {
        let service = tower::service_fn(|_req: axum::http::Request<kube::client::Body>| async {
            let status = serde_json::json!({
                "kind": "Status",
                "apiVersion": "v1",
                "status": "Failure",
                "message": "not found",
                "reason": "NotFound",
                "code": 404,
            });
            Ok::<_, std::convert::Infallible>(
                axum::http::Response::builder()
                    .status(404)
                    .header("content-type", "application/json")
                    .body(kube::client::Body::from(
                        serde_json::to_vec(&status).expect("status"),
                    ))
                    .expect("response"),
            )
        });
        Client::new(service, "task-hub")
    }

    pub fn request(method: &str, path: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(path);
        match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        }
    }
}
