//! Watch stream behavior through the REST surface: prime before live,
//! publisher order preserved, cleanup after the client goes away.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use kube::Client;
use serde_json::{json, Value};
use tower::ServiceExt;

use task_hub::api::watch::WatchHub;
use task_hub::health::HealthState;
use task_hub::{AppState, Database, Settings};

fn stub_client() -> Client {
    let service = tower::service_fn(|_req: axum::http::Request<kube::client::Body>| async {
        let status = json!({
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

async fn state() -> AppState {
    AppState {
        db: Database::connect(":memory:").await.expect("connect"),
        client: stub_client(),
        settings: Settings::load(),
        watches: Arc::new(WatchHub::new()),
        health: Arc::new(HealthState::new()),
    }
}

fn post(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn test_prime_then_live_in_order() {
    let state = state().await;
    let app = task_hub::router(state.clone());

    for name in ["one", "two", "three"] {
        let response = app
            .clone()
            .oneshot(post("/applications", json!({"name": name})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/watch/applications?filter=method=POST,id%3E1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut frames = response.into_body().into_data_stream();

    // Prime: existing applications with id > 1, in id order.
    for expected in [2, 3] {
        let chunk = frames.next().await.expect("prime frame").unwrap();
        let event: Value = serde_json::from_slice(&chunk).unwrap();
        assert_eq!(event["method"], "POST");
        assert_eq!(event["object"]["id"], expected);
    }

    // Live: three more creations arrive in creation order.
    for name in ["four", "five", "six"] {
        let response = app
            .clone()
            .oneshot(post("/applications", json!({"name": name})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    for expected in ["four", "five", "six"] {
        let chunk = frames.next().await.expect("live frame").unwrap();
        let event: Value = serde_json::from_slice(&chunk).unwrap();
        assert_eq!(event["method"], "POST");
        assert_eq!(event["object"]["name"], expected);
    }

    // Closing the client cleans the watch up on the next publish.
    drop(frames);
    assert_eq!(state.watches.active(), 1);
    state.watches.publish("applications", "POST", &json!({"id": 99}));
    assert_eq!(state.watches.active(), 0);
}

#[tokio::test]
async fn test_method_filter_on_stream() {
    let state = state().await;
    let app = task_hub::router(state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/watch/tasks?filter=method=DELETE")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut frames = response.into_body().into_data_stream();

    state.watches.publish("tasks", "PUT", &json!({"id": 1}));
    state.watches.publish("tasks", "DELETE", &json!({"id": 1}));

    let chunk = frames.next().await.expect("frame").unwrap();
    let event: Value = serde_json::from_slice(&chunk).unwrap();
    assert_eq!(event["method"], "DELETE");
}

#[tokio::test]
async fn test_bad_filter_rejected() {
    let state = state().await;
    let app = task_hub::router(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/watch/tasks?filter=id%3Eabc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_collection_rejected() {
    let state = state().await;
    let app = task_hub::router(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/watch/unicorns")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
