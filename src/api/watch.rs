//! Watch subscriptions.
//!
//! A watch is a long-lived stream of JSON events derived from mutating REST
//! calls. Each subscriber owns a bounded queue; the publisher encodes an
//! event once and offers the bytes to every matching queue without blocking.
//! A full (or closed) queue means the consumer is too slow or gone: the
//! watch is dropped, which ends its writer. One slow consumer can never
//! stall another consumer or the publisher.

use std::convert::Infallible;
use std::sync::Mutex;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ApiError, AppState};

/// Wraps `WebSocketUpgrade` so it can be used as an optional extractor: any
/// rejection (missing/invalid upgrade headers) becomes `None` rather than an
/// error response, matching a plain (non-websocket) request.
pub(crate) struct MaybeWebSocketUpgrade(Option<WebSocketUpgrade>);

impl<S> FromRequestParts<S> for MaybeWebSocketUpgrade
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            WebSocketUpgrade::from_request_parts(parts, state).await.ok(),
        ))
    }
}

/// Queue depth per watch.
const QUEUE_DEPTH: usize = 1024;

/// Methods a subscription filter may name.
const METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

struct Entry {
    id: i64,
    collection: String,
    methods: Vec<String>,
    tx: mpsc::Sender<Bytes>,
}

impl Entry {
    fn matched(&self, collection: &str, method: &str) -> bool {
        self.collection == collection
            && (self.methods.is_empty() || self.methods.iter().any(|m| m == method))
    }
}

/// Registry of live watches.
#[derive(Default)]
pub struct WatchHub {
    watches: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    next_id: i64,
    entries: Vec<Entry>,
}

impl WatchHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watch. Prime events are enqueued before registration
    /// completes, so live events always follow them.
    pub fn subscribe(
        &self,
        collection: &str,
        methods: Vec<String>,
        prime: Vec<Value>,
    ) -> (i64, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let mut registry = self.watches.lock().expect("watch registry poisoned");
        let id = registry.next_id;
        registry.next_id += 1;
        let entry = Entry {
            id,
            collection: collection.to_string(),
            methods,
            tx,
        };
        if entry.matched(collection, "POST") {
            for object in &prime {
                let _ = entry.tx.try_send(encode("POST", object));
            }
        }
        registry.entries.push(entry);
        info!(watch = id, collection, "Watch created.");
        (id, rx)
    }

    /// Offer an event to every matching watch. Non-blocking: a watch whose
    /// queue is full or whose reader is gone is deleted.
    pub fn publish(&self, collection: &str, method: &str, object: &Value) {
        let mut registry = self.watches.lock().expect("watch registry poisoned");
        if registry.entries.is_empty() {
            return;
        }
        let encoded = encode(method, object);
        registry.entries.retain(|entry| {
            if !entry.matched(collection, method) {
                return true;
            }
            match entry.tx.try_send(encoded.clone()) {
                Ok(()) => true,
                Err(err) => {
                    warn!(watch = entry.id, error = %err, "Watch dropped.");
                    false
                }
            }
        });
    }

    /// Remove a watch; its queue closes and the writer ends.
    pub fn remove(&self, id: i64) {
        let mut registry = self.watches.lock().expect("watch registry poisoned");
        registry.entries.retain(|entry| entry.id != id);
        info!(watch = id, "Watch deleted.");
    }

    /// End every watch (server shutdown).
    pub fn shutdown(&self) {
        let mut registry = self.watches.lock().expect("watch registry poisoned");
        registry.entries.clear();
    }

    pub fn active(&self) -> usize {
        self.watches
            .lock()
            .expect("watch registry poisoned")
            .entries
            .len()
    }
}

/// One frame: `{"method": ..., "object": ...}`, newline-terminated. The
/// encoded form is identical over HTTP chunks and WebSocket text frames.
fn encode(method: &str, object: &Value) -> Bytes {
    let event = json!({"method": method, "object": object});
    let mut buffer = serde_json::to_vec(&event).unwrap_or_default();
    buffer.push(b'\n');
    Bytes::from(buffer)
}

/// Parsed `filter=` query: method predicates and an `id>N` / `id=N` bound.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Filter {
    pub methods: Vec<String>,
    pub after_id: i64,
}

impl Filter {
    /// Parse `filter=method=POST,id>42`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut filter = Self::default();
        if raw.is_empty() {
            return Ok(filter);
        }
        for predicate in raw.split(',') {
            if let Some(method) = predicate.strip_prefix("method=") {
                let method = method.to_uppercase();
                if !METHODS.contains(&method.as_str()) {
                    return Err(format!("method '{method}' not supported"));
                }
                filter.methods.push(method);
                continue;
            }
            if let Some(id) = predicate
                .strip_prefix("id>")
                .or_else(|| predicate.strip_prefix("id="))
            {
                filter.after_id = id
                    .parse()
                    .map_err(|_| format!("id '{id}' not valid"))?;
                continue;
            }
            return Err(format!("predicate '{predicate}' not supported"));
        }
        Ok(filter)
    }
}

#[derive(Deserialize, Default)]
pub struct WatchParams {
    #[serde(default)]
    filter: String,
}

/// `GET /watch/{collection}`. Upgrades to WebSocket when requested; plain
/// requests get a keep-alive chunked stream, one record per event.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<WatchParams>,
    ws: MaybeWebSocketUpgrade,
) -> Result<Response, ApiError> {
    let ws = ws.0;
    let filter = Filter::parse(&params.filter).map_err(ApiError::BadRequest)?;
    let prime = prime(&state, &collection, filter.after_id).await?;
    let (id, rx) = state.watches.subscribe(&collection, filter.methods, prime);
    state.health.metrics.set_watches(state.watches.active() as i64);

    if let Some(ws) = ws {
        let state = state.clone();
        return Ok(ws.on_upgrade(move |socket| socket_writer(socket, state, id, rx)));
    }

    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, std::convert::Infallible>(chunk);
        }
    };
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONNECTION, "Keep-Alive")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(stream))
        .map_err(|_| ApiError::Internal("stream response".to_string()))?;
    Ok(response)
}

/// Writer task for an upgraded socket. Ends on send error or client close,
/// then deletes the watch.
async fn socket_writer(
    mut socket: WebSocket,
    state: AppState,
    id: i64,
    mut rx: mpsc::Receiver<Bytes>,
) {
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                let text = String::from_utf8_lossy(&event).into_owned();
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }
    state.watches.remove(id);
    state.health.metrics.set_watches(state.watches.active() as i64);
    debug!(watch = id, "Watch socket closed.");
}

/// Snapshot of the collection used to prime a new watch; only elements with
/// `id > after_id` are delivered.
async fn prime(state: &AppState, collection: &str, after_id: i64) -> Result<Vec<Value>, ApiError> {
    let objects: Vec<Value> = match collection {
        "tasks" => {
            let list = state.db.list_tasks(None).await?;
            list.iter().filter_map(|r| serde_json::to_value(r).ok()).collect()
        }
        "applications" => {
            let list = state.db.list_applications().await?;
            list.iter().filter_map(|r| serde_json::to_value(r).ok()).collect()
        }
        "taskgroups" => {
            let list = state.db.list_groups().await?;
            list.iter().filter_map(|r| serde_json::to_value(r).ok()).collect()
        }
        _ => return Err(ApiError::NotFound),
    };
    Ok(objects
        .into_iter()
        .filter(|object| object.get("id").and_then(Value::as_i64).unwrap_or(0) > after_id)
        .collect())
}

/// Collection addressed by a mutating request: the last path segment for
/// POST, the second-from-last for PUT/PATCH/DELETE.
pub fn collection_of(method: &str, path: &str) -> Option<String> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    let index = match method {
        "POST" => segments.len().checked_sub(1)?,
        "PUT" | "PATCH" | "DELETE" => segments.len().checked_sub(2)?,
        _ => return None,
    };
    segments.get(index).map(|s| s.to_lowercase())
}
