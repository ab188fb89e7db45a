//! Health endpoints and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - liveness probe (is the process alive?)
//! - `/readyz` - readiness probe (is the hub ready to serve?)
//! - `/metrics` - Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Labels for terminal-state counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct StateLabels {
    pub state: String,
}

impl prometheus_client::encoding::EncodeLabelSet for StateLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("state", self.state.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics state.
pub struct Metrics {
    /// Tasks launched for the first time (retries excluded).
    pub tasks_initiated: Counter,
    /// Tasks reaching a terminal state.
    pub tasks_completed: Family<StateLabels, Counter>,
    /// Scheduler loop iterations.
    pub scheduler_ticks: Counter,
    /// Live watch subscriptions.
    pub watches_active: Gauge,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let tasks_initiated = Counter::default();
        registry.register(
            "task_hub_tasks_initiated",
            "Total number of tasks launched",
            tasks_initiated.clone(),
        );

        let tasks_completed = Family::<StateLabels, Counter>::default();
        registry.register(
            "task_hub_tasks_completed",
            "Total number of tasks reaching a terminal state",
            tasks_completed.clone(),
        );

        let scheduler_ticks = Counter::default();
        registry.register(
            "task_hub_scheduler_ticks",
            "Total number of scheduler iterations",
            scheduler_ticks.clone(),
        );

        let watches_active = Gauge::default();
        registry.register(
            "task_hub_watches_active",
            "Number of live watch subscriptions",
            watches_active.clone(),
        );

        Self {
            tasks_initiated,
            tasks_completed,
            scheduler_ticks,
            watches_active,
            registry,
        }
    }

    pub fn record_initiated(&self) {
        self.tasks_initiated.inc();
    }

    pub fn record_completed(&self, state: &str) {
        self.tasks_completed
            .get_or_create(&StateLabels {
                state: state.to_string(),
            })
            .inc();
    }

    pub fn record_tick(&self) {
        self.scheduler_ticks.inc();
    }

    pub fn set_watches(&self, count: i64) {
        self.watches_active.set(count);
    }

    /// Encode metrics to Prometheus text format.
    ///
    /// Returns an empty string if encoding fails (should never happen with
    /// valid metrics).
    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health endpoints.
pub struct HealthState {
    /// Whether the hub is ready (store opened, cluster reachable).
    pub ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the hub as ready.
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the hub is ready.
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler.
///
/// Returns 200 OK if the process is alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler.
///
/// Returns 200 OK if the hub is ready to serve, 503 otherwise.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler.
///
/// Returns Prometheus-formatted metrics.
async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health endpoint router.
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        metrics.record_initiated();
        metrics.record_completed("Succeeded");
        metrics.record_tick();
        metrics.set_watches(2);

        let encoded = metrics.encode();
        assert!(encoded.contains("task_hub_tasks_initiated"));
        assert!(encoded.contains("task_hub_tasks_completed"));
        assert!(encoded.contains("task_hub_scheduler_ticks"));
        assert!(encoded.contains("task_hub_watches_active"));
    }

    #[tokio::test]
    async fn test_health_state() {
        let state = HealthState::new();
        assert!(!state.is_ready().await);

        state.set_ready(true).await;
        assert!(state.is_ready().await);
    }
}
