use std::sync::Arc;

use kube::Client;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use task_hub::api::watch::WatchHub;
use task_hub::health::HealthState;
use task_hub::{controller, AppState, Database, Manager, PodSignal, Settings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("task_hub=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    let settings = Settings::load();
    info!("Starting task-hub");

    // Open the store.
    let db = Database::connect(&settings.db_path).await?;
    info!(path = %settings.db_path, "Store opened");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let health = Arc::new(HealthState::new());
    let watches = Arc::new(WatchHub::new());
    let signal = Arc::new(PodSignal::default());

    // Scheduler loop: single owner of task state transitions.
    let manager = Manager::new(
        client.clone(),
        db.clone(),
        settings.clone(),
        watches.clone(),
        health.clone(),
        signal.clone(),
    );
    let scheduler_handle = tokio::spawn(manager.run());

    // Pod reflector: wakes the loop early on pod events.
    let reflector_handle = {
        let client = client.clone();
        let settings = settings.clone();
        let signal = signal.clone();
        tokio::spawn(async move {
            controller::run_pod_reflector(client, settings, signal).await;
        })
    };

    // REST surface.
    let state = AppState {
        db,
        client,
        settings: settings.clone(),
        watches: watches.clone(),
        health: health.clone(),
    };
    let app = task_hub::router(state);
    let listener = TcpListener::bind(&settings.api_addr).await?;
    info!(addr = %settings.api_addr, "REST listener bound");
    health.set_ready(true).await;

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("REST server error: {}", e);
            }
        }
        result = scheduler_handle => {
            if let Err(e) = result {
                error!("Scheduler task panicked: {}", e);
            }
        }
        result = reflector_handle => {
            if let Err(e) = result {
                error!("Pod reflector task panicked: {}", e);
            }
        }
    }

    health.set_ready(false).await;
    watches.shutdown();
    info!("Hub stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
