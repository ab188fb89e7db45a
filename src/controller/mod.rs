//! Pod reflector.
//!
//! Watches task pods and accelerates convergence: on any add/update/delete
//! the affected pod is marked dirty and the scheduler loop wakes early. The
//! single-writer rule holds; this task never touches rows.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info, warn};

use crate::scheduler::PodSignal;
use crate::settings::Settings;

/// Watch task pods forever, feeding the scheduler's wake signal.
pub async fn run_pod_reflector(client: Client, settings: Settings, signal: Arc<PodSignal>) {
    let pods: Api<Pod> = Api::namespaced(client, &settings.namespace);
    let config = watcher::Config::default().labels("app=task-hub,role=task");
    info!("Pod reflector started.");
    let mut stream = watcher(pods, config).boxed();
    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(pod)) | Ok(watcher::Event::InitApply(pod)) => {
                debug!(pod = %pod.name_any(), "Pod changed.");
                signal.pod_changed(&pod.name_any()).await;
            }
            Ok(watcher::Event::Delete(pod)) => {
                debug!(pod = %pod.name_any(), "Pod deleted.");
                signal.pod_deleted(&pod.name_any()).await;
            }
            Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => {}
            Err(err) => {
                warn!(error = %err, "Pod watch error; retrying.");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    warn!("Pod reflector stream ended.");
}
