//! Task scheduler.
//!
//! A single long-lived loop owns every task state transition: each iteration
//! refreshes the cluster snapshot, reflects pod state onto Pending/Running
//! tasks, then admits Ready tasks subject to postponement and priority
//! escalation. Pod events only wake the loop early; they never mutate rows.

pub mod cluster;
pub mod error;
pub mod escalate;
pub mod lifecycle;
pub mod resolver;
pub mod rules;
pub mod selector;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::{Event as CoreEvent, Pod};
use kube::api::{ListParams, LogParams};
use kube::{Api, Client, ResourceExt};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::api::watch::WatchHub;
use crate::db::Database;
use crate::health::HealthState;
use crate::model::{Ref, Task, TaskState};
use crate::settings::Settings;

use cluster::ClusterSnapshot;
use error::Result;
use lifecycle::Lifecycle;

/// Wake signal fed by the pod reflector. The reflector only marks pods dirty;
/// the loop consumes the set at the top of the next iteration.
#[derive(Default)]
pub struct PodSignal {
    dirty: Mutex<HashSet<String>>,
    notify: Notify,
}

impl PodSignal {
    pub async fn pod_changed(&self, name: &str) {
        self.dirty.lock().await.insert(name.to_string());
        self.notify.notify_one();
    }

    pub async fn pod_deleted(&self, name: &str) {
        self.dirty.lock().await.insert(name.to_string());
        self.notify.notify_one();
    }

    async fn drain(&self) -> HashSet<String> {
        std::mem::take(&mut *self.dirty.lock().await)
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// The scheduler.
pub struct Manager {
    client: Client,
    db: Database,
    settings: Settings,
    watches: Arc<WatchHub>,
    health: Arc<HealthState>,
    signal: Arc<PodSignal>,
}

impl Manager {
    pub fn new(
        client: Client,
        db: Database,
        settings: Settings,
        watches: Arc<WatchHub>,
        health: Arc<HealthState>,
        signal: Arc<PodSignal>,
    ) -> Self {
        Self {
            client,
            db,
            settings,
            watches,
            health,
            signal,
        }
    }

    /// Run the scheduler loop; never returns.
    pub async fn run(self) {
        info!("Task scheduler started.");
        loop {
            let dirty = self.signal.drain().await;
            if !dirty.is_empty() {
                debug!(pods = dirty.len(), "Pod changes observed.");
            }
            match ClusterSnapshot::refresh(&self.client, &self.settings.namespace).await {
                Ok(snapshot) => {
                    self.health.metrics.record_tick();
                    self.reap_expired().await;
                    self.update_running(&snapshot).await;
                    self.start_ready(&snapshot).await;
                }
                Err(err) => {
                    warn!(error = %err, "Cluster snapshot failed.");
                }
            }
            self.pause().await;
        }
    }

    async fn pause(&self) {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(self.settings.frequency)) => {}
            _ = self.signal.notified() => {}
        }
    }

    /// Reflect pod state onto Pending/Running tasks; snapshot and reap pods
    /// of tasks that reached a terminal state.
    async fn update_running(&self, snapshot: &ClusterSnapshot) {
        let list = match self
            .db
            .tasks_in_states(&[TaskState::Pending, TaskState::Running])
            .await
        {
            Ok(list) => list,
            Err(err) => {
                warn!(error = %err, "Task query failed.");
                return;
            }
        };
        let lifecycle = Lifecycle::new(&self.client, &self.db, &self.settings);
        for mut task in list {
            if task.canceled {
                self.cancel(&lifecycle, &mut task).await;
                continue;
            }
            let before = task.state;
            match lifecycle.reflect(&mut task, snapshot).await {
                Ok(pod) => {
                    if matches!(task.state, TaskState::Succeeded | TaskState::Failed) {
                        if let Some(pod) = pod {
                            if let Err(err) = self.snapshot_pod(&mut task, &pod).await {
                                warn!(task = task.id, error = %err, "Pod snapshot failed.");
                            }
                        }
                        if let Err(err) = lifecycle.delete_pod(&mut task).await {
                            warn!(task = task.id, error = %err, "Pod delete failed.");
                        }
                    }
                }
                Err(err) => {
                    warn!(task = task.id, error = %err, "Task reflect failed.");
                }
            }
            self.save(&task, before).await;
            debug!(task = task.id, state = %task.state, "Task updated.");
        }
    }

    /// Admit ready tasks: cancellation, escalation, postponement, then launch
    /// in (priority desc, id asc) order.
    async fn start_ready(&self, snapshot: &ClusterSnapshot) {
        let mut list = match self
            .db
            .tasks_in_states(&[
                TaskState::Ready,
                TaskState::Postponed,
                TaskState::Pending,
                TaskState::Running,
            ])
            .await
        {
            Ok(list) => list,
            Err(err) => {
                warn!(error = %err, "Task query failed.");
                return;
            }
        };
        let lifecycle = Lifecycle::new(&self.client, &self.db, &self.settings);

        if self.settings.disconnected {
            for task in list.iter_mut().filter(|t| t.state == TaskState::Ready) {
                let before = task.state;
                task.state = TaskState::Failed;
                task.terminated = Some(Utc::now());
                task.error("Error", "Hub is disconnected.");
                self.save(task, before).await;
            }
            return;
        }

        for task in list.iter_mut() {
            if task.canceled && !task.state.terminal() {
                let before = task.state;
                if let Err(err) = lifecycle.cancel(task).await {
                    warn!(task = task.id, error = %err, "Task cancel failed.");
                    continue;
                }
                let _ = self.db.delete_report(task.id).await;
                self.save(task, before).await;
            }
        }

        // Escalation: a Pending task whose priority rose is relaunched so the
        // new priority class takes effect.
        let escalated = escalate::escalate(&mut list, &snapshot.task_kinds);
        for id in &escalated {
            let Some(task) = list.iter_mut().find(|t| t.id == *id) else {
                continue;
            };
            debug!(task = task.id, priority = task.priority, "Priority escalated.");
            let before = task.state;
            if task.state == TaskState::Pending {
                if let Err(err) = lifecycle.delete_pod(task).await {
                    warn!(task = task.id, error = %err, "Pod delete failed.");
                    continue;
                }
                task.state = TaskState::Ready;
            }
            self.save(task, before).await;
        }

        // Postpone pass: matched Ready tasks wait; unmatched Postponed tasks
        // return to Ready.
        for i in 0..list.len() {
            if !matches!(list[i].state, TaskState::Ready | TaskState::Postponed) {
                continue;
            }
            let matched = self.postponed_by_any(&list, i, snapshot);
            let next = if matched {
                TaskState::Postponed
            } else {
                TaskState::Ready
            };
            if list[i].state != next {
                let before = list[i].state;
                list[i].state = next;
                info!(task = list[i].id, state = %next, "Task postponement updated.");
                self.save(&list[i], before).await;
            }
        }

        // Priorities may have changed; restore queue order.
        list.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        for i in 0..list.len() {
            if list[i].state != TaskState::Ready {
                continue;
            }
            // Tasks launched earlier in this pass count against the rules.
            if self.postponed_by_any(&list, i, snapshot) {
                let before = list[i].state;
                list[i].state = TaskState::Postponed;
                self.save(&list[i], before).await;
                continue;
            }
            let before = list[i].state;
            let task = &mut list[i];
            match lifecycle.run(task, snapshot).await {
                Ok(()) => {
                    info!(task = task.id, pod = %task.pod, "Task started.");
                    if task.retries == 0 {
                        self.health.metrics.record_initiated();
                    }
                }
                Err(err) if err.quota_exceeded() => {
                    debug!(task = task.id, "Quota exceeded; task stays ready.");
                }
                Err(err) => {
                    warn!(task = task.id, error = %err, "Task start failed.");
                }
            }
            self.save(&list[i], before).await;
        }
    }

    fn postponed_by_any(&self, list: &[Task], i: usize, snapshot: &ClusterSnapshot) -> bool {
        list.iter().enumerate().any(|(j, other)| {
            j != i
                && matches!(other.state, TaskState::Running | TaskState::Pending)
                && rules::postponed(&list[i], other, &snapshot.task_kinds)
        })
    }

    /// Delete tasks that exhausted the time budget for their current state.
    /// Pods and secrets cascade; the bucket is removed with the task.
    async fn reap_expired(&self) {
        let list = match self.db.list_tasks(None).await {
            Ok(list) => list,
            Err(err) => {
                warn!(error = %err, "Task query failed.");
                return;
            }
        };
        let lifecycle = Lifecycle::new(&self.client, &self.db, &self.settings);
        let now = Utc::now();
        for mut task in list {
            let Some(budget) = task.ttl.as_ref().and_then(|ttl| ttl.for_state(task.state)) else {
                continue;
            };
            let Some(entered) = task.state_entered else {
                continue;
            };
            if (now - entered).num_seconds() <= budget {
                continue;
            }
            info!(task = task.id, state = %task.state, "Task TTL expired.");
            if let Err(err) = lifecycle.delete_pod(&mut task).await {
                warn!(task = task.id, error = %err, "Pod delete failed.");
                continue;
            }
            if let Some(bucket) = task.bucket.take() {
                if let Ok(Some(path)) = self.db.get_bucket(bucket).await {
                    let _ = tokio::fs::remove_dir_all(&path).await;
                }
                let _ = self.db.delete_bucket(bucket).await;
            }
            if let Err(err) = self.db.delete_task(task.id).await {
                warn!(task = task.id, error = %err, "Task delete failed.");
                continue;
            }
            self.publish("DELETE", &task);
        }
    }

    async fn cancel(&self, lifecycle: &Lifecycle<'_>, task: &mut Task) {
        let before = task.state;
        if let Err(err) = lifecycle.cancel(task).await {
            warn!(task = task.id, error = %err, "Task cancel failed.");
            return;
        }
        let _ = self.db.delete_report(task.id).await;
        self.save(task, before).await;
    }

    /// Persist and, on a state change, publish to watches and update metrics.
    async fn save(&self, task: &Task, before: TaskState) {
        if let Err(err) = self.db.save_task(task).await {
            warn!(task = task.id, error = %err, "Task save failed.");
            return;
        }
        if task.state != before {
            if task.state.terminal() {
                self.health.metrics.record_completed(task.state.as_str());
            }
            self.publish("PUT", task);
        }
    }

    fn publish(&self, method: &str, task: &Task) {
        if let Ok(object) = serde_json::to_value(task) {
            self.watches.publish("tasks", method, &object);
        }
    }

    /// Attach `pod.yaml` (manifest + aggregated events) and one log file per
    /// container, then record the events on the task row.
    async fn snapshot_pod(&self, task: &mut Task, pod: &Pod) -> Result<()> {
        tokio::fs::create_dir_all(&self.settings.files_path).await?;
        let events = self.pod_events(task, pod).await?;
        let manifest = PodManifest { pod, events };
        let content = serde_yaml::to_string(&manifest).unwrap_or_default();
        self.attach(task, "pod.yaml", content.as_bytes()).await?;

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.settings.namespace);
        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.clone())
            .unwrap_or_default();
        for container in containers {
            let params = LogParams {
                container: Some(container.name.clone()),
                ..Default::default()
            };
            let logs = match pods.logs(&pod.name_any(), &params).await {
                Ok(logs) => logs,
                Err(err) => {
                    warn!(task = task.id, container = %container.name, error = %err,
                        "Container log fetch failed.");
                    continue;
                }
            };
            self.attach(task, &format!("{}.log", container.name), logs.as_bytes())
                .await?;
        }
        debug!(task = task.id, "Task pod snapshot attached.");
        Ok(())
    }

    async fn attach(&self, task: &mut Task, name: &str, content: &[u8]) -> Result<()> {
        let path = format!("{}/{}", self.settings.files_path, uuid::Uuid::new_v4());
        let file = self.db.create_file(name, &path).await?;
        tokio::fs::write(&path, content).await?;
        task.attach(Ref {
            id: file.id,
            name: file.name,
        });
        Ok(())
    }

    /// Fetch events for the pod and fold them onto the task row.
    async fn pod_events(&self, task: &mut Task, pod: &Pod) -> Result<Vec<EventSummary>> {
        let events: Api<CoreEvent> = Api::namespaced(self.client.clone(), &self.settings.namespace);
        let params =
            ListParams::default().fields(&format!("involvedObject.name={}", pod.name_any()));
        let mut summaries = Vec::new();
        for event in events.list(&params).await?.items {
            let kind = event.type_.clone().unwrap_or_default();
            let reason = event.reason.clone().unwrap_or_default();
            let last = event.last_timestamp.as_ref().map(|t| t.0);
            task.event(&kind, &reason, last);
            let age = match (event.first_timestamp.as_ref(), event.last_timestamp.as_ref()) {
                (Some(first), Some(last)) => format!("{}s", (last.0 - first.0).num_seconds()),
                _ => String::new(),
            };
            summaries.push(EventSummary {
                kind,
                reason,
                age,
                reporter: event.reporting_component.clone().unwrap_or_default(),
                message: event.message.clone().unwrap_or_default(),
            });
        }
        Ok(summaries)
    }
}

/// Pod manifest written to `pod.yaml`, events inlined.
#[derive(Serialize)]
struct PodManifest<'a> {
    #[serde(flatten)]
    pod: &'a Pod,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    events: Vec<EventSummary>,
}

#[derive(Serialize)]
struct EventSummary {
    kind: String,
    reason: String,
    age: String,
    reporter: String,
    message: String,
}
