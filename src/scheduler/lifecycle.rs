//! Per-task lifecycle.
//!
//! Builds the pod (secret + main/extension containers + volumes), creates
//! and deletes the k8s objects, and interprets pod phase into task state.
//! The secret is created first and owner-referenced to the pod afterward so
//! pod deletion garbage-collects it.

use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::api::core::v1::{
    Container, ContainerStatus, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, Secret, SecretKeySelector, SecurityContext,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::core::ObjectMeta;
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::info;

use crate::auth;
use crate::crd::{Addon, Extension, Hub};
use crate::db::Database;
use crate::model::{Tag, Task, TaskState};
use crate::settings::{
    Settings, ENV_CACHE_PATH, ENV_HUB_BASE_URL, ENV_HUB_TOKEN, ENV_SHARED_PATH, ENV_TASK,
};

use super::cluster::ClusterSnapshot;
use super::error::{Error, Result};
use super::resolver::{AddonResolver, ExtensionResolver};
use super::selector;

/// Name given to the main (addon) container.
pub const ADDON_CONTAINER: &str = "addon";

/// Volume names.
const SHARED_VOLUME: &str = "shared";
const CACHE_VOLUME: &str = "cache";

/// Exit code for OOM/killed containers; retried up to the configured limit.
const EXIT_KILLED: i32 = 137;

/// Lifecycle operations on one task.
pub struct Lifecycle<'a> {
    client: &'a Client,
    db: &'a Database,
    settings: &'a Settings,
}

impl<'a> Lifecycle<'a> {
    pub fn new(client: &'a Client, db: &'a Database, settings: &'a Settings) -> Self {
        Self {
            client,
            db,
            settings,
        }
    }

    /// Launch the task: `Ready -> Pending`. On `QuotaExceeded` the task is
    /// left untouched (stays `Ready`); any other failure marks it `Failed`
    /// with the message attached.
    pub async fn run(&self, task: &mut Task, snapshot: &ClusterSnapshot) -> Result<()> {
        let result = self.launch(task, snapshot).await;
        if let Err(ref err) = result {
            if !err.quota_exceeded() {
                task.error("Error", err.to_string());
                task.terminated = Some(Utc::now());
                task.state = TaskState::Failed;
            }
        }
        result
    }

    async fn launch(&self, task: &mut Task, snapshot: &ClusterSnapshot) -> Result<()> {
        self.select_addon(task, snapshot).await?;
        let priority_class = select_priority(task, snapshot)?;
        let addon = snapshot
            .addons
            .get(&task.addon)
            .ok_or_else(|| Error::AddonNotFound(task.addon.clone()))?;
        self.select_extensions(task, snapshot, addon).await?;
        let mut extensions = Vec::new();
        for name in &task.extensions {
            let extension = snapshot
                .extensions
                .get(name)
                .ok_or_else(|| Error::ExtensionNotFound(name.clone()))?;
            if extension.spec.addon != task.addon {
                return Err(Error::ExtensionNotValid {
                    name: name.clone(),
                    addon: task.addon.clone(),
                });
            }
            extensions.push(extension.clone());
        }

        let token = auth::mint_addon_token(&self.settings.token_key, &task.addon, task.id)
            .map_err(|err| Error::Token(err.to_string()))?;
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.settings.namespace);
        let secret = build_secret(self.settings, task, &token);
        let secret = secrets.create(&PostParams::default(), &secret).await?;
        let secret_name = secret.name_any();

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.settings.namespace);
        let pod = build_pod(
            self.settings,
            task,
            &priority_class,
            addon,
            &extensions,
            &snapshot.hub,
            &secret_name,
        );
        let created = match pods.create(&PostParams::default(), &pod).await {
            Ok(created) => created,
            Err(err) => {
                let _ = secrets.delete(&secret_name, &DeleteParams::default()).await;
                return Err(Error::from_pod_create(err));
            }
        };
        let pod_name = created.name_any();

        // Cascade secret deletion with the pod.
        let owner = json!({
            "metadata": {
                "ownerReferences": [{
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "name": pod_name,
                    "uid": created.metadata.uid,
                }],
            },
        });
        if let Err(err) = secrets
            .patch(&secret_name, &PatchParams::default(), &Patch::Merge(&owner))
            .await
        {
            let _ = pods.delete(&pod_name, &DeleteParams::default()).await;
            let _ = secrets.delete(&secret_name, &DeleteParams::default()).await;
            return Err(err.into());
        }

        task.started = Some(Utc::now());
        task.state = TaskState::Pending;
        task.pod = format!("{}/{}", self.settings.namespace, pod_name);
        Ok(())
    }

    /// Update the task to reflect its pod. A missing pod is relaunched.
    /// Returns the observed pod, when there is one.
    pub async fn reflect(
        &self,
        task: &mut Task,
        snapshot: &ClusterSnapshot,
    ) -> Result<Option<Pod>> {
        let Some(pod) = snapshot.pods.get(task.pod_name()) else {
            // The pod was lost; launch again. Quota keeps it Pending for the
            // next tick.
            return match self.run(task, snapshot).await {
                Ok(()) => Ok(None),
                Err(err) if err.quota_exceeded() => Ok(None),
                Err(err) => Err(err),
            };
        };
        let phase = pod
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            .unwrap_or("");
        let delete_for_retry = match phase {
            "Pending" => {
                on_pod_pending(task, pod);
                false
            }
            "Running" => on_pod_running(task, pod, self.settings.retries),
            "Succeeded" => {
                on_pod_succeeded(task);
                false
            }
            "Failed" => on_pod_failed(task, pod, self.settings.retries),
            _ => false,
        };
        if delete_for_retry {
            let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.settings.namespace);
            let _ = pods
                .delete(&pod.name_any(), &DeleteParams::default().grace_period(0))
                .await;
        }
        Ok(Some(pod.clone()))
    }

    /// Cancel the task: delete the pod, release the bucket, `Canceled`.
    /// Idempotent.
    pub async fn cancel(&self, task: &mut Task) -> Result<()> {
        if task.state.terminal() {
            return Ok(());
        }
        self.delete_pod(task).await?;
        task.state = TaskState::Canceled;
        task.terminated = Some(Utc::now());
        if let Some(bucket) = task.bucket.take() {
            if let Some(path) = self.db.get_bucket(bucket).await? {
                let _ = tokio::fs::remove_dir_all(&path).await;
            }
            self.db.delete_bucket(bucket).await?;
        }
        info!(task = task.id, "Task canceled.");
        Ok(())
    }

    /// Delete the task's pod; `NotFound` is success.
    pub async fn delete_pod(&self, task: &mut Task) -> Result<()> {
        if task.pod.is_empty() {
            return Ok(());
        }
        let name = task.pod_name().to_string();
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.settings.namespace);
        match pods
            .delete(&name, &DeleteParams::default().grace_period(0))
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(response)) if response.code == 404 => {}
            Err(err) => return Err(err.into()),
        }
        task.pod.clear();
        info!(task = task.id, pod = %name, "Task pod deleted.");
        Ok(())
    }

    /// Select an addon by evaluating the kind's selectors in order; first
    /// match wins.
    async fn select_addon(&self, task: &mut Task, snapshot: &ClusterSnapshot) -> Result<()> {
        if !task.addon.is_empty() {
            return Ok(());
        }
        let kind = snapshot
            .task_kinds
            .get(&task.kind)
            .ok_or_else(|| Error::KindNotFound(task.kind.clone()))?;
        let tags = self.application_tags(task).await?;
        let resolver = AddonResolver::new(snapshot, &kind.name_any());
        for sel in &kind.spec.addon {
            let matched = selector::evaluate(sel, &resolver, &tags)?;
            if let Some(first) = matched.first() {
                task.addon = first.clone();
                return Ok(());
            }
        }
        Err(Error::AddonNotSelected)
    }

    /// Collect extensions from the addon's selectors when the task does not
    /// name them.
    async fn select_extensions(
        &self,
        task: &mut Task,
        snapshot: &ClusterSnapshot,
        addon: &Addon,
    ) -> Result<()> {
        if !task.extensions.is_empty() {
            return Ok(());
        }
        let tags = self.application_tags(task).await?;
        let resolver = ExtensionResolver::new(snapshot, &task.addon);
        let mut names: Vec<String> = Vec::new();
        for sel in &addon.spec.extension {
            for name in selector::evaluate(sel, &resolver, &tags)? {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        task.extensions = names;
        Ok(())
    }

    async fn application_tags(&self, task: &Task) -> Result<Vec<Tag>> {
        match task.application_id() {
            Some(application) => Ok(self.db.application_tags(application).await?),
            None => Ok(Vec::new()),
        }
    }
}

/// Map the task's priority to a pod priority class name. A task with an
/// explicit priority must match an existing class by value; otherwise the
/// kind's declared class (if any) supplies both.
pub fn select_priority(task: &mut Task, snapshot: &ClusterSnapshot) -> Result<String> {
    if task.priority > 0 {
        return snapshot
            .priority
            .by_value
            .get(&task.priority)
            .cloned()
            .ok_or_else(|| Error::PriorityNotFound(task.priority.to_string()));
    }
    if let Some(kind) = snapshot.task_kinds.get(&task.kind) {
        let name = &kind.spec.priority;
        if !name.is_empty() {
            let value = snapshot
                .priority
                .by_name
                .get(name)
                .ok_or_else(|| Error::PriorityNotFound(format!("\"{name}\"")))?;
            task.priority = *value;
            return Ok(name.clone());
        }
    }
    Ok(String::new())
}

/// Pod phase `Pending`: the task is `Running` once any container started.
pub(crate) fn on_pod_pending(task: &mut Task, pod: &Pod) {
    for status in container_statuses(pod) {
        if status.started == Some(true) {
            task.state = TaskState::Running;
            return;
        }
    }
}

/// Pod phase `Running`. Falls through to succeeded/failed when the addon
/// container already terminated. Returns true when the pod must be deleted
/// for a retry.
pub(crate) fn on_pod_running(task: &mut Task, pod: &Pod, max_retries: i32) -> bool {
    task.state = TaskState::Running;
    let statuses = container_statuses(pod);
    let terminated = statuses
        .iter()
        .find(|status| status.name == ADDON_CONTAINER)
        .and_then(|status| status.state.as_ref())
        .and_then(|state| state.terminated.as_ref());
    if let Some(terminated) = terminated {
        if terminated.exit_code == 0 {
            on_pod_succeeded(task);
        } else {
            return on_pod_failed(task, pod, max_retries);
        }
    }
    false
}

pub(crate) fn on_pod_succeeded(task: &mut Task) {
    task.state = TaskState::Succeeded;
    task.terminated = Some(Utc::now());
}

/// Pod phase `Failed`. Exit 137 (killed) under the retry budget clears the
/// attempt and returns the task to `Ready`; any other non-zero exit is
/// fatal. Returns true when the pod must be deleted for a retry.
pub(crate) fn on_pod_failed(task: &mut Task, pod: &Pod, max_retries: i32) -> bool {
    for status in container_statuses(pod) {
        let Some(terminated) = status.state.as_ref().and_then(|s| s.terminated.as_ref()) else {
            continue;
        };
        match terminated.exit_code {
            0 => {}
            EXIT_KILLED if task.retries < max_retries => {
                task.pod.clear();
                task.state = TaskState::Ready;
                task.errors.clear();
                task.retries += 1;
                return true;
            }
            _ => {
                task.state = TaskState::Failed;
                task.terminated = Some(Utc::now());
                let reason = terminated.reason.as_deref().unwrap_or("Error");
                task.error(
                    "Error",
                    format!("Container ({}) failed: {}", status.name, reason),
                );
                return false;
            }
        }
    }
    false
}

fn container_statuses(pod: &Pod) -> Vec<ContainerStatus> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };
    let mut statuses = Vec::new();
    statuses.extend(status.init_container_statuses.clone().unwrap_or_default());
    statuses.extend(status.container_statuses.clone().unwrap_or_default());
    statuses
}

/// Name prefix for the task's k8s objects; the server appends a suffix.
fn generate_name(task: &Task) -> String {
    format!("task-{}-", task.id)
}

/// Labels stamped on the task's pod and secret.
pub fn task_labels(task: &Task) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "task-hub".to_string()),
        ("role".to_string(), "task".to_string()),
        ("task".to_string(), task.id.to_string()),
    ])
}

/// Owner reference for objects owned by the Hub CR.
pub fn hub_owner_reference(hub: &Hub) -> OwnerReference {
    OwnerReference {
        api_version: Hub::api_version(&()).to_string(),
        kind: Hub::kind(&()).to_string(),
        name: hub.name_any(),
        uid: hub.metadata.uid.clone().unwrap_or_default(),
        ..Default::default()
    }
}

/// Secret holding the freshly issued addon token.
pub fn build_secret(settings: &Settings, task: &Task, token: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            namespace: Some(settings.namespace.clone()),
            generate_name: Some(generate_name(task)),
            labels: Some(task_labels(task)),
            ..Default::default()
        },
        string_data: Some(BTreeMap::from([(
            ENV_HUB_TOKEN.to_string(),
            token.to_string(),
        )])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Build the task pod: one addon container plus one per extension, shared
/// and cache volumes, common env, owner-referenced to the Hub CR.
pub fn build_pod(
    settings: &Settings,
    task: &Task,
    priority_class: &str,
    addon: &Addon,
    extensions: &[Extension],
    hub: &Hub,
    secret_name: &str,
) -> Pod {
    Pod {
        metadata: ObjectMeta {
            namespace: Some(settings.namespace.clone()),
            generate_name: Some(generate_name(task)),
            labels: Some(task_labels(task)),
            owner_references: Some(vec![hub_owner_reference(hub)]),
            ..Default::default()
        },
        spec: Some(pod_spec(
            settings,
            task,
            priority_class,
            addon,
            extensions,
            secret_name,
        )),
        ..Default::default()
    }
}

fn pod_spec(
    settings: &Settings,
    task: &Task,
    priority_class: &str,
    addon: &Addon,
    extensions: &[Extension],
    secret_name: &str,
) -> PodSpec {
    let shared = Volume {
        name: SHARED_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    };
    let cache = if settings.cache_rwx {
        Volume {
            name: CACHE_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: settings.cache_pvc.clone(),
                read_only: None,
            }),
            ..Default::default()
        }
    } else {
        Volume {
            name: CACHE_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }
    };
    PodSpec {
        service_account_name: Some(settings.service_account.clone()),
        restart_policy: Some("Never".to_string()),
        priority_class_name: if priority_class.is_empty() {
            None
        } else {
            Some(priority_class.to_string())
        },
        containers: containers(settings, task, addon, extensions, secret_name),
        volumes: Some(vec![shared, cache]),
        ..Default::default()
    }
}

fn containers(
    settings: &Settings,
    task: &Task,
    addon: &Addon,
    extensions: &[Extension],
    secret_name: &str,
) -> Vec<Container> {
    let mut list = Vec::with_capacity(1 + extensions.len());
    let mut main = addon.spec.container.clone();
    main.name = ADDON_CONTAINER.to_string();
    list.push(main);
    for extension in extensions {
        let mut container = extension.spec.container.clone();
        container.name = extension.name_any();
        // Mirror extension env onto the addon container.
        for env in container.env.clone().unwrap_or_default() {
            list[0].env.get_or_insert_with(Vec::new).push(EnvVar {
                name: ext_env(&container.name, &env.name),
                value: env.value.clone(),
                value_from: None,
            });
        }
        list.push(container);
    }
    for container in list.iter_mut() {
        inject_common(settings, task, container, secret_name);
    }
    list
}

/// Common mounts and env shared by every container in the task pod.
fn inject_common(settings: &Settings, task: &Task, container: &mut Container, secret_name: &str) {
    container.security_context = Some(SecurityContext {
        run_as_user: Some(0),
        ..Default::default()
    });
    container
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .extend([
            VolumeMount {
                name: SHARED_VOLUME.to_string(),
                mount_path: settings.shared_path.clone(),
                ..Default::default()
            },
            VolumeMount {
                name: CACHE_VOLUME.to_string(),
                mount_path: settings.cache_path.clone(),
                ..Default::default()
            },
        ]);
    container.env.get_or_insert_with(Vec::new).extend([
        plain_env(ENV_SHARED_PATH, &settings.shared_path),
        plain_env(ENV_CACHE_PATH, &settings.cache_path),
        plain_env(ENV_HUB_BASE_URL, &settings.hub_base_url),
        plain_env(ENV_TASK, &task.id.to_string()),
        EnvVar {
            name: ENV_HUB_TOKEN.to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret_name.to_string(),
                    key: ENV_HUB_TOKEN.to_string(),
                    optional: None,
                }),
                ..Default::default()
            }),
        },
    ]);
}

fn plain_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

/// Environment variable name namespaced to an extension:
/// `_EXT_<EXTENSION_UPPER>_<NAME>`.
pub fn ext_env(extension: &str, name: &str) -> String {
    format!("_EXT_{}_{}", extension.to_uppercase(), name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::cluster::testing;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateTerminated, PodStatus};

    fn settings() -> Settings {
        Settings::load()
    }

    fn task(id: i64) -> Task {
        Task {
            id,
            addon: "a1".to_string(),
            state: TaskState::Pending,
            pod: format!("task-hub/task-{id}-abcde"),
            ..Default::default()
        }
    }

    fn pod_with(phase: &str, statuses: Vec<ContainerStatus>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(statuses),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn terminated(name: &str, exit_code: i32, reason: &str) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    reason: Some(reason.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn started(name: &str) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            started: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_pod_contract() {
        let settings = settings();
        let mut task = task(7);
        task.extensions = vec!["e1".to_string()];
        let addon = testing::addon("a1", "analyze", "");
        let mut extension = testing::extension("e1", "a1");
        extension.spec.container.env = Some(vec![plain_env("DEPTH", "2")]);
        let hub = testing::snapshot().hub;

        let pod = build_pod(
            &settings,
            &task,
            "task-normal",
            &addon,
            &[extension],
            &hub,
            "task-7-secret",
        );

        assert_eq!(pod.metadata.generate_name.as_deref(), Some("task-7-"));
        let labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("role"), Some(&"task".to_string()));
        assert_eq!(labels.get("task"), Some(&"7".to_string()));
        let owner = &pod.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "Hub");

        let spec = pod.spec.as_ref().unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.priority_class_name.as_deref(), Some("task-normal"));
        assert_eq!(spec.volumes.as_ref().unwrap().len(), 2);

        let names: Vec<&str> = spec.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![ADDON_CONTAINER, "e1"]);

        // Common env on every container; extension env mirrored on addon.
        for container in &spec.containers {
            let env = container.env.as_ref().unwrap();
            assert!(env.iter().any(|e| e.name == ENV_TASK && e.value.as_deref() == Some("7")));
            assert!(env.iter().any(|e| e.name == ENV_HUB_TOKEN
                && e.value_from
                    .as_ref()
                    .and_then(|v| v.secret_key_ref.as_ref())
                    .map(|s| s.name == "task-7-secret")
                    .unwrap_or(false)));
        }
        let addon_env = spec.containers[0].env.as_ref().unwrap();
        assert!(addon_env
            .iter()
            .any(|e| e.name == "_EXT_E1_DEPTH" && e.value.as_deref() == Some("2")));
    }

    #[test]
    fn test_cache_volume_pvc_when_rwx() {
        let mut settings = settings();
        settings.cache_rwx = true;
        settings.cache_pvc = "hub-cache".to_string();
        let addon = testing::addon("a1", "analyze", "");
        let hub = testing::snapshot().hub;
        let pod = build_pod(&settings, &task(1), "", &addon, &[], &hub, "s");
        let volumes = pod.spec.unwrap().volumes.unwrap();
        let cache = volumes.iter().find(|v| v.name == CACHE_VOLUME).unwrap();
        assert_eq!(
            cache
                .persistent_volume_claim
                .as_ref()
                .map(|c| c.claim_name.as_str()),
            Some("hub-cache")
        );
    }

    #[test]
    fn test_build_secret_holds_token() {
        let settings = settings();
        let secret = build_secret(&settings, &task(3), "signed-token");
        assert_eq!(secret.metadata.generate_name.as_deref(), Some("task-3-"));
        assert_eq!(
            secret.string_data.as_ref().unwrap().get(ENV_HUB_TOKEN),
            Some(&"signed-token".to_string())
        );
    }

    #[test]
    fn test_pending_pod_with_started_container_runs() {
        let mut task = task(1);
        on_pod_pending(&mut task, &pod_with("Pending", vec![started(ADDON_CONTAINER)]));
        assert_eq!(task.state, TaskState::Running);

        let mut task2 = self::task(2);
        on_pod_pending(&mut task2, &pod_with("Pending", vec![]));
        assert_eq!(task2.state, TaskState::Pending);
    }

    #[test]
    fn test_running_pod_with_exited_addon_succeeds() {
        let mut task = task(1);
        let pod = pod_with("Running", vec![terminated(ADDON_CONTAINER, 0, "Completed")]);
        assert!(!on_pod_running(&mut task, &pod, 1));
        assert_eq!(task.state, TaskState::Succeeded);
        assert!(task.terminated.is_some());
    }

    #[test]
    fn test_killed_pod_retries_until_budget() {
        let max_retries = 2;
        let mut task = task(1);
        let pod = pod_with("Failed", vec![terminated(ADDON_CONTAINER, 137, "OOMKilled")]);

        // First and second kills: back to Ready.
        for attempt in 1..=2 {
            assert!(on_pod_failed(&mut task, &pod, max_retries));
            assert_eq!(task.state, TaskState::Ready);
            assert_eq!(task.retries, attempt);
            assert!(task.pod.is_empty());
            assert!(task.errors.is_empty());
            task.pod = "task-hub/task-1-x".to_string();
            task.state = TaskState::Running;
        }

        // Third kill exhausts the budget.
        assert!(!on_pod_failed(&mut task, &pod, max_retries));
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.retries, 2);
        assert!(task.terminated.is_some());
        assert!(!task.errors.is_empty());
    }

    #[test]
    fn test_failed_pod_records_container_error() {
        let mut task = task(1);
        let pod = pod_with("Failed", vec![terminated(ADDON_CONTAINER, 9, "Error")]);
        assert!(!on_pod_failed(&mut task, &pod, 1));
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(
            task.errors[0].description,
            "Container (addon) failed: Error"
        );
    }

    #[test]
    fn test_select_priority() {
        let mut snapshot = testing::snapshot();
        snapshot.priority.by_name.insert("task-high".into(), 100);
        snapshot.priority.by_value.insert(100, "task-high".into());
        let kind = testing::kind("analyze", &[]);
        snapshot.task_kinds.insert("analyze".into(), kind);

        // Explicit value resolves to the class name.
        let mut task = Task {
            priority: 100,
            ..Default::default()
        };
        assert_eq!(select_priority(&mut task, &snapshot).unwrap(), "task-high");

        // Unknown value fails.
        task.priority = 55;
        assert!(matches!(
            select_priority(&mut task, &snapshot),
            Err(Error::PriorityNotFound(_))
        ));

        // Kind-declared class supplies the value.
        let mut kind = testing::kind("analyze", &[]);
        kind.spec.priority = "task-high".into();
        snapshot.task_kinds.insert("analyze".into(), kind);
        let mut task = Task {
            kind: "analyze".into(),
            ..Default::default()
        };
        assert_eq!(select_priority(&mut task, &snapshot).unwrap(), "task-high");
        assert_eq!(task.priority, 100);
    }

    #[test]
    fn test_ext_env_format() {
        assert_eq!(ext_env("e1", "DEPTH"), "_EXT_E1_DEPTH");
        assert_eq!(ext_env("scanner", "LEVEL"), "_EXT_SCANNER_LEVEL");
    }
}
