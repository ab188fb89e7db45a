//! Point-in-time view of cluster objects.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};

use crate::crd::{Addon, Extension, Hub, TaskKind};

use super::error::{Error, Result};

/// Priority classes indexed both ways. The scheduler maps a task's integer
/// priority to a class name and a kind's class name to its value.
#[derive(Clone, Debug, Default)]
pub struct PriorityIndex {
    pub by_name: BTreeMap<String, i32>,
    pub by_value: BTreeMap<i32, String>,
}

/// Consistent snapshot of the objects the scheduler reads. Rebuilt on every
/// loop iteration and never mutated after construction.
#[derive(Clone, Debug)]
pub struct ClusterSnapshot {
    pub hub: Hub,
    pub addons: BTreeMap<String, Addon>,
    pub extensions: BTreeMap<String, Extension>,
    pub task_kinds: BTreeMap<String, TaskKind>,
    pub priority: PriorityIndex,
    pub pods: BTreeMap<String, Pod>,
}

impl ClusterSnapshot {
    /// Refresh all maps from the cluster. Fails with `SnapshotUnavailable`
    /// when the Hub CR is missing; the loop treats that as transient.
    pub async fn refresh(client: &Client, namespace: &str) -> Result<Self> {
        let params = ListParams::default();

        let hubs: Api<Hub> = Api::namespaced(client.clone(), namespace);
        let hub = hubs
            .list(&params)
            .await?
            .items
            .into_iter()
            .next()
            .ok_or(Error::SnapshotUnavailable)?;

        let addons: Api<Addon> = Api::namespaced(client.clone(), namespace);
        let addons = addons
            .list(&params)
            .await?
            .items
            .into_iter()
            .map(|r| (r.name_any(), r))
            .collect();

        let extensions: Api<Extension> = Api::namespaced(client.clone(), namespace);
        let extensions = extensions
            .list(&params)
            .await?
            .items
            .into_iter()
            .map(|r| (r.name_any(), r))
            .collect();

        let kinds: Api<TaskKind> = Api::namespaced(client.clone(), namespace);
        let task_kinds = kinds
            .list(&params)
            .await?
            .items
            .into_iter()
            .map(|r| (r.name_any(), r))
            .collect();

        let classes: Api<PriorityClass> = Api::all(client.clone());
        let mut priority = PriorityIndex::default();
        for class in classes.list(&params).await?.items {
            let name = class.name_any();
            priority.by_name.insert(name.clone(), class.value);
            priority.by_value.insert(class.value, name);
        }

        let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
        let pods = pods
            .list(&params)
            .await?
            .items
            .into_iter()
            .map(|r| (r.name_any(), r))
            .collect();

        Ok(Self {
            hub,
            addons,
            extensions,
            task_kinds,
            priority,
            pods,
        })
    }
}
