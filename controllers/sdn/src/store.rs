//! Object store access
//!
//! Reconcilers, the Status Reporter and the Pool Manager talk to the API
//! server through [`ResourceApi`], so the same logic runs against
//! `kube::Api` in production and an in-memory store in tests.
//!
//! Writes are JSON merge patches. A patch that carries
//! `metadata.resourceVersion` only applies if the record was not changed
//! since it was read; otherwise it fails with `StoreConflict`.

use crate::error::ControllerError;
use crds::{NetworkNode, NodeGroup, NodeGroupToPoolMapping, PortChannel, Switch, SwitchPort};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// Namespaced CRUD operations on one resource kind
#[async_trait::async_trait]
pub trait ResourceApi<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    /// Kind name used in error messages
    fn kind(&self) -> String;

    async fn get_opt(&self, name: &str) -> Result<Option<K>, ControllerError>;

    async fn get(&self, name: &str) -> Result<K, ControllerError> {
        self.get_opt(name)
            .await?
            .ok_or_else(|| ControllerError::NotFound(format!("{} {}", self.kind(), name)))
    }

    /// `label_selector` uses the `key=value,key2=value2` form
    async fn list(&self, label_selector: Option<&str>) -> Result<Vec<K>, ControllerError>;

    async fn create(&self, obj: &K) -> Result<K, ControllerError>;

    /// Merge patch on metadata and spec
    async fn patch(&self, name: &str, patch: &Value) -> Result<K, ControllerError>;

    /// Merge patch on the status subresource
    async fn patch_status(&self, name: &str, patch: &Value) -> Result<K, ControllerError>;
}

/// Adds `metadata.resourceVersion` of `obj` to a merge patch
pub fn with_resource_version<K: Resource>(mut patch: Value, obj: &K) -> Value {
    if let (Some(rv), Some(map)) = (obj.meta().resource_version.clone(), patch.as_object_mut()) {
        let metadata = map
            .entry("metadata")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("resourceVersion".to_string(), Value::String(rv));
        }
    }
    patch
}

fn map_kube_error(e: kube::Error) -> ControllerError {
    match &e {
        kube::Error::Api(ae) if ae.code == 409 => ControllerError::StoreConflict(ae.message.clone()),
        kube::Error::Api(ae) if ae.code == 404 => ControllerError::NotFound(ae.message.clone()),
        _ => ControllerError::Kube(e),
    }
}

/// [`ResourceApi`] backed by the Kubernetes API server
pub struct KubeResourceApi<K> {
    api: Api<K>,
}

impl<K> KubeResourceApi<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait::async_trait]
impl<K> ResourceApi<K> for KubeResourceApi<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn kind(&self) -> String {
        K::kind(&()).to_string()
    }

    async fn get_opt(&self, name: &str) -> Result<Option<K>, ControllerError> {
        self.api.get_opt(name).await.map_err(map_kube_error)
    }

    async fn list(&self, label_selector: Option<&str>) -> Result<Vec<K>, ControllerError> {
        let lp = match label_selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };
        Ok(self.api.list(&lp).await.map_err(map_kube_error)?.items)
    }

    async fn create(&self, obj: &K) -> Result<K, ControllerError> {
        self.api.create(&PostParams::default(), obj).await.map_err(map_kube_error)
    }

    async fn patch(&self, name: &str, patch: &Value) -> Result<K, ControllerError> {
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(map_kube_error)
    }

    async fn patch_status(&self, name: &str, patch: &Value) -> Result<K, ControllerError> {
        self.api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(map_kube_error)
    }
}

/// Store handles for every kind the controller touches
#[derive(Clone)]
pub struct Stores {
    pub switches: Arc<dyn ResourceApi<Switch>>,
    pub switch_ports: Arc<dyn ResourceApi<SwitchPort>>,
    pub port_channels: Arc<dyn ResourceApi<PortChannel>>,
    pub network_nodes: Arc<dyn ResourceApi<NetworkNode>>,
    pub node_groups: Arc<dyn ResourceApi<NodeGroup>>,
    pub mappings: Arc<dyn ResourceApi<NodeGroupToPoolMapping>>,
}

impl Stores {
    pub fn kube(client: &Client, namespace: &str) -> Self {
        Self {
            switches: Arc::new(KubeResourceApi::<Switch>::new(client.clone(), namespace)),
            switch_ports: Arc::new(KubeResourceApi::<SwitchPort>::new(client.clone(), namespace)),
            port_channels: Arc::new(KubeResourceApi::<PortChannel>::new(client.clone(), namespace)),
            network_nodes: Arc::new(KubeResourceApi::<NetworkNode>::new(client.clone(), namespace)),
            node_groups: Arc::new(KubeResourceApi::<NodeGroup>::new(client.clone(), namespace)),
            mappings: Arc::new(KubeResourceApi::<NodeGroupToPoolMapping>::new(client.clone(), namespace)),
        }
    }
}

/// `key=value,key2=value2` equality selector match
pub fn matches_labels<K: Resource>(obj: &K, selector: &str) -> bool {
    let labels = obj.labels();
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(term),
        })
}

/// RFC 7386 merge: `null` removes, objects merge recursively, anything else replaces
pub fn json_merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = Value::Object(serde_json::Map::new());
            }
            if let Value::Object(target_map) = target {
                for (key, value) in patch_map {
                    if value.is_null() {
                        target_map.remove(key);
                    } else {
                        json_merge(target_map.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

#[cfg(test)]
pub use memory::{MemoryStore, WriteLog, WriteOp, WriteRecord};
