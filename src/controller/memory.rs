//! In-memory resource store and audit sink
//!
//! Mirrors the API server semantics the reconciler depends on: generated
//! uids, version-checked replaces, status preserved across spec writes and
//! `AlreadyExists` on duplicate creates. Used by tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use tokio::sync::{Mutex, RwLock};

use crate::crd::{ServiceInstance, ServiceInstanceStatus};
use crate::error::{Error, Result};

use super::audit::{AuditEvent, AuditSink};
use super::kinds::ClusterFeatures;
use super::store::{is_controlled_by, ResourceStore};

type ObjectKey = (String, String, String);

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    statuses: BTreeMap<(String, String), ServiceInstanceStatus>,
    next_version: u64,
    writes: u64,
}

impl MemoryState {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    features: ClusterFeatures,
}

fn key(resource: &ApiResource, namespace: &str, name: &str) -> ObjectKey {
    (resource.kind.clone(), namespace.to_string(), name.to_string())
}

fn object_namespace(obj: &DynamicObject) -> String {
    obj.namespace().unwrap_or_else(|| "default".to_string())
}

fn not_found(resource: &ApiResource, name: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} {} not found", resource.kind, name),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_features(features: ClusterFeatures) -> Self {
        Self {
            state: Arc::default(),
            features,
        }
    }

    /// Seed an object as if created by someone else
    pub async fn insert(&self, resource: &ApiResource, obj: DynamicObject) -> DynamicObject {
        let mut state = self.state.write().await;
        let mut obj = obj;
        let version = state.bump();
        obj.metadata.resource_version = Some(version.clone());
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(format!("uid-{version}"));
        }
        state.objects.insert(
            key(resource, &object_namespace(&obj), &obj.name_any()),
            obj.clone(),
        );
        obj
    }

    /// Overwrite the `status` of a stored object, as a controller would
    pub async fn set_object_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let version = state.bump();
        let obj = state
            .objects
            .get_mut(&key(resource, namespace, name))
            .ok_or_else(|| not_found(resource, name))?;
        obj.data["status"] = status;
        obj.metadata.resource_version = Some(version);
        Ok(())
    }

    pub async fn object(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Option<DynamicObject> {
        self.state
            .read()
            .await
            .objects
            .get(&key(resource, namespace, name))
            .cloned()
    }

    pub async fn objects_of(&self, resource: &ApiResource) -> Vec<DynamicObject> {
        self.state
            .read()
            .await
            .objects
            .iter()
            .filter(|((kind, _, _), _)| *kind == resource.kind)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    pub async fn instance_status(&self, namespace: &str, name: &str) -> Option<ServiceInstanceStatus> {
        self.state
            .read()
            .await
            .statuses
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of create, replace and delete calls that changed state
    pub async fn write_count(&self) -> u64 {
        self.state.read().await.writes
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.object(resource, namespace, name).await)
    }

    async fn list_owned(
        &self,
        resource: &ApiResource,
        namespace: &str,
        owner_uid: &str,
    ) -> Result<Vec<DynamicObject>> {
        Ok(self
            .state
            .read()
            .await
            .objects
            .iter()
            .filter(|((kind, ns, _), obj)| {
                *kind == resource.kind && ns == namespace && is_controlled_by(obj, owner_uid)
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let mut state = self.state.write().await;
        let k = key(resource, &object_namespace(obj), &obj.name_any());
        if state.objects.contains_key(&k) {
            return Err(Error::AlreadyExists {
                kind: resource.kind.clone(),
                name: obj.name_any(),
            });
        }
        let version = state.bump();
        let mut created = obj.clone();
        created.metadata.uid = Some(format!("uid-{version}"));
        created.metadata.resource_version = Some(version);
        created.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
        state.objects.insert(k, created.clone());
        state.writes += 1;
        Ok(created)
    }

    async fn replace(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let mut state = self.state.write().await;
        let k = key(resource, &object_namespace(obj), &obj.name_any());
        let current = state
            .objects
            .get(&k)
            .cloned()
            .ok_or_else(|| not_found(resource, &obj.name_any()))?;
        if current.metadata.resource_version != obj.metadata.resource_version {
            return Err(Error::Conflict {
                kind: resource.kind.clone(),
                name: obj.name_any(),
            });
        }
        let version = state.bump();
        let mut replaced = obj.clone();
        replaced.metadata.uid = current.metadata.uid.clone();
        replaced.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        replaced.metadata.resource_version = Some(version);
        match current.data.get("status") {
            Some(status) => replaced.data["status"] = status.clone(),
            None => {
                if let Some(map) = replaced.data.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        state.objects.insert(k, replaced.clone());
        state.writes += 1;
        Ok(replaced)
    }

    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.objects.remove(&key(resource, namespace, name)).is_some() {
            state.writes += 1;
        }
        Ok(())
    }

    async fn update_instance_status(
        &self,
        instance: &ServiceInstance,
        status: &ServiceInstanceStatus,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let namespace = instance.namespace().unwrap_or_else(|| "default".to_string());
        state
            .statuses
            .insert((namespace, instance.name_any()), status.clone());
        Ok(())
    }

    async fn features(&self) -> Result<ClusterFeatures> {
        Ok(self.features)
    }
}

/// Audit sink that keeps every event in order
#[derive(Clone, Debug, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, _instance: &ServiceInstance, event: &AuditEvent) -> Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::kinds;

    fn config_map(name: &str) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &kinds::config_map()).within("default");
        obj.data = serde_json::json!({ "data": { "key": "value" } });
        obj
    }

    #[tokio::test]
    async fn test_create_twice_reports_already_exists() {
        let store = MemoryStore::new();
        let ar = kinds::config_map();
        store.create(&ar, &config_map("settings")).await.unwrap();
        let err = store.create(&ar, &config_map("settings")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
        assert_eq!(store.objects_of(&ar).await.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_replace_conflicts() {
        let store = MemoryStore::new();
        let ar = kinds::config_map();
        let created = store.create(&ar, &config_map("settings")).await.unwrap();

        let mut first = created.clone();
        first.data["data"]["key"] = serde_json::json!("one");
        store.replace(&ar, &first).await.unwrap();

        let mut second = created;
        second.data["data"]["key"] = serde_json::json!("two");
        let err = store.replace(&ar, &second).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_replace_preserves_status() {
        let store = MemoryStore::new();
        let ar = kinds::deployment();
        let mut obj = DynamicObject::new("orders", &ar).within("default");
        obj.data = serde_json::json!({ "spec": { "replicas": 1 } });
        store.create(&ar, &obj).await.unwrap();
        store
            .set_object_status(&ar, "default", "orders", serde_json::json!({ "readyReplicas": 1 }))
            .await
            .unwrap();

        let mut current = store.object(&ar, "default", "orders").await.unwrap();
        current.data["spec"]["replicas"] = serde_json::json!(2);
        if let Some(map) = current.data.as_object_mut() {
            map.remove("status");
        }
        let replaced = store.replace(&ar, &current).await.unwrap();
        assert_eq!(replaced.data["status"]["readyReplicas"], 1);
        assert_eq!(replaced.data["spec"]["replicas"], 2);
    }
}
