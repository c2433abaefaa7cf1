//! Resource store abstraction
//!
//! The reconciler never talks to the API server directly. It goes through a
//! [`ResourceStore`], which offers CRUD on dynamic objects, owner-scoped
//! listing, a separate status write path and cluster feature discovery.
//! Writes are version-checked: a stale `resourceVersion` surfaces as
//! [`Error::Conflict`].

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, info};

use crate::crd::{ServiceInstance, ServiceInstanceStatus};
use crate::error::{Error, Result};

use super::kinds::{self, ClusterFeatures};
use super::resources::{MANAGED_BY_LABEL, OPERATOR_NAME};

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// Objects of one kind whose controller owner has the given uid
    async fn list_owned(
        &self,
        resource: &ApiResource,
        namespace: &str,
        owner_uid: &str,
    ) -> Result<Vec<DynamicObject>>;

    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace guarded by the object's `resourceVersion`
    async fn replace(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Delete; an already missing object is not an error
    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()>;

    async fn update_instance_status(
        &self,
        instance: &ServiceInstance,
        status: &ServiceInstanceStatus,
    ) -> Result<()>;

    async fn features(&self) -> Result<ClusterFeatures>;
}

/// Whether an object's controller owner reference points at `owner_uid`
pub fn is_controlled_by(obj: &DynamicObject, owner_uid: &str) -> bool {
    obj.owner_references()
        .iter()
        .any(|r| r.uid == owner_uid && r.controller == Some(true))
}

/// [`ResourceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    features: ClusterFeatures,
}

impl KubeStore {
    pub fn new(client: Client, features: ClusterFeatures) -> Self {
        Self { client, features }
    }

    /// Build a store after probing which optional API groups are served
    pub async fn discover(client: Client) -> Self {
        let features = discover_features(&client).await;
        info!(
            monitoring = features.monitoring,
            dashboards = features.dashboards,
            messaging = features.messaging,
            "Discovered cluster features"
        );
        Self::new(client, features)
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

pub async fn discover_features(client: &Client) -> ClusterFeatures {
    ClusterFeatures {
        monitoring: kube::discovery::group(client, kinds::MONITORING_GROUP)
            .await
            .is_ok(),
        dashboards: kube::discovery::group(client, kinds::DASHBOARD_GROUP)
            .await
            .is_ok(),
        messaging: kube::discovery::group(client, kinds::MESSAGING_GROUP)
            .await
            .is_ok(),
    }
}

fn map_write_error(resource: &ApiResource, name: &str, err: kube::Error) -> Error {
    match &err {
        kube::Error::Api(e) if e.code == 409 && e.reason == "AlreadyExists" => {
            Error::AlreadyExists {
                kind: resource.kind.clone(),
                name: name.to_string(),
            }
        }
        kube::Error::Api(e) if e.code == 409 => Error::Conflict {
            kind: resource.kind.clone(),
            name: name.to_string(),
        },
        _ => Error::KubeError(err),
    }
}

/// Merge patch for the status subresource; cleared optional fields are sent as
/// nulls so the merge removes them
pub fn status_patch(status: &ServiceInstanceStatus) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(status)?;
    if let Some(map) = value.as_object_mut() {
        for key in ["image", "externalUri", "cloudEvents", "resources", "observedGeneration"] {
            map.entry(key).or_insert(serde_json::Value::Null);
        }
    }
    Ok(json!({ "status": value }))
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.api(resource, namespace).get_opt(name).await?)
    }

    async fn list_owned(
        &self,
        resource: &ApiResource,
        namespace: &str,
        owner_uid: &str,
    ) -> Result<Vec<DynamicObject>> {
        let params = ListParams::default().labels(&format!("{MANAGED_BY_LABEL}={OPERATOR_NAME}"));
        let list = self.api(resource, namespace).list(&params).await?;
        let owned: Vec<DynamicObject> = list
            .items
            .into_iter()
            .filter(|obj| is_controlled_by(obj, owner_uid))
            .collect();
        debug!("Listed {} owned {} in {}", owned.len(), resource.kind, namespace);
        Ok(owned)
    }

    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        self.api(resource, &namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_write_error(resource, &obj.name_any(), e))
    }

    async fn replace(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        let name = obj.name_any();
        self.api(resource, &namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_write_error(resource, &name, e))
    }

    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        match self
            .api(resource, namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("{} {} already deleted", resource.kind, name);
                Ok(())
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn update_instance_status(
        &self,
        instance: &ServiceInstance,
        status: &ServiceInstanceStatus,
    ) -> Result<()> {
        let namespace = instance.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<ServiceInstance> = Api::namespaced(self.client.clone(), &namespace);
        let patch = status_patch(status)?;
        api.patch_status(
            &instance.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn features(&self) -> Result<ClusterFeatures> {
        Ok(self.features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Condition, ConditionType};

    #[test]
    fn test_status_patch_clears_missing_optionals() {
        let status = ServiceInstanceStatus {
            conditions: vec![Condition::new(ConditionType::Provisioning, "", "")],
            ..Default::default()
        };
        let patch = status_patch(&status).unwrap();
        assert!(patch["status"]["image"].is_null());
        assert!(patch["status"].get("externalUri").is_some());
        assert_eq!(patch["status"]["conditions"][0]["type"], "Provisioning");
    }

    #[test]
    fn test_write_errors_are_mapped() {
        let conflict = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        });
        assert!(matches!(
            map_write_error(&kinds::deployment(), "orders", conflict),
            Error::Conflict { .. }
        ));

        let exists = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "already exists".to_string(),
            reason: "AlreadyExists".to_string(),
            code: 409,
        });
        assert!(matches!(
            map_write_error(&kinds::kafka_topic(), "orders-events", exists),
            Error::AlreadyExists { .. }
        ));
    }
}
