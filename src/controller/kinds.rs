//! Managed resource kinds
//!
//! Every object the operator reads or writes is handled as a
//! `DynamicObject` described by an `ApiResource`, so the diff and apply
//! machinery is uniform across built-in kinds and third-party CRDs.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::Resource;
use serde::Serialize;

use crate::crd::InfraResource;
use crate::error::Result;

pub const DEPLOYMENT: &str = "Deployment";
pub const SERVICE: &str = "Service";
pub const CONFIG_MAP: &str = "ConfigMap";
pub const INGRESS: &str = "Ingress";
pub const SERVICE_MONITOR: &str = "ServiceMonitor";
pub const GRAFANA_DASHBOARD: &str = "GrafanaDashboard";
pub const KAFKA: &str = "Kafka";
pub const KAFKA_TOPIC: &str = "KafkaTopic";

pub const MONITORING_GROUP: &str = "monitoring.coreos.com";
pub const DASHBOARD_GROUP: &str = "integreatly.org";
pub const MESSAGING_GROUP: &str = "kafka.strimzi.io";

pub fn deployment() -> ApiResource {
    ApiResource::erase::<Deployment>(&())
}

pub fn service() -> ApiResource {
    ApiResource::erase::<Service>(&())
}

pub fn config_map() -> ApiResource {
    ApiResource::erase::<ConfigMap>(&())
}

pub fn ingress() -> ApiResource {
    ApiResource::erase::<Ingress>(&())
}

pub fn infra_resource() -> ApiResource {
    ApiResource::erase::<InfraResource>(&())
}

pub fn service_monitor() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(MONITORING_GROUP, "v1", SERVICE_MONITOR))
}

pub fn grafana_dashboard() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        DASHBOARD_GROUP,
        "v1alpha1",
        GRAFANA_DASHBOARD,
    ))
}

pub fn kafka() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(MESSAGING_GROUP, "v1beta2", KAFKA))
}

pub fn kafka_topic() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(MESSAGING_GROUP, "v1beta2", KAFKA_TOPIC))
}

/// Optional subsystems discovered on the cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClusterFeatures {
    /// Prometheus operator (`ServiceMonitor`)
    pub monitoring: bool,
    /// Grafana operator (`GrafanaDashboard`)
    pub dashboards: bool,
    /// Strimzi (`Kafka`, `KafkaTopic`)
    pub messaging: bool,
}

impl ClusterFeatures {
    pub fn all() -> Self {
        Self {
            monitoring: true,
            dashboards: true,
            messaging: true,
        }
    }

    /// Kinds owned by an instance on this cluster, in apply order
    pub fn owned_kinds(&self) -> Vec<ApiResource> {
        let mut kinds = vec![config_map(), deployment(), service(), ingress()];
        if self.monitoring {
            kinds.push(service_monitor());
        }
        if self.dashboards {
            kinds.push(grafana_dashboard());
        }
        kinds
    }

    /// Resolve a kind name to its resource descriptor
    pub fn resource_for(&self, kind: &str) -> Option<ApiResource> {
        self.owned_kinds().into_iter().find(|ar| ar.kind == kind)
    }
}

/// Serialize a typed object into a `DynamicObject`
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Deserialize a `DynamicObject` into a typed resource
pub fn from_dynamic<K: Resource + serde::de::DeserializeOwned>(obj: &DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}
