//! Kubernetes resource builders for ServiceInstance
//!
//! Builds the typed objects an instance owns: properties ConfigMap,
//! Deployment, Service, Ingress, plus the ServiceMonitor, GrafanaDashboard and
//! KafkaTopic objects of the optional subsystems. Builders are pure; writing is
//! the reconciler's job.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HTTPGetAction,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements as K8sResources, SecretVolumeSource,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::crd::{
    EnvVarSpec, InfraVolume, MonitoringConfig, ResourceRequirements, ResourceSpec, ServiceInstance,
};

use super::definition::HealthCheck;
use super::kinds;

pub const OPERATOR_NAME: &str = "service-operator";

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const ROLE_LABEL: &str = "services.operator.io/role";
pub const STRIMZI_CLUSTER_LABEL: &str = "strimzi.io/cluster";

pub const IMAGE_TRACKER_ROLE: &str = "image-tracker";
pub const IMAGE_TRACKER_KEY: &str = "image";
pub const EXTERNAL_IMAGE_ANNOTATION: &str = "services.operator.io/external-image";
pub const CONFIG_HASH_ANNOTATION: &str = "services.operator.io/config-hash";

pub const PROPERTIES_FILE: &str = "application.properties";
pub const PROPERTIES_MOUNT_PATH: &str = "/deployments/config";
pub const USER_CONFIG_MOUNT_PATH: &str = "/deployments/config/user";
pub const HTTP_PORT_NAME: &str = "http";
pub const SERVICE_PORT: i32 = 80;

/// Get the standard labels for an instance's resources
pub fn standard_labels(instance: &ServiceInstance) -> BTreeMap<String, String> {
    let mut labels = selector_labels(instance);
    labels.insert(NAME_LABEL.to_string(), instance.spec.family.slug().to_string());
    labels.insert(MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string());
    labels
}

/// Pod selector. Deployment selectors are immutable, so only the instance
/// name goes in here; the family may change over the instance's lifetime.
pub fn selector_labels(instance: &ServiceInstance) -> BTreeMap<String, String> {
    BTreeMap::from([(INSTANCE_LABEL.to_string(), instance.name_any())])
}

/// Create a controller OwnerReference for garbage collection
pub fn owner_reference(instance: &ServiceInstance) -> OwnerReference {
    OwnerReference {
        api_version: ServiceInstance::api_version(&()).to_string(),
        kind: ServiceInstance::kind(&()).to_string(),
        name: instance.name_any(),
        uid: instance.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Non-controller reference marking a shared object as used by the instance
pub fn claim_reference(instance: &ServiceInstance) -> OwnerReference {
    OwnerReference {
        controller: Some(false),
        block_owner_deletion: Some(false),
        ..owner_reference(instance)
    }
}

/// Build the resource name for a given component
pub fn resource_name(instance: &ServiceInstance, suffix: &str) -> String {
    format!("{}-{}", instance.name_any(), suffix)
}

pub fn properties_config_map_name(instance: &ServiceInstance) -> String {
    resource_name(instance, "properties")
}

pub fn image_tracker_name(instance: &ServiceInstance) -> String {
    resource_name(instance, "image")
}

/// Lowercase DNS-1123 label derived from an arbitrary name
pub fn sanitize_name(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let mut name = String::with_capacity(mapped.len());
    for c in mapped.chars() {
        if c == '-' && name.ends_with('-') {
            continue;
        }
        name.push(c);
    }
    let name = name.trim_matches('-');
    name.chars()
        .take(63)
        .collect::<String>()
        .trim_end_matches('-')
        .to_string()
}

fn object_meta(instance: &ServiceInstance, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: instance.namespace(),
        labels: Some(standard_labels(instance)),
        owner_references: Some(vec![owner_reference(instance)]),
        ..Default::default()
    }
}

// ============================================================================
// ConfigMaps
// ============================================================================

/// Render properties in `key=value` form, sorted by key
pub fn render_properties(properties: &BTreeMap<String, String>) -> String {
    properties
        .iter()
        .map(|(k, v)| format!("{k}={v}\n"))
        .collect()
}

/// SHA-256 of the rendered properties, used to roll pods on config change
pub fn config_hash(rendered: &str) -> String {
    hex::encode(Sha256::digest(rendered.as_bytes()))
}

pub fn build_properties_config_map(instance: &ServiceInstance, rendered: &str) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(instance, properties_config_map_name(instance)),
        data: Some(BTreeMap::from([(
            PROPERTIES_FILE.to_string(),
            rendered.to_string(),
        )])),
        ..Default::default()
    }
}

/// ConfigMap an external build writes the workload image into
pub fn build_image_tracker(instance: &ServiceInstance) -> ConfigMap {
    let mut metadata = object_meta(instance, image_tracker_name(instance));
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(ROLE_LABEL.to_string(), IMAGE_TRACKER_ROLE.to_string());
    ConfigMap {
        metadata,
        data: Some(BTreeMap::from([(
            IMAGE_TRACKER_KEY.to_string(),
            String::new(),
        )])),
        ..Default::default()
    }
}

// ============================================================================
// Deployment
// ============================================================================

/// Inputs of the workload builder that do not come from the spec directly
#[derive(Clone, Debug)]
pub struct WorkloadParams {
    pub image: String,
    pub replicas: i32,
    pub env: Vec<EnvVarSpec>,
    pub volumes: Vec<InfraVolume>,
    pub health_check: HealthCheck,
    pub config_hash: String,
    /// Image was published by an external build
    pub external_image: bool,
}

pub fn build_deployment(instance: &ServiceInstance, params: &WorkloadParams) -> Deployment {
    let mut metadata = object_meta(instance, instance.name_any());
    if params.external_image {
        metadata.annotations = Some(BTreeMap::from([(
            EXTERNAL_IMAGE_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
    }

    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(params.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(instance)),
                ..Default::default()
            },
            template: build_pod_template(instance, params),
            ..Default::default()
        }),
        status: None,
    }
}

fn build_pod_template(instance: &ServiceInstance, params: &WorkloadParams) -> PodTemplateSpec {
    let mut volumes = vec![Volume {
        name: "properties".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(properties_config_map_name(instance)),
            ..Default::default()
        }),
        ..Default::default()
    }];

    if let Some(user_config) = &instance.spec.config_map_ref {
        volumes.push(Volume {
            name: "user-config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(user_config.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    for infra_volume in &params.volumes {
        volumes.push(Volume {
            name: infra_volume.name.clone(),
            config_map: infra_volume.config_map.as_ref().map(|cm| ConfigMapVolumeSource {
                name: Some(cm.clone()),
                ..Default::default()
            }),
            secret: infra_volume.secret.as_ref().map(|secret| SecretVolumeSource {
                secret_name: Some(secret.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(standard_labels(instance)),
            annotations: Some(BTreeMap::from([(
                CONFIG_HASH_ANNOTATION.to_string(),
                params.config_hash.clone(),
            )])),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![build_container(instance, params)],
            volumes: Some(volumes),
            ..Default::default()
        }),
    }
}

fn build_container(instance: &ServiceInstance, params: &WorkloadParams) -> Container {
    let mut mounts = vec![VolumeMount {
        name: "properties".to_string(),
        mount_path: PROPERTIES_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];
    if instance.spec.config_map_ref.is_some() {
        mounts.push(VolumeMount {
            name: "user-config".to_string(),
            mount_path: USER_CONFIG_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }
    mounts.extend(params.volumes.iter().map(|v| VolumeMount {
        name: v.name.clone(),
        mount_path: v.mount_path.clone(),
        read_only: Some(v.read_only),
        ..Default::default()
    }));

    let env: Vec<EnvVar> = params
        .env
        .iter()
        .map(|e| EnvVar {
            name: e.name.clone(),
            // the API server drops empty values
            value: (!e.value.is_empty()).then(|| e.value.clone()),
            ..Default::default()
        })
        .collect();

    Container {
        name: instance.name_any(),
        image: Some(params.image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some(HTTP_PORT_NAME.to_string()),
            container_port: instance.spec.http_port(),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: if env.is_empty() { None } else { Some(env) },
        resources: build_resources(&instance.spec.resources),
        liveness_probe: Some(http_check(params.health_check.liveness_path(), 10)),
        readiness_probe: Some(http_check(params.health_check.readiness_path(), 5)),
        volume_mounts: Some(mounts),
        ..Default::default()
    }
}

fn http_check(path: &str, initial_delay_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::String(HTTP_PORT_NAME.to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(10),
        ..Default::default()
    }
}

fn quantities(spec: Option<&ResourceSpec>) -> Option<BTreeMap<String, Quantity>> {
    let spec = spec?;
    let mut map = BTreeMap::new();
    if let Some(cpu) = &spec.cpu {
        map.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &spec.memory {
        map.insert("memory".to_string(), Quantity(memory.clone()));
    }
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

fn build_resources(resources: &ResourceRequirements) -> Option<K8sResources> {
    let requests = quantities(resources.requests.as_ref());
    let limits = quantities(resources.limits.as_ref());
    if requests.is_none() && limits.is_none() {
        return None;
    }
    Some(K8sResources {
        requests,
        limits,
        ..Default::default()
    })
}

// ============================================================================
// Service and Ingress
// ============================================================================

pub fn build_service(instance: &ServiceInstance) -> Service {
    Service {
        metadata: object_meta(instance, instance.name_any()),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(instance)),
            ports: Some(vec![ServicePort {
                name: Some(HTTP_PORT_NAME.to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::String(HTTP_PORT_NAME.to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Host of the external route, if the route is enabled and a host resolves
pub fn route_host(instance: &ServiceInstance, route_domain: Option<&str>) -> Option<String> {
    let route = instance.spec.route();
    if !route.enabled {
        return None;
    }
    route.host.or_else(|| {
        let namespace = instance.namespace().unwrap_or_else(|| "default".to_string());
        route_domain.map(|domain| format!("{}-{}.{}", instance.name_any(), namespace, domain))
    })
}

/// Build an Ingress; without a host the rule matches every host
pub fn build_ingress(instance: &ServiceInstance, host: Option<String>) -> Ingress {
    let route = instance.spec.route();

    let tls = route.tls_secret.as_ref().map(|secret| {
        vec![IngressTLS {
            hosts: host.clone().map(|h| vec![h]),
            secret_name: Some(secret.clone()),
        }]
    });

    Ingress {
        metadata: object_meta(instance, instance.name_any()),
        spec: Some(IngressSpec {
            ingress_class_name: route.ingress_class_name.clone(),
            rules: Some(vec![IngressRule {
                host,
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: instance.name_any(),
                                port: Some(ServiceBackendPort {
                                    number: Some(SERVICE_PORT),
                                    name: None,
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            tls,
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// Third-party kinds
// ============================================================================

fn dynamic_object(
    instance: &ServiceInstance,
    resource: &kube::discovery::ApiResource,
    name: String,
    data: serde_json::Value,
) -> DynamicObject {
    let mut obj = DynamicObject::new(&name, resource);
    obj.metadata = object_meta(instance, name);
    obj.data = data;
    obj
}

pub fn build_service_monitor(
    instance: &ServiceInstance,
    monitoring: &MonitoringConfig,
    health_check: HealthCheck,
) -> DynamicObject {
    let mut endpoint = json!({
        "port": HTTP_PORT_NAME,
        "path": monitoring.path.as_deref().unwrap_or(health_check.metrics_path()),
    });
    if let Some(scheme) = &monitoring.scheme {
        endpoint["scheme"] = json!(scheme);
    }

    dynamic_object(
        instance,
        &kinds::service_monitor(),
        instance.name_any(),
        json!({
            "spec": {
                "selector": { "matchLabels": selector_labels(instance) },
                "endpoints": [endpoint],
            }
        }),
    )
}

/// Name of the GrafanaDashboard for a dashboard file served by the workload
pub fn dashboard_name(instance: &ServiceInstance, file_name: &str) -> String {
    let stem = file_name.strip_suffix(".json").unwrap_or(file_name);
    sanitize_name(&format!("{}-{}", instance.name_any(), stem))
}

pub fn build_grafana_dashboard(
    instance: &ServiceInstance,
    file_name: &str,
    payload: &str,
) -> DynamicObject {
    dynamic_object(
        instance,
        &kinds::grafana_dashboard(),
        dashboard_name(instance, file_name),
        json!({
            "spec": {
                "name": file_name,
                "json": payload,
            }
        }),
    )
}

/// KafkaTopic on the given bus cluster
///
/// Topics are shared by every producer and consumer of the bus, so they carry
/// no owner reference and are never removed by an instance.
pub fn build_kafka_topic(
    topic: &str,
    namespace: &str,
    bus_cluster: &str,
    partitions: i32,
    replicas: i32,
) -> DynamicObject {
    let name = sanitize_name(topic);
    let mut obj = DynamicObject::new(&name, &kinds::kafka_topic()).within(namespace);
    obj.metadata.labels = Some(BTreeMap::from([
        (STRIMZI_CLUSTER_LABEL.to_string(), bus_cluster.to_string()),
        (MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string()),
    ]));
    obj.data = json!({
        "spec": {
            "partitions": partitions,
            "replicas": replicas,
            "topicName": topic,
        }
    });
    obj
}
