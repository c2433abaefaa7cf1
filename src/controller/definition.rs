//! Per-family service definitions
//!
//! A [`ServiceDefinition`] is computed once per reconcile from the instance and
//! the operator config. The family-specific parts (default image, required
//! topics, replica constraints, object customization) live behind the
//! [`ServiceFamily`] strategy so the synthesizer never matches on the family.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;

use crate::config::OperatorConfig;
use crate::crd::{RuntimeType, ServiceFamilyKind, ServiceInstance, TopicDefinition};

use super::comparator::DesiredResourceSet;
use super::kinds;

/// Health endpoints exposed by the workload runtime
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthCheck {
    Quarkus,
    SpringBoot,
}

impl HealthCheck {
    pub fn for_runtime(runtime: RuntimeType) -> Self {
        match runtime {
            RuntimeType::Quarkus => HealthCheck::Quarkus,
            RuntimeType::SpringBoot => HealthCheck::SpringBoot,
        }
    }

    pub fn liveness_path(&self) -> &'static str {
        match self {
            HealthCheck::Quarkus => "/q/health/live",
            HealthCheck::SpringBoot => "/actuator/health/liveness",
        }
    }

    pub fn readiness_path(&self) -> &'static str {
        match self {
            HealthCheck::Quarkus => "/q/health/ready",
            HealthCheck::SpringBoot => "/actuator/health/readiness",
        }
    }

    pub fn metrics_path(&self) -> &'static str {
        match self {
            HealthCheck::Quarkus => "/q/metrics",
            HealthCheck::SpringBoot => "/actuator/prometheus",
        }
    }

    /// Property that sets the listening port
    pub fn port_property(&self) -> &'static str {
        match self {
            HealthCheck::Quarkus => "quarkus.http.port",
            HealthCheck::SpringBoot => "server.port",
        }
    }
}

/// Customization strategy for one service family
pub trait ServiceFamily: Send + Sync {
    fn kind(&self) -> ServiceFamilyKind;

    /// Image name under the operator registry; `None` means the image comes
    /// from an external build
    fn default_image_name(&self) -> Option<&'static str>;

    fn required_topics(&self) -> Vec<TopicDefinition> {
        Vec::new()
    }

    fn single_replica(&self) -> bool {
        false
    }

    fn default_properties(&self, _instance: &ServiceInstance) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn customize_deployment(&self, _instance: &ServiceInstance, _deployment: &mut Deployment) {}

    fn customize_objects(&self, _instance: &ServiceInstance, _desired: &mut DesiredResourceSet) {}
}

pub struct RuntimeFamily;

impl ServiceFamily for RuntimeFamily {
    fn kind(&self) -> ServiceFamilyKind {
        ServiceFamilyKind::Runtime
    }

    fn default_image_name(&self) -> Option<&'static str> {
        None
    }
}

pub struct DataIndexFamily;

impl ServiceFamily for DataIndexFamily {
    fn kind(&self) -> ServiceFamilyKind {
        ServiceFamilyKind::DataIndex
    }

    fn default_image_name(&self) -> Option<&'static str> {
        Some("data-index")
    }

    fn required_topics(&self) -> Vec<TopicDefinition> {
        vec![
            TopicDefinition::incoming("process-instances-events"),
            TopicDefinition::incoming("user-task-instances-events"),
        ]
    }

    fn default_properties(&self, instance: &ServiceInstance) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("quarkus.http.cors".to_string(), "true".to_string()),
            ("kafka.group.id".to_string(), format!("{}-indexer", instance.name_any())),
        ])
    }
}

pub struct JobsServiceFamily;

impl ServiceFamily for JobsServiceFamily {
    fn kind(&self) -> ServiceFamilyKind {
        ServiceFamilyKind::JobsService
    }

    fn default_image_name(&self) -> Option<&'static str> {
        Some("jobs-service")
    }

    fn required_topics(&self) -> Vec<TopicDefinition> {
        vec![TopicDefinition::outgoing("job-status-events")]
    }

    // The scheduler keeps timers in memory
    fn single_replica(&self) -> bool {
        true
    }

    fn customize_deployment(&self, _instance: &ServiceInstance, deployment: &mut Deployment) {
        if let Some(spec) = deployment.spec.as_mut() {
            spec.strategy = Some(k8s_openapi::api::apps::v1::DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                rolling_update: None,
            });
        }
    }
}

pub struct ManagementConsoleFamily;

impl ServiceFamily for ManagementConsoleFamily {
    fn kind(&self) -> ServiceFamilyKind {
        ServiceFamilyKind::ManagementConsole
    }

    fn default_image_name(&self) -> Option<&'static str> {
        Some("management-console")
    }

    fn default_properties(&self, instance: &ServiceInstance) -> BTreeMap<String, String> {
        let namespace = instance.namespace().unwrap_or_else(|| "default".to_string());
        BTreeMap::from([(
            "console.data-index.url".to_string(),
            format!("http://data-index.{namespace}.svc"),
        )])
    }

    /// The console serves static assets only and exposes no metrics
    fn customize_objects(&self, _instance: &ServiceInstance, desired: &mut DesiredResourceSet) {
        desired.clear_kind(kinds::SERVICE_MONITOR);
    }
}

static RUNTIME: RuntimeFamily = RuntimeFamily;
static DATA_INDEX: DataIndexFamily = DataIndexFamily;
static JOBS_SERVICE: JobsServiceFamily = JobsServiceFamily;
static MANAGEMENT_CONSOLE: ManagementConsoleFamily = ManagementConsoleFamily;

pub fn family_for(kind: ServiceFamilyKind) -> &'static dyn ServiceFamily {
    match kind {
        ServiceFamilyKind::Runtime => &RUNTIME,
        ServiceFamilyKind::DataIndex => &DATA_INDEX,
        ServiceFamilyKind::JobsService => &JOBS_SERVICE,
        ServiceFamilyKind::ManagementConsole => &MANAGEMENT_CONSOLE,
    }
}

/// Immutable per-reconcile configuration of one instance
#[derive(Clone)]
pub struct ServiceDefinition {
    pub family: &'static dyn ServiceFamily,
    /// Full reference of the family default image, if the family has one
    pub default_image: Option<String>,
    pub topics: Vec<TopicDefinition>,
    pub health_check: HealthCheck,
    pub single_replica: bool,
    /// `namespace/name#generation`
    pub request_id: String,
}

impl std::fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("family", &self.family.kind())
            .field("default_image", &self.default_image)
            .field("topics", &self.topics)
            .field("health_check", &self.health_check)
            .field("single_replica", &self.single_replica)
            .field("request_id", &self.request_id)
            .finish()
    }
}

impl ServiceDefinition {
    pub fn resolve(instance: &ServiceInstance, config: &OperatorConfig) -> Self {
        let family = family_for(instance.spec.family);
        let overrides = config.family(instance.spec.family);

        let image_name = overrides
            .and_then(|o| o.image.as_deref())
            .or(family.default_image_name());
        let tag = overrides
            .and_then(|o| o.tag.as_deref())
            .unwrap_or(&config.image_tag);
        let default_image = image_name.map(|name| qualify_image(&config.image_registry, name, tag));

        let mut topics = family.required_topics();
        for topic in overrides.map(|o| o.topics.as_slice()).unwrap_or_default() {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }

        Self {
            family,
            default_image,
            topics,
            health_check: HealthCheck::for_runtime(instance.spec.runtime),
            single_replica: family.single_replica(),
            request_id: request_id(instance),
        }
    }

    /// Replicas after defaulting and family constraints
    pub fn replicas(&self, instance: &ServiceInstance) -> i32 {
        let requested = instance.spec.replicas.unwrap_or(1);
        if self.single_replica {
            requested.min(1)
        } else {
            requested
        }
    }

    /// Whether the workload image is published by an external build
    pub fn image_is_external(&self, instance: &ServiceInstance) -> bool {
        instance.spec.image.is_none() && self.default_image.is_none()
    }
}

fn qualify_image(registry: &str, name: &str, tag: &str) -> String {
    let base = if name.contains('/') {
        name.to_string()
    } else {
        format!("{}/{}", registry.trim_end_matches('/'), name)
    };
    let last_segment = base.rsplit('/').next().unwrap_or_default();
    if last_segment.contains(':') || last_segment.contains('@') {
        base
    } else {
        format!("{base}:{tag}")
    }
}

pub fn request_id(instance: &ServiceInstance) -> String {
    format!(
        "{}/{}#{}",
        instance.namespace().unwrap_or_else(|| "default".to_string()),
        instance.name_any(),
        instance.metadata.generation.unwrap_or_default()
    )
}
