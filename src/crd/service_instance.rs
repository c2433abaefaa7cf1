//! ServiceInstance Custom Resource Definition
//!
//! A ServiceInstance declares one deployed service: its image, replicas,
//! configuration, infrastructure dependencies and exposure. The operator owns
//! its status subresource.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::quantity::ParsedQuantity;
use super::types::{
    Condition, ConditionType, EnvVarSpec, EventManifest, MonitoringConfig, ObjectNamesByKind,
    ResourceRequirements, RouteConfig, RuntimeType, ServiceFamilyKind,
};

/// Structured validation error for `ServiceInstanceSpec`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
}

impl SpecValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "services.operator.io",
    version = "v1alpha1",
    kind = "ServiceInstance",
    namespaced,
    status = "ServiceInstanceStatus",
    shortname = "si",
    printcolumn = r#"{"name":"Family","type":"string","jsonPath":".spec.family"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".status.image"}"#,
    printcolumn = r#"{"name":"URI","type":"string","jsonPath":".status.externalUri"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceSpec {
    #[serde(default)]
    pub family: ServiceFamilyKind,

    #[serde(default)]
    pub runtime: RuntimeType,

    /// Desired replicas; 1 when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Full image reference overriding the family default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Application property overrides
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,

    /// User-supplied ConfigMap mounted into the workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<String>,

    /// Names of InfraResources this service depends on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub infra: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVarSpec>,

    #[serde(default)]
    pub resources: ResourceRequirements,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<i32>,
}

pub const DEFAULT_HTTP_PORT: i32 = 8080;

impl ServiceInstanceSpec {
    /// Validate the spec before anything is mutated
    ///
    /// # Errors
    ///
    /// Returns every problem found, not only the first.
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors = Vec::new();

        if let Some(replicas) = self.replicas {
            if replicas < 0 {
                errors.push(SpecValidationError::new(
                    "spec.replicas",
                    format!("replicas must not be negative, got {replicas}"),
                ));
            }
        }

        if let Some(image) = &self.image {
            if image.trim().is_empty() || image.contains(char::is_whitespace) {
                errors.push(SpecValidationError::new(
                    "spec.image",
                    "image must be a non-empty reference without whitespace",
                ));
            }
        }

        if let Some(port) = self.http_port {
            if !(1..=65535).contains(&port) {
                errors.push(SpecValidationError::new(
                    "spec.httpPort",
                    format!("port {port} is outside 1-65535"),
                ));
            }
        }

        for (i, env) in self.env.iter().enumerate() {
            if env.name.is_empty() {
                errors.push(SpecValidationError::new(
                    format!("spec.env[{i}].name"),
                    "environment variable name must not be empty",
                ));
            }
        }

        for (section, spec) in [
            ("requests", self.resources.requests.as_ref()),
            ("limits", self.resources.limits.as_ref()),
        ] {
            let Some(spec) = spec else { continue };
            for (resource, value) in [("cpu", &spec.cpu), ("memory", &spec.memory)] {
                let Some(value) = value else { continue };
                if ParsedQuantity::parse(value).is_none() {
                    errors.push(SpecValidationError::new(
                        format!("spec.resources.{section}.{resource}"),
                        format!("invalid quantity '{value}' (expected e.g. '500m', '512Mi')"),
                    ));
                }
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for infra in &self.infra {
            if !seen.insert(infra) {
                errors.push(SpecValidationError::new(
                    "spec.infra",
                    format!("infra reference {infra} is listed twice"),
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn http_port(&self) -> i32 {
        self.http_port.unwrap_or(DEFAULT_HTTP_PORT)
    }

    pub fn route(&self) -> RouteConfig {
        self.route.clone().unwrap_or_default()
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        self.monitoring.clone().unwrap_or_default()
    }
}

/// Status subresource written only by the operator
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceStatus {
    /// Condition history, oldest first
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Image currently deployed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_uri: Option<String>,

    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub ready_replicas: i32,

    #[serde(default)]
    pub available_replicas: i32,

    /// Owned objects per kind
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: ObjectNamesByKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_events: Option<EventManifest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ServiceInstanceStatus {
    pub fn last_condition(&self) -> Option<&Condition> {
        self.conditions.last()
    }

    /// Type of the most recent condition, if any
    pub fn current_state(&self) -> Option<ConditionType> {
        self.last_condition().map(|c| c.type_)
    }
}
