//! Shared types for service specifications
//!
//! These types are used across the CRD definitions and controller logic.
//!
//! # Type Hierarchy
//!
//! - [`ServiceFamilyKind`] - Which family of service an instance belongs to
//! - [`RuntimeType`] - Application runtime, selects health-check endpoints
//! - [`ResourceRequirements`] - CPU and memory requests/limits following Kubernetes conventions
//! - [`RouteConfig`], [`MonitoringConfig`] - External exposure and scraping
//! - [`Condition`] - Entries of the append-only condition history
//! - [`EventManifest`] - Topics and cloud events the live workload declares

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Family of a managed service
///
/// Each family carries its own defaults (image, required topics, replica
/// constraints) and customization hooks.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum ServiceFamilyKind {
    /// User application built and published by an external build
    #[default]
    Runtime,
    /// Indexing service consuming process and task events
    DataIndex,
    /// Job scheduling service
    JobsService,
    /// Web console for operating the other services
    ManagementConsole,
}

impl std::fmt::Display for ServiceFamilyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceFamilyKind::Runtime => write!(f, "Runtime"),
            ServiceFamilyKind::DataIndex => write!(f, "DataIndex"),
            ServiceFamilyKind::JobsService => write!(f, "JobsService"),
            ServiceFamilyKind::ManagementConsole => write!(f, "ManagementConsole"),
        }
    }
}

impl ServiceFamilyKind {
    /// Lowercase name used in labels and default image names
    pub fn slug(&self) -> &'static str {
        match self {
            ServiceFamilyKind::Runtime => "runtime",
            ServiceFamilyKind::DataIndex => "data-index",
            ServiceFamilyKind::JobsService => "jobs-service",
            ServiceFamilyKind::ManagementConsole => "management-console",
        }
    }
}

/// Application runtime of the workload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum RuntimeType {
    #[default]
    Quarkus,
    SpringBoot,
}

/// Compute resource requirements following Kubernetes conventions
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Minimum resources requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceSpec>,
    /// Maximum resources allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceSpec>,
}

/// Resource specification for CPU and memory
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ResourceSpec {
    /// CPU cores (e.g., "500m", "2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory (e.g., "512Mi", "1Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// A plain environment variable
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct EnvVarSpec {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVarSpec {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// External route configuration
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    /// Expose the service outside the cluster
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Hostname; derived from the operator's route domain when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    /// Secret holding the TLS certificate for the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret: Option<String>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: None,
            ingress_class_name: None,
            tls_secret: None,
        }
    }
}

/// Prometheus scraping configuration
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics path; runtime default when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            scheme: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Condition types of the status state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    Provisioning,
    Deployed,
    Failed,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionType::Provisioning => write!(f, "Provisioning"),
            ConditionType::Deployed => write!(f, "Deployed"),
            ConditionType::Failed => write!(f, "Failed"),
        }
    }
}

/// Stable, automation-friendly failure reason codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum FailureReason {
    InfraNotReady,
    MessagingFailure,
    MonitoringFailure,
    InternalServiceUnreachable,
    ReconciliationFailure,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InfraNotReady => "InfraNotReady",
            FailureReason::MessagingFailure => "MessagingFailure",
            FailureReason::MonitoringFailure => "MonitoringFailure",
            FailureReason::InternalServiceUnreachable => "InternalServiceUnreachable",
            FailureReason::ReconciliationFailure => "ReconciliationFailure",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the condition history
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// RFC 3339 time the condition was recorded
    pub last_transition_time: String,
}

impl Condition {
    pub fn new(type_: ConditionType, reason: &str, message: &str) -> Self {
        Self {
            type_,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Whether two conditions describe the same state, ignoring time
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_ && self.reason == other.reason && self.message == other.message
    }
}

/// Direction of a message bus topic relative to the workload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopicDirection {
    Incoming,
    Outgoing,
}

impl TopicDirection {
    /// Channel direction keyword used in messaging properties
    pub fn channel(&self) -> &'static str {
        match self {
            TopicDirection::Incoming => "incoming",
            TopicDirection::Outgoing => "outgoing",
        }
    }
}

/// Whether the workload consumes or produces an event type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Consumed,
    Produced,
}

/// A message bus topic required by or declared by a workload
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema)]
pub struct TopicDefinition {
    pub name: String,
    pub direction: TopicDirection,
}

impl TopicDefinition {
    pub fn incoming(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: TopicDirection::Incoming,
        }
    }

    pub fn outgoing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: TopicDirection::Outgoing,
        }
    }
}

/// A cloud event type and source as listed in the event manifest
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, JsonSchema)]
pub struct EventDescriptor {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub source: String,
}

/// Topics and events the live workload declares about itself
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct EventManifest {
    #[serde(default)]
    pub topics: Vec<TopicDefinition>,
    #[serde(default)]
    pub consumes: Vec<EventDescriptor>,
    #[serde(default)]
    pub produces: Vec<EventDescriptor>,
}

/// Lifecycle phase reported by an infrastructure dependency
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum InfraPhase {
    #[default]
    Provisioning,
    Ready,
    Failed,
}

/// Volume an infrastructure dependency asks its consumers to mount
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfraVolume {
    pub name: String,
    pub mount_path: String,
    /// ConfigMap backing the volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<String>,
    /// Secret backing the volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

/// Reference to the third-party object backing an infrastructure dependency
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfraTarget {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    /// Defaults to the namespace of the InfraResource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Convenience alias used by status fields keyed by kind
pub type ObjectNamesByKind = BTreeMap<String, Vec<String>>;
