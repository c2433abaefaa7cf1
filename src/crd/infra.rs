//! InfraResource Custom Resource Definition
//!
//! An InfraResource names a piece of shared supporting infrastructure (a
//! message bus cluster, a cache cluster) and publishes, through its status, the
//! configuration that services depending on it must receive.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{EnvVarSpec, InfraPhase, InfraTarget, InfraVolume};

/// Backing kinds the operator knows how to use for messaging
pub const MESSAGE_BUS_KIND: &str = "Kafka";

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "services.operator.io",
    version = "v1alpha1",
    kind = "InfraResource",
    namespaced,
    status = "InfraResourceStatus",
    shortname = "infra",
    printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".spec.resource.kind"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InfraResourceSpec {
    pub resource: InfraTarget,

    /// Static application properties handed to every consumer
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfraResourceStatus {
    #[serde(default)]
    pub phase: InfraPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runtime_properties: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVarSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<InfraVolume>,
}

impl InfraResource {
    pub fn phase(&self) -> InfraPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Whether the backing resource is a message bus cluster
    pub fn is_message_bus(&self) -> bool {
        self.spec.resource.kind == MESSAGE_BUS_KIND
    }
}
