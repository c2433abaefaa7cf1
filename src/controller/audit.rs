//! Audit events for applied changes
//!
//! Every create, update and removal the reconciler applies is recorded against
//! the owning ServiceInstance. On a cluster this becomes a Kubernetes Event.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Event;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::{Client, Resource, ResourceExt};

use crate::crd::ServiceInstance;
use crate::error::{Error, Result};

use super::resources::OPERATOR_NAME;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditReason {
    Created,
    Updated,
    Removed,
}

impl std::fmt::Display for AuditReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditReason::Created => write!(f, "Created"),
            AuditReason::Updated => write!(f, "Updated"),
            AuditReason::Removed => write!(f, "Removed"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditEvent {
    pub reason: AuditReason,
    pub kind: String,
    pub name: String,
}

impl AuditEvent {
    pub fn new(reason: AuditReason, kind: &str, name: &str) -> Self {
        Self {
            reason,
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn message(&self) -> String {
        format!("{} {} {}", self.reason, self.kind, self.name)
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, instance: &ServiceInstance, event: &AuditEvent) -> Result<()>;
}

/// Records audit events as Kubernetes Events
#[derive(Clone)]
pub struct KubeEventSink {
    client: Client,
}

impl KubeEventSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AuditSink for KubeEventSink {
    async fn record(&self, instance: &ServiceInstance, event: &AuditEvent) -> Result<()> {
        let namespace = instance.namespace().unwrap_or_else(|| "default".to_string());
        let events: Api<Event> = Api::namespaced(self.client.clone(), &namespace);

        let time = chrono::Utc::now();
        let k8s_event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-event-", instance.name_any())),
                ..Default::default()
            },
            type_: Some("Normal".to_string()),
            reason: Some(event.reason.to_string()),
            message: Some(event.message()),
            involved_object: instance.object_ref(&()),
            reporting_component: Some(OPERATOR_NAME.to_string()),
            first_timestamp: Some(Time(time)),
            last_timestamp: Some(Time(time)),
            count: Some(1),
            ..Default::default()
        };

        events
            .create(&PostParams::default(), &k8s_event)
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    }
}
