//! Infrastructure dependency resolution
//!
//! Every name in `spec.infra` must point at an `InfraResource` in the
//! instance namespace whose phase is `Ready`. The resolved output is the
//! configuration the dependencies publish for their consumers.

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::debug;

use crate::crd::{EnvVarSpec, InfraPhase, InfraResource, InfraVolume, ServiceInstance};
use crate::error::{Error, Result};

use super::kinds;
use super::store::ResourceStore;

/// Physical identity of a message bus cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusCluster {
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedInfra {
    pub resources: Vec<InfraResource>,
    pub properties: BTreeMap<String, String>,
    pub env: Vec<EnvVarSpec>,
    pub volumes: Vec<InfraVolume>,
    /// Bus named by a `Kafka`-backed dependency, if any
    pub bus: Option<BusCluster>,
}

/// Overlay `overlay` onto `base`, replacing variables with the same name
pub fn merge_env(base: &mut Vec<EnvVarSpec>, overlay: &[EnvVarSpec]) {
    for var in overlay {
        match base.iter_mut().find(|e| e.name == var.name) {
            Some(existing) => existing.value = var.value.clone(),
            None => base.push(var.clone()),
        }
    }
}

pub struct InfraDependencyResolver<'a> {
    store: &'a dyn ResourceStore,
}

impl<'a> InfraDependencyResolver<'a> {
    pub fn new(store: &'a dyn ResourceStore) -> Self {
        Self { store }
    }

    /// Resolve every reference, failing on the first one that is not ready
    pub async fn resolve(&self, instance: &ServiceInstance) -> Result<ResolvedInfra> {
        let namespace = instance.namespace().unwrap_or_else(|| "default".to_string());
        let mut resolved = ResolvedInfra::default();

        for name in &instance.spec.infra {
            let infra = self.fetch_ready(&namespace, name).await?;

            resolved.properties.extend(infra.spec.properties.clone());
            if let Some(status) = &infra.status {
                resolved.properties.extend(status.runtime_properties.clone());
                merge_env(&mut resolved.env, &status.env);
                for volume in &status.volumes {
                    if !resolved.volumes.iter().any(|v| v.name == volume.name) {
                        resolved.volumes.push(volume.clone());
                    }
                }
            }

            if infra.is_message_bus() && resolved.bus.is_none() {
                resolved.bus = Some(BusCluster {
                    name: infra.spec.resource.name.clone(),
                    namespace: infra
                        .spec
                        .resource
                        .namespace
                        .clone()
                        .unwrap_or_else(|| namespace.clone()),
                });
            }

            debug!("Resolved infra {}/{}", namespace, name);
            resolved.resources.push(infra);
        }

        Ok(resolved)
    }

    async fn fetch_ready(&self, namespace: &str, name: &str) -> Result<InfraResource> {
        let not_ready = |message: String| Error::InfraNotReady {
            name: name.to_string(),
            message,
        };

        let obj = self
            .store
            .get(&kinds::infra_resource(), namespace, name)
            .await?
            .ok_or_else(|| not_ready(format!("InfraResource {namespace}/{name} not found")))?;
        let infra: InfraResource = kinds::from_dynamic(&obj)?;

        match infra.phase() {
            InfraPhase::Ready => Ok(infra),
            InfraPhase::Provisioning => Err(not_ready("still provisioning".to_string())),
            InfraPhase::Failed => Err(not_ready(
                infra
                    .status
                    .as_ref()
                    .and_then(|s| s.message.clone())
                    .unwrap_or_else(|| "provisioning failed".to_string()),
            )),
        }
    }
}
