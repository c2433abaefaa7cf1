//! Deploy pipeline for a single ServiceInstance
//!
//! One call converges the cluster toward the instance spec and records the
//! outcome in status. The inner `converge` does the work and may stop early;
//! the outer `deploy` classifies whatever came out of it and always publishes
//! a status for it, so an early return still leaves an accurate status.
//!
//! Order of work:
//! 1. validate the spec and resolve infrastructure readiness (no writes yet)
//! 2. claim the user ConfigMap and the infra objects, requeueing once after
//!    a fresh claim
//! 3. read what the instance currently owns
//! 4. synthesize the desired set, diff, and apply per kind
//! 5. ensure message bus topics

use std::sync::Arc;
use std::time::Duration;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::config::OperatorConfig;
use crate::crd::ServiceInstance;
use crate::error::{Error, Result};

use super::audit::{AuditEvent, AuditReason, AuditSink};
use super::classifier::{Classification, ErrorClassifier};
use super::comparator::{Delta, DeployedResourceSet, ResourceComparator};
use super::definition::{request_id, ServiceDefinition};
use super::infra::InfraDependencyResolver;
use super::introspection::WorkloadIntrospector;
use super::kinds::{self, ClusterFeatures};
use super::messaging::MessagingProvisioner;
use super::monitoring::DashboardDiscovery;
use super::ownership::{OwnershipClaim, StepOutcome};
use super::status::{Observation, StatusManager};
use super::store::ResourceStore;
use super::synthesizer::{ResourceSynthesizer, SynthesisContext};

/// Result of one deploy call
#[derive(Debug, Default)]
pub struct DeployOutcome {
    /// Zero means no explicit retry was requested
    pub retry_after: Duration,
    pub error: Option<Error>,
    pub classification: Option<Classification>,
    /// Changes applied during this call
    pub delta: Delta,
}

impl DeployOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Replica counts read from the deployed workload
#[derive(Clone, Copy, Debug, Default)]
struct ReplicaCounts {
    replicas: i32,
    ready: i32,
    available: i32,
}

fn replica_counts(instance: &ServiceInstance, deployed: &DeployedResourceSet) -> ReplicaCounts {
    let Some(workload) = deployed.get(kinds::DEPLOYMENT, &instance.name_any()) else {
        return ReplicaCounts::default();
    };
    let read = |field: &str| {
        workload
            .data
            .pointer(&format!("/status/{field}"))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_default() as i32
    };
    ReplicaCounts {
        replicas: read("replicas"),
        ready: read("readyReplicas"),
        available: read("availableReplicas"),
    }
}

/// State filled in by `converge` as it progresses
#[derive(Default)]
struct Pass {
    observation: Option<Observation>,
    delta: Delta,
}

/// Converges ServiceInstances through an injected store and audit sink
pub struct ServiceReconciler {
    store: Arc<dyn ResourceStore>,
    audit: Arc<dyn AuditSink>,
    introspector: WorkloadIntrospector,
    comparator: ResourceComparator,
    config: Arc<OperatorConfig>,
}

impl ServiceReconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        audit: Arc<dyn AuditSink>,
        introspector: WorkloadIntrospector,
        config: Arc<OperatorConfig>,
    ) -> Self {
        Self {
            store,
            audit,
            introspector,
            comparator: ResourceComparator::default(),
            config,
        }
    }

    /// Replace the comparator registry
    pub fn with_comparator(mut self, comparator: ResourceComparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Converge one instance and publish its status
    #[instrument(
        skip(self, instance),
        fields(name = %instance.name_any(), namespace = instance.namespace(), request = %request_id(instance))
    )]
    pub async fn deploy(&self, instance: &ServiceInstance) -> DeployOutcome {
        let mut pass = Pass::default();
        let result = self.converge(instance, &mut pass).await;

        let mut outcome = DeployOutcome {
            delta: pass.delta,
            ..Default::default()
        };
        match result {
            Ok(StepOutcome::Done) => {}
            Ok(StepOutcome::Requeue(after)) => outcome.retry_after = after,
            Err(err) => {
                let classification = ErrorClassifier::classify(&err);
                if classification.is_transient() {
                    debug!("Transient error, retrying without status change: {}", err);
                } else {
                    warn!(
                        reason = %classification.reason,
                        "Deploy failed: {}", err
                    );
                    #[cfg(feature = "metrics")]
                    super::metrics::inc_reconcile_failure(
                        "service_instance",
                        classification.reason.as_str(),
                    );
                }
                outcome.retry_after = classification.retry_after;
                outcome.classification = Some(classification);
                outcome.error = Some(err);
            }
        }

        #[cfg(feature = "metrics")]
        if let Some(obs) = &pass.observation {
            super::metrics::set_ready_replicas(
                &instance.namespace().unwrap_or_else(|| "default".to_string()),
                &instance.name_any(),
                instance.spec.family.slug(),
                i64::from(obs.ready_replicas),
            );
        }

        let status = StatusManager::new(self.store.as_ref());
        if let Err(e) = status
            .publish(
                instance,
                pass.observation.as_ref(),
                outcome.classification.as_ref(),
            )
            .await
        {
            warn!("Failed to publish status: {}", e);
            if outcome.error.is_none() {
                outcome.classification = Some(ErrorClassifier::classify(&e));
                outcome.error = Some(e);
            }
        }

        outcome
    }

    async fn converge(&self, instance: &ServiceInstance, pass: &mut Pass) -> Result<StepOutcome> {
        let name = instance.name_any();
        let namespace = instance.namespace().unwrap_or_else(|| "default".to_string());
        // a uid is assigned on create; its absence means a stale read
        let owner_uid = instance.metadata.uid.clone().ok_or_else(|| Error::Conflict {
            kind: "ServiceInstance".to_string(),
            name: format!("{namespace}/{name}"),
        })?;

        if let Err(errors) = instance.spec.validate() {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::ValidationError(joined));
        }

        let definition = ServiceDefinition::resolve(instance, &self.config);
        let infra = InfraDependencyResolver::new(self.store.as_ref())
            .resolve(instance)
            .await?;

        let claims = OwnershipClaim::new(self.store.as_ref(), self.config.ownership_requeue());
        if let Some(config_map) = &instance.spec.config_map_ref {
            let outcome = claims
                .claim(instance, &kinds::config_map(), config_map)
                .await?;
            if !outcome.is_done() {
                return Ok(outcome);
            }
        }
        let outcome = claims
            .claim_all(instance, &kinds::infra_resource(), &instance.spec.infra)
            .await?;
        if !outcome.is_done() {
            return Ok(outcome);
        }

        let features = self.store.features().await?;
        let deployed = self.fetch_deployed(&features, &namespace, &owner_uid).await?;
        let counts = replica_counts(instance, &deployed);

        let mut dashboard_error = None;
        let dashboards = if features.dashboards && !instance.spec.monitoring().enabled {
            Some(Vec::new())
        } else if DashboardDiscovery::applies(&features, instance, counts.available) {
            match DashboardDiscovery::new(&self.introspector)
                .discover(instance)
                .await
            {
                Ok(found) => Some(found),
                Err(e) => {
                    dashboard_error = Some(e);
                    None
                }
            }
        } else {
            None
        };

        let synthesis = ResourceSynthesizer::new(&self.config).build(
            instance,
            SynthesisContext {
                definition: &definition,
                infra: &infra,
                features,
                deployed: &deployed,
                dashboards,
            },
        )?;

        let delta = self.comparator.diff(&deployed, &synthesis.desired);
        if delta.is_empty() {
            debug!("No changes for {}/{}", namespace, name);
        } else {
            info!(
                "Applying {} change(s) to {}/{}",
                delta.change_count(),
                namespace,
                name
            );
        }
        pass.delta = delta.clone();
        self.apply(instance, &features, &delta).await?;

        pass.observation = Some(Observation {
            image: synthesis.image.clone(),
            external_uri: synthesis.external_uri.clone(),
            desired_replicas: if synthesis.awaiting_image {
                0
            } else {
                definition.replicas(instance)
            },
            replicas: counts.replicas,
            ready_replicas: counts.ready,
            available_replicas: counts.available,
            resources: synthesis.desired.names(),
            cloud_events: None,
            awaiting_image: synthesis.awaiting_image,
        });

        if synthesis.awaiting_image {
            info!("{}/{} is waiting for a published image", namespace, name);
            return Ok(StepOutcome::Done);
        }

        let report = MessagingProvisioner::new(self.store.as_ref(), &self.introspector, &self.config)
            .ensure(instance, &definition, &infra, counts.available)
            .await?;
        if let Some(manifest) = report.manifest {
            if let Some(obs) = pass.observation.as_mut() {
                obs.cloud_events = Some(manifest);
            }
        }

        match dashboard_error {
            Some(e) => Err(e),
            None => Ok(StepOutcome::Done),
        }
    }

    async fn fetch_deployed(
        &self,
        features: &ClusterFeatures,
        namespace: &str,
        owner_uid: &str,
    ) -> Result<DeployedResourceSet> {
        let mut deployed = DeployedResourceSet::new();
        for resource in features.owned_kinds() {
            let objects = self
                .store
                .list_owned(&resource, namespace, owner_uid)
                .await?;
            deployed.extend(&resource.kind, objects);
        }
        Ok(deployed)
    }

    /// Apply a delta kind by kind: additions, then updates, then removals
    async fn apply(
        &self,
        instance: &ServiceInstance,
        features: &ClusterFeatures,
        delta: &Delta,
    ) -> Result<()> {
        for resource in features.owned_kinds() {
            let Some(changes) = delta.kind(&resource.kind) else {
                continue;
            };

            for obj in &changes.added {
                match self.store.create(&resource, obj).await {
                    Ok(_) => {}
                    Err(Error::AlreadyExists { kind, name }) => {
                        return Err(Error::Conflict { kind, name });
                    }
                    Err(e) => return Err(e),
                }
                self.record(instance, &resource, AuditReason::Created, obj).await;
            }

            for obj in &changes.updated {
                self.store.replace(&resource, obj).await?;
                self.record(instance, &resource, AuditReason::Updated, obj).await;
            }

            for obj in &changes.removed {
                let namespace = obj
                    .namespace()
                    .or_else(|| instance.namespace())
                    .unwrap_or_else(|| "default".to_string());
                self.store
                    .delete(&resource, &namespace, &obj.name_any())
                    .await?;
                self.record(instance, &resource, AuditReason::Removed, obj).await;
            }
        }
        Ok(())
    }

    async fn record(
        &self,
        instance: &ServiceInstance,
        resource: &ApiResource,
        reason: AuditReason,
        obj: &DynamicObject,
    ) {
        let event = AuditEvent::new(reason, &resource.kind, &obj.name_any());
        debug!("{}", event.message());
        #[cfg(feature = "metrics")]
        super::metrics::inc_resource_operation(&resource.kind, &reason.to_string());
        if let Err(e) = self.audit.record(instance, &event).await {
            warn!("Failed to record audit event '{}': {}", event.message(), e);
        }
    }
}
