//! Status derivation and persistence
//!
//! State machine over {Provisioning, Deployed, Failed}. A classified failure
//! always yields Failed; otherwise the instance is Deployed once the observed
//! ready replicas equal the desired replicas and that number is positive.
//! Status goes through the status subresource and is only written when it
//! changed.

use tracing::debug;

use crate::crd::{EventManifest, ObjectNamesByKind, ServiceInstance, ServiceInstanceStatus};
use crate::error::Result;

use super::classifier::Classification;
use super::conditions::{
    append_condition, deployed_condition, failed_condition, provisioning_condition,
    REASON_AWAITING_IMAGE, REASON_AWAITING_REPLICAS, REASON_SCALED_DOWN,
};
use super::store::ResourceStore;

/// What one reconcile pass observed about the instance
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observation {
    pub image: Option<String>,
    pub external_uri: Option<String>,
    pub desired_replicas: i32,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
    pub resources: ObjectNamesByKind,
    /// `None` keeps the previously recorded manifest
    pub cloud_events: Option<EventManifest>,
    pub awaiting_image: bool,
}

pub struct StatusManager<'a> {
    store: &'a dyn ResourceStore,
}

impl<'a> StatusManager<'a> {
    pub fn new(store: &'a dyn ResourceStore) -> Self {
        Self { store }
    }

    /// Derive the next status from the stored one
    pub fn next_status(
        current: Option<&ServiceInstanceStatus>,
        generation: Option<i64>,
        observation: Option<&Observation>,
        failure: Option<&Classification>,
    ) -> ServiceInstanceStatus {
        let mut status = current.cloned().unwrap_or_default();

        if let Some(obs) = observation {
            status.image = obs.image.clone();
            status.external_uri = obs.external_uri.clone();
            status.replicas = obs.replicas;
            status.ready_replicas = obs.ready_replicas;
            status.available_replicas = obs.available_replicas;
            status.resources = obs.resources.clone();
            if obs.cloud_events.is_some() {
                status.cloud_events = obs.cloud_events.clone();
            }
            status.observed_generation = generation;
        }

        let condition = match (failure, observation) {
            (Some(failure), _) => Some(failed_condition(failure.reason, &failure.message)),
            (None, Some(obs)) if obs.awaiting_image => Some(provisioning_condition(
                REASON_AWAITING_IMAGE,
                "Waiting for a workload image to be published",
            )),
            (None, Some(obs)) if obs.desired_replicas > 0 && obs.ready_replicas == obs.desired_replicas => {
                Some(deployed_condition(obs.ready_replicas))
            }
            (None, Some(obs)) if obs.desired_replicas == 0 => Some(provisioning_condition(
                REASON_SCALED_DOWN,
                "0 replicas requested",
            )),
            (None, Some(obs)) => Some(provisioning_condition(
                REASON_AWAITING_REPLICAS,
                &format!("{}/{} replicas ready", obs.ready_replicas, obs.desired_replicas),
            )),
            (None, None) => None,
        };

        if let Some(condition) = condition {
            append_condition(&mut status.conditions, condition);
        }
        status
    }

    /// Persist the outcome of a pass; returns whether a write happened
    ///
    /// Transient failures and passes that observed nothing leave the status
    /// untouched.
    pub async fn publish(
        &self,
        instance: &ServiceInstance,
        observation: Option<&Observation>,
        failure: Option<&Classification>,
    ) -> Result<bool> {
        if failure.map(Classification::is_transient).unwrap_or(false) {
            return Ok(false);
        }
        if observation.is_none() && failure.is_none() {
            return Ok(false);
        }

        let current = instance.status.as_ref();
        let next = Self::next_status(current, instance.metadata.generation, observation, failure);
        if current == Some(&next) {
            debug!("Status unchanged");
            return Ok(false);
        }

        self.store.update_instance_status(instance, &next).await?;
        Ok(true)
    }
}
