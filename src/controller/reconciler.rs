//! Controller loop for ServiceInstance resources
//!
//! Implements the controller pattern using kube-rs runtime. The reconcile
//! function is a thin adapter: leader gating, an outer deadline, and mapping
//! a [`DeployOutcome`] onto a requeue [`Action`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{self, Action, Controller},
        watcher::Config,
    },
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};

use crate::crd::ServiceInstance;
use crate::error::{Error, Result};

use super::deployer::{DeployOutcome, ServiceReconciler};

/// Requeue interval after a clean pass
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(300);
/// Requeue interval for replicas that do not hold the lease
pub const STANDBY_REQUEUE: Duration = Duration::from_secs(30);

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub reconciler: ServiceReconciler,
    pub is_leader: Arc<AtomicBool>,
    /// Namespace to watch; all namespaces when `None`
    pub namespace: Option<String>,
    /// Deadline for one deploy call
    pub reconcile_timeout: Duration,
}

impl ControllerState {
    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
        K::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>, concurrency: u16) -> Result<()> {
    let instances: Api<ServiceInstance> = state.api();

    info!("Starting ServiceInstance controller");

    // Verify CRD exists
    match instances.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("ServiceInstance CRD is available"),
        Err(e) => {
            error!(
                "ServiceInstance CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "ServiceInstance CRD not installed".to_string(),
            ));
        }
    }

    Controller::new(instances, Config::default())
        // Watch owned resources for changes
        .owns::<Deployment>(state.api(), Config::default())
        .owns::<Service>(state.api(), Config::default())
        .owns::<ConfigMap>(state.api(), Config::default())
        .owns::<Ingress>(state.api(), Config::default())
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// The main reconciliation function
///
/// Called whenever a ServiceInstance or one of its owned objects changes, and
/// when a requeue timer expires. Owned objects are removed by garbage
/// collection once the instance is deleted, so there is no finalizer.
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<ServiceInstance>, ctx: Arc<ControllerState>) -> Result<Action> {
    if !ctx.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, skipping");
        return Ok(Action::requeue(STANDBY_REQUEUE));
    }
    if obj.metadata.deletion_timestamp.is_some() {
        debug!("Instance is being deleted");
        return Ok(Action::await_change());
    }

    info!(
        "Reconciling ServiceInstance {}/{} (family: {})",
        obj.namespace().unwrap_or_default(),
        obj.name_any(),
        obj.spec.family
    );

    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();

    let outcome = deploy_within(&ctx.reconciler, &obj, ctx.reconcile_timeout).await?;

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(
        "service_instance",
        started.elapsed().as_secs_f64(),
    );

    action_for(outcome)
}

/// Run one deploy under a deadline
///
/// On expiry the deploy future is dropped where it stands. Status is written
/// only as the last step of a deploy, so an abandoned pass leaves the
/// previously published status in place.
pub(crate) async fn deploy_within(
    reconciler: &ServiceReconciler,
    instance: &ServiceInstance,
    deadline: Duration,
) -> Result<DeployOutcome> {
    tokio::time::timeout(deadline, reconciler.deploy(instance))
        .await
        .map_err(|_| {
            warn!(
                "Deploy of {} exceeded {:?}, abandoned",
                instance.name_any(),
                deadline
            );
            Error::Timeout(format!("deploy of {}", instance.name_any()))
        })
}

/// Map a deploy outcome onto the controller's next action
///
/// An explicit retry interval always wins. Errors without one are handed to
/// [`error_policy`].
pub(crate) fn action_for(outcome: DeployOutcome) -> Result<Action> {
    match outcome.error {
        Some(err) if outcome.retry_after.is_zero() => Err(err),
        Some(err) => {
            debug!("Retrying in {:?} after: {}", outcome.retry_after, err);
            Ok(Action::requeue(outcome.retry_after))
        }
        None if !outcome.retry_after.is_zero() => Ok(Action::requeue(outcome.retry_after)),
        None => Ok(Action::requeue(DEFAULT_REQUEUE)),
    }
}

/// Error policy for the controller
pub(crate) fn error_policy(
    instance: Arc<ServiceInstance>,
    error: &Error,
    _ctx: Arc<ControllerState>,
) -> Action {
    error!(
        "Reconciliation error for {}: {:?}",
        instance.name_any(),
        error
    );

    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error("service_instance", error.metric_label());

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
