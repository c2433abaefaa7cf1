//! Ownership claims on shared objects
//!
//! A referenced ConfigMap or InfraResource is not created by the instance, but
//! the instance records that it uses it through a non-controller owner
//! reference. Claiming is idempotent. When a claim was just written the
//! reconcile stops with a short requeue so the next pass reads the settled
//! object.

use std::time::Duration;

use kube::discovery::ApiResource;
use kube::ResourceExt;
use tracing::info;

use crate::crd::ServiceInstance;
use crate::error::{Error, Result};

use super::resources::claim_reference;
use super::store::ResourceStore;

/// Result of an idempotent reconcile step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing left to do; continue
    Done,
    /// State was changed; stop and come back after the delay
    Requeue(Duration),
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, StepOutcome::Done)
    }
}

pub struct OwnershipClaim<'a> {
    store: &'a dyn ResourceStore,
    requeue_after: Duration,
}

impl<'a> OwnershipClaim<'a> {
    pub fn new(store: &'a dyn ResourceStore, requeue_after: Duration) -> Self {
        Self {
            store,
            requeue_after,
        }
    }

    /// Claim one object in the instance namespace
    pub async fn claim(
        &self,
        instance: &ServiceInstance,
        resource: &ApiResource,
        name: &str,
    ) -> Result<StepOutcome> {
        let namespace = instance.namespace().unwrap_or_else(|| "default".to_string());
        let uid = instance.metadata.uid.clone().unwrap_or_default();

        let mut obj = self
            .store
            .get(resource, &namespace, name)
            .await?
            .ok_or_else(|| {
                Error::ValidationError(format!(
                    "{} {}/{} referenced by {} does not exist",
                    resource.kind,
                    namespace,
                    name,
                    instance.name_any()
                ))
            })?;

        if obj.owner_references().iter().any(|r| r.uid == uid) {
            return Ok(StepOutcome::Done);
        }

        obj.owner_references_mut().push(claim_reference(instance));
        self.store.replace(resource, &obj).await?;
        info!(
            "Claimed {} {}/{} for {}",
            resource.kind,
            namespace,
            name,
            instance.name_any()
        );
        Ok(StepOutcome::Requeue(self.requeue_after))
    }

    /// Claim several objects; requeues once if any claim was written
    pub async fn claim_all<'n>(
        &self,
        instance: &ServiceInstance,
        resource: &ApiResource,
        names: impl IntoIterator<Item = &'n String>,
    ) -> Result<StepOutcome> {
        let mut outcome = StepOutcome::Done;
        for name in names {
            if let StepOutcome::Requeue(after) = self.claim(instance, resource, name).await? {
                outcome = StepOutcome::Requeue(after);
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::kinds;
    use crate::controller::memory::MemoryStore;
    use crate::crd::ServiceInstanceSpec;
    use kube::api::DynamicObject;

    fn instance() -> ServiceInstance {
        let mut si = ServiceInstance::new("orders", ServiceInstanceSpec::default());
        si.metadata.namespace = Some("shop".to_string());
        si.metadata.uid = Some("uid-orders".to_string());
        si
    }

    #[tokio::test]
    async fn test_claim_then_done() {
        let store = MemoryStore::new();
        let ar = kinds::config_map();
        store
            .insert(&ar, DynamicObject::new("user-settings", &ar).within("shop"))
            .await;

        let claim = OwnershipClaim::new(&store, Duration::from_secs(5));
        let first = claim.claim(&instance(), &ar, "user-settings").await.unwrap();
        assert_eq!(first, StepOutcome::Requeue(Duration::from_secs(5)));

        let second = claim.claim(&instance(), &ar, "user-settings").await.unwrap();
        assert!(second.is_done());

        let stored = store.object(&ar, "shop", "user-settings").await.unwrap();
        let refs = stored.owner_references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].controller, Some(false));
    }

    #[tokio::test]
    async fn test_claim_missing_object_fails() {
        let store = MemoryStore::new();
        let claim = OwnershipClaim::new(&store, Duration::from_secs(5));
        let err = claim
            .claim(&instance(), &kinds::config_map(), "absent")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }
}
