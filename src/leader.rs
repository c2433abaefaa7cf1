//! Lease-based leader election
//!
//! One replica holds the `coordination.k8s.io/v1` Lease and reconciles; the
//! others keep polling it. Every write to an existing lease is a replace
//! carrying the `resourceVersion` that was read, so when two replicas race
//! for an expired lease only one write succeeds and the other sees a 409.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub const LEASE_NAME: &str = "service-operator-leader";
pub const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// What a replica does with the lease it just read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseDecision {
    /// We hold it; extend it
    Renew,
    /// Nobody holds it, or the holder stopped renewing
    TakeOver,
    /// Someone else holds a live lease
    Follow,
}

/// Whether the holder let the lease run out at `now`
///
/// A lease that was never renewed counts as expired.
pub fn is_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let Some(renewed) = spec.and_then(|s| s.renew_time.as_ref()) else {
        return true;
    };
    let duration = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECS);
    now > renewed.0 + chrono::Duration::seconds(i64::from(duration))
}

pub fn decide(spec: Option<&LeaseSpec>, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let holder = spec.and_then(|s| s.holder_identity.as_deref());
    if holder == Some(identity) {
        LeaseDecision::Renew
    } else if holder.is_none() || is_expired(spec, now) {
        LeaseDecision::TakeOver
    } else {
        LeaseDecision::Follow
    }
}

/// The lease as we would write it; keeps `resourceVersion` from `existing`
pub fn claimed(existing: &Lease, identity: &str, now: DateTime<Utc>) -> Lease {
    let mut lease = existing.clone();
    let mut spec = lease.spec.take().unwrap_or_default();
    if spec.holder_identity.as_deref() != Some(identity) {
        spec.holder_identity = Some(identity.to_string());
        spec.acquire_time = Some(MicroTime(now));
        spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
    }
    spec.renew_time = Some(MicroTime(now));
    spec.lease_duration_seconds = Some(LEASE_DURATION_SECS);
    lease.spec = Some(spec);
    lease.metadata.managed_fields = None;
    lease
}

pub struct LeaderElector {
    leases: Api<Lease>,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, identity: &str) -> Self {
        Self {
            leases: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Keep `is_leader` in sync with lease ownership until the task is dropped
    pub async fn run(self, is_leader: Arc<AtomicBool>) {
        info!("Leader election using holder ID: {}", self.identity);
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    if !is_leader.swap(true, Ordering::Relaxed) {
                        info!("Acquired leadership for lease {}", LEASE_NAME);
                    }
                    tokio::time::sleep(RENEW_INTERVAL).await;
                }
                Ok(false) => {
                    if is_leader.swap(false, Ordering::Relaxed) {
                        warn!("Lost leadership for lease {}", LEASE_NAME);
                    }
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => {
                    warn!("Leader election error: {:?}", e);
                    is_leader.store(false, Ordering::Relaxed);
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// One election round; `Ok(true)` when this replica holds the lease after it
    pub async fn try_acquire_or_renew(&self) -> Result<bool> {
        let now = Utc::now();

        let existing = match self.leases.get_opt(LEASE_NAME).await? {
            Some(existing) => existing,
            None => return self.create(now).await,
        };

        match decide(existing.spec.as_ref(), &self.identity, now) {
            LeaseDecision::Follow => Ok(false),
            decision => {
                if decision == LeaseDecision::TakeOver {
                    info!(
                        "Lease held by {:?} has expired, taking over",
                        existing.spec.as_ref().and_then(|s| s.holder_identity.as_deref())
                    );
                }
                let lease = claimed(&existing, &self.identity, now);
                match self
                    .leases
                    .replace(LEASE_NAME, &PostParams::default(), &lease)
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(e)) if e.code == 409 => {
                        debug!("Lease {} was written concurrently", LEASE_NAME);
                        Ok(false)
                    }
                    Err(e) => Err(Error::KubeError(e)),
                }
            }
        }
    }

    async fn create(&self, now: DateTime<Utc>) -> Result<bool> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };
        match self.leases.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!("Created lease {} with holder {}", LEASE_NAME, self.identity);
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(holder: &str, renewed: DateTime<Utc>) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(holder.to_string()),
            renew_time: Some(MicroTime(renewed)),
            lease_duration_seconds: Some(LEASE_DURATION_SECS),
            ..Default::default()
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let renewed = Utc::now();
        let s = spec("pod-a", renewed);
        assert!(!is_expired(Some(&s), renewed + chrono::Duration::seconds(15)));
        assert!(is_expired(Some(&s), renewed + chrono::Duration::seconds(16)));
        assert!(is_expired(None, renewed));
    }

    #[test]
    fn test_decisions() {
        let now = Utc::now();
        let live = spec("pod-a", now - chrono::Duration::seconds(3));
        let stale = spec("pod-a", now - chrono::Duration::seconds(60));

        assert_eq!(decide(Some(&live), "pod-a", now), LeaseDecision::Renew);
        assert_eq!(decide(Some(&stale), "pod-a", now), LeaseDecision::Renew);
        assert_eq!(decide(Some(&live), "pod-b", now), LeaseDecision::Follow);
        assert_eq!(decide(Some(&stale), "pod-b", now), LeaseDecision::TakeOver);
        assert_eq!(decide(None, "pod-b", now), LeaseDecision::TakeOver);
    }

    #[test]
    fn test_takeover_keeps_resource_version() {
        let now = Utc::now();
        let existing = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some("operators".to_string()),
                resource_version: Some("812".to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                lease_transitions: Some(2),
                ..spec("pod-a", now - chrono::Duration::seconds(60))
            }),
        };

        let lease = claimed(&existing, "pod-b", now);
        assert_eq!(lease.metadata.resource_version.as_deref(), Some("812"));
        let spec = lease.spec.unwrap();
        assert_eq!(spec.holder_identity.as_deref(), Some("pod-b"));
        assert_eq!(spec.lease_transitions, Some(3));
        assert_eq!(spec.acquire_time, Some(MicroTime(now)));

        let renewed = claimed(&existing, "pod-a", now);
        assert_eq!(renewed.spec.unwrap().lease_transitions, Some(2));
    }
}
