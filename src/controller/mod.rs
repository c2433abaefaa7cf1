//! Controller module for ServiceInstance reconciliation
//! This module contains the main controller loop, the deploy pipeline,
//! and resource synthesis and diffing for managed services.

pub mod audit;
pub mod classifier;
pub mod comparator;
pub mod conditions;
pub mod definition;
mod deployer;
pub mod infra;
pub mod introspection;
pub mod kinds;
pub mod memory;
pub mod messaging;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod monitoring;
pub mod ownership;
mod reconciler;
pub mod resources;
pub mod status;
pub mod store;
pub mod synthesizer;
#[cfg(test)]
mod synthesizer_test;

pub use audit::{AuditEvent, AuditReason, AuditSink, KubeEventSink};
pub use classifier::{Classification, Disposition, ErrorClassifier};
pub use comparator::{Delta, DeployedResourceSet, DesiredResourceSet, ResourceComparator};
pub use deployer::{DeployOutcome, ServiceReconciler};
pub use introspection::WorkloadIntrospector;
pub use kinds::ClusterFeatures;
pub use memory::{MemoryAuditSink, MemoryStore};
pub use reconciler::{run_controller, ControllerState};
pub use store::{KubeStore, ResourceStore};
