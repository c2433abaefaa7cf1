//! Custom Resource Definitions for the service operator
//!
//! This module defines the Kubernetes CRDs for managed services and the shared
//! infrastructure they depend on.

mod infra;
pub mod quantity;
mod service_instance;
pub mod types;


pub use infra::{InfraResource, InfraResourceSpec, InfraResourceStatus, MESSAGE_BUS_KIND};
pub use service_instance::{
    ServiceInstance, ServiceInstanceSpec, ServiceInstanceStatus, SpecValidationError,
    DEFAULT_HTTP_PORT,
};
pub use types::*;
