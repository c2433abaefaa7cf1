//! service-operator: Kubernetes operator for declared services
//!
//! This crate reconciles `ServiceInstance` resources into running workloads,
//! wiring them to shared infrastructure, message bus topics and monitoring.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod leader;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::config::OperatorConfig;
pub use crate::error::{Error, Result};
