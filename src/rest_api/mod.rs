//! REST API module for external integrations
//!
//! Provides a read-only HTTP API for querying ServiceInstances, plus the
//! health and Prometheus endpoints.

mod dto;
mod handlers;
mod server;

pub use dto::{ErrorResponse, HealthResponse, ServiceDetailResponse, ServiceListResponse, ServiceSummary};
pub use server::{router, run_server};
