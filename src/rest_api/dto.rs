//! Response bodies of the REST API

use serde::{Deserialize, Serialize};

use crate::crd::{ServiceFamilyKind, ServiceInstanceStatus};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub name: String,
    pub namespace: String,
    pub family: ServiceFamilyKind,
    /// Type of the latest condition, `Unknown` before the first pass
    pub state: String,
    pub image: Option<String>,
    pub ready_replicas: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceListResponse {
    pub items: Vec<ServiceSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDetailResponse {
    pub name: String,
    pub namespace: String,
    pub family: ServiceFamilyKind,
    pub replicas: Option<i32>,
    pub status: ServiceInstanceStatus,
    pub created_at: Option<String>,
}
