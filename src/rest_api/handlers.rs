//! HTTP handlers for the REST API

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use kube::{api::Api, ResourceExt};
use tracing::{error, instrument};

use crate::controller::ControllerState;
use crate::crd::ServiceInstance;

use super::dto::{
    ErrorResponse, HealthResponse, ServiceDetailResponse, ServiceListResponse, ServiceSummary,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub(super) fn summarize(instance: &ServiceInstance) -> ServiceSummary {
    let status = instance.status.as_ref();
    ServiceSummary {
        name: instance.name_any(),
        namespace: instance.namespace().unwrap_or_default(),
        family: instance.spec.family,
        state: status
            .and_then(|s| s.current_state())
            .map(|t| t.to_string())
            .unwrap_or_else(|| "Unknown".to_string()),
        image: status.and_then(|s| s.image.clone()),
        ready_replicas: status.map(|s| s.ready_replicas).unwrap_or(0),
    }
}

/// List all ServiceInstances
#[instrument(skip(state))]
pub async fn list_services(
    State(state): State<Arc<ControllerState>>,
) -> Result<Json<ServiceListResponse>, ApiError> {
    let api: Api<ServiceInstance> = match &state.namespace {
        Some(ns) => Api::namespaced(state.client.clone(), ns),
        None => Api::all(state.client.clone()),
    };

    match api.list(&Default::default()).await {
        Ok(list) => {
            let items: Vec<ServiceSummary> = list.items.iter().map(summarize).collect();
            let total = items.len();
            Ok(Json(ServiceListResponse { items, total }))
        }
        Err(e) => {
            error!("Failed to list services: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("list_failed", &e.to_string())),
            ))
        }
    }
}

/// Get a specific ServiceInstance
#[instrument(skip(state), fields(name = %name, namespace = %namespace))]
pub async fn get_service(
    State(state): State<Arc<ControllerState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<ServiceDetailResponse>, ApiError> {
    let api: Api<ServiceInstance> = Api::namespaced(state.client.clone(), &namespace);

    match api.get(&name).await {
        Ok(instance) => Ok(Json(ServiceDetailResponse {
            name: instance.name_any(),
            namespace: instance.namespace().unwrap_or_default(),
            family: instance.spec.family,
            replicas: instance.spec.replicas,
            status: instance.status.clone().unwrap_or_default(),
            created_at: instance
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0.to_rfc3339()),
        })),
        Err(kube::Error::Api(e)) if e.code == 404 => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "not_found",
                &format!("Service {}/{} not found", namespace, name),
            )),
        )),
        Err(e) => {
            error!("Failed to get service {}/{}: {:?}", namespace, name, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("get_failed", &e.to_string())),
            ))
        }
    }
}
