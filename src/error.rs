//! Error types for the service operator
//!
//! Every failure raised while reconciling a `ServiceInstance` is one of these
//! variants. The error classifier in `controller::classifier` maps them onto
//! status reasons and retry intervals.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// HTTP request against a workload failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Object could not be (de)serialized
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Operator configuration is invalid or missing
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The instance spec is malformed
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A referenced infrastructure dependency is missing, provisioning or failed
    #[error("Infrastructure {name} is not ready: {message}")]
    InfraNotReady { name: String, message: String },

    /// Message bus topic provisioning failed
    #[error("Messaging integration failed: {0}")]
    MessagingError(String),

    /// The workload's monitoring endpoint is not serving yet
    #[error("Monitoring endpoint not available: {0}")]
    MonitoringNotReady(String),

    /// A published dashboard could not be fetched
    #[error("Failed to fetch dashboard {name}: {message}")]
    DashboardFetchError { name: String, message: String },

    /// The workload endpoint refused or dropped the connection
    #[error("Service endpoint {0} is unreachable")]
    ServiceUnreachable(String),

    /// Version-checked write lost against a concurrent writer
    #[error("Conflict writing {kind} {name}: object was modified")]
    Conflict { kind: String, name: String },

    /// Create raced with another writer that created the same object
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// A bounded call did not complete in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// I/O error while loading configuration
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Controller runtime or server failure
    #[error("Controller runtime error: {0}")]
    RuntimeError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the caller should retry soon rather than back off
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(e)) => e.code == 409 || e.code == 429 || e.code >= 500,
            Error::KubeError(_) => true,
            Error::HttpError(e) => e.is_timeout() || e.is_connect(),
            Error::Conflict { .. } | Error::Timeout(_) => true,
            Error::InfraNotReady { .. }
            | Error::MessagingError(_)
            | Error::MonitoringNotReady(_)
            | Error::DashboardFetchError { .. }
            | Error::ServiceUnreachable(_) => true,
            Error::SerializationError(_)
            | Error::ConfigError(_)
            | Error::ValidationError(_)
            | Error::AlreadyExists { .. }
            | Error::IoError(_)
            | Error::RuntimeError(_) => false,
        }
    }

    /// Short stable label used for metrics
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::HttpError(_) => "http",
            Error::SerializationError(_) => "serialization",
            Error::ConfigError(_) => "config",
            Error::ValidationError(_) => "validation",
            Error::InfraNotReady { .. } => "infra",
            Error::MessagingError(_) => "messaging",
            Error::MonitoringNotReady(_) | Error::DashboardFetchError { .. } => "monitoring",
            Error::ServiceUnreachable(_) => "unreachable",
            Error::Conflict { .. } | Error::AlreadyExists { .. } => "conflict",
            Error::Timeout(_) => "timeout",
            Error::IoError(_) => "io",
            Error::RuntimeError(_) => "runtime",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_errors_are_retriable() {
        let err = Error::InfraNotReady {
            name: "kafka".to_string(),
            message: "provisioning".to_string(),
        };
        assert!(err.is_retriable());
        assert_eq!(err.metric_label(), "infra");
    }

    #[test]
    fn test_validation_errors_are_not_retriable() {
        let err = Error::ValidationError("replicas must not be negative".to_string());
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("replicas"));
    }
}
