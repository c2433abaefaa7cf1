//! Error classification
//!
//! Every error leaving the deploy pipeline is mapped to a stable reason code,
//! an explicit retry interval and a disposition. Failed errors are written to
//! the condition history; transient ones are retried without touching status.

use std::time::Duration;

use crate::crd::FailureReason;
use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Recorded as a Failed condition
    Failed,
    /// Retried silently
    Transient,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub reason: FailureReason,
    /// Zero leaves the retry to the caller's backoff
    pub retry_after: Duration,
    pub disposition: Disposition,
    pub message: String,
}

impl Classification {
    pub fn is_transient(&self) -> bool {
        self.disposition == Disposition::Transient
    }
}

pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(err: &Error) -> Classification {
        let (reason, retry_secs, disposition) = match err {
            Error::InfraNotReady { .. } => (FailureReason::InfraNotReady, 60, Disposition::Failed),
            Error::MessagingError(_) => (FailureReason::MessagingFailure, 30, Disposition::Failed),
            Error::MonitoringNotReady(_) => {
                (FailureReason::MonitoringFailure, 10, Disposition::Failed)
            }
            Error::DashboardFetchError { .. } => {
                (FailureReason::MonitoringFailure, 30, Disposition::Failed)
            }
            Error::ServiceUnreachable(_) => {
                (FailureReason::InternalServiceUnreachable, 180, Disposition::Failed)
            }
            e if is_transient(e) => (FailureReason::ReconciliationFailure, 0, Disposition::Transient),
            _ => (FailureReason::ReconciliationFailure, 0, Disposition::Failed),
        };

        Classification {
            reason,
            retry_after: Duration::from_secs(retry_secs),
            disposition,
            message: err.to_string(),
        }
    }
}

fn is_transient(err: &Error) -> bool {
    match err {
        Error::Conflict { .. } | Error::Timeout(_) => true,
        Error::KubeError(kube::Error::Api(e)) => e.code == 409 || e.code == 429 || e.code >= 500,
        Error::KubeError(kube::Error::Api(_)) => false,
        Error::KubeError(_) => true,
        Error::HttpError(e) => e.is_timeout(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: reason.to_string(),
            reason: reason.to_string(),
            code,
        }))
    }

    #[test]
    fn test_dependency_table() {
        let cases = [
            (
                Error::InfraNotReady {
                    name: "bus".to_string(),
                    message: "provisioning".to_string(),
                },
                FailureReason::InfraNotReady,
                60,
            ),
            (
                Error::MessagingError("create failed".to_string()),
                FailureReason::MessagingFailure,
                30,
            ),
            (
                Error::MonitoringNotReady("503".to_string()),
                FailureReason::MonitoringFailure,
                10,
            ),
            (
                Error::DashboardFetchError {
                    name: "ops.json".to_string(),
                    message: "502".to_string(),
                },
                FailureReason::MonitoringFailure,
                30,
            ),
            (
                Error::ServiceUnreachable("http://orders.shop.svc:8080".to_string()),
                FailureReason::InternalServiceUnreachable,
                180,
            ),
        ];

        for (err, reason, secs) in cases {
            let c = ErrorClassifier::classify(&err);
            assert_eq!(c.reason, reason, "{err}");
            assert_eq!(c.retry_after, Duration::from_secs(secs), "{err}");
            assert_eq!(c.disposition, Disposition::Failed, "{err}");
        }
    }

    #[test]
    fn test_unclassified_is_reconciliation_failure() {
        let c = ErrorClassifier::classify(&Error::ValidationError("bad image".to_string()));
        assert_eq!(c.reason, FailureReason::ReconciliationFailure);
        assert_eq!(c.retry_after, Duration::ZERO);
        assert!(!c.is_transient());
        assert!(c.message.contains("bad image"));

        let forbidden = ErrorClassifier::classify(&api_error(403, "Forbidden"));
        assert_eq!(forbidden.disposition, Disposition::Failed);
    }

    #[test]
    fn test_store_contention_is_transient() {
        for err in [
            Error::Conflict {
                kind: "Deployment".to_string(),
                name: "orders".to_string(),
            },
            Error::Timeout("deploy".to_string()),
            api_error(409, "Conflict"),
            api_error(429, "TooManyRequests"),
            api_error(503, "ServiceUnavailable"),
        ] {
            assert!(ErrorClassifier::classify(&err).is_transient(), "{err}");
        }
    }
}
