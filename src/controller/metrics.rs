//! Prometheus metrics for the service operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `service_operator_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `service_operator_reconcile_failures_total` (counter): classified failures labeled by controller and reason.
//! - `service_operator_reconcile_errors_total` (counter): errors returned to the runtime labeled by controller and kind.
//! - `service_operator_resource_operations_total` (counter): applied changes labeled by kind and operation.
//! - `service_operator_topics_created_total` (counter): message bus topics created labeled by namespace.
//! - `service_operator_instance_ready_replicas` (gauge): ready replicas labeled by namespace/name/family.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "serviceinstance"
    pub controller: String,
}

/// Labels for classified reconcile failures
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FailureLabels {
    pub controller: String,
    /// Status reason code, e.g. "InfraNotReady"
    pub reason: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind/category, e.g. "kube", "validation", "timeout"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub kind: String,
    /// "created", "updated" or "removed"
    pub operation: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NamespaceLabels {
    pub namespace: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct InstanceLabels {
    pub namespace: String,
    pub name: String,
    pub family: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_FAILURES_TOTAL: Lazy<Family<FailureLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static RESOURCE_OPERATIONS_TOTAL: Lazy<Family<OperationLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static TOPICS_CREATED_TOTAL: Lazy<Family<NamespaceLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static INSTANCE_READY_REPLICAS: Lazy<Family<InstanceLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "service_operator_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "service_operator_reconcile_failures_total",
        "Reconciles that ended with a Failed condition, by reason",
        RECONCILE_FAILURES_TOTAL.clone(),
    );
    registry.register(
        "service_operator_reconcile_errors_total",
        "Total number of errors returned to the controller runtime",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "service_operator_resource_operations_total",
        "Objects created, updated or removed while converging instances",
        RESOURCE_OPERATIONS_TOTAL.clone(),
    );
    registry.register(
        "service_operator_topics_created_total",
        "Message bus topics created",
        TOPICS_CREATED_TOTAL.clone(),
    );
    registry.register(
        "service_operator_instance_ready_replicas",
        "Ready replicas observed for each instance",
        INSTANCE_READY_REPLICAS.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

pub fn inc_reconcile_failure(controller: &str, reason: &str) {
    let labels = FailureLabels {
        controller: controller.to_string(),
        reason: reason.to_string(),
    };
    RECONCILE_FAILURES_TOTAL.get_or_create(&labels).inc();
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_resource_operation(kind: &str, operation: &str) {
    let labels = OperationLabels {
        kind: kind.to_string(),
        operation: operation.to_string(),
    };
    RESOURCE_OPERATIONS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_topic_created(namespace: &str) {
    let labels = NamespaceLabels {
        namespace: namespace.to_string(),
    };
    TOPICS_CREATED_TOTAL.get_or_create(&labels).inc();
}

pub fn set_ready_replicas(namespace: &str, name: &str, family: &str, ready: i64) {
    let labels = InstanceLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
        family: family.to_string(),
    };
    INSTANCE_READY_REPLICAS.get_or_create(&labels).set(ready);
}
