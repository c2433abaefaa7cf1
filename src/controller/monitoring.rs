//! Dashboard discovery
//!
//! Workloads may publish Grafana dashboards over HTTP. When the cluster runs
//! the Grafana operator, each published dashboard becomes an owned
//! `GrafanaDashboard` object.

use kube::api::DynamicObject;
use kube::ResourceExt;
use tracing::debug;

use crate::crd::ServiceInstance;
use crate::error::{Error, Result};

use super::introspection::{Reply, WorkloadIntrospector};
use super::kinds::ClusterFeatures;
use super::resources::build_grafana_dashboard;

pub struct DashboardDiscovery<'a> {
    introspector: &'a WorkloadIntrospector,
}

impl<'a> DashboardDiscovery<'a> {
    pub fn new(introspector: &'a WorkloadIntrospector) -> Self {
        Self { introspector }
    }

    /// Discovery needs the dashboard subsystem, enabled monitoring and a
    /// workload that can answer
    pub fn applies(features: &ClusterFeatures, instance: &ServiceInstance, available: i32) -> bool {
        features.dashboards && instance.spec.monitoring().enabled && available > 0
    }

    /// Build the dashboard objects the workload currently publishes
    pub async fn discover(&self, instance: &ServiceInstance) -> Result<Vec<DynamicObject>> {
        let names = match self.introspector.dashboard_list(instance).await? {
            Reply::Ready(names) => names,
            Reply::Disabled => {
                debug!("{} publishes no dashboards", instance.name_any());
                return Ok(Vec::new());
            }
            Reply::NotReady(reason) => return Err(Error::MonitoringNotReady(reason)),
        };

        let mut dashboards = Vec::with_capacity(names.len());
        for name in names {
            let fetch_error = |message: String| Error::DashboardFetchError {
                name: name.clone(),
                message,
            };
            let payload = match self.introspector.dashboard(instance, &name).await {
                Ok(Reply::Ready(payload)) => payload,
                Ok(Reply::Disabled) => return Err(fetch_error("listed but not found".to_string())),
                Ok(Reply::NotReady(reason)) => return Err(fetch_error(reason)),
                Err(e) => return Err(fetch_error(e.to_string())),
            };
            dashboards.push(build_grafana_dashboard(instance, &name, &payload));
        }
        Ok(dashboards)
    }
}
