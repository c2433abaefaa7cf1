//! Workload introspection client
//!
//! Live workloads describe themselves over HTTP: the message bus topics they
//! use and the Grafana dashboards they publish. Every call has a bounded
//! timeout. A 404 means the workload does not offer the feature; a timeout or
//! an error status means it is not ready yet. Only a refused connection is an
//! error.

use std::time::Duration;

use kube::ResourceExt;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::crd::{EventKind, ServiceInstance, TopicDirection};
use crate::error::{Error, Result};

pub const TOPICS_PATH: &str = "/messaging/topics";
pub const DASHBOARD_LIST_PATH: &str = "/monitoring/dashboards/list.json";
pub const DASHBOARDS_PATH: &str = "/monitoring/dashboards";

/// Outcome of a single introspection call
#[derive(Clone, Debug, PartialEq)]
pub enum Reply<T> {
    Ready(T),
    /// Endpoint answered 404
    Disabled,
    /// Timed out or answered with a non-success status
    NotReady(String),
}

/// A topic entry of `GET /messaging/topics`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredTopic {
    pub name: String,
    #[serde(rename = "type")]
    pub direction: TopicDirection,
    #[serde(default)]
    pub events_meta: Vec<DeclaredEvent>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DeclaredEvent {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub source: String,
    pub kind: EventKind,
}

#[derive(Clone, Debug)]
pub struct WorkloadIntrospector {
    client: Client,
    endpoint_override: Option<String>,
}

impl WorkloadIntrospector {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("service-operator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpError)?;
        Ok(Self {
            client,
            endpoint_override: None,
        })
    }

    /// Send every call to `endpoint` instead of the in-cluster service
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    /// Base URL of the workload: `http://<name>.<namespace>.svc:<port>`
    pub fn endpoint(&self, instance: &ServiceInstance) -> String {
        if let Some(endpoint) = &self.endpoint_override {
            return endpoint.trim_end_matches('/').to_string();
        }
        format!(
            "http://{}.{}.svc:{}",
            instance.name_any(),
            instance.namespace().unwrap_or_else(|| "default".to_string()),
            instance.spec.http_port()
        )
    }

    async fn get(&self, url: &str) -> Result<Reply<reqwest::Response>> {
        match self.client.get(url).send().await {
            Ok(resp) if resp.status() == StatusCode::NOT_FOUND => Ok(Reply::Disabled),
            Ok(resp) if resp.status().is_success() => Ok(Reply::Ready(resp)),
            Ok(resp) => Ok(Reply::NotReady(format!("{url} returned HTTP {}", resp.status()))),
            Err(e) if e.is_connect() => {
                debug!("Connection to {} failed: {}", url, e);
                Err(Error::ServiceUnreachable(url.to_string()))
            }
            Err(e) => Ok(Reply::NotReady(format!("{url}: {e}"))),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Reply<T>> {
        Ok(match self.get(url).await? {
            Reply::Ready(resp) => match resp.json::<T>().await {
                Ok(value) => Reply::Ready(value),
                Err(e) => Reply::NotReady(format!("{url} returned an invalid payload: {e}")),
            },
            Reply::Disabled => Reply::Disabled,
            Reply::NotReady(reason) => Reply::NotReady(reason),
        })
    }

    pub async fn topics(&self, instance: &ServiceInstance) -> Result<Reply<Vec<DeclaredTopic>>> {
        let url = format!("{}{}", self.endpoint(instance), TOPICS_PATH);
        self.get_json(&url).await
    }

    /// File names of the dashboards the workload publishes
    pub async fn dashboard_list(&self, instance: &ServiceInstance) -> Result<Reply<Vec<String>>> {
        let url = format!("{}{}", self.endpoint(instance), DASHBOARD_LIST_PATH);
        self.get_json(&url).await
    }

    /// Raw payload of one dashboard
    pub async fn dashboard(&self, instance: &ServiceInstance, file_name: &str) -> Result<Reply<String>> {
        let url = format!("{}{}/{}", self.endpoint(instance), DASHBOARDS_PATH, file_name);
        Ok(match self.get(&url).await? {
            Reply::Ready(resp) => match resp.text().await {
                Ok(body) => Reply::Ready(body),
                Err(e) => Reply::NotReady(format!("{url}: {e}")),
            },
            Reply::Disabled => Reply::Disabled,
            Reply::NotReady(reason) => Reply::NotReady(reason),
        })
    }
}
