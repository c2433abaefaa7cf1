//! Operator configuration
//!
//! Loaded once at startup from an optional TOML file; every field has a
//! default so the operator runs without one. CLI flags override a few fields
//! (see `main.rs`).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::crd::{ServiceFamilyKind, TopicDefinition};
use crate::error::{Error, Result};

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct OperatorConfig {
    /// Registry prefix for family default images
    pub image_registry: String,
    /// Tag used when a family default image has none
    pub image_tag: String,
    /// Domain appended to `<name>-<namespace>` for route hosts
    pub route_domain: Option<String>,
    /// Bus cluster looked up in the instance namespace when no infra names one
    pub default_bus_cluster: String,
    pub topic_partitions: i32,
    pub topic_replicas: i32,
    /// Timeout for each workload introspection call
    pub http_timeout_secs: u64,
    /// Requeue after ownership of an object was claimed
    pub ownership_requeue_secs: u64,
    /// Per-family overrides keyed by family name
    pub families: BTreeMap<ServiceFamilyKind, FamilyOverride>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FamilyOverride {
    pub image: Option<String>,
    pub tag: Option<String>,
    /// Extra topics every instance of the family requires
    pub topics: Vec<TopicDefinition>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            image_registry: "quay.io/service-operator".to_string(),
            image_tag: "latest".to_string(),
            route_domain: None,
            default_bus_cluster: "messaging-bus".to_string(),
            topic_partitions: 1,
            topic_replicas: 1,
            http_timeout_secs: 10,
            ownership_requeue_secs: 5,
            families: BTreeMap::new(),
        }
    }
}

impl OperatorConfig {
    /// Load from a TOML file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| Error::ConfigError(format!("invalid operator config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.topic_partitions < 1 || self.topic_replicas < 1 {
            return Err(Error::ConfigError(
                "topic_partitions and topic_replicas must be at least 1".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "http_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn ownership_requeue(&self) -> Duration {
        Duration::from_secs(self.ownership_requeue_secs)
    }

    pub fn family(&self, family: ServiceFamilyKind) -> Option<&FamilyOverride> {
        self.families.get(&family)
    }
}
