//! Message bus topic provisioning
//!
//! Topics are created if absent and never updated or deleted here. The set to
//! ensure is the topics the service definition requires plus the topics the
//! live workload declares once it has available replicas.

use std::collections::BTreeSet;

use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::config::OperatorConfig;
use crate::crd::{EventDescriptor, EventKind, EventManifest, ServiceInstance, TopicDefinition};
use crate::error::{Error, Result};

use super::definition::ServiceDefinition;
use super::infra::{BusCluster, ResolvedInfra};
use super::introspection::{DeclaredTopic, Reply, WorkloadIntrospector};
use super::kinds;
use super::resources::{build_kafka_topic, sanitize_name};
use super::store::ResourceStore;

/// What one `ensure` pass did
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessagingReport {
    pub bus: Option<BusCluster>,
    /// Names of the topic objects created in this pass
    pub created: Vec<String>,
    /// Manifest declared by the workload, when it answered
    pub manifest: Option<EventManifest>,
}

pub struct MessagingProvisioner<'a> {
    store: &'a dyn ResourceStore,
    introspector: &'a WorkloadIntrospector,
    config: &'a OperatorConfig,
}

/// Event manifest built from the workload's topic declarations
pub fn manifest_from(declared: &[DeclaredTopic]) -> EventManifest {
    let mut topics = BTreeSet::new();
    let mut consumes = BTreeSet::new();
    let mut produces = BTreeSet::new();

    for topic in declared {
        topics.insert(TopicDefinition {
            name: topic.name.clone(),
            direction: topic.direction,
        });
        for event in &topic.events_meta {
            let descriptor = EventDescriptor {
                type_: event.type_.clone(),
                source: event.source.clone(),
            };
            match event.kind {
                EventKind::Consumed => consumes.insert(descriptor),
                EventKind::Produced => produces.insert(descriptor),
            };
        }
    }

    EventManifest {
        topics: topics.into_iter().collect(),
        consumes: consumes.into_iter().collect(),
        produces: produces.into_iter().collect(),
    }
}

impl<'a> MessagingProvisioner<'a> {
    pub fn new(
        store: &'a dyn ResourceStore,
        introspector: &'a WorkloadIntrospector,
        config: &'a OperatorConfig,
    ) -> Self {
        Self {
            store,
            introspector,
            config,
        }
    }

    /// Bus cluster from an explicit infra reference, else the namespace default
    pub async fn resolve_bus(
        &self,
        instance: &ServiceInstance,
        infra: &ResolvedInfra,
    ) -> Result<Option<BusCluster>> {
        if let Some(bus) = &infra.bus {
            return Ok(Some(bus.clone()));
        }
        let namespace = instance.namespace().unwrap_or_else(|| "default".to_string());
        let found = self
            .store
            .get(&kinds::kafka(), &namespace, &self.config.default_bus_cluster)
            .await
            .map_err(|e| Error::MessagingError(format!("looking up bus cluster: {e}")))?;
        Ok(found.map(|_| BusCluster {
            name: self.config.default_bus_cluster.clone(),
            namespace,
        }))
    }

    /// Create the topic if it does not exist; returns whether it was created
    pub async fn ensure_topic(&self, bus: &BusCluster, topic: &TopicDefinition) -> Result<bool> {
        let desired = build_kafka_topic(
            &topic.name,
            &bus.namespace,
            &bus.name,
            self.config.topic_partitions,
            self.config.topic_replicas,
        );
        let resource = kinds::kafka_topic();
        let name = sanitize_name(&topic.name);

        let existing = self
            .store
            .get(&resource, &bus.namespace, &name)
            .await
            .map_err(|e| Error::MessagingError(format!("reading topic {}: {e}", topic.name)))?;
        if existing.is_some() {
            debug!("Topic {} already exists on {}", topic.name, bus.name);
            return Ok(false);
        }

        match self.store.create(&resource, &desired).await {
            Ok(_) => {
                info!("Created topic {} on {}/{}", topic.name, bus.namespace, bus.name);
                #[cfg(feature = "metrics")]
                super::metrics::inc_topic_created(&bus.namespace);
                Ok(true)
            }
            Err(Error::AlreadyExists { .. }) => Ok(false),
            Err(e) => Err(Error::MessagingError(format!(
                "creating topic {}: {e}",
                topic.name
            ))),
        }
    }

    /// Ask the workload which topics it uses; failures only log
    pub async fn discover(
        &self,
        instance: &ServiceInstance,
        available_replicas: i32,
    ) -> Option<Vec<DeclaredTopic>> {
        if available_replicas <= 0 {
            return None;
        }
        match self.introspector.topics(instance).await {
            Ok(Reply::Ready(topics)) => Some(topics),
            Ok(Reply::Disabled) => Some(Vec::new()),
            Ok(Reply::NotReady(reason)) => {
                debug!("Topic discovery for {} not ready: {}", instance.name_any(), reason);
                None
            }
            Err(e) => {
                warn!("Topic discovery for {} failed: {}", instance.name_any(), e);
                None
            }
        }
    }

    /// Ensure required and workload-declared topics exist
    pub async fn ensure(
        &self,
        instance: &ServiceInstance,
        definition: &ServiceDefinition,
        infra: &ResolvedInfra,
        available_replicas: i32,
    ) -> Result<MessagingReport> {
        let mut report = MessagingReport::default();

        let declared = self.discover(instance, available_replicas).await;
        report.manifest = declared.as_deref().map(manifest_from);

        if !self.store.features().await?.messaging {
            debug!("Cluster has no message bus support, skipping topics");
            return Ok(report);
        }
        let Some(bus) = self.resolve_bus(instance, infra).await? else {
            debug!("No bus cluster for {}, skipping topics", instance.name_any());
            return Ok(report);
        };

        let mut topics = definition.topics.clone();
        for topic in declared.unwrap_or_default() {
            if !topics.iter().any(|t| t.name == topic.name) {
                topics.push(TopicDefinition {
                    name: topic.name,
                    direction: topic.direction,
                });
            }
        }

        for topic in &topics {
            if self.ensure_topic(&bus, topic).await? {
                report.created.push(sanitize_name(&topic.name));
            }
        }
        report.bus = Some(bus);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::introspection::TOPICS_PATH;
    use crate::controller::kinds::ClusterFeatures;
    use crate::controller::memory::MemoryStore;
    use crate::crd::{ServiceFamilyKind, ServiceInstanceSpec, TopicDirection};
    use kube::api::DynamicObject;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn instance(family: ServiceFamilyKind) -> ServiceInstance {
        let mut si = ServiceInstance::new(
            "orders",
            ServiceInstanceSpec {
                family,
                ..Default::default()
            },
        );
        si.metadata.namespace = Some("shop".to_string());
        si
    }

    fn definition_with(topic: &str) -> ServiceDefinition {
        let mut def = ServiceDefinition::resolve(
            &instance(ServiceFamilyKind::Runtime),
            &OperatorConfig::default(),
        );
        def.topics = vec![TopicDefinition::outgoing(topic)];
        def
    }

    async fn seed_bus(store: &MemoryStore) {
        let ar = kinds::kafka();
        store
            .insert(&ar, DynamicObject::new("messaging-bus", &ar).within("shop"))
            .await;
    }

    #[tokio::test]
    async fn test_no_bus_is_a_noop() {
        let store = MemoryStore::with_features(ClusterFeatures::all());
        let introspector = WorkloadIntrospector::new(Duration::from_millis(200)).unwrap();
        let config = OperatorConfig::default();
        let provisioner = MessagingProvisioner::new(&store, &introspector, &config);

        let report = provisioner
            .ensure(
                &instance(ServiceFamilyKind::Runtime),
                &definition_with("orders-events"),
                &ResolvedInfra::default(),
                0,
            )
            .await
            .unwrap();
        assert!(report.created.is_empty());
        assert!(report.bus.is_none());
        assert_eq!(store.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_without_messaging_support_nothing_is_created() {
        let store = MemoryStore::new();
        seed_bus(&store).await;
        let introspector = WorkloadIntrospector::new(Duration::from_millis(200)).unwrap();
        let config = OperatorConfig::default();
        let provisioner = MessagingProvisioner::new(&store, &introspector, &config);

        let report = provisioner
            .ensure(
                &instance(ServiceFamilyKind::Runtime),
                &definition_with("orders-events"),
                &ResolvedInfra::default(),
                0,
            )
            .await
            .unwrap();
        assert!(report.created.is_empty());
        assert!(store.objects_of(&kinds::kafka_topic()).await.is_empty());
    }

    #[tokio::test]
    async fn test_topic_creation_is_idempotent() {
        let store = MemoryStore::with_features(ClusterFeatures::all());
        let introspector = WorkloadIntrospector::new(Duration::from_millis(200)).unwrap();
        let config = OperatorConfig::default();
        let provisioner = MessagingProvisioner::new(&store, &introspector, &config);
        let bus = BusCluster {
            name: "messaging-bus".to_string(),
            namespace: "shop".to_string(),
        };
        let topic = TopicDefinition::outgoing("orders-events");

        assert!(provisioner.ensure_topic(&bus, &topic).await.unwrap());
        assert!(!provisioner.ensure_topic(&bus, &topic).await.unwrap());

        let race_a = TopicDefinition::incoming("race");
        let race_b = TopicDefinition::incoming("race");
        let (first, second) = tokio::join!(
            provisioner.ensure_topic(&bus, &race_a),
            provisioner.ensure_topic(&bus, &race_b),
        );
        assert!(first.is_ok() && second.is_ok());
        assert_eq!(store.objects_of(&kinds::kafka_topic()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_declared_topic_is_created_and_recorded() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TOPICS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[{"name":"results","type":"INCOMING"}]"#),
            )
            .mount(&mock_server)
            .await;

        let store = MemoryStore::with_features(ClusterFeatures::all());
        seed_bus(&store).await;
        let introspector = WorkloadIntrospector::new(Duration::from_secs(1))
            .unwrap()
            .with_endpoint(mock_server.uri());
        let config = OperatorConfig::default();
        let provisioner = MessagingProvisioner::new(&store, &introspector, &config);
        let si = instance(ServiceFamilyKind::Runtime);
        let definition = ServiceDefinition::resolve(&si, &config);

        let report = provisioner
            .ensure(&si, &definition, &ResolvedInfra::default(), 1)
            .await
            .unwrap();
        assert_eq!(report.created, vec!["results".to_string()]);
        assert_eq!(
            report.manifest.unwrap().topics,
            vec![TopicDefinition {
                name: "results".to_string(),
                direction: TopicDirection::Incoming
            }]
        );
        assert_eq!(store.objects_of(&kinds::kafka_topic()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_workload_is_not_fatal() {
        let store = MemoryStore::with_features(ClusterFeatures::all());
        seed_bus(&store).await;
        let introspector = WorkloadIntrospector::new(Duration::from_millis(200))
            .unwrap()
            .with_endpoint("http://127.0.0.1:1");
        let config = OperatorConfig::default();
        let provisioner = MessagingProvisioner::new(&store, &introspector, &config);
        let si = instance(ServiceFamilyKind::JobsService);
        let definition = ServiceDefinition::resolve(&si, &config);

        let report = provisioner
            .ensure(&si, &definition, &ResolvedInfra::default(), 1)
            .await
            .unwrap();
        assert!(report.manifest.is_none());
        assert_eq!(report.created, vec!["job-status-events".to_string()]);
    }
}
