//! Unit tests for desired resource synthesis

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use kube::api::DynamicObject;
    use kube::ResourceExt;
    use serde_json::json;

    use crate::config::OperatorConfig;
    use crate::controller::comparator::DeployedResourceSet;
    use crate::controller::definition::ServiceDefinition;
    use crate::controller::infra::ResolvedInfra;
    use crate::controller::kinds::{self, ClusterFeatures};
    use crate::controller::resources::{
        EXTERNAL_IMAGE_ANNOTATION, IMAGE_TRACKER_ROLE, PROPERTIES_FILE, ROLE_LABEL,
    };
    use crate::controller::synthesizer::{
        application_properties, ResourceSynthesizer, Synthesis, SynthesisContext,
    };
    use crate::crd::{
        EnvVarSpec, RouteConfig, ServiceFamilyKind, ServiceInstance, ServiceInstanceSpec,
    };

    fn instance(spec: ServiceInstanceSpec) -> ServiceInstance {
        let mut si = ServiceInstance::new("orders", spec);
        si.metadata.namespace = Some("shop".to_string());
        si.metadata.uid = Some("uid-orders".to_string());
        si
    }

    fn with_image() -> ServiceInstanceSpec {
        ServiceInstanceSpec {
            image: Some("quay.io/acme/orders:1.0".to_string()),
            ..Default::default()
        }
    }

    fn synthesize(
        si: &ServiceInstance,
        config: &OperatorConfig,
        features: ClusterFeatures,
        deployed: &DeployedResourceSet,
        infra: &ResolvedInfra,
    ) -> Synthesis {
        let definition = ServiceDefinition::resolve(si, config);
        ResourceSynthesizer::new(config)
            .build(
                si,
                SynthesisContext {
                    definition: &definition,
                    infra,
                    features,
                    deployed,
                    dashboards: None,
                },
            )
            .unwrap()
    }

    fn properties_of(synthesis: &Synthesis) -> String {
        synthesis
            .desired
            .get(kinds::CONFIG_MAP, "orders-properties")
            .and_then(|cm| cm.data["data"][PROPERTIES_FILE].as_str())
            .unwrap_or_default()
            .to_string()
    }

    #[test]
    fn test_basic_object_set() {
        let si = instance(with_image());
        let synthesis = synthesize(
            &si,
            &OperatorConfig::default(),
            ClusterFeatures::default(),
            &DeployedResourceSet::new(),
            &ResolvedInfra::default(),
        );

        let names = synthesis.desired.names();
        assert_eq!(names.get(kinds::DEPLOYMENT), Some(&vec!["orders".to_string()]));
        assert_eq!(names.get(kinds::SERVICE), Some(&vec!["orders".to_string()]));
        assert_eq!(names.get(kinds::INGRESS), Some(&vec!["orders".to_string()]));
        assert_eq!(
            names.get(kinds::CONFIG_MAP),
            Some(&vec!["orders-properties".to_string()])
        );
        assert!(names.get(kinds::SERVICE_MONITOR).is_none());
        assert!(!synthesis.awaiting_image);
        assert_eq!(synthesis.image.as_deref(), Some("quay.io/acme/orders:1.0"));

        let deployment = synthesis.desired.get(kinds::DEPLOYMENT, "orders").unwrap();
        assert_eq!(deployment.metadata.owner_references.as_ref().unwrap()[0].uid, "uid-orders");
        assert!(!deployment.annotations().contains_key(EXTERNAL_IMAGE_ANNOTATION));
        assert!(properties_of(&synthesis).contains("quarkus.http.port=8080\n"));
    }

    #[test]
    fn test_external_build_without_image_only_tracks() {
        let si = instance(ServiceInstanceSpec::default());
        let synthesis = synthesize(
            &si,
            &OperatorConfig::default(),
            ClusterFeatures::all(),
            &DeployedResourceSet::new(),
            &ResolvedInfra::default(),
        );

        assert!(synthesis.awaiting_image);
        assert_eq!(synthesis.desired.len(), 1);
        let tracker = synthesis.desired.get(kinds::CONFIG_MAP, "orders-image").unwrap();
        assert_eq!(
            tracker.labels().get(ROLE_LABEL).map(String::as_str),
            Some(IMAGE_TRACKER_ROLE)
        );
        for kind in [kinds::DEPLOYMENT, kinds::SERVICE, kinds::GRAFANA_DASHBOARD] {
            assert!(synthesis.desired.is_retained(kind), "{kind}");
        }
    }

    #[test]
    fn test_published_image_is_used() {
        let si = instance(ServiceInstanceSpec::default());
        let mut tracker = DynamicObject::new("orders-image", &kinds::config_map()).within("shop");
        tracker.data = json!({"data": {"image": "registry.local/orders@sha256:abc"}});
        let mut deployed = DeployedResourceSet::new();
        deployed.push(kinds::CONFIG_MAP, tracker);

        let synthesis = synthesize(
            &si,
            &OperatorConfig::default(),
            ClusterFeatures::default(),
            &deployed,
            &ResolvedInfra::default(),
        );
        assert!(!synthesis.awaiting_image);
        assert_eq!(
            synthesis.image.as_deref(),
            Some("registry.local/orders@sha256:abc")
        );
        assert!(synthesis.desired.get(kinds::CONFIG_MAP, "orders-image").is_some());
        let deployment = synthesis.desired.get(kinds::DEPLOYMENT, "orders").unwrap();
        assert_eq!(
            deployment.annotations().get(EXTERNAL_IMAGE_ANNOTATION).map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_property_precedence() {
        let si = instance(ServiceInstanceSpec {
            family: ServiceFamilyKind::DataIndex,
            config: BTreeMap::from([("kafka.bootstrap.servers".to_string(), "override:9092".to_string())]),
            ..Default::default()
        });
        let infra = ResolvedInfra {
            properties: BTreeMap::from([
                ("kafka.bootstrap.servers".to_string(), "bus:9092".to_string()),
                ("cache.hosts".to_string(), "cache:11222".to_string()),
            ]),
            ..Default::default()
        };
        let definition = ServiceDefinition::resolve(&si, &OperatorConfig::default());
        let properties = application_properties(&si, &definition, &infra);

        assert_eq!(properties["kafka.bootstrap.servers"], "override:9092");
        assert_eq!(properties["cache.hosts"], "cache:11222");
        assert_eq!(properties["quarkus.http.port"], "8080");
        assert_eq!(
            properties["mp.messaging.incoming.process-instances-events.topic"],
            "process-instances-events"
        );
    }

    #[test]
    fn test_properties_change_rolls_pods() {
        let config = OperatorConfig::default();
        let hash_of = |spec: ServiceInstanceSpec| {
            let synthesis = synthesize(
                &instance(spec),
                &config,
                ClusterFeatures::default(),
                &DeployedResourceSet::new(),
                &ResolvedInfra::default(),
            );
            synthesis.desired.get(kinds::DEPLOYMENT, "orders").unwrap().data["spec"]["template"]
                ["metadata"]["annotations"]["services.operator.io/config-hash"]
                .clone()
        };

        let mut changed = with_image();
        changed.config.insert("app.greeting".to_string(), "hi".to_string());
        assert_ne!(hash_of(with_image()), hash_of(changed));
    }

    #[test]
    fn test_spec_env_overrides_infra_env() {
        let si = instance(ServiceInstanceSpec {
            env: vec![EnvVarSpec::new("LOG_LEVEL", "debug")],
            ..with_image()
        });
        let infra = ResolvedInfra {
            env: vec![
                EnvVarSpec::new("LOG_LEVEL", "info"),
                EnvVarSpec::new("BUS_TLS", "true"),
            ],
            ..Default::default()
        };
        let synthesis = synthesize(
            &si,
            &OperatorConfig::default(),
            ClusterFeatures::default(),
            &DeployedResourceSet::new(),
            &infra,
        );
        let deployment = synthesis.desired.get(kinds::DEPLOYMENT, "orders").unwrap();
        let env = &deployment.data["spec"]["template"]["spec"]["containers"][0]["env"];
        assert_eq!(env[0], json!({"name": "LOG_LEVEL", "value": "debug"}));
        assert_eq!(env[1], json!({"name": "BUS_TLS", "value": "true"}));
    }

    #[test]
    fn test_optional_kinds_follow_features() {
        let si = instance(with_image());
        let synthesis = synthesize(
            &si,
            &OperatorConfig::default(),
            ClusterFeatures::all(),
            &DeployedResourceSet::new(),
            &ResolvedInfra::default(),
        );
        assert_eq!(synthesis.desired.objects(kinds::SERVICE_MONITOR).len(), 1);
        assert!(synthesis.desired.is_retained(kinds::GRAFANA_DASHBOARD));
        assert!(!synthesis.desired.is_retained(kinds::DEPLOYMENT));
    }

    #[test]
    fn test_console_has_no_service_monitor() {
        let si = instance(ServiceInstanceSpec {
            family: ServiceFamilyKind::ManagementConsole,
            ..Default::default()
        });
        let synthesis = synthesize(
            &si,
            &OperatorConfig::default(),
            ClusterFeatures::all(),
            &DeployedResourceSet::new(),
            &ResolvedInfra::default(),
        );
        assert!(synthesis.desired.objects(kinds::SERVICE_MONITOR).is_empty());
        assert_eq!(
            synthesis.image.as_deref(),
            Some("quay.io/service-operator/management-console:latest")
        );
    }

    #[test]
    fn test_jobs_service_recreates_single_replica() {
        let si = instance(ServiceInstanceSpec {
            family: ServiceFamilyKind::JobsService,
            replicas: Some(3),
            ..Default::default()
        });
        let synthesis = synthesize(
            &si,
            &OperatorConfig::default(),
            ClusterFeatures::default(),
            &DeployedResourceSet::new(),
            &ResolvedInfra::default(),
        );
        let spec = &synthesis.desired.get(kinds::DEPLOYMENT, "orders").unwrap().data["spec"];
        assert_eq!(spec["replicas"], 1);
        assert_eq!(spec["strategy"]["type"], "Recreate");
    }

    #[test]
    fn test_external_uri() {
        let tls = instance(ServiceInstanceSpec {
            route: Some(RouteConfig {
                host: Some("orders.example.com".to_string()),
                tls_secret: Some("orders-tls".to_string()),
                ..Default::default()
            }),
            ..with_image()
        });
        let synthesis = synthesize(
            &tls,
            &OperatorConfig::default(),
            ClusterFeatures::default(),
            &DeployedResourceSet::new(),
            &ResolvedInfra::default(),
        );
        assert_eq!(synthesis.external_uri.as_deref(), Some("https://orders.example.com"));

        let mut ingress = DynamicObject::new("orders", &kinds::ingress()).within("shop");
        ingress.data = json!({"status": {"loadBalancer": {"ingress": [{"ip": "10.0.0.7"}]}}});
        let mut deployed = DeployedResourceSet::new();
        deployed.push(kinds::INGRESS, ingress);
        let synthesis = synthesize(
            &instance(with_image()),
            &OperatorConfig::default(),
            ClusterFeatures::default(),
            &deployed,
            &ResolvedInfra::default(),
        );
        assert_eq!(synthesis.external_uri.as_deref(), Some("http://10.0.0.7"));

        let disabled = instance(ServiceInstanceSpec {
            route: Some(RouteConfig {
                enabled: false,
                ..Default::default()
            }),
            ..with_image()
        });
        let synthesis = synthesize(
            &disabled,
            &OperatorConfig::default(),
            ClusterFeatures::default(),
            &DeployedResourceSet::new(),
            &ResolvedInfra::default(),
        );
        assert!(synthesis.external_uri.is_none());
        assert!(synthesis.desired.objects(kinds::INGRESS).is_empty());
    }
}
