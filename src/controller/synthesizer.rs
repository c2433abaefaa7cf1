//! Desired resource synthesis
//!
//! Builds the full [`DesiredResourceSet`] of an instance from its spec, its
//! service definition, the resolved infrastructure and what is currently
//! deployed. When the workload image comes from an external build that has
//! not published anything yet, the set contains only the image tracker and
//! every owned kind is retained so a running workload is left alone.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;

use crate::config::OperatorConfig;
use crate::crd::ServiceInstance;
use crate::error::Result;

use super::comparator::{DeployedResourceSet, DesiredResourceSet};
use super::definition::ServiceDefinition;
use super::infra::{merge_env, ResolvedInfra};
use super::kinds::{self, to_dynamic, ClusterFeatures};
use super::resources::{
    build_deployment, build_image_tracker, build_ingress, build_properties_config_map,
    build_service, build_service_monitor, config_hash, image_tracker_name, render_properties,
    route_host, WorkloadParams, IMAGE_TRACKER_KEY,
};

/// Inputs gathered before synthesis
pub struct SynthesisContext<'a> {
    pub definition: &'a ServiceDefinition,
    pub infra: &'a ResolvedInfra,
    pub features: ClusterFeatures,
    pub deployed: &'a DeployedResourceSet,
    /// Discovered dashboards; `None` keeps whatever is deployed
    pub dashboards: Option<Vec<DynamicObject>>,
}

#[derive(Debug)]
pub struct Synthesis {
    pub desired: DesiredResourceSet,
    pub image: Option<String>,
    pub external_uri: Option<String>,
    pub awaiting_image: bool,
}

pub struct ResourceSynthesizer<'a> {
    config: &'a OperatorConfig,
}

/// Image an external build wrote into the deployed tracker, if any
pub fn tracked_image(instance: &ServiceInstance, deployed: &DeployedResourceSet) -> Option<String> {
    deployed
        .get(kinds::CONFIG_MAP, &image_tracker_name(instance))
        .and_then(|tracker| tracker.data.pointer(&format!("/data/{IMAGE_TRACKER_KEY}")))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|image| !image.is_empty())
        .map(str::to_string)
}

/// Application properties, lowest precedence first: definition defaults,
/// infra, messaging wiring, spec overrides
pub fn application_properties(
    instance: &ServiceInstance,
    definition: &ServiceDefinition,
    infra: &ResolvedInfra,
) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::from([(
        definition.health_check.port_property().to_string(),
        instance.spec.http_port().to_string(),
    )]);
    properties.extend(definition.family.default_properties(instance));
    properties.extend(infra.properties.clone());
    for topic in &definition.topics {
        properties.insert(
            format!("mp.messaging.{}.{}.topic", topic.direction.channel(), topic.name),
            topic.name.clone(),
        );
    }
    properties.extend(instance.spec.config.clone());
    properties
}

/// Address published by the ingress controller on the deployed Ingress
fn load_balancer_address(instance: &ServiceInstance, deployed: &DeployedResourceSet) -> Option<String> {
    let ingress = deployed.get(kinds::INGRESS, &instance.name_any())?;
    let first = ingress.data.pointer("/status/loadBalancer/ingress/0")?;
    first
        .get("hostname")
        .or_else(|| first.get("ip"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl<'a> ResourceSynthesizer<'a> {
    pub fn new(config: &'a OperatorConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, instance: &ServiceInstance, ctx: SynthesisContext<'_>) -> Result<Synthesis> {
        let definition = ctx.definition;
        let mut desired = DesiredResourceSet::new();

        let external_image = definition.image_is_external(instance);
        let image = instance
            .spec
            .image
            .clone()
            .or_else(|| tracked_image(instance, ctx.deployed))
            .or_else(|| definition.default_image.clone());

        if external_image {
            desired.push(kinds::CONFIG_MAP, to_dynamic(&build_image_tracker(instance))?);
        }
        let Some(image) = image else {
            for resource in ctx.features.owned_kinds() {
                desired.retain_kind(&resource.kind);
            }
            return Ok(Synthesis {
                desired,
                image: None,
                external_uri: None,
                awaiting_image: true,
            });
        };

        let rendered = render_properties(&application_properties(instance, definition, ctx.infra));
        desired.push(
            kinds::CONFIG_MAP,
            to_dynamic(&build_properties_config_map(instance, &rendered))?,
        );

        let mut env = ctx.infra.env.clone();
        merge_env(&mut env, &instance.spec.env);
        let params = WorkloadParams {
            image: image.clone(),
            replicas: definition.replicas(instance),
            env,
            volumes: ctx.infra.volumes.clone(),
            health_check: definition.health_check,
            config_hash: config_hash(&rendered),
            external_image,
        };
        let mut deployment = build_deployment(instance, &params);
        definition.family.customize_deployment(instance, &mut deployment);
        desired.push(kinds::DEPLOYMENT, to_dynamic(&deployment)?);

        desired.push(kinds::SERVICE, to_dynamic(&build_service(instance))?);

        let route = instance.spec.route();
        let mut external_uri = None;
        if route.enabled {
            let host = route_host(instance, self.config.route_domain.as_deref());
            external_uri = match &host {
                Some(host) => {
                    let scheme = if route.tls_secret.is_some() { "https" } else { "http" };
                    Some(format!("{scheme}://{host}"))
                }
                None => load_balancer_address(instance, ctx.deployed).map(|a| format!("http://{a}")),
            };
            desired.push(kinds::INGRESS, to_dynamic(&build_ingress(instance, host))?);
        }

        let monitoring = instance.spec.monitoring();
        if ctx.features.monitoring && monitoring.enabled {
            desired.push(
                kinds::SERVICE_MONITOR,
                build_service_monitor(instance, &monitoring, definition.health_check),
            );
        }

        if ctx.features.dashboards {
            match ctx.dashboards {
                Some(dashboards) => desired.extend(kinds::GRAFANA_DASHBOARD, dashboards),
                None => desired.retain_kind(kinds::GRAFANA_DASHBOARD),
            }
        }

        definition.family.customize_objects(instance, &mut desired);

        Ok(Synthesis {
            desired,
            image: Some(image),
            external_uri,
            awaiting_image: false,
        })
    }
}
