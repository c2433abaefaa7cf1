//! Resource comparison and diffing
//!
//! The comparator partitions a desired and a deployed [`ResourceSet`] into a
//! per-kind [`Delta`]. Equality is decided by a registry of per-kind
//! predicates; kinds without a registered predicate use the default one.
//!
//! The default predicate treats the fields the desired object sets as the
//! managed fields: every one of them must be present and equal in the deployed
//! object. Server-populated defaults, generated metadata (`uid`,
//! `resourceVersion`, `generation`, `creationTimestamp`, `managedFields`) and
//! the `status` subtree never make two objects differ.

use std::collections::{BTreeMap, BTreeSet};

use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::{json, Map, Value};

use crate::crd::quantity::quantities_equal;

use super::kinds;
use super::resources::{EXTERNAL_IMAGE_ANNOTATION, IMAGE_TRACKER_ROLE, ROLE_LABEL};

/// Objects keyed by kind, each list in a stable order
#[derive(Clone, Debug, Default)]
pub struct ResourceSet {
    objects: BTreeMap<String, Vec<DynamicObject>>,
    retained: BTreeSet<String>,
}

/// Objects the reconciler wants to exist
pub type DesiredResourceSet = ResourceSet;
/// Objects currently owned by the instance
pub type DeployedResourceSet = ResourceSet;

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: &str, obj: DynamicObject) {
        self.objects.entry(kind.to_string()).or_default().push(obj);
    }

    pub fn extend(&mut self, kind: &str, objs: impl IntoIterator<Item = DynamicObject>) {
        self.objects.entry(kind.to_string()).or_default().extend(objs);
    }

    /// Drop every object of `kind`; deployed ones become removals
    pub fn clear_kind(&mut self, kind: &str) {
        self.objects.remove(kind);
    }

    pub fn objects(&self, kind: &str) -> &[DynamicObject] {
        self.objects.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, kind: &str, name: &str) -> Option<&DynamicObject> {
        self.objects(kind).iter().find(|o| o.name_any() == name)
    }

    pub fn get_mut(&mut self, kind: &str, name: &str) -> Option<&mut DynamicObject> {
        self.objects
            .get_mut(kind)
            .and_then(|objs| objs.iter_mut().find(|o| o.name_any() == name))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.objects.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep deployed objects of `kind` even if they are not desired
    pub fn retain_kind(&mut self, kind: &str) {
        self.retained.insert(kind.to_string());
    }

    pub fn is_retained(&self, kind: &str) -> bool {
        self.retained.contains(kind)
    }

    /// Object names per kind, for status reporting
    pub fn names(&self) -> BTreeMap<String, Vec<String>> {
        self.objects
            .iter()
            .filter(|(_, objs)| !objs.is_empty())
            .map(|(kind, objs)| (kind.clone(), objs.iter().map(|o| o.name_any()).collect()))
            .collect()
    }
}

/// Changes for one kind
#[derive(Clone, Debug, Default)]
pub struct KindDelta {
    pub added: Vec<DynamicObject>,
    /// Ready-to-write objects carrying the deployed `resourceVersion`
    pub updated: Vec<DynamicObject>,
    pub removed: Vec<DynamicObject>,
    pub unchanged: Vec<DynamicObject>,
}

impl KindDelta {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty())
    }
}

/// Per-kind partition of desired and deployed objects
#[derive(Clone, Debug, Default)]
pub struct Delta {
    kinds: BTreeMap<String, KindDelta>,
}

impl Delta {
    /// True when nothing needs to be written
    pub fn is_empty(&self) -> bool {
        self.kinds.values().all(|d| !d.has_changes())
    }

    pub fn kind(&self, kind: &str) -> Option<&KindDelta> {
        self.kinds.get(kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KindDelta)> {
        self.kinds.iter().map(|(k, d)| (k.as_str(), d))
    }

    pub fn change_count(&self) -> usize {
        self.kinds
            .values()
            .map(|d| d.added.len() + d.updated.len() + d.removed.len())
            .sum()
    }

    pub fn added_names(&self, kind: &str) -> Vec<String> {
        self.kind(kind)
            .map(|d| d.added.iter().map(|o| o.name_any()).collect())
            .unwrap_or_default()
    }
}

/// Equality predicate and update preparation for one kind
pub trait KindComparator: Send + Sync {
    fn kind(&self) -> &str;

    fn equal(&self, desired: &DynamicObject, deployed: &DynamicObject) -> bool {
        managed_fields_equal(desired, deployed)
    }

    /// Object to write when `desired` and `deployed` differ
    fn prepare_update(&self, desired: &DynamicObject, deployed: &DynamicObject) -> DynamicObject {
        merge_onto_deployed(desired, deployed)
    }
}

/// Registry of per-kind comparators
pub struct ResourceComparator {
    registry: BTreeMap<String, Box<dyn KindComparator>>,
    fallback: DefaultComparator,
}

impl Default for ResourceComparator {
    fn default() -> Self {
        let mut comparator = Self::empty();
        comparator.register(Box::new(ConfigMapComparator));
        comparator.register(Box::new(DeploymentComparator));
        comparator
    }
}

impl ResourceComparator {
    /// A registry where every kind uses the default predicate
    pub fn empty() -> Self {
        Self {
            registry: BTreeMap::new(),
            fallback: DefaultComparator,
        }
    }

    pub fn register(&mut self, comparator: Box<dyn KindComparator>) {
        self.registry
            .insert(comparator.kind().to_string(), comparator);
    }

    pub fn for_kind(&self, kind: &str) -> &dyn KindComparator {
        self.registry
            .get(kind)
            .map(|c| c.as_ref())
            .unwrap_or(&self.fallback)
    }

    /// Partition deployed and desired objects per kind
    ///
    /// Identity is (kind, namespace, name). Deployed objects of a retained
    /// kind are never reported as removed.
    pub fn diff(&self, deployed: &DeployedResourceSet, desired: &DesiredResourceSet) -> Delta {
        let kinds: BTreeSet<&str> = deployed.kinds().chain(desired.kinds()).collect();
        let mut delta = Delta::default();

        for kind in kinds {
            let comparator = self.for_kind(kind);
            let mut kind_delta = KindDelta::default();
            let deployed_objs = deployed.objects(kind);

            for want in desired.objects(kind) {
                match deployed_objs.iter().find(|have| same_identity(want, have)) {
                    None => kind_delta.added.push(want.clone()),
                    Some(have) if comparator.equal(want, have) => {
                        kind_delta.unchanged.push(have.clone())
                    }
                    Some(have) => kind_delta
                        .updated
                        .push(comparator.prepare_update(want, have)),
                }
            }

            if !desired.is_retained(kind) {
                for have in deployed_objs {
                    let still_wanted = desired
                        .objects(kind)
                        .iter()
                        .any(|want| same_identity(want, have));
                    if !still_wanted {
                        kind_delta.removed.push(have.clone());
                    }
                }
            }

            delta.kinds.insert(kind.to_string(), kind_delta);
        }

        delta
    }
}

struct DefaultComparator;

impl KindComparator for DefaultComparator {
    fn kind(&self) -> &str {
        "*"
    }
}

/// ConfigMaps; the image tracker is compared on identity only so the image
/// written into it by an external build is never reverted
pub struct ConfigMapComparator;

impl KindComparator for ConfigMapComparator {
    fn kind(&self) -> &str {
        kinds::CONFIG_MAP
    }

    fn equal(&self, desired: &DynamicObject, deployed: &DynamicObject) -> bool {
        if is_image_tracker(desired) {
            identity_fields_equal(desired, deployed)
        } else {
            managed_fields_equal(desired, deployed)
        }
    }

    fn prepare_update(&self, desired: &DynamicObject, deployed: &DynamicObject) -> DynamicObject {
        let mut merged = merge_onto_deployed(desired, deployed);
        if is_image_tracker(desired) {
            merged.data = strip_status(&deployed.data);
        }
        merged
    }
}

/// Deployments; container images are left alone when the desired object marks
/// its image as externally managed
pub struct DeploymentComparator;

impl KindComparator for DeploymentComparator {
    fn kind(&self) -> &str {
        kinds::DEPLOYMENT
    }

    fn equal(&self, desired: &DynamicObject, deployed: &DynamicObject) -> bool {
        let deployed_view = managed_view(deployed);
        let mut view = managed_view(desired);
        align_quantities(&mut view["data"], &deployed_view["data"]);
        if has_external_image(desired) {
            for container in containers_mut(&mut view["data"]) {
                if let Some(map) = container.as_object_mut() {
                    map.remove("image");
                }
            }
        }
        is_subset(&view, &deployed_view)
    }

    fn prepare_update(&self, desired: &DynamicObject, deployed: &DynamicObject) -> DynamicObject {
        let mut merged = merge_onto_deployed(desired, deployed);
        align_quantities(&mut merged.data, &deployed.data);
        // rollingUpdate is rejected alongside Recreate
        let recreate = desired
            .data
            .pointer("/spec/strategy/type")
            .and_then(Value::as_str)
            == Some("Recreate");
        if recreate {
            if let Some(strategy) = merged
                .data
                .pointer_mut("/spec/strategy")
                .and_then(Value::as_object_mut)
            {
                strategy.remove("rollingUpdate");
            }
        }
        if !has_external_image(desired) {
            return merged;
        }
        let deployed_images: BTreeMap<String, Value> = containers(&deployed.data)
            .iter()
            .filter_map(|c| Some((c.get("name")?.as_str()?.to_string(), c.get("image")?.clone())))
            .collect();
        for container in containers_mut(&mut merged.data) {
            let name = container.get("name").and_then(Value::as_str).map(str::to_string);
            if let Some(image) = name.and_then(|n| deployed_images.get(&n)) {
                container["image"] = image.clone();
            }
        }
        merged
    }
}

fn is_image_tracker(obj: &DynamicObject) -> bool {
    obj.labels().get(ROLE_LABEL).map(String::as_str) == Some(IMAGE_TRACKER_ROLE)
}

fn has_external_image(obj: &DynamicObject) -> bool {
    obj.annotations().get(EXTERNAL_IMAGE_ANNOTATION).map(String::as_str) == Some("true")
}

fn containers(data: &Value) -> Vec<Value> {
    data.pointer("/spec/template/spec/containers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn containers_mut(data: &mut Value) -> impl Iterator<Item = &mut Value> {
    data.pointer_mut("/spec/template/spec/containers")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
}

/// Rewrite desired container quantities to the deployed spelling where both
/// denote the same amount; the API server stores quantities canonicalized
fn align_quantities(desired: &mut Value, deployed: &Value) {
    let deployed_containers = containers(deployed);
    for container in containers_mut(desired) {
        let Some(name) = container.get("name").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let Some(have) = deployed_containers
            .iter()
            .find(|c| c.get("name").and_then(Value::as_str) == Some(name.as_str()))
        else {
            continue;
        };

        for section in ["requests", "limits"] {
            let Some(wanted) = container
                .pointer_mut(&format!("/resources/{section}"))
                .and_then(Value::as_object_mut)
            else {
                continue;
            };
            for (resource, value) in wanted.iter_mut() {
                let Some(current) = have
                    .pointer(&format!("/resources/{section}/{resource}"))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                let same = value
                    .as_str()
                    .map(|want| quantities_equal(want, current))
                    .unwrap_or(false);
                if same {
                    *value = Value::String(current.to_string());
                }
            }
        }
    }
}

fn same_identity(a: &DynamicObject, b: &DynamicObject) -> bool {
    a.name_any() == b.name_any() && a.namespace() == b.namespace()
}

fn strip_status(data: &Value) -> Value {
    let mut data = data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

/// Metadata fields the operator owns
fn identity_view(obj: &DynamicObject) -> Value {
    json!({
        "labels": obj.labels(),
        "annotations": obj.annotations(),
        "ownerReferences": obj.owner_references(),
    })
}

fn managed_view(obj: &DynamicObject) -> Value {
    json!({
        "metadata": identity_view(obj),
        "data": strip_status(&obj.data),
    })
}

/// Default predicate: desired's managed fields are a subset of deployed
pub fn managed_fields_equal(desired: &DynamicObject, deployed: &DynamicObject) -> bool {
    is_subset(&managed_view(desired), &managed_view(deployed))
}

/// Only labels, annotations and owner references are compared
pub fn identity_fields_equal(desired: &DynamicObject, deployed: &DynamicObject) -> bool {
    is_subset(&identity_view(desired), &identity_view(deployed))
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

/// Whether every field set in `desired` has the same value in `deployed`
///
/// Arrays must have equal length and match element-wise. An empty value in
/// `desired` matches an absent field, since the API server drops them.
pub fn is_subset(desired: &Value, deployed: &Value) -> bool {
    match (desired, deployed) {
        (Value::Object(want), Value::Object(have)) => want.iter().all(|(k, v)| match have.get(k) {
            Some(h) => is_subset(v, h),
            None => is_empty_value(v),
        }),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| is_subset(w, h))
        }
        (want, Value::Null) => is_empty_value(want),
        (want, have) => want == have,
    }
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                deep_merge(base_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Desired merged onto deployed; deployed-only fields (server defaults, a
/// Service's cluster IP) survive, desired wins everywhere it says something
pub fn merge_onto_deployed(desired: &DynamicObject, deployed: &DynamicObject) -> DynamicObject {
    let mut merged = deployed.clone();

    let mut data = strip_status(&deployed.data);
    if data.is_null() {
        data = Value::Object(Map::new());
    }
    deep_merge(&mut data, &strip_status(&desired.data));
    merged.data = data;

    let mut labels = deployed.labels().clone();
    labels.extend(desired.labels().clone());
    merged.metadata.labels = Some(labels);

    let mut annotations = deployed.annotations().clone();
    annotations.extend(desired.annotations().clone());
    merged.metadata.annotations = Some(annotations);

    merged.metadata.owner_references = desired.metadata.owner_references.clone();
    merged.metadata.managed_fields = None;
    merged.metadata.resource_version = deployed.metadata.resource_version.clone();
    merged
}
