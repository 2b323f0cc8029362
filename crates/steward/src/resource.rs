//! Declarative resource model shared by desired and live state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// Label stamped onto every resource the controller applies, used to
/// recognize orphans on the next diff.
pub const MANAGED_BY_LABEL: &str = "steward.io/managed-by";

/// Annotation carrying explicit dependency declarations, as a comma-separated
/// list of `Kind/name` or `Kind/namespace/name` references.
pub const DEPENDS_ON_ANNOTATION: &str = "steward.io/depends-on";

/// The kind of a target-platform resource.
///
/// Well-known kinds get tagged variants so the planner's kind-derived
/// ordering stays exhaustive; anything else falls back to `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceKind {
    Namespace,
    ConfigMap,
    Secret,
    Service,
    Deployment,
    StatefulSet,
    Job,
    Ingress,
    Custom(String),
}

impl ResourceKind {
    /// Returns true for kinds that live outside any namespace.
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(self, ResourceKind::Namespace)
    }
}

impl From<String> for ResourceKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Namespace" => ResourceKind::Namespace,
            "ConfigMap" => ResourceKind::ConfigMap,
            "Secret" => ResourceKind::Secret,
            "Service" => ResourceKind::Service,
            "Deployment" => ResourceKind::Deployment,
            "StatefulSet" => ResourceKind::StatefulSet,
            "Job" => ResourceKind::Job,
            "Ingress" => ResourceKind::Ingress,
            _ => ResourceKind::Custom(s),
        }
    }
}

impl From<ResourceKind> for String {
    fn from(kind: ResourceKind) -> Self {
        kind.to_string()
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Namespace => write!(f, "Namespace"),
            ResourceKind::ConfigMap => write!(f, "ConfigMap"),
            ResourceKind::Secret => write!(f, "Secret"),
            ResourceKind::Service => write!(f, "Service"),
            ResourceKind::Deployment => write!(f, "Deployment"),
            ResourceKind::StatefulSet => write!(f, "StatefulSet"),
            ResourceKind::Job => write!(f, "Job"),
            ResourceKind::Ingress => write!(f, "Ingress"),
            ResourceKind::Custom(s) => write!(f, "{}", s),
        }
    }
}

/// Unique identity of a resource within a destination cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    pub kind: ResourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.map(|s| s.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster_scoped(kind: ResourceKind, name: &str) -> Self {
        Self::new(kind, None, name)
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Resource metadata, following the usual declarative conventions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// The unique name of the resource within its kind and namespace.
    pub name: String,

    /// Namespace, absent for cluster-scoped resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Key-value labels for organizing and selecting resources.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Key-value annotations for additional metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// A declared desired-state document.
///
/// The `spec` is kept as a structured field bag rather than a typed schema:
/// the differ tracks exactly the declared fields, nothing more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredResource {
    pub api_version: String,
    pub kind: ResourceKind,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
}

impl DesiredResource {
    pub fn new(kind: ResourceKind, metadata: ObjectMeta, spec: Value) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind,
            metadata,
            spec,
        }
    }

    /// The identity key of this resource.
    pub fn id(&self) -> ResourceId {
        ResourceId {
            kind: self.kind.clone(),
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    /// Returns a copy stamped with the controller's managed-by label.
    pub fn managed_by(&self, app_name: &str) -> Self {
        let mut copy = self.clone();
        copy.metadata
            .labels
            .insert(MANAGED_BY_LABEL.to_string(), app_name.to_string());
        copy
    }

    /// Collects the identities this resource depends on: its namespace,
    /// config objects referenced from the spec, and anything declared via
    /// the depends-on annotation.
    pub fn references(&self) -> Vec<ResourceId> {
        let mut refs = Vec::new();

        if let Some(ns) = &self.metadata.namespace {
            refs.push(ResourceId::cluster_scoped(ResourceKind::Namespace, ns));
        }

        // configMapRef / secretRef style references anywhere in the spec
        collect_named_refs(&self.spec, "configMapRef", &mut |name| {
            refs.push(ResourceId::new(
                ResourceKind::ConfigMap,
                self.metadata.namespace.as_deref(),
                name,
            ));
        });
        collect_named_refs(&self.spec, "secretRef", &mut |name| {
            refs.push(ResourceId::new(
                ResourceKind::Secret,
                self.metadata.namespace.as_deref(),
                name,
            ));
        });

        if let Some(raw) = self.metadata.annotations.get(DEPENDS_ON_ANNOTATION) {
            for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                if let Some(id) = parse_reference(part, self.metadata.namespace.as_deref()) {
                    refs.push(id);
                }
            }
        }

        refs.sort();
        refs.dedup();
        // A resource never depends on itself, even if declared.
        let own = self.id();
        refs.retain(|r| *r != own);
        refs
    }
}

/// Parses a `Kind/name` or `Kind/namespace/name` reference string.
fn parse_reference(raw: &str, default_namespace: Option<&str>) -> Option<ResourceId> {
    let parts: Vec<&str> = raw.split('/').collect();
    match parts.as_slice() {
        [kind, name] => {
            let kind = ResourceKind::from(kind.to_string());
            let namespace = if kind.is_cluster_scoped() {
                None
            } else {
                default_namespace
            };
            Some(ResourceId::new(kind, namespace, name))
        }
        [kind, namespace, name] => Some(ResourceId::new(
            ResourceKind::from(kind.to_string()),
            Some(namespace),
            name,
        )),
        _ => None,
    }
}

/// Recursively walks a field bag looking for `{ key: { name: ... } }` or
/// `{ key: <string> }` reference shapes.
fn collect_named_refs(value: &Value, key: &str, found: &mut impl FnMut(&str)) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                if k.as_str() == Some(key) {
                    match v {
                        Value::String(name) => found(name),
                        Value::Mapping(inner) => {
                            if let Some(Value::String(name)) = inner.get("name") {
                                found(name);
                            }
                        }
                        _ => {}
                    }
                }
                collect_named_refs(v, key, found);
            }
        }
        Value::Sequence(seq) => {
            for v in seq {
                collect_named_refs(v, key, found);
            }
        }
        _ => {}
    }
}

/// Observed state of a resource reported by the target platform.
///
/// Same identity key as the desired document; the platform owns the `status`
/// field bag and may inject defaults into `spec` that the differ ignores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveResource {
    pub api_version: String,
    pub kind: ResourceKind,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: Value,
}

impl LiveResource {
    /// Builds the live counterpart of a desired document, with empty status.
    pub fn from_desired(desired: &DesiredResource) -> Self {
        Self {
            api_version: desired.api_version.clone(),
            kind: desired.kind.clone(),
            metadata: desired.metadata.clone(),
            spec: desired.spec.clone(),
            status: Value::Null,
        }
    }

    pub fn id(&self) -> ResourceId {
        ResourceId {
            kind: self.kind.clone(),
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    /// Returns the application managing this resource, if any.
    pub fn managed_by(&self) -> Option<&str> {
        self.metadata.labels.get(MANAGED_BY_LABEL).map(String::as_str)
    }
}

/// A parse failure for a single document within a revision.
///
/// Per-document failures never fail the whole revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Parses a (possibly multi-document) YAML manifest into desired resources.
///
/// Individual document failures are collected, not fatal.
pub fn parse_manifest(
    path: &Path,
    content: &str,
) -> (Vec<DesiredResource>, Vec<ParseFailure>) {
    let mut resources = Vec::new();
    let mut failures = Vec::new();

    for document in split_documents(content) {
        if document.trim().is_empty() {
            continue;
        }
        match serde_yaml::from_str::<DesiredResource>(&document) {
            Ok(resource) => {
                if resource.metadata.name.is_empty() {
                    failures.push(ParseFailure {
                        path: path.to_path_buf(),
                        message: "resource has no metadata.name".to_string(),
                    });
                } else {
                    resources.push(resource);
                }
            }
            Err(e) => failures.push(ParseFailure {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    (resources, failures)
}

/// Splits a YAML stream on `---` document markers.
fn split_documents(content: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        if line.trim_end() == "---" {
            docs.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    docs.push(current);
    docs
}
