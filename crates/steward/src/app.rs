//! Application declarations binding a source to a destination.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StewardError};
use crate::resource::ObjectMeta;

/// The API version for steward's own declarative documents.
pub const API_VERSION: &str = "steward.io/v1";

/// An operator-declared binding of source repository, revision selector,
/// destination and sync policy. Created by declaration, mutated only by
/// policy updates, never auto-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: AppSpec,
}

impl Application {
    pub fn new(name: impl Into<String>, spec: AppSpec) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: "Application".to_string(),
            metadata: ObjectMeta::new(name),
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Parses and validates an Application document from YAML.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let app: Application = serde_yaml::from_str(content)?;
        if app.api_version != API_VERSION {
            return Err(StewardError::InvalidApiVersion {
                version: app.api_version,
                expected: API_VERSION.to_string(),
            });
        }
        if app.kind != "Application" {
            return Err(StewardError::UnknownKind(app.kind));
        }
        Ok(app)
    }
}

/// Application specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// Where the desired-state documents come from.
    pub source: SourceRef,

    /// Target cluster and namespace.
    pub destination: Destination,

    /// How the controller converges the two.
    #[serde(default)]
    pub sync_policy: SyncPolicy,
}

/// Reference to a versioned manifest source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    /// Path within the source (for a directory source, the manifest root).
    pub path: String,

    /// Revision selector; `latest` tracks the head of the source.
    #[serde(default = "default_revision")]
    pub revision: String,
}

fn default_revision() -> String {
    "latest".to_string()
}

/// Destination cluster and namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub server: String,
    pub namespace: String,
}

/// Per-application sync policy. Changes take effect on the next loop
/// iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    /// Apply plans without operator confirmation.
    #[serde(default)]
    pub auto_sync: bool,

    /// Delete live resources no longer declared in desired state.
    #[serde(default)]
    pub prune: bool,

    /// Re-apply desired state on live drift even without a new revision.
    #[serde(default)]
    pub self_heal: bool,
}

impl SyncPolicy {
    pub fn automatic() -> Self {
        Self {
            auto_sync: true,
            prune: false,
            self_heal: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_application() {
        let yaml = r#"
apiVersion: steward.io/v1
kind: Application
metadata:
  name: shop
  labels:
    team: storefront
spec:
  source:
    path: manifests/shop
    revision: latest
  destination:
    server: in-cluster
    namespace: web
  syncPolicy:
    autoSync: true
    prune: true
"#;
        let app = Application::from_yaml(yaml).unwrap();
        assert_eq!(app.name(), "shop");
        assert_eq!(app.spec.source.path, "manifests/shop");
        assert_eq!(app.spec.destination.namespace, "web");
        assert!(app.spec.sync_policy.auto_sync);
        assert!(app.spec.sync_policy.prune);
        assert!(!app.spec.sync_policy.self_heal);
    }

    #[test]
    fn test_policy_defaults_off() {
        let yaml = r#"
apiVersion: steward.io/v1
kind: Application
metadata:
  name: shop
spec:
  source:
    path: manifests/shop
  destination:
    server: in-cluster
    namespace: web
"#;
        let app = Application::from_yaml(yaml).unwrap();
        assert_eq!(app.spec.sync_policy, SyncPolicy::default());
        assert_eq!(app.spec.source.revision, "latest");
    }

    #[test]
    fn test_rejects_wrong_api_version() {
        let yaml = r#"
apiVersion: example.io/v2
kind: Application
metadata:
  name: shop
spec:
  source:
    path: x
  destination:
    server: in-cluster
    namespace: web
"#;
        let err = Application::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, StewardError::InvalidApiVersion { .. }));
    }

    #[test]
    fn test_rejects_wrong_kind() {
        let yaml = r#"
apiVersion: steward.io/v1
kind: Deployment
metadata:
  name: shop
spec:
  source:
    path: x
  destination:
    server: in-cluster
    namespace: web
"#;
        let err = Application::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, StewardError::UnknownKind(_)));
    }
}
