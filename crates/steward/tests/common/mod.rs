//! Test harness for isolated reconciliation runs.
//!
//! Provides a temporary manifest tree, an in-memory platform, and a
//! reconciler wired with short timeouts so failure paths resolve quickly.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use steward::app::{AppSpec, Application, Destination, SourceRef, SyncPolicy};
use steward::apply::RetryPolicy;
use steward::cluster::{ClusterApi, InMemoryCluster};
use steward::health::HealthConfig;
use steward::reconciler::{Reconciler, ReconcilerConfig};
use steward::resource::{DesiredResource, LiveResource, ObjectMeta, ResourceKind};
use steward::source::{DirectorySource, FixedSource, SourceTracker};

/// Isolated environment for one reconciliation scenario.
pub struct Harness {
    temp_dir: TempDir,
    pub cluster: Arc<InMemoryCluster>,
    pub source: Arc<FixedSource>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
            cluster: Arc::new(InMemoryCluster::new()),
            source: Arc::new(FixedSource::empty()),
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// An application targeting namespace `web`, named `shop`.
    pub fn app(&self, policy: SyncPolicy) -> Application {
        Application::new(
            "shop",
            AppSpec {
                source: SourceRef {
                    path: "app".to_string(),
                    revision: "latest".to_string(),
                },
                destination: Destination {
                    server: "in-cluster".to_string(),
                    namespace: "web".to_string(),
                },
                sync_policy: policy,
            },
        )
    }

    /// Short retry and health windows so error paths finish in milliseconds.
    pub fn fast_config() -> ReconcilerConfig {
        ReconcilerConfig {
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(5),
                call_timeout: Duration::from_secs(5),
            },
            health: HealthConfig {
                poll_interval: Duration::from_millis(5),
                timeout: Duration::from_millis(100),
            },
        }
    }

    /// A reconciler backed by the harness's push source.
    pub fn reconciler(&self, policy: SyncPolicy) -> Reconciler {
        Reconciler::new(
            self.app(policy),
            Arc::clone(&self.source) as Arc<dyn SourceTracker>,
            Arc::clone(&self.cluster) as Arc<dyn ClusterApi>,
            Self::fast_config(),
        )
    }

    /// A reconciler backed by a directory source rooted at the temp dir.
    pub fn directory_reconciler(&self, policy: SyncPolicy) -> Reconciler {
        Reconciler::new(
            self.app(policy),
            Arc::new(DirectorySource::new(self.temp_path())) as Arc<dyn SourceTracker>,
            Arc::clone(&self.cluster) as Arc<dyn ClusterApi>,
            Self::fast_config(),
        )
    }

    /// Writes a manifest under `app/` in the temp tree.
    pub fn write_manifest(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_path().join("app").join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create manifest dir");
        }
        std::fs::write(&path, content).expect("Failed to write manifest");
        path
    }

    pub fn remove_manifest(&self, name: &str) {
        let path = self.temp_path().join("app").join(name);
        std::fs::remove_file(path).expect("Failed to remove manifest");
    }

    /// Seeds a live resource as if a previous sync of `app_name` created it.
    pub async fn seed_managed(&self, app_name: &str, desired: &DesiredResource) {
        self.cluster
            .seed(LiveResource::from_desired(&desired.managed_by(app_name)))
            .await;
    }
}

pub fn config_map(name: &str, data: &str) -> DesiredResource {
    DesiredResource::new(
        ResourceKind::ConfigMap,
        ObjectMeta::new(name).with_namespace("web"),
        serde_yaml::from_str(&format!("data:\n  key: {}", data)).unwrap(),
    )
}

pub fn deployment(name: &str, spec: &str) -> DesiredResource {
    DesiredResource::new(
        ResourceKind::Deployment,
        ObjectMeta::new(name).with_namespace("web"),
        serde_yaml::from_str(spec).unwrap(),
    )
}

/// A deployment consuming a config map by reference.
pub fn deployment_consuming(name: &str, cfg: &str) -> DesiredResource {
    deployment(
        name,
        &format!(
            "template:\n  envFrom:\n    - configMapRef:\n        name: {}",
            cfg
        ),
    )
}
