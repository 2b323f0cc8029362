//! Target platform resource API.
//!
//! The platform is an external, independently-owned system; the controller
//! reaches it only through this seam. The client is safe for concurrent use
//! across applications.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_yaml::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::resource::{DesiredResource, LiveResource, ResourceId};

/// Errors returned by the platform resource API.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("platform unavailable: {0}")]
    Unavailable(String),

    #[error("schema rejected: {0}")]
    SchemaRejected(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource already exists: {0}")]
    AlreadyExists(String),
}

impl ApiError {
    /// Timeouts, conflicts and unavailability are worth retrying; schema and
    /// permission failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout(_) | ApiError::Conflict(_) | ApiError::Unavailable(_)
        )
    }
}

/// Resource API of the destination platform: get/list/create/update/delete
/// by identity, plus a status read for health polling.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get(&self, id: &ResourceId) -> Result<Option<LiveResource>, ApiError>;

    /// Lists live resources, optionally restricted to one namespace.
    /// Cluster-scoped resources are always included.
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<LiveResource>, ApiError>;

    async fn create(&self, desired: &DesiredResource) -> Result<(), ApiError>;

    async fn update(&self, desired: &DesiredResource) -> Result<(), ApiError>;

    async fn delete(&self, id: &ResourceId) -> Result<(), ApiError>;
}

/// Which API verb a fault rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    Delete,
}

/// A queued fault: the next `remaining` calls of `verb` touching `name`
/// fail with `error`.
#[derive(Debug, Clone)]
struct FaultRule {
    verb: Verb,
    name: String,
    error: ApiError,
    remaining: u32,
}

/// In-memory platform used by tests and the harness.
///
/// Behaves like a real resource API: it injects server-side defaults into
/// created resources (so the differ must ignore undeclared fields), keeps
/// status as a separate platform-owned field bag, and can be told to fail
/// specific calls.
#[derive(Default)]
pub struct InMemoryCluster {
    state: RwLock<BTreeMap<ResourceId, LiveResource>>,
    faults: Mutex<Vec<FaultRule>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a fault for the next `times` calls of `verb` on resources
    /// whose name matches.
    pub async fn fail_next(&self, verb: Verb, name: &str, error: ApiError, times: u32) {
        self.faults.lock().await.push(FaultRule {
            verb,
            name: name.to_string(),
            error,
            remaining: times,
        });
    }

    async fn take_fault(&self, verb: Verb, name: &str) -> Option<ApiError> {
        let mut faults = self.faults.lock().await;
        for rule in faults.iter_mut() {
            if rule.verb == verb && rule.name == name && rule.remaining > 0 {
                rule.remaining -= 1;
                let error = rule.error.clone();
                faults.retain(|r| r.remaining > 0);
                return Some(error);
            }
        }
        None
    }

    /// Sets the platform-owned status of a live resource.
    pub async fn set_status(&self, id: &ResourceId, status: Value) {
        if let Some(live) = self.state.write().await.get_mut(id) {
            live.status = status;
        }
    }

    /// Mutates a live resource's spec out from under the controller,
    /// simulating drift caused by another actor.
    pub async fn drift(&self, id: &ResourceId, spec: Value) {
        if let Some(live) = self.state.write().await.get_mut(id) {
            live.spec = spec;
        }
    }

    /// Inserts a live resource directly, bypassing the apply path.
    pub async fn seed(&self, live: LiveResource) {
        self.state.write().await.insert(live.id(), live);
    }

    pub async fn contains(&self, id: &ResourceId) -> bool {
        self.state.read().await.contains_key(id)
    }

    pub async fn resource_count(&self) -> usize {
        self.state.read().await.len()
    }

    fn with_injected_defaults(desired: &DesiredResource) -> LiveResource {
        let mut live = LiveResource::from_desired(desired);
        // Platforms assign identifiers the declaration never mentions.
        live.metadata.labels.insert(
            "platform.io/uid".to_string(),
            uuid::Uuid::new_v4().to_string(),
        );
        live
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn get(&self, id: &ResourceId) -> Result<Option<LiveResource>, ApiError> {
        if let Some(error) = self.take_fault(Verb::Get, &id.name).await {
            return Err(error);
        }
        Ok(self.state.read().await.get(id).cloned())
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<LiveResource>, ApiError> {
        if let Some(error) = self.take_fault(Verb::List, "*").await {
            return Err(error);
        }
        let state = self.state.read().await;
        Ok(state
            .values()
            .filter(|live| match namespace {
                Some(ns) => {
                    live.metadata.namespace.as_deref() == Some(ns)
                        || live.kind.is_cluster_scoped()
                }
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn create(&self, desired: &DesiredResource) -> Result<(), ApiError> {
        let id = desired.id();
        if let Some(error) = self.take_fault(Verb::Create, &id.name).await {
            return Err(error);
        }
        let mut state = self.state.write().await;
        if state.contains_key(&id) {
            return Err(ApiError::AlreadyExists(id.to_string()));
        }
        state.insert(id, Self::with_injected_defaults(desired));
        Ok(())
    }

    async fn update(&self, desired: &DesiredResource) -> Result<(), ApiError> {
        let id = desired.id();
        if let Some(error) = self.take_fault(Verb::Update, &id.name).await {
            return Err(error);
        }
        let mut state = self.state.write().await;
        match state.get_mut(&id) {
            Some(live) => {
                live.spec = desired.spec.clone();
                live.metadata.labels.extend(
                    desired
                        .metadata
                        .labels
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
                live.metadata.annotations = desired.metadata.annotations.clone();
                Ok(())
            }
            None => Err(ApiError::NotFound(id.to_string())),
        }
    }

    async fn delete(&self, id: &ResourceId) -> Result<(), ApiError> {
        if let Some(error) = self.take_fault(Verb::Delete, &id.name).await {
            return Err(error);
        }
        let mut state = self.state.write().await;
        match state.remove(id) {
            Some(_) => Ok(()),
            None => Err(ApiError::NotFound(id.to_string())),
        }
    }
}
