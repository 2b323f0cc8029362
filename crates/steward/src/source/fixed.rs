//! In-memory manifest source, fed by push rather than polling.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::app::Application;
use crate::error::{Result, StewardError};
use crate::resource::DesiredResource;
use crate::source::{Revision, SourceTracker};

/// A source holding one revision at a time, replaced by push.
///
/// Used by tests and by integrations that receive resolved revisions from
/// an external notifier instead of walking a repository themselves.
#[derive(Default)]
pub struct FixedSource {
    revision: RwLock<Option<Revision>>,
}

impl FixedSource {
    pub fn new(revision: Revision) -> Self {
        Self {
            revision: RwLock::new(Some(revision)),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Replaces the current revision. The next resolve sees the new snapshot.
    pub async fn push(&self, revision: Revision) {
        *self.revision.write().await = Some(revision);
    }

    /// Convenience: push a revision built from resources with a given id.
    pub async fn push_resources(&self, id: &str, resources: Vec<DesiredResource>) {
        self.push(Revision::new(id, resources)).await;
    }

    /// Drops the current revision, simulating a source outage.
    pub async fn clear(&self) {
        *self.revision.write().await = None;
    }
}

#[async_trait]
impl SourceTracker for FixedSource {
    async fn resolve_latest(&self, app: &Application) -> Result<Revision> {
        self.revision
            .read()
            .await
            .clone()
            .ok_or_else(|| StewardError::SourceUnavailable {
                source_ref: app.spec.source.path.clone(),
                message: "no revision pushed yet".to_string(),
            })
    }
}
