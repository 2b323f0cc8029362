//! Source tracking: resolving desired-state documents at a revision.

pub mod dir;
pub mod fixed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::Application;
use crate::error::Result;
use crate::resource::{DesiredResource, ParseFailure};

pub use dir::DirectorySource;
pub use fixed::FixedSource;

/// An immutable snapshot identifier of the source at a point in history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionId(pub String);

impl RevisionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines and status output.
    ///
    /// Push-fed ids are arbitrary strings, so the cut lands on a char
    /// boundary rather than a byte offset.
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(12)
            .map_or(self.0.as_str(), |(i, _)| &self.0[..i])
    }
}

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A resolved revision: the snapshot id plus the parsed desired-state set.
///
/// Immutable once resolved. Per-document parse failures are carried along
/// rather than failing the whole revision.
#[derive(Debug, Clone)]
pub struct Revision {
    pub id: RevisionId,
    pub resources: Vec<DesiredResource>,
    pub parse_failures: Vec<ParseFailure>,
}

impl Revision {
    pub fn new(id: impl Into<String>, resources: Vec<DesiredResource>) -> Self {
        Self {
            id: RevisionId(id.into()),
            resources,
            parse_failures: Vec::new(),
        }
    }
}

/// Read access to a versioned document store.
#[async_trait]
pub trait SourceTracker: Send + Sync {
    /// Resolves the latest revision for an application.
    ///
    /// Must be idempotent: resolving the same underlying snapshot twice
    /// yields byte-identical desired-state sets.
    async fn resolve_latest(&self, app: &Application) -> Result<Revision>;
}
