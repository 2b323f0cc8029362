//! Controller-wide error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reconciling an application.
#[derive(Error, Debug)]
pub enum StewardError {
    #[error("Source unavailable for '{source_ref}': {message}")]
    SourceUnavailable { source_ref: String, message: String },

    #[error("Authentication failed against '{0}'")]
    Auth(String),

    #[error("Failed to read manifest directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read manifest '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse document '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid resource in '{path}': {message}")]
    InvalidResource { path: PathBuf, message: String },

    #[error("Invalid API version '{version}', expected '{expected}'")]
    InvalidApiVersion { version: String, expected: String },

    #[error("Unknown application document kind: {0}")]
    UnknownKind(String),

    #[error("Dependency cycle in sync plan: {0}")]
    PlanCycle(String),

    #[error("Transient apply error on {resource}: {message}")]
    TransientApply { resource: String, message: String },

    #[error("Terminal apply error on {resource}: {message}")]
    TerminalApply { resource: String, message: String },

    #[error("Health check timed out after {timeout_secs}s for {resource}")]
    HealthTimeout { resource: String, timeout_secs: u64 },

    #[error("No application registered under '{0}'")]
    UnknownApplication(String),

    #[error("Sync already in progress for application '{0}'")]
    SyncInProgress(String),

    #[error("No plan awaiting confirmation for application '{0}'")]
    NothingToConfirm(String),

    #[error("Cluster API error: {0}")]
    Cluster(String),
}

impl StewardError {
    /// Returns true if the error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StewardError::SourceUnavailable { .. } | StewardError::TransientApply { .. }
        )
    }
}

impl From<serde_yaml::Error> for StewardError {
    fn from(err: serde_yaml::Error) -> Self {
        StewardError::Parse {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, StewardError>;
