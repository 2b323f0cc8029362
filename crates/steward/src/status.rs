//! Application status: what a dashboard or CLI reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::DiffSummary;
use crate::health::HealthStatus;

/// Current position of the reconciliation loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    #[default]
    Idle,
    Syncing,
}

/// Terminal outcome of the most recent sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Healthy,
    Degraded,
    Failed,
}

/// One observation about the application, in the usual condition shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub condition_type: String,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        condition_type: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Snapshot of an application's reconciliation state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    /// Whether the loop is idle or mid-sync.
    pub state: LoopState,

    /// Outcome of the last completed sync, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<SyncOutcome>,

    /// Revision of the last applied sync.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_revision: Option<String>,

    /// Summary of the most recent diff computation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffSummary>,

    /// Aggregate health across the application's resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,

    /// Latest observations: parse failures, blocked resources, orphans,
    /// plans awaiting confirmation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// When the loop last completed a cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<DateTime<Utc>>,
}

impl AppStatus {
    /// Replaces conditions of the given type with a single new one.
    pub fn set_condition(&mut self, condition: Condition) {
        self.conditions
            .retain(|c| c.condition_type != condition.condition_type);
        self.conditions.push(condition);
    }

    pub fn clear_condition(&mut self, condition_type: &str) {
        self.conditions.retain(|c| c.condition_type != condition_type);
    }

    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}
