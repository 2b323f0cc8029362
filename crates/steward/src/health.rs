//! Resource health evaluation and readiness polling.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tokio::time::Instant;

use crate::cluster::ClusterApi;
use crate::resource::{LiveResource, ResourceId};

/// Health of a single live resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Progressing,
    Degraded,
    Unknown,
}

impl HealthStatus {
    /// Combines two statuses, keeping the worse of the pair.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        use HealthStatus::*;
        match (self, other) {
            (Degraded, _) | (_, Degraded) => Degraded,
            (Unknown, _) | (_, Unknown) => Unknown,
            (Progressing, _) | (_, Progressing) => Progressing,
            _ => Healthy,
        }
    }
}

/// Polling configuration for readiness checks.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub poll_interval: Duration,
    /// Total time to wait for Healthy before surfacing Degraded.
    pub timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Per-resource health after an `await_healthy` round.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub statuses: BTreeMap<ResourceId, HealthStatus>,
    /// Resources that never reached Healthy before the timeout.
    pub timed_out: Vec<ResourceId>,
}

impl HealthReport {
    pub fn aggregate(&self) -> HealthStatus {
        self.statuses
            .values()
            .copied()
            .fold(HealthStatus::Healthy, HealthStatus::worst)
    }
}

/// Polls applied resources for readiness signals.
pub struct HealthEvaluator {
    cluster: Arc<dyn ClusterApi>,
    config: HealthConfig,
}

impl HealthEvaluator {
    pub fn new(cluster: Arc<dyn ClusterApi>, config: HealthConfig) -> Self {
        Self { cluster, config }
    }

    /// Evaluates health from a platform status field bag.
    ///
    /// Convention, checked in order: explicit `phase`, readiness conditions,
    /// replica counts. Resources that report no status contract at all are
    /// healthy by existing.
    pub fn evaluate(live: &LiveResource) -> HealthStatus {
        let status = &live.status;

        if let Some(phase) = status.get("phase").and_then(Value::as_str) {
            return match phase {
                "Running" | "Ready" | "Active" | "Succeeded" | "Bound" => HealthStatus::Healthy,
                "Pending" | "ContainerCreating" | "Terminating" => HealthStatus::Progressing,
                "Failed" | "CrashLoopBackOff" | "Error" => HealthStatus::Degraded,
                _ => HealthStatus::Unknown,
            };
        }

        if let Some(Value::Sequence(conditions)) = status.get("conditions") {
            for condition in conditions {
                let is_ready = condition
                    .get("type")
                    .and_then(Value::as_str)
                    .map(|t| t == "Ready" || t == "Available")
                    .unwrap_or(false);
                if is_ready {
                    return match condition.get("status").and_then(Value::as_str) {
                        Some("True") => HealthStatus::Healthy,
                        Some("False") => HealthStatus::Progressing,
                        _ => HealthStatus::Unknown,
                    };
                }
            }
            return HealthStatus::Unknown;
        }

        if let Some(desired_replicas) = status.get("replicas").and_then(Value::as_u64) {
            let ready = status
                .get("readyReplicas")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            return if ready >= desired_replicas {
                HealthStatus::Healthy
            } else {
                HealthStatus::Progressing
            };
        }

        if status.is_null() || status.as_mapping().is_some_and(|m| m.is_empty()) {
            // No status contract: existence is health (ConfigMap, Namespace).
            return HealthStatus::Healthy;
        }

        HealthStatus::Unknown
    }

    /// Polls the given resources until all are Healthy or the timeout
    /// elapses. Timed-out resources are reported Degraded and never retried.
    pub async fn await_healthy(&self, ids: &[ResourceId]) -> HealthReport {
        let deadline = Instant::now() + self.config.timeout;
        let mut statuses: BTreeMap<ResourceId, HealthStatus> = BTreeMap::new();

        loop {
            let mut all_healthy = true;
            for id in ids {
                let status = match self.cluster.get(id).await {
                    Ok(Some(live)) => Self::evaluate(&live),
                    Ok(None) => HealthStatus::Unknown,
                    Err(e) => {
                        log::warn!("Health poll for {} failed: {}", id, e);
                        HealthStatus::Unknown
                    }
                };
                if status != HealthStatus::Healthy {
                    all_healthy = false;
                }
                statuses.insert(id.clone(), status);
            }

            if all_healthy {
                return HealthReport {
                    statuses,
                    timed_out: Vec::new(),
                };
            }

            if Instant::now() >= deadline {
                let timed_out: Vec<ResourceId> = statuses
                    .iter()
                    .filter(|(_, s)| **s != HealthStatus::Healthy)
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in &timed_out {
                    log::warn!(
                        "Health check timed out after {:?} for {}",
                        self.config.timeout,
                        id
                    );
                    statuses.insert(id.clone(), HealthStatus::Degraded);
                }
                return HealthReport { statuses, timed_out };
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
