//! Plan execution against the platform API.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::{ApiError, ClusterApi};
use crate::plan::{Operation, OperationKind, SyncPlan};
use crate::resource::{DesiredResource, ResourceId};
use crate::source::RevisionId;

/// Retry and timeout behavior for platform writes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Bounded retry count for transient errors.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Per platform API call timeout.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of one executed (or withheld) operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum OpOutcome {
    Succeeded,
    /// Terminal failure, or a transient failure that exhausted its retries.
    Failed { message: String, transient: bool },
    /// Never executed: a dependency failed.
    Skipped { blocked_by: ResourceId },
    /// Never executed: the sync operation was cancelled first.
    Cancelled,
}

/// Per-resource apply outcome, attributed to the revision that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub operation: Operation,
    pub outcome: OpOutcome,
    pub attempts: u32,
}

/// Aggregate state of one sync operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum SyncState {
    Succeeded,
    /// Partial failure with no blocked dependents.
    Degraded,
    /// A blocking operation failed terminally; its error is kept verbatim.
    Failed { resource: ResourceId, message: String },
    /// Superseded mid-flight; already-applied resources are left as-is.
    Cancelled,
}

/// The result of applying one plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub operation_id: Uuid,
    pub revision: RevisionId,
    pub state: SyncState,
    pub results: Vec<OperationResult>,
}

impl SyncResult {
    /// Identities whose create/update succeeded, for health polling.
    pub fn applied_ids(&self) -> Vec<ResourceId> {
        self.results
            .iter()
            .filter(|r| {
                r.outcome == OpOutcome::Succeeded && r.operation.kind != OperationKind::Delete
            })
            .map(|r| r.operation.resource.clone())
            .collect()
    }
}

/// Executes plans in dependency order. Independent operations within a
/// layer run concurrently; a failed operation blocks its dependents but not
/// unrelated work.
pub struct Applier {
    cluster: Arc<dyn ClusterApi>,
    retry: RetryPolicy,
}

impl Applier {
    pub fn new(cluster: Arc<dyn ClusterApi>, retry: RetryPolicy) -> Self {
        Self { cluster, retry }
    }

    /// Applies a plan for `app_name` at `revision`.
    ///
    /// `cancel` is checked between resource applies, never mid-call; setting
    /// it leaves already-applied resources in place.
    pub async fn apply_plan(
        &self,
        app_name: &str,
        plan: &SyncPlan,
        desired: &[DesiredResource],
        revision: &RevisionId,
        cancel: &AtomicBool,
    ) -> SyncResult {
        let operation_id = Uuid::new_v4();
        let desired_by_id: BTreeMap<ResourceId, &DesiredResource> =
            desired.iter().map(|d| (d.id(), d)).collect();

        // Outcome per identity, filled in layer by layer.
        let mut outcomes: HashMap<ResourceId, OpOutcome> = HashMap::new();
        let mut results: Vec<OperationResult> = Vec::with_capacity(plan.operations.len());
        let mut cancelled = false;

        for layer in &plan.layers {
            if cancel.load(Ordering::Acquire) {
                cancelled = true;
            }

            let mut runnable: Vec<&Operation> = Vec::new();
            for &idx in layer {
                let op = &plan.operations[idx];
                if cancelled {
                    outcomes.insert(op.resource.clone(), OpOutcome::Cancelled);
                    results.push(OperationResult {
                        operation: op.clone(),
                        outcome: OpOutcome::Cancelled,
                        attempts: 0,
                    });
                    continue;
                }
                match op
                    .depends_on
                    .iter()
                    .find(|dep| outcomes.get(*dep).is_some_and(|o| *o != OpOutcome::Succeeded))
                {
                    Some(failed_dep) => {
                        let outcome = OpOutcome::Skipped {
                            blocked_by: (*failed_dep).clone(),
                        };
                        log::warn!(
                            "Skipping {} for '{}': dependency {} did not succeed",
                            op.resource,
                            app_name,
                            failed_dep
                        );
                        outcomes.insert(op.resource.clone(), outcome.clone());
                        results.push(OperationResult {
                            operation: op.clone(),
                            outcome,
                            attempts: 0,
                        });
                    }
                    None => runnable.push(op),
                }
            }

            let layer_results = join_all(
                runnable
                    .iter()
                    .map(|op| self.apply_one(app_name, op, &desired_by_id)),
            )
            .await;

            for result in layer_results {
                outcomes.insert(result.operation.resource.clone(), result.outcome.clone());
                results.push(result);
            }
        }

        let state = aggregate_state(&results);
        log::info!(
            "Sync {} for '{}' at revision {}: {:?} ({} operations)",
            operation_id,
            app_name,
            revision.short(),
            state,
            results.len()
        );

        SyncResult {
            operation_id,
            revision: revision.clone(),
            state,
            results,
        }
    }

    /// Applies a single operation with bounded retries for transient errors.
    async fn apply_one(
        &self,
        app_name: &str,
        op: &Operation,
        desired_by_id: &BTreeMap<ResourceId, &DesiredResource>,
    ) -> OperationResult {
        let mut attempts = 0;

        loop {
            attempts += 1;
            if attempts > 1 {
                let delay = self.retry.base_delay * (1 << (attempts - 2).min(8));
                log::info!(
                    "Retrying {} {} (attempt {}/{}) after {:?}",
                    verb(op.kind),
                    op.resource,
                    attempts,
                    self.retry.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.execute(app_name, op, desired_by_id).await {
                Ok(()) => {
                    return OperationResult {
                        operation: op.clone(),
                        outcome: OpOutcome::Succeeded,
                        attempts,
                    };
                }
                Err(e) if e.is_transient() && attempts <= self.retry.max_retries => {
                    log::warn!(
                        "{} {} failed with transient error: {}",
                        verb(op.kind),
                        op.resource,
                        e
                    );
                }
                Err(e) => {
                    log::error!("{} {} failed: {}", verb(op.kind), op.resource, e);
                    return OperationResult {
                        operation: op.clone(),
                        outcome: OpOutcome::Failed {
                            message: e.to_string(),
                            transient: e.is_transient(),
                        },
                        attempts,
                    };
                }
            }
        }
    }

    async fn execute(
        &self,
        app_name: &str,
        op: &Operation,
        desired_by_id: &BTreeMap<ResourceId, &DesiredResource>,
    ) -> Result<(), ApiError> {
        let call = async {
            match op.kind {
                OperationKind::Create | OperationKind::Update => {
                    let desired = desired_by_id
                        .get(&op.resource)
                        .ok_or_else(|| ApiError::NotFound(op.resource.to_string()))?;
                    let stamped = desired.managed_by(app_name);
                    match op.kind {
                        OperationKind::Create => self.cluster.create(&stamped).await,
                        _ => self.cluster.update(&stamped).await,
                    }
                }
                OperationKind::Delete => match self.cluster.delete(&op.resource).await {
                    // Already gone is the desired end state.
                    Err(ApiError::NotFound(_)) => Ok(()),
                    other => other,
                },
            }
        };

        match tokio::time::timeout(self.retry.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout(self.retry.call_timeout)),
        }
    }
}

fn verb(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Create => "create",
        OperationKind::Update => "update",
        OperationKind::Delete => "delete",
    }
}

/// Aggregates per-operation outcomes into the sync operation's state.
fn aggregate_state(results: &[OperationResult]) -> SyncState {
    if results
        .iter()
        .any(|r| r.outcome == OpOutcome::Cancelled)
    {
        return SyncState::Cancelled;
    }

    // A failure that blocked dependents escalates to Failed; the blocking
    // error is reported verbatim.
    for r in results {
        if let OpOutcome::Skipped { blocked_by } = &r.outcome {
            if let Some(blocker) = results.iter().find(|b| &b.operation.resource == blocked_by) {
                if let OpOutcome::Failed { message, .. } = &blocker.outcome {
                    return SyncState::Failed {
                        resource: blocked_by.clone(),
                        message: message.clone(),
                    };
                }
            }
        }
    }

    if results
        .iter()
        .any(|r| matches!(r.outcome, OpOutcome::Failed { .. }))
    {
        return SyncState::Degraded;
    }

    SyncState::Succeeded
}
