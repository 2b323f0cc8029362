//! The reconciliation loop core: resolve, diff, plan, apply, health-check.
//!
//! One reconciler per application. A sync holds the reconciler's lock for
//! its whole cycle, so at most one sync operation is ever running for a
//! given application; triggers arriving mid-sync land in a single pending
//! slot consumed at the next idle transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::app::Application;
use crate::apply::{Applier, RetryPolicy, SyncResult, SyncState};
use crate::cluster::ClusterApi;
use crate::diff::{diff, Diff};
use crate::error::{Result, StewardError};
use crate::health::{HealthConfig, HealthEvaluator};
use crate::plan::{plan, SyncPlan};
use crate::resource::DesiredResource;
use crate::source::{Revision, RevisionId, SourceTracker};
use crate::status::{AppStatus, Condition, LoopState, SyncOutcome};

/// Tuning knobs for one application's loop.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    pub retry: RetryPolicy,
    pub health: HealthConfig,
}

/// Result of one reconciliation cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Another sync was already running; the trigger was parked.
    Skipped,
    /// Desired and live state already converged.
    InSync,
    /// Drift detected but self-heal is off; reported, not applied.
    DriftDetected,
    /// Manual policy: a plan is parked until confirmed.
    AwaitingConfirmation,
    /// A sync ran to completion with this outcome.
    Completed(SyncOutcome),
    /// The sync was superseded between resource applies.
    Cancelled,
}

/// A plan held back by manual policy, kept with everything needed to apply
/// it on confirmation.
struct PendingPlan {
    plan: SyncPlan,
    revision: RevisionId,
    desired: Vec<DesiredResource>,
}

/// Reconciles one application's live state toward its declared source.
pub struct Reconciler {
    app: std::sync::RwLock<Application>,
    source: Arc<dyn SourceTracker>,
    cluster: Arc<dyn ClusterApi>,
    applier: Applier,
    health: HealthEvaluator,
    status: RwLock<AppStatus>,
    /// Held for a full sync cycle; enforces the single-flight invariant.
    sync_lock: Mutex<()>,
    /// Single-slot pending trigger, set while a sync is in flight.
    pending_trigger: AtomicBool,
    /// Cancels the in-flight sync between resource applies.
    cancel: AtomicBool,
    pending_plan: Mutex<Option<PendingPlan>>,
    last_synced: RwLock<Option<RevisionId>>,
}

impl Reconciler {
    pub fn new(
        app: Application,
        source: Arc<dyn SourceTracker>,
        cluster: Arc<dyn ClusterApi>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            applier: Applier::new(Arc::clone(&cluster), config.retry),
            health: HealthEvaluator::new(Arc::clone(&cluster), config.health),
            app: std::sync::RwLock::new(app),
            source,
            cluster,
            status: RwLock::new(AppStatus::default()),
            sync_lock: Mutex::new(()),
            pending_trigger: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            pending_plan: Mutex::new(None),
            last_synced: RwLock::new(None),
        }
    }

    /// Current status snapshot.
    pub async fn status(&self) -> AppStatus {
        self.status.read().await.clone()
    }

    pub async fn last_synced_revision(&self) -> Option<RevisionId> {
        self.last_synced.read().await.clone()
    }

    /// Replaces the application declaration; takes effect on the next cycle.
    pub fn update_app(&self, app: Application) {
        match self.app.write() {
            Ok(mut guard) => *guard = app,
            Err(poisoned) => *poisoned.into_inner() = app,
        }
    }

    fn current_app(&self) -> Application {
        match self.app.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Parks a trigger. De-duplicated: a second trigger while one is
    /// pending is a no-op.
    pub fn trigger(&self) {
        self.pending_trigger.store(true, Ordering::Release);
    }

    /// Consumes the pending trigger slot, if set.
    pub fn take_pending_trigger(&self) -> bool {
        self.pending_trigger.swap(false, Ordering::AcqRel)
    }

    /// Supersedes the in-flight sync, if any: cancels it between resource
    /// applies. Already-applied resources stay in place; the caller is
    /// responsible for waking the loop to reconcile the superseding state.
    pub fn supersede(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Runs one reconciliation cycle.
    ///
    /// Returns `Skipped` without waiting if a sync is already in flight.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let _guard = match self.sync_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::info!("Reconcile skipped: sync already in progress; trigger parked");
                self.trigger();
                return Ok(ReconcileOutcome::Skipped);
            }
        };
        self.cancel.store(false, Ordering::Release);

        let app = self.current_app();
        self.set_state(LoopState::Syncing).await;

        let outcome = self.reconcile_inner(&app).await;

        {
            let mut status = self.status.write().await;
            status.state = LoopState::Idle;
            status.last_reconcile_time = Some(Utc::now());
        }

        if let Err(e) = &outcome {
            let mut status = self.status.write().await;
            status.set_condition(Condition::new(
                "ReconcileError",
                "Error",
                e.to_string(),
            ));
        }

        outcome
    }

    /// Applies a plan previously parked by manual policy.
    pub async fn confirm(&self) -> Result<ReconcileOutcome> {
        let app = self.current_app();
        let _guard = self
            .sync_lock
            .try_lock()
            .map_err(|_| StewardError::SyncInProgress(app.name().to_string()))?;
        self.cancel.store(false, Ordering::Release);

        let pending = self
            .pending_plan
            .lock()
            .await
            .take()
            .ok_or_else(|| StewardError::NothingToConfirm(app.name().to_string()))?;

        self.set_state(LoopState::Syncing).await;
        self.status
            .write()
            .await
            .clear_condition("AwaitingConfirmation");

        let outcome = self
            .apply_and_check(&app, &pending.plan, &pending.desired, &pending.revision)
            .await;

        let mut status = self.status.write().await;
        status.state = LoopState::Idle;
        status.last_reconcile_time = Some(Utc::now());
        Ok(outcome)
    }

    async fn reconcile_inner(&self, app: &Application) -> Result<ReconcileOutcome> {
        let revision = self.resolve(app).await?;
        let desired = revision.resources.clone();

        let live = self
            .cluster
            .list(Some(&app.spec.destination.namespace))
            .await
            .map_err(|e| StewardError::Cluster(e.to_string()))?;

        let computed = diff(app.name(), &desired, &live);
        self.record_diff(&computed).await;

        let new_revision = self.last_synced.read().await.as_ref() != Some(&revision.id);

        if computed.is_synced() {
            log::debug!(
                "'{}' in sync at revision {}",
                app.name(),
                revision.id.short()
            );
            self.mark_synced(&revision.id).await;
            self.status.write().await.clear_condition("DriftDetected");
            return Ok(ReconcileOutcome::InSync);
        }

        // Same revision diverging means live drift, not new desired state.
        if !new_revision && !app.spec.sync_policy.self_heal {
            log::info!(
                "Drift detected for '{}' at revision {}; self-heal off, reporting only",
                app.name(),
                revision.id.short()
            );
            self.status.write().await.set_condition(Condition::new(
                "DriftDetected",
                "SelfHealOff",
                format!("{} resource(s) diverged from revision {}",
                    computed.summary().out_of_sync + computed.summary().missing,
                    revision.id.short()),
            ));
            return Ok(ReconcileOutcome::DriftDetected);
        }

        let sync_plan = plan(&computed, &desired, &app.spec.sync_policy).map_err(|e| {
            log::error!("Planning failed for '{}': {}", app.name(), e);
            e
        })?;

        self.record_orphans(&sync_plan).await;

        if sync_plan.is_empty() {
            // Only untouchable orphans remain (prune off).
            self.mark_synced(&revision.id).await;
            return Ok(ReconcileOutcome::InSync);
        }

        if sync_plan.requires_confirmation {
            log::info!(
                "Plan for '{}' at revision {} awaits confirmation ({} operations)",
                app.name(),
                revision.id.short(),
                sync_plan.operations.len()
            );
            let operations = sync_plan.operations.len();
            *self.pending_plan.lock().await = Some(PendingPlan {
                plan: sync_plan,
                revision: revision.id.clone(),
                desired,
            });
            self.status.write().await.set_condition(Condition::new(
                "AwaitingConfirmation",
                "ManualSync",
                format!(
                    "{} operation(s) planned at revision {}",
                    operations,
                    revision.id.short()
                ),
            ));
            return Ok(ReconcileOutcome::AwaitingConfirmation);
        }

        Ok(self
            .apply_and_check(app, &sync_plan, &desired, &revision.id)
            .await)
    }

    async fn resolve(&self, app: &Application) -> Result<Revision> {
        let revision = match self.source.resolve_latest(app).await {
            Ok(revision) => revision,
            Err(e) => {
                self.status.write().await.set_condition(Condition::new(
                    "SourceError",
                    "ResolveFailed",
                    e.to_string(),
                ));
                return Err(e);
            }
        };

        let mut status = self.status.write().await;
        status.clear_condition("SourceError");
        if revision.parse_failures.is_empty() {
            status.clear_condition("ParseError");
        } else {
            // Per-document failures are reported, not fatal to the revision.
            let detail: Vec<String> = revision
                .parse_failures
                .iter()
                .map(|f| format!("{}: {}", f.path.display(), f.message))
                .collect();
            status.set_condition(Condition::new(
                "ParseError",
                "InvalidDocuments",
                detail.join("; "),
            ));
        }
        Ok(revision)
    }

    async fn apply_and_check(
        &self,
        app: &Application,
        sync_plan: &SyncPlan,
        desired: &[DesiredResource],
        revision: &RevisionId,
    ) -> ReconcileOutcome {
        let result = self
            .applier
            .apply_plan(app.name(), sync_plan, desired, revision, &self.cancel)
            .await;

        match &result.state {
            SyncState::Cancelled => {
                self.status.write().await.set_condition(Condition::new(
                    "Superseded",
                    "NewTrigger",
                    format!("sync {} cancelled before completion", result.operation_id),
                ));
                ReconcileOutcome::Cancelled
            }
            SyncState::Failed { resource, message } => {
                let mut status = self.status.write().await;
                status.last_outcome = Some(SyncOutcome::Failed);
                status.set_condition(Condition::new(
                    "SyncFailed",
                    "TerminalApplyError",
                    format!("{}: {}", resource, message),
                ));
                ReconcileOutcome::Completed(SyncOutcome::Failed)
            }
            SyncState::Degraded => {
                let mut status = self.status.write().await;
                status.last_outcome = Some(SyncOutcome::Degraded);
                status.set_condition(Condition::new(
                    "SyncDegraded",
                    "PartialApplyFailure",
                    summarize_failures(&result),
                ));
                ReconcileOutcome::Completed(SyncOutcome::Degraded)
            }
            SyncState::Succeeded => self.check_health(app, &result, revision).await,
        }
    }

    async fn check_health(
        &self,
        app: &Application,
        result: &SyncResult,
        revision: &RevisionId,
    ) -> ReconcileOutcome {
        let applied = result.applied_ids();
        let report = self.health.await_healthy(&applied).await;

        self.mark_synced(revision).await;
        let mut status = self.status.write().await;
        status.health = Some(report.aggregate());
        status.clear_condition("SyncFailed");
        status.clear_condition("SyncDegraded");
        status.clear_condition("DriftDetected");
        status.clear_condition("Superseded");

        if report.timed_out.is_empty() {
            status.last_outcome = Some(SyncOutcome::Healthy);
            status.clear_condition("HealthTimeout");
            log::info!(
                "'{}' healthy at revision {}",
                app.name(),
                revision.short()
            );
            ReconcileOutcome::Completed(SyncOutcome::Healthy)
        } else {
            status.last_outcome = Some(SyncOutcome::Degraded);
            let names: Vec<String> =
                report.timed_out.iter().map(|id| id.to_string()).collect();
            status.set_condition(Condition::new(
                "HealthTimeout",
                "NotReadyInTime",
                names.join(", "),
            ));
            ReconcileOutcome::Completed(SyncOutcome::Degraded)
        }
    }

    async fn set_state(&self, state: LoopState) {
        self.status.write().await.state = state;
    }

    async fn mark_synced(&self, revision: &RevisionId) {
        *self.last_synced.write().await = Some(revision.clone());
        let mut status = self.status.write().await;
        status.last_synced_revision = Some(revision.to_string());
    }

    async fn record_diff(&self, computed: &Diff) {
        self.status.write().await.diff = Some(computed.summary());
    }

    async fn record_orphans(&self, sync_plan: &SyncPlan) {
        let mut status = self.status.write().await;
        if sync_plan.reported_orphans.is_empty() {
            status.clear_condition("OrphanedResources");
        } else {
            let names: Vec<String> = sync_plan
                .reported_orphans
                .iter()
                .map(|id| id.to_string())
                .collect();
            status.set_condition(Condition::new(
                "OrphanedResources",
                "PruneOff",
                names.join(", "),
            ));
        }
    }
}

fn summarize_failures(result: &SyncResult) -> String {
    result
        .results
        .iter()
        .filter_map(|r| match &r.outcome {
            crate::apply::OpOutcome::Failed { message, .. } => {
                Some(format!("{}: {}", r.operation.resource, message))
            }
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("; ")
}
