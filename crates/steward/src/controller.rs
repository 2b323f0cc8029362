//! Multi-application controller: registry, scheduling and trigger fan-out.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::app::Application;
use crate::cluster::ClusterApi;
use crate::error::{Result, StewardError};
use crate::reconciler::{ReconcileOutcome, Reconciler, ReconcilerConfig};
use crate::scheduler::Scheduler;
use crate::source::SourceTracker;
use crate::status::AppStatus;

/// Everything the controller keeps per registered application.
struct AppHandle {
    reconciler: Arc<Reconciler>,
    scheduler: Scheduler,
    trigger_tx: broadcast::Sender<()>,
    thread: JoinHandle<()>,
}

/// Controller settings shared by all applications it manages.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Polling interval for each application's loop.
    pub reconcile_interval: Duration,
    pub reconciler: ReconcilerConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(180),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

/// Owns one reconciliation loop per registered application, all converging
/// against the same cluster API.
pub struct Controller {
    cluster: Arc<dyn ClusterApi>,
    config: ControllerConfig,
    apps: Mutex<BTreeMap<String, AppHandle>>,
}

impl Controller {
    pub fn new(cluster: Arc<dyn ClusterApi>, config: ControllerConfig) -> Self {
        Self {
            cluster,
            config,
            apps: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers an application and starts its loop. Re-registering an
    /// existing name replaces the declaration in place without restarting
    /// the loop.
    pub fn register(&self, app: Application, source: Arc<dyn SourceTracker>) {
        let name = app.name().to_string();
        let mut apps = self.lock_apps();

        if let Some(handle) = apps.get(&name) {
            log::info!("Updating declaration for application '{}'", name);
            handle.reconciler.update_app(app);
            return;
        }

        log::info!("Registering application '{}'", name);
        let reconciler = Arc::new(Reconciler::new(
            app,
            source,
            Arc::clone(&self.cluster),
            self.config.reconciler.clone(),
        ));
        let scheduler = Scheduler::new(Arc::clone(&reconciler), self.config.reconcile_interval);
        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let thread = scheduler.start(trigger_rx);

        apps.insert(
            name,
            AppHandle {
                reconciler,
                scheduler,
                trigger_tx,
                thread,
            },
        );
    }

    /// Requests an immediate reconcile for one application.
    ///
    /// One trigger is one cycle: the message rides the broadcast channel
    /// alone, where it either wakes the idle loop or stays buffered until
    /// the in-flight cycle ends.
    pub fn trigger(&self, name: &str) -> Result<()> {
        let apps = self.lock_apps();
        let handle = apps
            .get(name)
            .ok_or_else(|| StewardError::UnknownApplication(name.to_string()))?;
        // A closed channel only means the loop is shutting down.
        let _ = handle.trigger_tx.send(());
        Ok(())
    }

    /// Cancels the in-flight sync (if any) and queues a fresh reconcile.
    pub fn supersede(&self, name: &str) -> Result<()> {
        let apps = self.lock_apps();
        let handle = apps
            .get(name)
            .ok_or_else(|| StewardError::UnknownApplication(name.to_string()))?;
        handle.reconciler.supersede();
        let _ = handle.trigger_tx.send(());
        Ok(())
    }

    /// Confirms a plan parked by manual sync policy.
    pub async fn confirm(&self, name: &str) -> Result<ReconcileOutcome> {
        let reconciler = self.reconciler(name)?;
        reconciler.confirm().await
    }

    /// Status snapshot for one application.
    pub async fn status(&self, name: &str) -> Result<AppStatus> {
        let reconciler = self.reconciler(name)?;
        Ok(reconciler.status().await)
    }

    /// Names of all registered applications.
    pub fn application_names(&self) -> Vec<String> {
        self.lock_apps().keys().cloned().collect()
    }

    /// Stops every loop and joins their threads.
    pub fn shutdown(&self) {
        let mut apps = self.lock_apps();
        for handle in apps.values() {
            handle.scheduler.stop();
            let _ = handle.trigger_tx.send(());
        }
        for (name, handle) in std::mem::take(&mut *apps) {
            if handle.thread.join().is_err() {
                log::error!("Reconcile loop for '{}' panicked during shutdown", name);
            }
        }
    }

    fn reconciler(&self, name: &str) -> Result<Arc<Reconciler>> {
        self.lock_apps()
            .get(name)
            .map(|h| Arc::clone(&h.reconciler))
            .ok_or_else(|| StewardError::UnknownApplication(name.to_string()))
    }

    fn lock_apps(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, AppHandle>> {
        match self.apps.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
