//! Periodic reconciliation scheduler.
//!
//! Drives one application's reconciler on a fixed interval and supports
//! manual trigger via broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::reconciler::{ReconcileOutcome, Reconciler};

/// Periodic reconciliation scheduler for one application.
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    /// Creates a new scheduler.
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the reconciliation loop in a background thread.
    /// Accepts a trigger receiver for manual reconcile requests.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let mut interval_timer = tokio::time::interval(interval);
                interval_timer.tick().await; // skip immediate first tick

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    // A trigger parked during the previous cycle runs now
                    // instead of waiting out the interval.
                    if !reconciler.take_pending_trigger() {
                        tokio::select! {
                            _ = interval_timer.tick() => {},
                            Ok(()) = trigger_rx.recv() => {
                                log::info!("Manual reconcile triggered");
                            },
                        }
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    match reconciler.reconcile().await {
                        Ok(ReconcileOutcome::InSync) | Ok(ReconcileOutcome::Skipped) => {}
                        Ok(outcome) => log::info!("Reconcile finished: {:?}", outcome),
                        Err(e) => log::error!("Reconcile failed: {}", e),
                    }
                }
            });
        })
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{AppSpec, Application, Destination, SourceRef, SyncPolicy};
    use crate::cluster::{ClusterApi, InMemoryCluster};
    use crate::reconciler::ReconcilerConfig;
    use crate::resource::{DesiredResource, ObjectMeta, ResourceKind};
    use crate::source::{FixedSource, SourceTracker};

    fn test_reconciler() -> (Arc<FixedSource>, Arc<InMemoryCluster>, Arc<Reconciler>) {
        let app = Application::new(
            "shop",
            AppSpec {
                source: SourceRef {
                    path: "in-memory".to_string(),
                    revision: "latest".to_string(),
                },
                destination: Destination {
                    server: "in-cluster".to_string(),
                    namespace: "web".to_string(),
                },
                sync_policy: SyncPolicy::automatic(),
            },
        );
        let source = Arc::new(FixedSource::empty());
        let cluster = Arc::new(InMemoryCluster::new());
        let reconciler = Arc::new(Reconciler::new(
            app,
            Arc::clone(&source) as Arc<dyn SourceTracker>,
            Arc::clone(&cluster) as Arc<dyn ClusterApi>,
            ReconcilerConfig::default(),
        ));
        (source, cluster, reconciler)
    }

    fn config_map(name: &str) -> DesiredResource {
        DesiredResource::new(
            ResourceKind::ConfigMap,
            ObjectMeta::new(name).with_namespace("web"),
            serde_yaml::Value::Null,
        )
    }

    #[test]
    fn test_scheduler_shutdown() {
        let (_source, _cluster, reconciler) = test_reconciler();
        let scheduler = Scheduler::new(reconciler, Duration::from_millis(50));

        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        // Let it run briefly then stop
        std::thread::sleep(Duration::from_millis(100));
        scheduler.stop();

        // Send a trigger to wake up the select loop so it sees the shutdown
        let _ = trigger_tx.send(());

        // Should join within a reasonable time
        handle.join().expect("scheduler thread panicked");
    }

    #[test]
    fn test_manual_trigger_reconciles_before_interval() {
        let (source, cluster, reconciler) = test_reconciler();
        // Interval far beyond the test's lifetime; only the trigger can fire.
        let scheduler = Scheduler::new(Arc::clone(&reconciler), Duration::from_secs(3600));

        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(source.push_resources("r1", vec![config_map("cfg")]));

        trigger_tx.send(()).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let created = rt.block_on(cluster.contains(&config_map("cfg").id()));
            if created {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "trigger did not cause a reconcile in time"
            );
            std::thread::sleep(Duration::from_millis(10));
        }

        scheduler.stop();
        let _ = trigger_tx.send(());
        handle.join().expect("scheduler thread panicked");
    }
}
