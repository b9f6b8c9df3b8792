//! Periodic spend reconciliation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::controller::AdmissionController;

/// Reconcile every `interval` until `shutdown` flips, then flush once more.
pub async fn run_reconciliation(
    controller: Arc<AdmissionController>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "budget reconciliation started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = controller.reconcile().await {
                    error!(error = %e, "budget reconciliation failed");
                }
            }
            _ = shutdown.changed() => {
                info!("budget reconciliation shutting down");
                if let Err(e) = controller.reconcile().await {
                    warn!(error = %e, "final budget reconciliation failed");
                }
                break;
            }
        }
    }
}

pub struct ReconcileTask {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl ReconcileTask {
    pub fn spawn(controller: Arc<AdmissionController>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_reconciliation(controller, interval, shutdown_rx));
        Self { handle, shutdown_tx }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "budget reconciliation task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infergrid_core::config::BudgetConfig;
    use infergrid_state::{CostRecord, StateStore};

    #[tokio::test]
    async fn stop_flushes_pending_spend() {
        let store = StateStore::open_in_memory().unwrap();
        let controller = Arc::new(AdmissionController::new(store.clone(), &BudgetConfig::default()));
        let task = ReconcileTask::spawn(controller.clone(), Duration::from_secs(3600));
        assert!(task.is_running());

        controller
            .record_cost(CostRecord {
                id: "c1".into(),
                request_id: "req-1".into(),
                feature: "text_generation".into(),
                provider_id: "openai".into(),
                tenant_id: None,
                amount: 2.5,
                timestamp: 1,
            })
            .await
            .unwrap();
        task.stop().await;

        let total = store.sum_cost_statistics("global", "1970-01-01").unwrap();
        assert_eq!(total, 2.5);
    }
}
