//! The periodic scale loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::scaler::{AutoScaler, ScaleAction};

/// Check every configured feature every `interval` until `shutdown` flips.
pub async fn run_scale_loop(scaler: Arc<AutoScaler>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(interval_secs = interval.as_secs(), "autoscaler started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let decisions = scaler.evaluate_all().await;
                let acted = decisions.iter().filter(|d| d.action != ScaleAction::None).count();
                if acted > 0 {
                    info!(checked = decisions.len(), acted, "scale pass complete");
                }
            }
            _ = shutdown.changed() => {
                info!("autoscaler shutting down");
                break;
            }
        }
    }
}

pub struct ScaleTask {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl ScaleTask {
    pub fn spawn(scaler: Arc<AutoScaler>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_scale_loop(scaler, interval, shutdown_rx));
        Self { handle, shutdown_tx }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "autoscaler task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterClient, InMemoryClusterClient};
    use infergrid_core::config::{AutoscaleConfig, RegistryConfig, ScaleConfig};
    use infergrid_registry::{HeartbeatRequest, RegisterRequest, ServiceRegistry};
    use infergrid_state::StateStore;

    #[tokio::test]
    async fn loop_applies_decisions_until_stopped() {
        let registry = Arc::new(ServiceRegistry::new(
            StateStore::open_in_memory().unwrap(),
            &RegistryConfig::default(),
        ));
        let reg = registry
            .register(RegisterRequest {
                service_type: "chat".into(),
                hostname: "gpu-0".into(),
                ip_address: "10.1.0.1".into(),
                port: 9000,
                ..Default::default()
            })
            .await
            .unwrap();
        registry
            .heartbeat(HeartbeatRequest {
                service_id: reg.service_id,
                token: reg.token,
                cpu_utilization: 95.0,
                ..Default::default()
            })
            .await
            .unwrap();

        let cluster = Arc::new(InMemoryClusterClient::new());
        cluster.set_replicas("chat-inference", "ai-platform", 1).await.unwrap();
        let config = AutoscaleConfig {
            features: vec![ScaleConfig::new("chat", 0, 4, 10, 600)],
            ..Default::default()
        };
        let scaler = Arc::new(AutoScaler::new(registry, cluster.clone(), &config));

        let task = ScaleTask::spawn(scaler, Duration::from_millis(20));
        assert!(task.is_running());
        tokio::time::sleep(Duration::from_millis(150)).await;
        task.stop().await;

        // Cooldown limits the loop to a single step.
        assert_eq!(cluster.get_replicas("chat-inference", "ai-platform").await.unwrap(), 2);
    }
}
