//! Heartbeat timeout sweep — background task that flags stale instances.
//!
//! The sweep can run under a shared daemon shutdown channel via
//! [`run_timeout_sweep`], or be started and stopped on its own through
//! [`SweepTask`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::ServiceRegistry;

/// Sweep every `interval` until `shutdown` flips to `true`.
///
/// A sweep never aborts the loop; stale instances are simply counted again
/// on the next tick.
pub async fn run_timeout_sweep(
    registry: Arc<ServiceRegistry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "heartbeat sweep started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let marked = registry.check_heartbeat_timeouts().await;
                if !marked.is_empty() {
                    warn!(count = marked.len(), services = ?marked, "instances timed out");
                }
            }
            _ = shutdown.changed() => {
                debug!("heartbeat sweep shutting down");
                break;
            }
        }
    }
}

/// An independently owned sweep task.
pub struct SweepTask {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl SweepTask {
    pub fn spawn(registry: Arc<ServiceRegistry>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_timeout_sweep(registry, interval, shutdown_rx));
        Self {
            handle,
            shutdown_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "heartbeat sweep task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RegisterRequest;
    use infergrid_core::config::RegistryConfig;
    use infergrid_state::{HealthState, StateStore};

    fn registry_with_timeout(timeout_secs: u64) -> Arc<ServiceRegistry> {
        let config = RegistryConfig {
            heartbeat_timeout_secs: timeout_secs,
            miss_threshold: 1,
            ..Default::default()
        };
        Arc::new(ServiceRegistry::new(StateStore::open_in_memory().unwrap(), &config))
    }

    #[tokio::test]
    async fn task_starts_and_stops() {
        let registry = registry_with_timeout(90);
        let task = SweepTask::spawn(registry, Duration::from_millis(10));
        assert!(task.is_running());

        tokio::time::timeout(Duration::from_secs(1), task.stop())
            .await
            .expect("sweep should stop promptly");
    }

    #[tokio::test]
    async fn loop_marks_stale_instances() {
        // A zero timeout makes any instance stale once a second has passed.
        let registry = registry_with_timeout(0);
        let reg = registry
            .register(RegisterRequest {
                service_type: "text_to_image".into(),
                hostname: "h".into(),
                ip_address: "10.0.0.1".into(),
                port: 9000,
                ..Default::default()
            })
            .await
            .unwrap();

        let task = SweepTask::spawn(registry.clone(), Duration::from_millis(50));
        let mut health = HealthState::Healthy;
        for _ in 0..60 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            health = registry.get_service(&reg.service_id).await.unwrap().health;
            if health == HealthState::Unhealthy {
                break;
            }
        }
        task.stop().await;
        assert_eq!(health, HealthState::Unhealthy);
    }
}
