//! Replica control surface of the container orchestrator.

use std::collections::HashMap;

use async_trait::async_trait;
use infergrid_core::PlatformResult;
use tokio::sync::RwLock;
use tracing::info;

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Desired replica count of `deployment` in `namespace`.
    async fn get_replicas(&self, deployment: &str, namespace: &str) -> PlatformResult<u32>;

    async fn set_replicas(&self, deployment: &str, namespace: &str, replicas: u32) -> PlatformResult<()>;
}

/// Replica table for standalone mode. Unknown deployments have zero
/// replicas.
#[derive(Default)]
pub struct InMemoryClusterClient {
    replicas: RwLock<HashMap<(String, String), u32>>,
}

impl InMemoryClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every known deployment as `(namespace, name, replicas)`.
    pub async fn deployments(&self) -> Vec<(String, String, u32)> {
        let mut out: Vec<_> = self
            .replicas
            .read()
            .await
            .iter()
            .map(|((ns, name), n)| (ns.clone(), name.clone(), *n))
            .collect();
        out.sort();
        out
    }
}

#[async_trait]
impl ClusterClient for InMemoryClusterClient {
    async fn get_replicas(&self, deployment: &str, namespace: &str) -> PlatformResult<u32> {
        Ok(self
            .replicas
            .read()
            .await
            .get(&(namespace.to_string(), deployment.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn set_replicas(&self, deployment: &str, namespace: &str, replicas: u32) -> PlatformResult<()> {
        let previous = self
            .replicas
            .write()
            .await
            .insert((namespace.to_string(), deployment.to_string()), replicas)
            .unwrap_or(0);
        info!(%namespace, %deployment, from = previous, to = replicas, "replicas updated");
        Ok(())
    }
}
