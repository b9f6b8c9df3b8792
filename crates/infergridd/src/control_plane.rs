//! Control plane assembly.
//!
//! Opens the state store, loads every component from it, then:
//! 1. Spawns the heartbeat sweep, spend reconciliation and scale loop
//! 2. Serves the gateway until Ctrl-C
//! 3. Signals the loops through one `watch` channel, waits for them and
//!    flushes pending registry writes

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use infergrid_api::ApiState;
use infergrid_autoscale::{AutoScaler, InMemoryClusterClient, run_scale_loop};
use infergrid_budget::{AdmissionController, run_reconciliation};
use infergrid_core::{PlatformConfig, StaticConfigStore};
use infergrid_ratelimit::KeyedRateLimiter;
use infergrid_registry::{ServiceRegistry, run_timeout_sweep};
use infergrid_router::{InMemoryKeyManager, ProviderFactory, RoutingEngine};
use infergrid_state::StateStore;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct ControlPlane {
    config: PlatformConfig,
    registry: Arc<ServiceRegistry>,
    budget: Arc<AdmissionController>,
    router: Arc<RoutingEngine>,
    scaler: Arc<AutoScaler>,
    limiter: Arc<KeyedRateLimiter>,
}

impl ControlPlane {
    /// Open `<data_dir>/infergrid.redb` and build every component from it.
    pub fn open(config: PlatformConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.server.data_dir)?;
        let db_path = config.server.data_dir.join("infergrid.redb");
        let store = StateStore::open(&db_path)?;
        info!(path = ?db_path, "state store opened");

        let registry = Arc::new(ServiceRegistry::load(store.clone(), &config.registry)?);
        let budget = Arc::new(AdmissionController::load(store, &config.budget)?);

        let keys = Arc::new(InMemoryKeyManager::from_config(&config.keys));
        let catalog = Arc::new(StaticConfigStore::new(config.features.clone()));
        info!(features = config.features.len(), "feature catalog loaded");
        let router = Arc::new(RoutingEngine::new(
            catalog,
            registry.clone(),
            keys,
            ProviderFactory::with_http(),
            budget.clone(),
        ));

        // Standalone: replica counts live in memory.
        let cluster = Arc::new(InMemoryClusterClient::new());
        let scaler = Arc::new(AutoScaler::new(registry.clone(), cluster, &config.autoscale));
        let limiter = Arc::new(KeyedRateLimiter::from_config(&config.ratelimit));

        Ok(Self {
            config,
            registry,
            budget,
            router,
            scaler,
            limiter,
        })
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            registry: self.registry.clone(),
            router: self.router.clone(),
            budget: self.budget.clone(),
            scaler: self.scaler.clone(),
            limiter: self.limiter.clone(),
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // ── Background tasks ───────────────────────────────────────
        let sweep = tokio::spawn(run_timeout_sweep(
            self.registry.clone(),
            Duration::from_secs(self.config.registry.sweep_interval_secs),
            shutdown_rx.clone(),
        ));
        let reconcile = tokio::spawn(run_reconciliation(
            self.budget.clone(),
            Duration::from_secs(self.config.budget.reconcile_interval_secs),
            shutdown_rx.clone(),
        ));
        let scale = tokio::spawn(run_scale_loop(
            self.scaler.clone(),
            Duration::from_secs(self.config.autoscale.interval_secs),
            shutdown_rx,
        ));

        // ── Gateway ────────────────────────────────────────────────
        let router = infergrid_api::build_router(self.api_state());
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.server.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "gateway listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            })
            .await?;

        for (name, handle) in [("sweep", sweep), ("reconcile", reconcile), ("scale", scale)] {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "background task failed");
            }
        }
        self.registry.flush().await;
        info!("InferGrid daemon stopped");
        Ok(())
    }
}
