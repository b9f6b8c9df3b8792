//! ServiceRegistry — authoritative in-memory view of the self-hosted fleet.
//!
//! Instances register, then heartbeat every `heartbeat_interval_secs`.
//! All mutable state sits behind one `RwLock`. Every change queues a
//! snapshot, taken under that lock, to a single writer task, so the store
//! sees changes in the order they were made and no caller waits on disk I/O.

use std::collections::HashMap;

use infergrid_core::config::RegistryConfig;
use infergrid_core::time::epoch_secs;
use infergrid_core::{EventFeed, PlatformError, PlatformResult};
use infergrid_state::*;
use sha2::{Digest, Sha256};
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::health::{HealthPolicy, SweepOutcome};
use crate::protocol::*;

const SHUTDOWN_MESSAGE: &str = "Shutdown accepted. Complete in-flight requests.";

#[derive(Default)]
struct RegistryState {
    services: HashMap<ServiceId, ServiceInstance>,
    /// Latest undelivered config push per instance.
    pending_config: HashMap<ServiceId, ConfigUpdate>,
}

enum PersistCommand {
    Write(Box<ServiceInstance>),
    Flush(oneshot::Sender<()>),
}

pub struct ServiceRegistry {
    state: RwLock<RegistryState>,
    persist_tx: mpsc::UnboundedSender<PersistCommand>,
    policy: HealthPolicy,
    heartbeat_interval_secs: u64,
    shutdown_grace_secs: u64,
    heartbeats: EventFeed<HeartbeatEvent>,
}

/// Deterministic id: the same host/port/type always maps to the same id.
pub fn generate_service_id(service_type: &str, hostname: &str, ip: &str, port: u16) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{service_type}|{hostname}|{ip}|{port}").as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{service_type}-{}", &digest[..8])
}

impl ServiceRegistry {
    pub fn new(store: StateStore, config: &RegistryConfig) -> Self {
        Self::with_state(store, config, RegistryState::default())
    }

    /// Must be called inside a tokio runtime; the store writer is spawned here.
    fn with_state(store: StateStore, config: &RegistryConfig, state: RegistryState) -> Self {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_persist_writer(store, persist_rx));
        Self {
            state: RwLock::new(state),
            persist_tx,
            policy: HealthPolicy::from_config(config),
            heartbeat_interval_secs: config.heartbeat_interval_secs,
            shutdown_grace_secs: config.shutdown_grace_secs,
            heartbeats: EventFeed::new("heartbeats", config.event_capacity),
        }
    }

    /// Rebuild the registry from persisted instances.
    ///
    /// Heartbeats are the source of truth from here on, so restored
    /// instances keep their stored `last_heartbeat` and are swept normally.
    pub fn load(store: StateStore, config: &RegistryConfig) -> PlatformResult<Self> {
        let services: HashMap<ServiceId, ServiceInstance> = store
            .list_services()?
            .into_iter()
            .map(|svc| (svc.id.clone(), svc))
            .collect();
        info!(count = services.len(), "service registry restored from store");
        let state = RegistryState {
            services,
            pending_config: HashMap::new(),
        };
        Ok(Self::with_state(store, config, state))
    }

    pub fn heartbeat_interval_secs(&self) -> u64 {
        self.heartbeat_interval_secs
    }

    // ── Registration protocol ──────────────────────────────────────

    /// Register an instance, or refresh it in place if its id is known.
    pub async fn register(&self, req: RegisterRequest) -> PlatformResult<RegisterResponse> {
        if req.service_type.trim().is_empty() {
            return Err(PlatformError::InvalidRequest("service_type is required".into()));
        }
        if req.ip_address.trim().is_empty() || req.port == 0 {
            return Err(PlatformError::InvalidRequest(
                "ip_address and port are required".into(),
            ));
        }

        let id = generate_service_id(&req.service_type, &req.hostname, &req.ip_address, req.port);
        let token = Uuid::new_v4().to_string();
        let now = epoch_secs();

        {
            let mut state = self.state.write().await;
            match state.services.get_mut(&id) {
                Some(existing) if existing.health != HealthState::Terminated => {
                    existing.version = req.version;
                    existing.hostname = req.hostname;
                    existing.capabilities = req.capabilities;
                    existing.resources = req.resources;
                    existing.performance = req.performance;
                    existing.metadata = req.metadata;
                    existing.token = token.clone();
                    existing.health = HealthState::Healthy;
                    existing.heartbeat_missed = 0;
                    existing.last_heartbeat = now;
                    existing.drain_reason = None;
                    existing.updated_at = now;
                    info!(service_id = %id, "service re-registered");
                }
                _ => {
                    let instance = ServiceInstance {
                        id: id.clone(),
                        service_type: req.service_type,
                        version: req.version,
                        hostname: req.hostname,
                        ip_address: req.ip_address,
                        port: req.port,
                        capabilities: req.capabilities,
                        resources: req.resources,
                        performance: req.performance,
                        health: HealthState::Healthy,
                        token: token.clone(),
                        last_heartbeat: now,
                        heartbeat_missed: 0,
                        metrics: InstanceMetrics::default(),
                        metadata: req.metadata,
                        drain_reason: None,
                        registered_at: now,
                        updated_at: now,
                    };
                    info!(
                        service_id = %id,
                        service_type = %instance.service_type,
                        endpoint = %instance.endpoint(),
                        "service registered"
                    );
                    state.services.insert(id.clone(), instance);
                }
            }
            state.pending_config.remove(&id);
            self.persist(&state, &id);
        }

        Ok(RegisterResponse {
            service_id: id,
            heartbeat_interval_seconds: self.heartbeat_interval_secs,
            token,
        })
    }

    /// Accept a heartbeat at the current wall-clock time.
    pub async fn heartbeat(&self, req: HeartbeatRequest) -> PlatformResult<HeartbeatResponse> {
        self.heartbeat_at(req, epoch_secs()).await
    }

    /// Accept a heartbeat observed at `now` (epoch seconds).
    pub async fn heartbeat_at(
        &self,
        req: HeartbeatRequest,
        now: u64,
    ) -> PlatformResult<HeartbeatResponse> {
        let (response, event) = {
            let mut state = self.state.write().await;
            let svc = match state.services.get_mut(&req.service_id) {
                Some(svc) if svc.health != HealthState::Terminated => svc,
                _ => return Err(PlatformError::NotFound(format!("service {}", req.service_id))),
            };
            if req.token.is_empty() || req.token != svc.token {
                warn!(service_id = %req.service_id, "heartbeat with invalid token");
                return Err(PlatformError::Unauthorized("invalid token".into()));
            }

            svc.last_heartbeat = now;
            svc.heartbeat_missed = 0;
            svc.metrics = req.metrics();
            svc.updated_at = now;
            let previous = svc.health;
            svc.health = self.policy.after_heartbeat(previous, &svc.metrics);
            if svc.health != previous {
                info!(
                    service_id = %svc.id,
                    from = previous.as_str(),
                    to = svc.health.as_str(),
                    "service health changed"
                );
            }

            let event = HeartbeatEvent {
                service_id: svc.id.clone(),
                service_type: svc.service_type.clone(),
                health: svc.health,
                metrics: svc.metrics.clone(),
                timestamp: now,
            };
            let draining = svc.health == HealthState::Draining;
            let status = svc.health.as_str().to_string();
            let config_update = state.pending_config.remove(&req.service_id);
            self.persist(&state, &req.service_id);

            (
                HeartbeatResponse {
                    status,
                    config_update,
                    drain_requested: draining,
                },
                event,
            )
        };

        debug!(service_id = %req.service_id, status = %response.status, "heartbeat accepted");
        self.heartbeats.publish(event);
        Ok(response)
    }

    /// Ask an instance to drain. Routing stops selecting it immediately.
    pub async fn shutdown(&self, service_id: &str, reason: &str) -> PlatformResult<ShutdownResponse> {
        {
            let mut state = self.state.write().await;
            let svc = match state.services.get_mut(service_id) {
                Some(svc) if svc.health != HealthState::Terminated => svc,
                _ => return Err(PlatformError::NotFound(format!("service {service_id}"))),
            };
            svc.health = HealthState::Draining;
            svc.drain_reason = (!reason.is_empty()).then(|| reason.to_string());
            svc.updated_at = epoch_secs();
            self.persist(&state, service_id);
        }
        info!(%service_id, %reason, "service draining");
        Ok(ShutdownResponse {
            grace_period_seconds: self.shutdown_grace_secs,
            message: SHUTDOWN_MESSAGE.to_string(),
        })
    }

    /// External confirmation that a draining instance has exited.
    pub async fn mark_terminated(&self, service_id: &str) -> PlatformResult<()> {
        {
            let mut state = self.state.write().await;
            let svc = state
                .services
                .get_mut(service_id)
                .ok_or_else(|| PlatformError::NotFound(format!("service {service_id}")))?;
            match svc.health {
                HealthState::Terminated => return Ok(()),
                HealthState::Draining => {
                    svc.health = HealthState::Terminated;
                    svc.updated_at = epoch_secs();
                }
                other => {
                    return Err(PlatformError::InvalidRequest(format!(
                        "service {service_id} is {}, not draining",
                        other.as_str()
                    )));
                }
            }
            state.pending_config.remove(service_id);
            self.persist(&state, service_id);
        }
        info!(%service_id, "service terminated");
        Ok(())
    }

    /// Queue a config for delivery with the instance's next heartbeat.
    pub async fn push_config(
        &self,
        service_id: &str,
        config: serde_json::Value,
    ) -> PlatformResult<ConfigUpdate> {
        let mut state = self.state.write().await;
        match state.services.get(service_id) {
            Some(svc) if svc.health != HealthState::Terminated => {}
            _ => return Err(PlatformError::NotFound(format!("service {service_id}"))),
        }
        let update = ConfigUpdate {
            version: epoch_secs().to_string(),
            config,
        };
        if state
            .pending_config
            .insert(service_id.to_string(), update.clone())
            .is_some()
        {
            debug!(%service_id, "pending config replaced");
        }
        Ok(update)
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Healthy instances of `service_type`, for dispatching new requests.
    pub async fn get_healthy_services(&self, service_type: &str) -> Vec<ServiceInstance> {
        self.collect(service_type, |h| h == HealthState::Healthy).await
    }

    /// Healthy and Degraded instances of `service_type`.
    pub async fn get_services_by_type(&self, service_type: &str) -> Vec<ServiceInstance> {
        self.collect(service_type, |h| {
            matches!(h, HealthState::Healthy | HealthState::Degraded)
        })
        .await
    }

    async fn collect(
        &self,
        service_type: &str,
        keep: impl Fn(HealthState) -> bool,
    ) -> Vec<ServiceInstance> {
        let state = self.state.read().await;
        let mut found: Vec<ServiceInstance> = state
            .services
            .values()
            .filter(|s| s.service_type == service_type && keep(s.health))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub async fn get_service(&self, service_id: &str) -> PlatformResult<ServiceInstance> {
        let state = self.state.read().await;
        state
            .services
            .get(service_id)
            .map(ServiceInstance::redacted)
            .ok_or_else(|| PlatformError::NotFound(format!("service {service_id}")))
    }

    /// Filtered listing with per-state counts. Tokens are stripped.
    pub async fn list_services(&self, filter: &ServiceFilter) -> ServiceList {
        let state = self.state.read().await;
        let mut services: Vec<ServiceInstance> = state
            .services
            .values()
            .filter(|s| {
                filter
                    .service_type
                    .as_deref()
                    .is_none_or(|t| s.service_type == t)
                    && filter.status.is_none_or(|h| s.health == h)
            })
            .map(ServiceInstance::redacted)
            .collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));

        let count = |h: HealthState| services.iter().filter(|s| s.health == h).count();
        ServiceList {
            total: services.len(),
            healthy: count(HealthState::Healthy),
            degraded: count(HealthState::Degraded),
            unhealthy: count(HealthState::Unhealthy),
            services,
        }
    }

    /// Stream heartbeat events until `cancel` fires.
    pub fn watch_heartbeats(&self, cancel: watch::Receiver<bool>) -> mpsc::Receiver<HeartbeatEvent> {
        self.heartbeats.subscribe(cancel)
    }

    // ── Timeout sweep ──────────────────────────────────────────────

    /// Count a missed heartbeat for every stale instance at `now`.
    ///
    /// Returns the ids that became Unhealthy during this sweep.
    pub async fn check_heartbeat_timeouts_at(&self, now: u64) -> Vec<ServiceId> {
        let mut unhealthy = Vec::new();
        {
            let mut state = self.state.write().await;
            for svc in state.services.values_mut() {
                match self.policy.sweep(svc, now) {
                    SweepOutcome::BecameUnhealthy => unhealthy.push(svc.id.clone()),
                    SweepOutcome::Missed(missed) => {
                        debug!(service_id = %svc.id, missed, "heartbeat missed");
                    }
                    SweepOutcome::Fresh | SweepOutcome::Skipped => {}
                }
            }
            for id in &unhealthy {
                self.persist(&state, id);
            }
        }
        unhealthy
    }

    pub async fn check_heartbeat_timeouts(&self) -> Vec<ServiceId> {
        self.check_heartbeat_timeouts_at(epoch_secs()).await
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Queue the current snapshot of `service_id` for the store writer.
    ///
    /// Callers hold the state lock, so snapshots are queued in the order
    /// the changes were made.
    fn persist(&self, state: &RegistryState, service_id: &str) {
        let Some(svc) = state.services.get(service_id) else {
            return;
        };
        if self
            .persist_tx
            .send(PersistCommand::Write(Box::new(svc.clone())))
            .is_err()
        {
            warn!(%service_id, "store writer stopped, change not persisted");
        }
    }

    /// Wait until every change queued so far has reached the store.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.persist_tx.send(PersistCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Apply queued snapshots one at a time until the registry is dropped.
async fn run_persist_writer(store: StateStore, mut rx: mpsc::UnboundedReceiver<PersistCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            PersistCommand::Write(svc) => {
                let store = store.clone();
                let service_id = svc.id.clone();
                match tokio::task::spawn_blocking(move || store.put_service(&svc)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(%service_id, error = %e, "failed to persist service"),
                    Err(e) => warn!(%service_id, error = %e, "persist task failed"),
                }
            }
            PersistCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("service store writer stopped");
}
