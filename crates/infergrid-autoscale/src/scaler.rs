//! AutoScaler — registry-driven replica decisions.
//!
//! Replica counts live in the cluster; the scaler only remembers its
//! configs, cooldown timestamps and the activity it has observed. One
//! write lock guards both, and it is never held across a call to the
//! registry or the cluster.

use std::collections::HashMap;
use std::sync::Arc;

use infergrid_core::config::{AutoscaleConfig, ScaleConfig};
use infergrid_core::time::epoch_secs;
use infergrid_core::{EventFeed, PlatformError, PlatformResult};
use infergrid_registry::ServiceRegistry;
use infergrid_state::ServiceInstance;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info, warn};

use crate::cluster::ClusterClient;

/// Requests per second above which a feature scales up regardless of
/// its configured targets.
pub const RPS_CEILING: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    None,
    ScaleUp,
    ScaleDown,
    ScaleToZero,
}

impl ScaleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ScaleUp => "scale_up",
            Self::ScaleDown => "scale_down",
            Self::ScaleToZero => "scale_to_zero",
        }
    }
}

/// Aggregate view of a feature's serving instances at one check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleMetrics {
    pub instances: usize,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub gpu_usage: f64,
    pub queue_size: u64,
    pub requests_per_sec: f64,
    pub idle_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleDecision {
    pub feature_id: String,
    pub action: ScaleAction,
    pub current_replicas: u32,
    pub target_replicas: u32,
    pub metrics: ScaleMetrics,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleEvent {
    pub feature_id: String,
    pub action: ScaleAction,
    pub current: u32,
    pub target: u32,
    pub reason: String,
    pub timestamp: u64,
}

/// What the scaler remembers about one feature between checks.
#[derive(Debug, Default)]
struct Activity {
    last_scale_up: Option<u64>,
    last_scale_down: Option<u64>,
    /// Processed-count total and when it was read.
    processed: Option<(u64, u64)>,
    last_active: Option<u64>,
}

struct ScalerState {
    configs: HashMap<String, ScaleConfig>,
    activity: HashMap<String, Activity>,
}

/// Sums over one feature's instances.
struct Totals {
    instances: usize,
    cpu: f64,
    memory: f64,
    gpu: f64,
    queue: u64,
    processed: u64,
}

impl Totals {
    fn from_instances(instances: &[ServiceInstance]) -> Self {
        let mut t = Totals {
            instances: instances.len(),
            cpu: 0.0,
            memory: 0.0,
            gpu: 0.0,
            queue: 0,
            processed: 0,
        };
        for s in instances {
            t.cpu += s.metrics.cpu_utilization;
            t.memory += s.metrics.memory_usage;
            t.gpu += s.metrics.gpu_utilization;
            t.queue += s.metrics.queue_size;
            t.processed += s.metrics.processed_count;
        }
        t
    }

    fn mean(&self, total: f64) -> f64 {
        if self.instances == 0 {
            0.0
        } else {
            total / self.instances as f64
        }
    }
}

fn within(last: Option<u64>, cooldown: u64, now: u64) -> bool {
    last.is_some_and(|at| now.saturating_sub(at) < cooldown)
}

fn scale_up_reason(config: &ScaleConfig, m: &ScaleMetrics, current: u32) -> Option<String> {
    if current >= config.max_instances {
        return None;
    }
    if m.cpu_usage > config.target_cpu {
        return Some(format!("cpu usage {:.2}% above {:.2}%", m.cpu_usage, config.target_cpu));
    }
    if m.queue_size > config.target_queue_size {
        return Some(format!("queue {} above {}", m.queue_size, config.target_queue_size));
    }
    if m.requests_per_sec > RPS_CEILING {
        return Some(format!("{:.1} req/s above {RPS_CEILING}", m.requests_per_sec));
    }
    None
}

fn scale_down_reason(config: &ScaleConfig, m: &ScaleMetrics, current: u32) -> Option<String> {
    if current <= config.min_instances {
        return None;
    }
    if m.idle_secs >= config.idle_timeout_secs {
        return Some(format!("idle for {}s", m.idle_secs));
    }
    if m.cpu_usage < config.target_cpu / 2.0 && m.queue_size == 0 {
        return Some(format!("low utilization: cpu={:.2}%", m.cpu_usage));
    }
    None
}

pub struct AutoScaler {
    state: RwLock<ScalerState>,
    registry: Arc<ServiceRegistry>,
    cluster: Arc<dyn ClusterClient>,
    /// Namespace for configs that do not name one.
    namespace: String,
    events: EventFeed<ScaleEvent>,
}

impl AutoScaler {
    pub fn new(registry: Arc<ServiceRegistry>, cluster: Arc<dyn ClusterClient>, config: &AutoscaleConfig) -> Self {
        let configs = config
            .features
            .iter()
            .map(|c| (c.feature_id.clone(), c.clone()))
            .collect::<HashMap<_, _>>();
        info!(features = configs.len(), namespace = %config.namespace, "autoscaler configured");
        Self {
            state: RwLock::new(ScalerState {
                configs,
                activity: HashMap::new(),
            }),
            registry,
            cluster,
            namespace: config.namespace.clone(),
            events: EventFeed::new("scale_events", config.event_capacity),
        }
    }

    fn namespace_of<'a>(&'a self, config: &'a ScaleConfig) -> &'a str {
        config.namespace.as_deref().unwrap_or(&self.namespace)
    }

    // ── Configs ────────────────────────────────────────────────────

    pub async fn update_scale_config(&self, config: ScaleConfig) -> PlatformResult<()> {
        if config.feature_id.trim().is_empty() {
            return Err(PlatformError::InvalidRequest("feature_id is required".into()));
        }
        if config.max_instances == 0 || config.min_instances > config.max_instances {
            return Err(PlatformError::InvalidRequest(format!(
                "invalid bounds {}..{} for {}",
                config.min_instances, config.max_instances, config.feature_id
            )));
        }
        info!(
            feature = %config.feature_id,
            min = config.min_instances,
            max = config.max_instances,
            "scale config updated"
        );
        self.state
            .write()
            .await
            .configs
            .insert(config.feature_id.clone(), config);
        Ok(())
    }

    pub async fn get_scale_config(&self, feature_id: &str) -> PlatformResult<ScaleConfig> {
        self.state
            .read()
            .await
            .configs
            .get(feature_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("no scale config for feature: {feature_id}")))
    }

    pub async fn list_scale_configs(&self) -> Vec<ScaleConfig> {
        let mut configs: Vec<ScaleConfig> = self.state.read().await.configs.values().cloned().collect();
        configs.sort_by(|a, b| a.feature_id.cmp(&b.feature_id));
        configs
    }

    pub fn watch_scale_events(&self, cancel: watch::Receiver<bool>) -> mpsc::Receiver<ScaleEvent> {
        self.events.subscribe(cancel)
    }

    // ── Decisions ──────────────────────────────────────────────────

    pub async fn check_scale(&self, feature_id: &str) -> PlatformResult<ScaleDecision> {
        self.check_scale_at(feature_id, epoch_secs()).await
    }

    /// Evaluate `feature_id` at `now` and apply the decision.
    pub async fn check_scale_at(&self, feature_id: &str, now: u64) -> PlatformResult<ScaleDecision> {
        let config = self.get_scale_config(feature_id).await?;
        let deployment = config.deployment_name();
        let current = self
            .cluster
            .get_replicas(&deployment, self.namespace_of(&config))
            .await?;
        let instances = self.registry.get_services_by_type(feature_id).await;
        let totals = Totals::from_instances(&instances);

        let (metrics, last_up, last_down) = {
            let mut state = self.state.write().await;
            let activity = state.activity.entry(feature_id.to_string()).or_default();
            // A shrinking total means instances restarted; count it as no traffic.
            let rps = match activity.processed {
                Some((prev, at)) if now > at && totals.processed >= prev => {
                    (totals.processed - prev) as f64 / (now - at) as f64
                }
                _ => 0.0,
            };
            activity.processed = Some((totals.processed, now));
            if activity.last_active.is_none() || totals.queue > 0 || rps > 0.0 {
                activity.last_active = Some(now);
            }
            let metrics = ScaleMetrics {
                instances: totals.instances,
                cpu_usage: totals.mean(totals.cpu),
                memory_usage: totals.mean(totals.memory),
                gpu_usage: totals.mean(totals.gpu),
                queue_size: totals.queue,
                requests_per_sec: rps,
                idle_secs: now.saturating_sub(activity.last_active.unwrap_or(now)),
            };
            (metrics, activity.last_scale_up, activity.last_scale_down)
        };

        let mut decision = ScaleDecision {
            feature_id: feature_id.to_string(),
            action: ScaleAction::None,
            current_replicas: current,
            target_replicas: current,
            metrics,
            reason: String::new(),
        };

        if let Some(reason) = scale_up_reason(&config, &decision.metrics, current) {
            if within(last_up, config.scale_up_cooldown_secs, now) {
                decision.reason = "scale up cooldown".into();
                return Ok(decision);
            }
            decision.action = ScaleAction::ScaleUp;
            decision.target_replicas = (current + 1).min(config.max_instances);
            decision.reason = reason;
            return self.apply(&config, decision, now).await;
        }

        if let Some(reason) = scale_down_reason(&config, &decision.metrics, current) {
            if within(last_down, config.scale_down_cooldown_secs, now) {
                decision.reason = "scale down cooldown".into();
                return Ok(decision);
            }
            let target = current.saturating_sub(1).max(config.min_instances);
            if target == 0 {
                if decision.metrics.idle_secs < config.idle_timeout_secs {
                    decision.reason = format!(
                        "idle {}s of {}s before scaling to zero",
                        decision.metrics.idle_secs, config.idle_timeout_secs
                    );
                    return Ok(decision);
                }
                decision.action = ScaleAction::ScaleToZero;
                decision.reason = "idle timeout, scale to zero".into();
            } else {
                decision.action = ScaleAction::ScaleDown;
                decision.reason = reason;
            }
            decision.target_replicas = target;
            return self.apply(&config, decision, now).await;
        }

        decision.reason = "no scale needed".into();
        Ok(decision)
    }

    async fn apply(&self, config: &ScaleConfig, decision: ScaleDecision, now: u64) -> PlatformResult<ScaleDecision> {
        let deployment = config.deployment_name();
        if let Err(e) = self
            .cluster
            .set_replicas(&deployment, self.namespace_of(config), decision.target_replicas)
            .await
        {
            warn!(
                feature = %decision.feature_id,
                action = decision.action.as_str(),
                target = decision.target_replicas,
                error = %e,
                "scale action failed"
            );
            return Err(e);
        }

        {
            let mut state = self.state.write().await;
            let activity = state.activity.entry(decision.feature_id.clone()).or_default();
            match decision.action {
                ScaleAction::ScaleUp => activity.last_scale_up = Some(now),
                ScaleAction::ScaleDown | ScaleAction::ScaleToZero => activity.last_scale_down = Some(now),
                ScaleAction::None => {}
            }
        }

        info!(
            feature = %decision.feature_id,
            action = decision.action.as_str(),
            from = decision.current_replicas,
            to = decision.target_replicas,
            reason = %decision.reason,
            "scaled"
        );
        self.events.publish(ScaleEvent {
            feature_id: decision.feature_id.clone(),
            action: decision.action,
            current: decision.current_replicas,
            target: decision.target_replicas,
            reason: decision.reason.clone(),
            timestamp: now,
        });
        Ok(decision)
    }

    /// Check every configured feature once. Failures are logged and skipped.
    pub async fn evaluate_all_at(&self, now: u64) -> Vec<ScaleDecision> {
        let mut features: Vec<String> = self.state.read().await.configs.keys().cloned().collect();
        features.sort();

        let mut decisions = Vec::with_capacity(features.len());
        for feature in features {
            match self.check_scale_at(&feature, now).await {
                Ok(d) => {
                    if d.action == ScaleAction::None {
                        debug!(%feature, reason = %d.reason, "no scale action");
                    }
                    decisions.push(d);
                }
                Err(e) => warn!(%feature, error = %e, "scale check failed"),
            }
        }
        decisions
    }

    pub async fn evaluate_all(&self) -> Vec<ScaleDecision> {
        self.evaluate_all_at(epoch_secs()).await
    }

    // ── Manual operations ──────────────────────────────────────────

    /// Add `count` replicas, bounded by `max_instances`. Returns the new count.
    pub async fn scale_up(&self, feature_id: &str, count: u32) -> PlatformResult<u32> {
        if count == 0 {
            return Err(PlatformError::InvalidRequest("count must be positive".into()));
        }
        let config = self.get_scale_config(feature_id).await?;
        let current = self
            .cluster
            .get_replicas(&config.deployment_name(), self.namespace_of(&config))
            .await?;
        let decision = ScaleDecision {
            feature_id: feature_id.to_string(),
            action: ScaleAction::ScaleUp,
            current_replicas: current,
            target_replicas: current.saturating_add(count).min(config.max_instances),
            metrics: ScaleMetrics::default(),
            reason: format!("manual scale up by {count}"),
        };
        Ok(self.apply(&config, decision, epoch_secs()).await?.target_replicas)
    }

    /// Set replicas to zero. Rejected when the feature keeps a minimum.
    pub async fn scale_to_zero(&self, feature_id: &str) -> PlatformResult<()> {
        let config = self.get_scale_config(feature_id).await?;
        if config.min_instances > 0 {
            return Err(PlatformError::InvalidRequest(format!(
                "{feature_id} keeps at least {} instances",
                config.min_instances
            )));
        }
        let current = self
            .cluster
            .get_replicas(&config.deployment_name(), self.namespace_of(&config))
            .await?;
        let decision = ScaleDecision {
            feature_id: feature_id.to_string(),
            action: ScaleAction::ScaleToZero,
            current_replicas: current,
            target_replicas: 0,
            metrics: ScaleMetrics::default(),
            reason: "manual scale to zero".into(),
        };
        self.apply(&config, decision, epoch_secs()).await?;
        Ok(())
    }
}
