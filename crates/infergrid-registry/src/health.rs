//! Health state machine for registered instances.
//!
//! Heartbeats decide Healthy vs Degraded from the reported error rate.
//! Only the timeout sweep moves an instance to Unhealthy, after the
//! heartbeat has been stale for `miss_threshold` consecutive sweeps.

use infergrid_core::config::RegistryConfig;
use infergrid_state::{HealthState, InstanceMetrics, ServiceInstance};
use tracing::{debug, warn};

/// Outcome of sweeping a single instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Draining or terminated; not checked.
    Skipped,
    /// Heartbeat is recent enough.
    Fresh,
    /// Stale; carries the consecutive miss count.
    Missed(u32),
    /// Stale for long enough that the instance was just marked Unhealthy.
    BecameUnhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// Error rate above which an instance is Degraded.
    pub error_rate_threshold: f64,
    pub heartbeat_timeout_secs: u64,
    pub miss_threshold: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from_config(&RegistryConfig::default())
    }
}

impl HealthPolicy {
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            error_rate_threshold: config.error_rate_threshold,
            heartbeat_timeout_secs: config.heartbeat_timeout_secs,
            miss_threshold: config.miss_threshold.max(1),
        }
    }

    /// State after an accepted heartbeat carrying `metrics`.
    pub fn after_heartbeat(&self, current: HealthState, metrics: &InstanceMetrics) -> HealthState {
        if current.is_winding_down() {
            return current;
        }
        let next = if metrics.processed_count > 0 && metrics.error_rate() > self.error_rate_threshold {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
        if next != current {
            debug!(
                from = current.as_str(),
                to = next.as_str(),
                error_rate = metrics.error_rate(),
                "heartbeat changed health"
            );
        }
        next
    }

    /// Advance the miss counter of one instance at `now`.
    pub fn sweep(&self, instance: &mut ServiceInstance, now: u64) -> SweepOutcome {
        if instance.health.is_winding_down() {
            return SweepOutcome::Skipped;
        }
        if now.saturating_sub(instance.last_heartbeat) <= self.heartbeat_timeout_secs {
            return SweepOutcome::Fresh;
        }

        instance.heartbeat_missed += 1;
        if instance.heartbeat_missed >= self.miss_threshold && instance.health != HealthState::Unhealthy {
            warn!(
                service_id = %instance.id,
                missed = instance.heartbeat_missed,
                threshold = self.miss_threshold,
                "instance marked unhealthy"
            );
            instance.health = HealthState::Unhealthy;
            instance.updated_at = now;
            return SweepOutcome::BecameUnhealthy;
        }
        SweepOutcome::Missed(instance.heartbeat_missed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infergrid_state::{Capabilities, Performance, Resources};
    use std::collections::HashMap;

    fn metrics(processed: u64, errors: u64) -> InstanceMetrics {
        InstanceMetrics {
            processed_count: processed,
            error_count: errors,
            ..Default::default()
        }
    }

    fn instance(last_heartbeat: u64) -> ServiceInstance {
        ServiceInstance {
            id: "text_to_image-00000001".into(),
            service_type: "text_to_image".into(),
            version: "1".into(),
            hostname: "h".into(),
            ip_address: "127.0.0.1".into(),
            port: 9000,
            capabilities: Capabilities::default(),
            resources: Resources::default(),
            performance: Performance::default(),
            health: HealthState::Healthy,
            token: "t".into(),
            last_heartbeat,
            heartbeat_missed: 0,
            metrics: InstanceMetrics::default(),
            metadata: HashMap::new(),
            drain_reason: None,
            registered_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn low_error_rate_stays_healthy() {
        let policy = HealthPolicy::default();
        assert_eq!(
            policy.after_heartbeat(HealthState::Healthy, &metrics(100, 10)),
            HealthState::Healthy
        );
    }

    #[test]
    fn high_error_rate_degrades() {
        let policy = HealthPolicy::default();
        assert_eq!(
            policy.after_heartbeat(HealthState::Healthy, &metrics(100, 11)),
            HealthState::Degraded
        );
    }

    #[test]
    fn degraded_recovers_when_rate_drops() {
        let policy = HealthPolicy::default();
        assert_eq!(
            policy.after_heartbeat(HealthState::Degraded, &metrics(1000, 20)),
            HealthState::Healthy
        );
        assert_eq!(
            policy.after_heartbeat(HealthState::Degraded, &metrics(0, 0)),
            HealthState::Healthy
        );
    }

    #[test]
    fn heartbeat_never_leaves_draining() {
        let policy = HealthPolicy::default();
        assert_eq!(
            policy.after_heartbeat(HealthState::Draining, &metrics(10, 9)),
            HealthState::Draining
        );
        assert_eq!(
            policy.after_heartbeat(HealthState::Terminated, &metrics(10, 0)),
            HealthState::Terminated
        );
    }

    #[test]
    fn sweep_marks_unhealthy_at_threshold() {
        let policy = HealthPolicy::default();
        let mut inst = instance(1000);
        let now = 1000 + 91;

        assert_eq!(policy.sweep(&mut inst, now), SweepOutcome::Missed(1));
        assert_eq!(policy.sweep(&mut inst, now + 10), SweepOutcome::Missed(2));
        assert_eq!(policy.sweep(&mut inst, now + 20), SweepOutcome::BecameUnhealthy);
        assert_eq!(inst.health, HealthState::Unhealthy);
        assert_eq!(policy.sweep(&mut inst, now + 30), SweepOutcome::Missed(4));
    }

    #[test]
    fn sweep_within_timeout_is_fresh() {
        let policy = HealthPolicy::default();
        let mut inst = instance(1000);
        assert_eq!(policy.sweep(&mut inst, 1090), SweepOutcome::Fresh);
        assert_eq!(inst.heartbeat_missed, 0);
    }

    #[test]
    fn sweep_skips_draining() {
        let policy = HealthPolicy::default();
        let mut inst = instance(0);
        inst.health = HealthState::Draining;
        assert_eq!(policy.sweep(&mut inst, 10_000), SweepOutcome::Skipped);
        assert_eq!(inst.heartbeat_missed, 0);
    }
}
