//! Domain types for the InferGrid state store.
//!
//! These types represent the persisted state of registered service
//! instances, budgets, cost records, and daily cost statistics. All types
//! are serializable to/from JSON for storage in redb tables.

use std::collections::HashMap;

use infergrid_core::budget::{AlertThreshold, BudgetKind, BudgetPeriod};
use serde::{Deserialize, Serialize};

/// Unique identifier for a registered instance, `<service_type>-<8 hex>`.
pub type ServiceId = String;

// ── Service instance ───────────────────────────────────────────────

/// Health of a registered instance.
///
/// Healthy ⇄ Degraded via heartbeat error rate, → Unhealthy via heartbeat
/// timeout, → Draining via shutdown, Draining → Terminated on external
/// confirmation. Terminated is absorbing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Draining,
    Terminated,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Draining => "draining",
            HealthState::Terminated => "terminated",
        }
    }

    /// Draining and Terminated instances are never swept for timeouts.
    pub fn is_winding_down(&self) -> bool {
        matches!(self, HealthState::Draining | HealthState::Terminated)
    }
}

/// What an instance declares it can serve.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Capabilities {
    #[serde(default)]
    pub supported_models: Vec<String>,
    #[serde(default)]
    pub supported_resolutions: Vec<String>,
    #[serde(default)]
    pub supported_formats: Vec<String>,
    #[serde(default)]
    pub supported_styles: Vec<String>,
    #[serde(default)]
    pub max_batch_size: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Resources {
    #[serde(default)]
    pub gpu_memory: String,
    #[serde(default)]
    pub gpu_count: u32,
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub memory: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Performance {
    #[serde(default)]
    pub estimated_latency_ms: u64,
    #[serde(default)]
    pub throughput_per_minute: u32,
    #[serde(default)]
    pub warmup_time_secs: u64,
}

/// Live metrics as last reported by heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceMetrics {
    pub current_load: f64,
    pub queue_size: u64,
    /// Cumulative requests processed since the instance started.
    pub processed_count: u64,
    pub error_count: u64,
    /// Percent, 0–100.
    pub cpu_utilization: f64,
    pub gpu_utilization: f64,
    pub memory_usage: f64,
}

impl InstanceMetrics {
    /// Errors per processed request; 0 when nothing was processed.
    pub fn error_rate(&self) -> f64 {
        if self.processed_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.processed_count as f64
        }
    }
}

/// A self-hosted inference instance known to the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceInstance {
    pub id: ServiceId,
    /// Feature id this instance serves.
    pub service_type: String,
    pub version: String,
    pub hostname: String,
    pub ip_address: String,
    pub port: u16,
    pub capabilities: Capabilities,
    pub resources: Resources,
    pub performance: Performance,
    pub health: HealthState,
    /// Opaque credential required on heartbeat.
    pub token: String,
    /// Unix timestamp (seconds) of the last accepted heartbeat.
    pub last_heartbeat: u64,
    /// Consecutive sweeps that found the heartbeat stale.
    pub heartbeat_missed: u32,
    pub metrics: InstanceMetrics,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub drain_reason: Option<String>,
    pub registered_at: u64,
    pub updated_at: u64,
}

impl ServiceInstance {
    /// Base URL for reaching the instance directly.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.ip_address, self.port)
    }

    /// Copy without the heartbeat credential, for listing.
    pub fn redacted(&self) -> Self {
        Self {
            token: String::new(),
            ..self.clone()
        }
    }
}

// ── Budget ─────────────────────────────────────────────────────────

/// A spend ceiling for one scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Budget {
    pub id: String,
    pub name: String,
    pub kind: BudgetKind,
    /// Feature id or tenant id; empty for the global budget.
    #[serde(default)]
    pub target_id: String,
    pub amount: f64,
    pub period: BudgetPeriod,
    /// Unix timestamp (seconds) the current period started.
    pub period_start: u64,
    pub alerts: Vec<AlertThreshold>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Budget {
    /// `global`, `service:<feature>`, or `tenant:<id>`.
    pub fn scope_id(&self) -> String {
        self.kind.scope_id(&self.target_id)
    }
}

// ── Cost ───────────────────────────────────────────────────────────

/// One billed request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostRecord {
    pub id: String,
    pub request_id: String,
    pub feature: String,
    pub provider_id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub amount: f64,
    /// Unix timestamp (milliseconds).
    pub timestamp: u64,
}

impl CostRecord {
    /// Composite key `{timestamp}:{id}`, zero-padded so keys sort by time.
    pub fn table_key(&self) -> String {
        format!("{:020}:{}", self.timestamp, self.id)
    }
}

/// Accumulated spend for one scope on one day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostStatistic {
    /// `YYYY-MM-DD` (UTC).
    pub date: String,
    pub scope: String,
    pub amount: f64,
    pub request_count: u64,
    pub updated_at: u64,
}

impl CostStatistic {
    /// Composite key `{date}:{scope}`.
    pub fn table_key(&self) -> String {
        statistic_key(&self.date, &self.scope)
    }
}

pub fn statistic_key(date: &str, scope: &str) -> String {
    format!("{date}:{scope}")
}
