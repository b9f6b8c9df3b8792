//! Wire messages of the instance registration protocol.

use std::collections::HashMap;

use infergrid_state::{Capabilities, HealthState, InstanceMetrics, Performance, Resources, ServiceInstance};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Feature id the instance serves.
    pub service_type: String,
    #[serde(default)]
    pub version: String,
    pub hostname: String,
    pub ip_address: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub performance: Performance,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub service_id: String,
    pub heartbeat_interval_seconds: u64,
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub service_id: String,
    pub token: String,
    /// Instance-side clock, informational only.
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub current_load: f64,
    #[serde(default)]
    pub queue_size: u64,
    #[serde(default)]
    pub processed_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub cpu_utilization: f64,
    #[serde(default)]
    pub gpu_utilization: f64,
    #[serde(default)]
    pub memory_usage: f64,
}

impl HeartbeatRequest {
    pub fn metrics(&self) -> InstanceMetrics {
        InstanceMetrics {
            current_load: self.current_load,
            queue_size: self.queue_size,
            processed_count: self.processed_count,
            error_count: self.error_count,
            cpu_utilization: self.cpu_utilization,
            gpu_utilization: self.gpu_utilization,
            memory_usage: self.memory_usage,
        }
    }
}

/// Out-of-band configuration delivered with a heartbeat response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub version: String,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// `healthy`, `degraded`, or `draining`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_update: Option<ConfigUpdate>,
    pub drain_requested: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub grace_period_seconds: u64,
    pub message: String,
}

/// Emitted on every accepted heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    pub service_id: String,
    pub service_type: String,
    pub health: HealthState,
    pub metrics: InstanceMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceFilter {
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub status: Option<HealthState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceList {
    pub services: Vec<ServiceInstance>,
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
}
