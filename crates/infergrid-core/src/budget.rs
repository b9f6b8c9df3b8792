//! Budget vocabulary shared by the admission controller, the store, and
//! the config file.

use serde::{Deserialize, Serialize};

pub const GLOBAL_SCOPE: &str = "global";

/// Granularity at which spend is tracked and limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    Global,
    Service,
    Tenant,
}

impl BudgetKind {
    /// Scope id: `global`, `service:<feature>`, or `tenant:<id>`.
    pub fn scope_id(&self, target_id: &str) -> String {
        match self {
            BudgetKind::Global => GLOBAL_SCOPE.to_string(),
            BudgetKind::Service => service_scope(target_id),
            BudgetKind::Tenant => tenant_scope(target_id),
        }
    }
}

pub fn service_scope(feature: &str) -> String {
    format!("service:{feature}")
}

pub fn tenant_scope(tenant_id: &str) -> String {
    format!("tenant:{tenant_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Daily,
    Weekly,
    Monthly,
}

/// What an operator wants to happen when a threshold is crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertAction {
    Notify,
    SwitchToThirdParty,
    Block,
}

/// Fraction of a budget (0.0–1.0) at which an alert fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub at: f64,
    pub action: AlertAction,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl AlertThreshold {
    pub fn new(at: f64, action: AlertAction) -> Self {
        Self {
            at,
            action,
            enabled: true,
        }
    }
}

/// Alerts applied when a budget is created without any.
pub fn default_alerts() -> Vec<AlertThreshold> {
    vec![
        AlertThreshold::new(0.7, AlertAction::Notify),
        AlertThreshold::new(0.9, AlertAction::SwitchToThirdParty),
    ]
}
