//! Budget threshold alerts.

use infergrid_core::budget::AlertAction;
use infergrid_state::Budget;
use serde::{Deserialize, Serialize};

/// Percentage at or above which an alert is critical.
pub const CRITICAL_PERCENTAGE: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Warning,
    Critical,
}

impl AlertType {
    pub fn for_percentage(percentage: f64) -> Self {
        if percentage >= CRITICAL_PERCENTAGE {
            AlertType::Critical
        } else {
            AlertType::Warning
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub budget_id: String,
    pub budget_name: String,
    pub scope: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub action: AlertAction,
    /// Threshold fraction that was crossed.
    pub threshold: f64,
    pub used_amount: f64,
    pub total_amount: f64,
    pub percentage: f64,
    pub timestamp: u64,
}

/// One alert per enabled threshold that `used` has reached.
///
/// Repeated calls within the same period raise the same alerts again.
pub fn crossed_thresholds(budget: &Budget, used: f64, now: u64) -> Vec<BudgetAlert> {
    if budget.amount <= 0.0 {
        return Vec::new();
    }
    let percentage = used / budget.amount * 100.0;
    budget
        .alerts
        .iter()
        .filter(|t| t.enabled && percentage >= t.at * 100.0)
        .map(|t| BudgetAlert {
            budget_id: budget.id.clone(),
            budget_name: budget.name.clone(),
            scope: budget.scope_id(),
            alert_type: AlertType::for_percentage(percentage),
            action: t.action,
            threshold: t.at,
            used_amount: used,
            total_amount: budget.amount,
            percentage,
            timestamp: now,
        })
        .collect()
}
