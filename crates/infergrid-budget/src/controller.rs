//! AdmissionController — budget gate evaluated before every dispatch.
//!
//! Budgets are keyed by scope id (`global`, `service:<feature>`,
//! `tenant:<id>`), which doubles as the budget id. Spend per scope only
//! ever grows; deltas since the last reconciliation are kept separately
//! so they can be flushed additively into daily statistics.

use std::collections::HashMap;
use std::sync::Arc;

use infergrid_core::budget::{
    AlertThreshold, BudgetKind, BudgetPeriod, GLOBAL_SCOPE, default_alerts, service_scope, tenant_scope,
};
use infergrid_core::config::{BudgetConfig, BudgetSeed};
use infergrid_core::time::epoch_secs;
use infergrid_core::{EventFeed, PlatformError, PlatformResult};
use infergrid_state::{Budget, CostRecord, StateResult, StateStore};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tracing::{debug, info, warn};

use crate::alerts::{BudgetAlert, crossed_thresholds};
use crate::period::{date_string, period_start};

/// Running spend of one scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spending {
    pub scope: String,
    pub amount: f64,
    pub request_count: u64,
    pub period_start: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct SpendDelta {
    amount: f64,
    requests: u64,
}

impl SpendDelta {
    fn merge(&mut self, other: SpendDelta) {
        self.amount += other.amount;
        self.requests += other.requests;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetInfo {
    pub budget_id: String,
    pub scope: String,
    pub total: f64,
    pub used: f64,
    pub remaining: f64,
    pub percentage: f64,
}

impl BudgetInfo {
    fn new(budget: &Budget, used: f64) -> Self {
        let percentage = if budget.amount > 0.0 {
            used / budget.amount * 100.0
        } else {
            100.0
        };
        Self {
            budget_id: budget.id.clone(),
            scope: budget.scope_id(),
            total: budget.amount,
            used,
            remaining: budget.amount - used,
            percentage,
        }
    }
}

/// Result of a pre-dispatch budget check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCheck {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Scope that rejected the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_scope: Option<String>,
    /// Scopes that passed, in evaluation order.
    pub budgets: Vec<BudgetInfo>,
}

impl BudgetCheck {
    /// `Err(BudgetExceeded)` when the check rejected the request.
    pub fn into_result(self) -> PlatformResult<Self> {
        if self.allowed {
            return Ok(self);
        }
        Err(PlatformError::BudgetExceeded {
            scope: self.rejected_scope.unwrap_or_default(),
            reason: self.reason.unwrap_or_else(|| "budget exceeded".to_string()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetRequest {
    pub name: String,
    pub kind: BudgetKind,
    #[serde(default)]
    pub target_id: String,
    pub amount: f64,
    pub period: BudgetPeriod,
    /// Empty means the default 70% notify / 90% switch alerts.
    #[serde(default)]
    pub alerts: Vec<AlertThreshold>,
}

impl From<BudgetSeed> for BudgetRequest {
    fn from(seed: BudgetSeed) -> Self {
        Self {
            name: seed.name,
            kind: seed.kind,
            target_id: seed.target_id,
            amount: seed.amount,
            period: seed.period,
            alerts: seed.alerts,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub period: Option<BudgetPeriod>,
    #[serde(default)]
    pub alerts: Option<Vec<AlertThreshold>>,
}

fn validate_amount(amount: f64) -> PlatformResult<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(PlatformError::InvalidRequest(format!(
            "budget amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

fn new_budget(req: BudgetRequest, now: u64) -> PlatformResult<Budget> {
    validate_amount(req.amount)?;
    let target_id = match req.kind {
        BudgetKind::Global => String::new(),
        _ if req.target_id.trim().is_empty() => {
            return Err(PlatformError::InvalidRequest(format!(
                "{:?} budget requires a target_id",
                req.kind
            )));
        }
        _ => req.target_id,
    };
    let alerts = if req.alerts.is_empty() {
        default_alerts()
    } else {
        req.alerts
    };
    Ok(Budget {
        id: req.kind.scope_id(&target_id),
        name: req.name,
        kind: req.kind,
        target_id,
        amount: req.amount,
        period: req.period,
        period_start: period_start(req.period, now),
        alerts,
        created_at: now,
        updated_at: now,
    })
}

#[derive(Default)]
struct BudgetState {
    budgets: HashMap<String, Budget>,
    spending: HashMap<String, Spending>,
    /// Spend not yet flushed to daily statistics.
    pending: HashMap<String, SpendDelta>,
}

impl BudgetState {
    fn used(&self, scope: &str) -> f64 {
        self.spending.get(scope).map(|s| s.amount).unwrap_or(0.0)
    }

    fn add_spend(&mut self, scope: &str, amount: f64, now: u64) {
        let period_start = self.budgets.get(scope).map(|b| b.period_start).unwrap_or(now);
        let spending = self
            .spending
            .entry(scope.to_string())
            .or_insert_with(|| Spending {
                scope: scope.to_string(),
                period_start,
                ..Default::default()
            });
        spending.amount += amount;
        spending.request_count += 1;
        spending.updated_at = now;

        self.pending.entry(scope.to_string()).or_default().merge(SpendDelta {
            amount,
            requests: 1,
        });
    }
}

pub struct AdmissionController {
    state: Arc<RwLock<BudgetState>>,
    /// Serializes budget create/update so the store write can happen
    /// outside the state lock.
    admin: Mutex<()>,
    store: StateStore,
    alerts: EventFeed<BudgetAlert>,
}

impl AdmissionController {
    /// An empty controller; nothing is seeded or restored.
    pub fn new(store: StateStore, config: &BudgetConfig) -> Self {
        Self::with_state(store, config, BudgetState::default())
    }

    fn with_state(store: StateStore, config: &BudgetConfig, state: BudgetState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            admin: Mutex::new(()),
            store,
            alerts: EventFeed::new("budget_alerts", config.alert_capacity),
        }
    }

    /// Restore budgets from the store, seeding `config.defaults` when none
    /// are persisted. Spend is rebuilt from the daily statistics of each
    /// budget's current period.
    pub fn load(store: StateStore, config: &BudgetConfig) -> PlatformResult<Self> {
        let now = epoch_secs();
        let mut budgets = store.list_budgets()?;
        if budgets.is_empty() {
            for seed in &config.defaults {
                let budget = new_budget(seed.clone().into(), now)?;
                store.put_budget(&budget)?;
                info!(budget_id = %budget.id, amount = budget.amount, period = ?budget.period, "default budget seeded");
                budgets.push(budget);
            }
        }

        let mut state = BudgetState::default();
        for budget in budgets {
            let scope = budget.scope_id();
            let amount = store.sum_cost_statistics(&scope, &date_string(budget.period_start))?;
            state.spending.insert(
                scope.clone(),
                Spending {
                    scope: scope.clone(),
                    amount,
                    request_count: 0,
                    period_start: budget.period_start,
                    updated_at: now,
                },
            );
            state.budgets.insert(scope, budget);
        }
        info!(count = state.budgets.len(), "budgets restored from store");
        Ok(Self::with_state(store, config, state))
    }

    // ── Admission ──────────────────────────────────────────────────

    /// Evaluate global, then service, then tenant budgets.
    ///
    /// The first scope whose spend plus `estimated_cost` would exceed its
    /// amount rejects the request. An empty `tenant_id` skips the tenant
    /// scope. Passing scopes raise alerts for every crossed threshold.
    pub async fn check_budget(&self, feature: &str, tenant_id: &str, estimated_cost: f64) -> BudgetCheck {
        let now = epoch_secs();
        let mut scopes = vec![
            (GLOBAL_SCOPE.to_string(), "global budget exceeded".to_string()),
            (service_scope(feature), format!("service budget for {feature} exceeded")),
        ];
        if !tenant_id.is_empty() {
            scopes.push((tenant_scope(tenant_id), format!("tenant budget for {tenant_id} exceeded")));
        }

        let (check, alerts) = {
            let state = self.state.read().await;
            let mut budgets = Vec::new();
            for (scope, reason) in scopes {
                let Some(budget) = state.budgets.get(&scope) else {
                    continue;
                };
                let used = state.used(&scope);
                if used + estimated_cost > budget.amount {
                    warn!(%scope, used, estimated_cost, limit = budget.amount, "budget exceeded");
                    return BudgetCheck {
                        allowed: false,
                        reason: Some(reason),
                        rejected_scope: Some(scope),
                        budgets,
                    };
                }
                budgets.push(BudgetInfo::new(budget, used));
            }

            let alerts: Vec<BudgetAlert> = budgets
                .iter()
                .filter_map(|info| state.budgets.get(&info.scope).map(|b| (b, info.used)))
                .flat_map(|(budget, used)| crossed_thresholds(budget, used, now))
                .collect();
            let check = BudgetCheck {
                allowed: true,
                reason: None,
                rejected_scope: None,
                budgets,
            };
            (check, alerts)
        };

        for alert in alerts {
            debug!(scope = %alert.scope, percentage = alert.percentage, alert_type = ?alert.alert_type, "budget alert");
            self.alerts.publish(alert);
        }
        check
    }

    /// [`check_budget`](Self::check_budget) as a `Result`.
    pub async fn admit(&self, feature: &str, tenant_id: &str, estimated_cost: f64) -> PlatformResult<BudgetCheck> {
        self.check_budget(feature, tenant_id, estimated_cost).await.into_result()
    }

    /// Add a billed request to the global and service scopes.
    ///
    /// The tenant scope is left untouched. The record is persisted on a
    /// blocking worker; a failed write is logged, not returned.
    pub async fn record_cost(&self, record: CostRecord) -> PlatformResult<()> {
        if !record.amount.is_finite() || record.amount < 0.0 {
            return Err(PlatformError::InvalidRequest(format!(
                "cost amount must be non-negative, got {}",
                record.amount
            )));
        }
        let now = epoch_secs();
        {
            let mut state = self.state.write().await;
            state.add_spend(GLOBAL_SCOPE, record.amount, now);
            state.add_spend(&service_scope(&record.feature), record.amount, now);
        }
        debug!(
            request_id = %record.request_id,
            feature = %record.feature,
            provider = %record.provider_id,
            amount = record.amount,
            "cost recorded"
        );

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.put_cost_record(&record) {
                warn!(record_id = %record.id, error = %e, "failed to persist cost record");
            }
        });
        Ok(())
    }

    // ── Budget management ──────────────────────────────────────────

    pub async fn create_budget(&self, req: BudgetRequest) -> PlatformResult<Budget> {
        let now = epoch_secs();
        let budget = new_budget(req, now)?;
        let scope = budget.scope_id();

        let _admin = self.admin.lock().await;
        if self.state.read().await.budgets.contains_key(&scope) {
            return Err(PlatformError::InvalidRequest(format!("budget for {scope} already exists")));
        }
        let stored = budget.clone();
        self.with_store(move |store| store.put_budget(&stored)).await?;

        let mut state = self.state.write().await;
        state.spending.entry(scope.clone()).or_insert_with(|| Spending {
            scope: scope.clone(),
            period_start: budget.period_start,
            updated_at: now,
            ..Default::default()
        });
        state.budgets.insert(scope, budget.clone());
        info!(budget_id = %budget.id, amount = budget.amount, period = ?budget.period, "budget created");
        Ok(budget)
    }

    /// Replace the fields present in `update`. Accumulated spend is kept.
    pub async fn update_budget(&self, id: &str, update: BudgetUpdate) -> PlatformResult<Budget> {
        let now = epoch_secs();
        let _admin = self.admin.lock().await;
        let mut budget = self.get_budget(id).await?;

        if let Some(name) = update.name {
            budget.name = name;
        }
        if let Some(amount) = update.amount {
            validate_amount(amount)?;
            budget.amount = amount;
        }
        if let Some(period) = update.period
            && period != budget.period
        {
            budget.period = period;
            budget.period_start = period_start(period, now);
        }
        if let Some(alerts) = update.alerts {
            budget.alerts = alerts;
        }
        budget.updated_at = now;

        let stored = budget.clone();
        self.with_store(move |store| store.put_budget(&stored)).await?;
        self.state.write().await.budgets.insert(id.to_string(), budget.clone());
        info!(budget_id = %id, amount = budget.amount, "budget updated");
        Ok(budget)
    }

    pub async fn get_budget(&self, id: &str) -> PlatformResult<Budget> {
        self.state
            .read()
            .await
            .budgets
            .get(id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("budget {id}")))
    }

    /// Budgets matching the optional kind and target, sorted by id.
    pub async fn list_budgets(&self, kind: Option<BudgetKind>, target_id: Option<&str>) -> Vec<Budget> {
        let state = self.state.read().await;
        let mut budgets: Vec<Budget> = state
            .budgets
            .values()
            .filter(|b| kind.is_none_or(|k| b.kind == k))
            .filter(|b| target_id.is_none_or(|t| b.target_id == t))
            .cloned()
            .collect();
        budgets.sort_by(|a, b| a.id.cmp(&b.id));
        budgets
    }

    /// Spend of `scope`; zero for a budgeted scope with no spend yet.
    pub async fn get_spending(&self, scope: &str) -> PlatformResult<Spending> {
        let state = self.state.read().await;
        if let Some(spending) = state.spending.get(scope) {
            return Ok(spending.clone());
        }
        match state.budgets.get(scope) {
            Some(budget) => Ok(Spending {
                scope: scope.to_string(),
                period_start: budget.period_start,
                ..Default::default()
            }),
            None => Err(PlatformError::NotFound(format!("spending for {scope}"))),
        }
    }

    /// Most recent cost records, newest first.
    pub fn recent_cost_records(&self, limit: usize) -> PlatformResult<Vec<CostRecord>> {
        Ok(self.store.list_cost_records(limit)?)
    }

    /// Stream alerts until `cancel` fires. Delivery is best-effort.
    pub fn watch_alerts(&self, cancel: watch::Receiver<bool>) -> mpsc::Receiver<BudgetAlert> {
        self.alerts.subscribe(cancel)
    }

    // ── Reconciliation ─────────────────────────────────────────────

    /// Flush pending spend into the daily statistics row for `now`.
    ///
    /// Returns the number of scopes written. Scopes whose write failed
    /// stay pending for the next run.
    pub async fn reconcile_at(&self, now: u64) -> PlatformResult<usize> {
        let deltas = std::mem::take(&mut self.state.write().await.pending);
        if deltas.is_empty() {
            return Ok(0);
        }

        let date = date_string(now);
        let (flushed, failed, last_error) = self
            .with_store(move |store| {
                let mut flushed = 0;
                let mut failed = HashMap::new();
                let mut last_error = None;
                for (scope, delta) in deltas {
                    match store.add_cost_statistic(&date, &scope, delta.amount, delta.requests, now) {
                        Ok(_) => flushed += 1,
                        Err(e) => {
                            last_error = Some(e);
                            failed.insert(scope, delta);
                        }
                    }
                }
                Ok((flushed, failed, last_error))
            })
            .await?;

        if let Some(e) = last_error {
            let mut state = self.state.write().await;
            for (scope, delta) in failed {
                state.pending.entry(scope).or_default().merge(delta);
            }
            return Err(e.into());
        }
        debug!(scopes = flushed, "spend reconciled");
        Ok(flushed)
    }

    pub async fn reconcile(&self) -> PlatformResult<usize> {
        self.reconcile_at(epoch_secs()).await
    }

    /// Run a store operation on the blocking pool.
    async fn with_store<T, F>(&self, op: F) -> PlatformResult<T>
    where
        F: FnOnce(&StateStore) -> StateResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| PlatformError::Storage(format!("store task failed: {e}")))?
            .map_err(PlatformError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertType;
    use infergrid_core::budget::AlertAction;
    use std::time::Duration;

    fn record(feature: &str, amount: f64) -> CostRecord {
        CostRecord {
            id: format!("cost-{amount}"),
            request_id: "req-1".into(),
            feature: feature.into(),
            provider_id: "openai".into(),
            tenant_id: None,
            amount,
            timestamp: 1,
        }
    }

    fn seeded() -> AdmissionController {
        AdmissionController::load(StateStore::open_in_memory().unwrap(), &BudgetConfig::default()).unwrap()
    }

    fn empty() -> AdmissionController {
        AdmissionController::new(StateStore::open_in_memory().unwrap(), &BudgetConfig::default())
    }

    fn request(kind: BudgetKind, target: &str, amount: f64) -> BudgetRequest {
        BudgetRequest {
            name: format!("{kind:?} {target}"),
            kind,
            target_id: target.into(),
            amount,
            period: BudgetPeriod::Monthly,
            alerts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn load_seeds_defaults_once() {
        let store = StateStore::open_in_memory().unwrap();
        let controller = AdmissionController::load(store.clone(), &BudgetConfig::default()).unwrap();
        let budgets = controller.list_budgets(None, None).await;
        assert_eq!(budgets.len(), 2);
        assert_eq!(budgets[0].id, "global");
        assert_eq!(budgets[0].amount, 30_000.0);
        assert_eq!(budgets[1].id, "service:text_to_image");
        assert_eq!(budgets[1].alerts[1].action, AlertAction::Block);

        let again = AdmissionController::load(store, &BudgetConfig::default()).unwrap();
        assert_eq!(again.list_budgets(None, None).await.len(), 2);
    }

    #[tokio::test]
    async fn global_budget_exceeded() {
        let controller = seeded();
        controller.record_cost(record("text_generation", 29_999.0)).await.unwrap();

        let check = controller.check_budget("text_generation", "", 2.0).await;
        assert!(!check.allowed);
        assert!(check.reason.as_deref().unwrap().contains("global budget exceeded"));
        assert_eq!(check.rejected_scope.as_deref(), Some("global"));

        let err = check.into_result().unwrap_err();
        assert_eq!(err.status_class(), 429);

        assert!(controller.check_budget("text_generation", "", 1.0).await.allowed);
    }

    #[tokio::test]
    async fn service_budget_checked_after_global() {
        let controller = seeded();
        controller.record_cost(record("text_to_image", 999.5)).await.unwrap();

        let check = controller.check_budget("text_to_image", "", 1.0).await;
        assert!(!check.allowed);
        assert_eq!(check.reason.as_deref(), Some("service budget for text_to_image exceeded"));
        // The global scope passed and is reported.
        assert_eq!(check.budgets.len(), 1);
        assert_eq!(check.budgets[0].scope, "global");
    }

    #[tokio::test]
    async fn tenant_scope_only_when_tenant_given() {
        let controller = empty();
        controller
            .create_budget(request(BudgetKind::Tenant, "acme", 10.0))
            .await
            .unwrap();

        let check = controller.check_budget("text_generation", "acme", 11.0).await;
        assert_eq!(check.reason.as_deref(), Some("tenant budget for acme exceeded"));
        assert!(controller.check_budget("text_generation", "", 11.0).await.allowed);
    }

    #[tokio::test]
    async fn record_cost_leaves_tenant_scope_alone() {
        let controller = empty();
        controller
            .create_budget(request(BudgetKind::Tenant, "acme", 10.0))
            .await
            .unwrap();
        let mut rec = record("text_generation", 4.0);
        rec.tenant_id = Some("acme".into());
        controller.record_cost(rec).await.unwrap();

        assert_eq!(controller.get_spending("tenant:acme").await.unwrap().amount, 0.0);
        assert_eq!(controller.get_spending("global").await.unwrap().amount, 4.0);
        assert_eq!(controller.get_spending("service:text_generation").await.unwrap().amount, 4.0);
    }

    #[tokio::test]
    async fn rejected_check_has_no_side_effects() {
        let controller = seeded();
        controller.record_cost(record("text_generation", 100.0)).await.unwrap();
        let before = controller.get_spending("global").await.unwrap();

        assert!(!controller.check_budget("text_generation", "", 1e9).await.allowed);
        assert_eq!(controller.get_spending("global").await.unwrap(), before);
    }

    #[tokio::test]
    async fn concurrent_record_cost_loses_nothing() {
        let controller = Arc::new(empty());
        let n = 200;
        let mut handles = Vec::new();
        for _ in 0..n {
            let c = controller.clone();
            handles.push(tokio::spawn(async move {
                c.record_cost(record("fresh_feature", 5.0)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let spending = controller.get_spending("service:fresh_feature").await.unwrap();
        assert_eq!(spending.amount, 5.0 * n as f64);
        assert_eq!(spending.request_count, n);
        assert_eq!(controller.get_spending("global").await.unwrap().amount, 5.0 * n as f64);
    }

    #[tokio::test]
    async fn negative_cost_rejected() {
        let controller = empty();
        let err = controller.record_cost(record("f", -1.0)).await.unwrap_err();
        assert!(matches!(err, PlatformError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn passing_check_raises_alerts() {
        let controller = empty();
        controller
            .create_budget(request(BudgetKind::Global, "", 100.0))
            .await
            .unwrap();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut alerts = controller.watch_alerts(cancel_rx);
        tokio::task::yield_now().await;

        controller.record_cost(record("f", 92.0)).await.unwrap();
        assert!(controller.check_budget("f", "", 1.0).await.allowed);

        let first = tokio::time::timeout(Duration::from_secs(1), alerts.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.alert_type, AlertType::Critical);
        assert_eq!(first.scope, "global");
        assert_eq!(first.action, AlertAction::Notify);
    }

    #[tokio::test]
    async fn reconcile_is_additive() {
        let controller = empty();
        let now = 1_715_779_200;
        controller.record_cost(record("f", 5.0)).await.unwrap();
        assert_eq!(controller.reconcile_at(now).await.unwrap(), 2);
        assert_eq!(controller.reconcile_at(now).await.unwrap(), 0);

        controller.record_cost(record("f", 3.0)).await.unwrap();
        controller.reconcile_at(now).await.unwrap();

        let stat = controller
            .store
            .get_cost_statistic("2024-05-15", "service:f")
            .unwrap()
            .unwrap();
        assert_eq!(stat.amount, 8.0);
        assert_eq!(stat.request_count, 2);
    }

    #[tokio::test]
    async fn load_restores_spend_from_statistics() {
        let store = StateStore::open_in_memory().unwrap();
        let controller = AdmissionController::load(store.clone(), &BudgetConfig::default()).unwrap();
        controller.record_cost(record("text_to_image", 42.0)).await.unwrap();
        controller.reconcile().await.unwrap();

        let restored = AdmissionController::load(store, &BudgetConfig::default()).unwrap();
        assert_eq!(restored.get_spending("global").await.unwrap().amount, 42.0);
        assert_eq!(
            restored.get_spending("service:text_to_image").await.unwrap().amount,
            42.0
        );
    }

    #[tokio::test]
    async fn budget_crud() {
        let controller = empty();
        let created = controller
            .create_budget(request(BudgetKind::Service, "text_generation", 50.0))
            .await
            .unwrap();
        assert_eq!(created.id, "service:text_generation");
        assert_eq!(created.alerts, default_alerts());

        let dup = controller
            .create_budget(request(BudgetKind::Service, "text_generation", 60.0))
            .await;
        assert!(matches!(dup, Err(PlatformError::InvalidRequest(_))));

        let updated = controller
            .update_budget(
                &created.id,
                BudgetUpdate {
                    amount: Some(75.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.amount, 75.0);
        assert_eq!(controller.get_budget(&created.id).await.unwrap().amount, 75.0);

        assert!(matches!(
            controller.get_budget("tenant:nobody").await,
            Err(PlatformError::NotFound(_))
        ));
        assert!(matches!(
            controller.get_spending("tenant:nobody").await,
            Err(PlatformError::NotFound(_))
        ));
        assert_eq!(controller.get_spending(&created.id).await.unwrap().amount, 0.0);
        assert_eq!(
            controller.list_budgets(Some(BudgetKind::Global), None).await.len(),
            0
        );
        assert_eq!(
            controller
                .list_budgets(Some(BudgetKind::Service), Some("text_generation"))
                .await
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn scoped_budget_requires_target() {
        let controller = empty();
        let err = controller
            .create_budget(request(BudgetKind::Tenant, " ", 10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn persisted_cost_records_are_listed() {
        let controller = empty();
        controller.record_cost(record("f", 1.0)).await.unwrap();
        let mut records = Vec::new();
        for _ in 0..50 {
            records = controller.recent_cost_records(10).unwrap();
            if !records.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(records.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_keep_store_and_memory_in_step() {
        let controller = Arc::new(empty());
        let handles: Vec<_> = [10.0, 20.0, 30.0, 40.0]
            .into_iter()
            .map(|amount| {
                let controller = controller.clone();
                tokio::spawn(async move {
                    controller
                        .create_budget(request(BudgetKind::Tenant, "acme", amount))
                        .await
                })
            })
            .collect();

        let mut created = Vec::new();
        for handle in handles {
            if let Ok(budget) = handle.await.unwrap() {
                created.push(budget);
            }
        }
        assert_eq!(created.len(), 1);

        let stored = controller.store.get_budget("tenant:acme").unwrap().unwrap();
        assert_eq!(stored.amount, created[0].amount);
        assert_eq!(controller.get_budget("tenant:acme").await.unwrap().amount, stored.amount);
    }

    #[tokio::test]
    async fn update_reaches_store_before_returning() {
        let controller = seeded();
        controller
            .update_budget(
                "global",
                BudgetUpdate {
                    amount: Some(2500.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(controller.store.get_budget("global").unwrap().unwrap().amount, 2500.0);

        let err = controller
            .update_budget(
                "global",
                BudgetUpdate {
                    amount: Some(-1.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::InvalidRequest(_)));
        assert_eq!(controller.store.get_budget("global").unwrap().unwrap().amount, 2500.0);
    }
}
