//! Budget and spending handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use infergrid_budget::{BudgetRequest, BudgetUpdate};
use infergrid_core::budget::BudgetKind;
use serde::Deserialize;

use crate::ApiState;
use crate::handlers::{ApiResponse, error_response, parse_body, reply};

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub feature: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub estimated_cost: f64,
}

/// GET /api/v1/budget/check
///
/// Dry run: a rejection is reported in the body, not as an error.
pub async fn check_budget(State(state): State<ApiState>, Query(q): Query<CheckQuery>) -> Response {
    let check = state
        .budget
        .check_budget(&q.feature, &q.tenant_id, q.estimated_cost)
        .await;
    ApiResponse::ok(check).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub kind: Option<BudgetKind>,
    #[serde(default)]
    pub target_id: Option<String>,
}

/// GET /api/v1/budgets
pub async fn list_budgets(State(state): State<ApiState>, Query(q): Query<ListQuery>) -> Response {
    let budgets = state.budget.list_budgets(q.kind, q.target_id.as_deref()).await;
    ApiResponse::ok(budgets).into_response()
}

/// POST /api/v1/budgets
pub async fn create_budget(
    State(state): State<ApiState>,
    body: Result<Json<BudgetRequest>, JsonRejection>,
) -> Response {
    let req = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    match state.budget.create_budget(req).await {
        Ok(budget) => (StatusCode::CREATED, ApiResponse::ok(budget)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/v1/budgets/{id}
pub async fn get_budget(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    reply(state.budget.get_budget(&id).await)
}

/// PUT /api/v1/budgets/{id}
pub async fn update_budget(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<BudgetUpdate>, JsonRejection>,
) -> Response {
    match parse_body(body) {
        Ok(update) => reply(state.budget.update_budget(&id, update).await),
        Err(resp) => resp,
    }
}

/// GET /api/v1/spending/{scope}
pub async fn get_spending(State(state): State<ApiState>, Path(scope): Path<String>) -> Response {
    reply(state.budget.get_spending(&scope).await)
}
