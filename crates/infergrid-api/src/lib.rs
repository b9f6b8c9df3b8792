//! infergrid-api — the InferGrid gateway.
//!
//! axum handlers over the control-plane components. Inference requests
//! pass the rate limiter, parameter validation and the budget check
//! before the routing engine dispatches them.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/inference/text-to-image` | Generate images from a prompt |
//! | POST | `/inference/image-edit` | Edit an image |
//! | POST | `/inference/image-stylize` | Restyle an image |
//! | POST | `/inference/text-generation` | Generate text |
//! | POST | `/api/v1/services/register` | Register an instance |
//! | POST | `/api/v1/services/{id}/heartbeat` | Instance heartbeat |
//! | POST | `/api/v1/services/{id}/shutdown` | Drain an instance |
//! | POST | `/api/v1/services/{id}/config` | Queue config for the next heartbeat |
//! | GET | `/api/v1/services` | List instances |
//! | GET | `/api/v1/services/{id}` | Instance details |
//! | GET | `/api/v1/budget/check` | Dry-run a budget check |
//! | GET, POST | `/api/v1/budgets` | List or create budgets |
//! | GET, PUT | `/api/v1/budgets/{id}` | Read or update a budget |
//! | GET | `/api/v1/spending/{scope}` | Current spend of a scope |
//! | GET | `/api/v1/scale` | List scale configs |
//! | GET, PUT | `/api/v1/scale/{feature}` | Read or replace a scale config |
//! | POST | `/api/v1/scale/{feature}/check` | Run one scale check now |
//! | POST | `/api/v1/scale/{feature}/up` | Add replicas |
//! | POST | `/api/v1/scale/{feature}/zero` | Scale to zero |
//! | GET | `/healthz` | Liveness |

pub mod budget_handlers;
pub mod handlers;
pub mod scale_handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use infergrid_autoscale::AutoScaler;
use infergrid_budget::AdmissionController;
use infergrid_ratelimit::RateLimiter;
use infergrid_registry::ServiceRegistry;
use infergrid_router::RoutingEngine;

/// Header carrying the calling tenant.
pub const TENANT_HEADER: &str = "x-tenant-id";

pub const DEFAULT_TENANT: &str = "default";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<ServiceRegistry>,
    pub router: Arc<RoutingEngine>,
    pub budget: Arc<AdmissionController>,
    pub scaler: Arc<AutoScaler>,
    pub limiter: Arc<dyn RateLimiter>,
}

/// Build the complete gateway router.
pub fn build_router(state: ApiState) -> Router {
    let inference = Router::new()
        .route("/text-to-image", post(handlers::text_to_image))
        .route("/image-edit", post(handlers::image_edit))
        .route("/image-stylize", post(handlers::image_stylize))
        .route("/text-generation", post(handlers::text_generation));

    let api_routes = Router::new()
        .route("/services", get(handlers::list_services))
        .route("/services/register", post(handlers::register_service))
        .route("/services/{id}", get(handlers::get_service))
        .route("/services/{id}/heartbeat", post(handlers::heartbeat))
        .route("/services/{id}/shutdown", post(handlers::shutdown_service))
        .route("/services/{id}/config", post(handlers::push_config))
        .route("/budget/check", get(budget_handlers::check_budget))
        .route(
            "/budgets",
            get(budget_handlers::list_budgets).post(budget_handlers::create_budget),
        )
        .route(
            "/budgets/{id}",
            get(budget_handlers::get_budget).put(budget_handlers::update_budget),
        )
        .route("/spending/{scope}", get(budget_handlers::get_spending))
        .route("/scale", get(scale_handlers::list_scale_configs))
        .route(
            "/scale/{feature}",
            get(scale_handlers::get_scale_config).put(scale_handlers::update_scale_config),
        )
        .route("/scale/{feature}/check", post(scale_handlers::check_scale))
        .route("/scale/{feature}/up", post(scale_handlers::scale_up))
        .route("/scale/{feature}/zero", post(scale_handlers::scale_to_zero));

    Router::new()
        .nest("/inference", inference)
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}
