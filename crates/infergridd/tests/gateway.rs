//! Gateway regression tests.
//!
//! Drives the full axum router over in-memory components: registration,
//! inference admission (rate limit, validation, budget), and the budget
//! and scale endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use infergrid_api::{ApiState, build_router};
use infergrid_autoscale::{AutoScaler, InMemoryClusterClient};
use infergrid_budget::AdmissionController;
use infergrid_core::catalog::{CostConfig, Feature, ProviderConfig, ProviderKind};
use infergrid_core::config::{AutoscaleConfig, BudgetConfig, KeyTier, RateLimitAlgorithm, RegistryConfig};
use infergrid_core::inference::{TextGenerationParams, TextOutput};
use infergrid_core::{PlatformResult, StaticConfigStore};
use infergrid_ratelimit::KeyedRateLimiter;
use infergrid_registry::ServiceRegistry;
use infergrid_router::{ApiKey, InMemoryKeyManager, Provider, ProviderFactory, RoutingEngine};
use infergrid_state::StateStore;
use serde_json::{Value, json};
use tower::ServiceExt;

/// Echoes the prompt back.
struct Echo;

#[async_trait]
impl Provider for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate_text(&self, params: &TextGenerationParams) -> PlatformResult<TextOutput> {
        Ok(TextOutput {
            text: params.prompt.clone().unwrap_or_default(),
            finish_reason: Some("stop".into()),
            tokens_input: 1,
            tokens_output: 1,
        })
    }
}

fn text_feature() -> Feature {
    Feature {
        id: "text_generation".into(),
        name: "Text generation".into(),
        category: "text".into(),
        description: String::new(),
        enabled: true,
        providers: vec![ProviderConfig::new("echo", ProviderKind::ThirdParty, "echo")],
        routing: None,
        cost: Some(CostConfig {
            self_hosted_per_hour: 0.0,
            third_party_per_request: HashMap::from([("echo".to_string(), 0.5)]),
        }),
    }
}

async fn gateway_with_limit(limit: u32) -> Router {
    let store = StateStore::open_in_memory().unwrap();
    let registry = Arc::new(ServiceRegistry::new(store.clone(), &RegistryConfig::default()));
    let budget = Arc::new(AdmissionController::load(store, &BudgetConfig::default()).unwrap());

    let keys = Arc::new(InMemoryKeyManager::new());
    keys.add_key(
        ApiKey {
            id: "echo-primary".into(),
            vendor: "echo".into(),
            service: "text_generation".into(),
            alias: String::new(),
            tier: KeyTier::Primary,
            enabled: true,
        },
        "sk-test",
    )
    .await;
    let mut providers = ProviderFactory::new();
    providers.register("echo", |_| Arc::new(Echo) as Arc<dyn Provider>);

    let router = Arc::new(RoutingEngine::new(
        Arc::new(StaticConfigStore::new(vec![text_feature()])),
        registry.clone(),
        keys,
        providers,
        budget.clone(),
    ));
    let scaler = Arc::new(AutoScaler::new(
        registry.clone(),
        Arc::new(InMemoryClusterClient::new()),
        &AutoscaleConfig::default(),
    ));
    let limiter = Arc::new(KeyedRateLimiter::new(
        RateLimitAlgorithm::SlidingWindow,
        limit,
        Duration::from_secs(60),
    ));

    build_router(ApiState {
        registry,
        router,
        budget,
        scaler,
        limiter,
    })
}

async fn gateway() -> Router {
    gateway_with_limit(100).await
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>, tenant: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = tenant {
        builder = builder.header("x-tenant-id", t);
    }
    let req = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&v).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn error_code(body: &Value) -> u64 {
    body["error"]["code"].as_u64().unwrap_or_default()
}

#[tokio::test]
async fn healthz_is_ok() {
    let router = gateway().await;
    let (status, body) = call(&router, "GET", "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn registration_lifecycle() {
    let router = gateway().await;
    let (status, body) = call(
        &router,
        "POST",
        "/api/v1/services/register",
        Some(json!({
            "service_type": "text_to_image",
            "hostname": "gpu-0",
            "ip_address": "10.0.0.7",
            "port": 9000,
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["data"]["service_id"].as_str().unwrap().to_string();
    let token = body["data"]["token"].as_str().unwrap().to_string();
    assert!(id.starts_with("text_to_image-"));
    assert_eq!(body["data"]["heartbeat_interval_seconds"], 30);

    let (status, body) = call(
        &router,
        "POST",
        &format!("/api/v1/services/{id}/heartbeat"),
        Some(json!({ "service_id": id, "token": token, "current_load": 0.3 })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "healthy");

    let (_, body) = call(&router, "GET", "/api/v1/services?service_type=text_to_image", None, None).await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["healthy"], 1);
    assert_eq!(body["data"]["services"][0]["token"], "");

    let (status, body) = call(
        &router,
        "POST",
        &format!("/api/v1/services/{id}/shutdown"),
        Some(json!({ "reason": "maintenance" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["grace_period_seconds"], 30);

    let (_, body) = call(
        &router,
        "POST",
        &format!("/api/v1/services/{id}/heartbeat"),
        Some(json!({ "service_id": id, "token": token })),
        None,
    )
    .await;
    assert_eq!(body["data"]["status"], "draining");
    assert_eq!(body["data"]["drain_requested"], true);
}

#[tokio::test]
async fn heartbeat_with_bad_token_is_unauthorized() {
    let router = gateway().await;
    let (_, body) = call(
        &router,
        "POST",
        "/api/v1/services/register",
        Some(json!({
            "service_type": "image_editing",
            "hostname": "gpu-1",
            "ip_address": "10.0.0.8",
            "port": 9000,
        })),
        None,
    )
    .await;
    let id = body["data"]["service_id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &router,
        "POST",
        &format!("/api/v1/services/{id}/heartbeat"),
        Some(json!({ "service_id": id, "token": "forged" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = call(&router, "GET", "/api/v1/services/unknown-0000", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn text_generation_is_routed_and_costed() {
    let router = gateway().await;
    let (status, body) = call(
        &router,
        "POST",
        "/inference/text-generation",
        Some(json!({ "prompt": "hello" })),
        Some("acme"),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["provider_id"], "echo");
    assert_eq!(body["data"]["output"]["text"], "hello");
    assert_eq!(body["data"]["cost"], 0.5);

    let (_, body) = call(&router, "GET", "/api/v1/spending/service:text_generation", None, None).await;
    assert_eq!(body["data"]["amount"], 0.5);
    let (_, body) = call(&router, "GET", "/api/v1/spending/global", None, None).await;
    assert_eq!(body["data"]["amount"], 0.5);
}

#[tokio::test]
async fn malformed_and_invalid_params_are_bad_requests() {
    let router = gateway().await;
    let (status, body) = call(
        &router,
        "POST",
        "/inference/text-to-image",
        Some(json!({ "width": 512 })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), 1001);

    let (status, body) = call(
        &router,
        "POST",
        "/inference/text-generation",
        Some(json!({ "prompt": "   " })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), 1001);
}

#[tokio::test]
async fn unknown_feature_is_not_found() {
    let router = gateway().await;
    let (status, body) = call(
        &router,
        "POST",
        "/inference/image-stylize",
        Some(json!({ "image": "https://img/1.png", "style": "anime" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn rate_limit_rejects_with_1003() {
    let router = gateway_with_limit(2).await;
    for _ in 0..2 {
        let (status, _) = call(
            &router,
            "POST",
            "/inference/text-generation",
            Some(json!({ "prompt": "hi" })),
            Some("burst"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = call(
        &router,
        "POST",
        "/inference/text-generation",
        Some(json!({ "prompt": "hi" })),
        Some("burst"),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&body), 1003);

    // Other tenants have their own window.
    let (status, _) = call(
        &router,
        "POST",
        "/inference/text-generation",
        Some(json!({ "prompt": "hi" })),
        Some("calm"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn tenant_budget_blocks_before_dispatch() {
    let router = gateway().await;
    let (status, body) = call(
        &router,
        "POST",
        "/api/v1/budgets",
        Some(json!({
            "name": "acme daily",
            "kind": "tenant",
            "target_id": "acme",
            "amount": 0.4,
            "period": "daily",
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"], "tenant:acme");

    let (status, body) = call(
        &router,
        "POST",
        "/inference/text-generation",
        Some(json!({ "prompt": "hi" })),
        Some("acme"),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&body), 1004);

    let (_, body) = call(
        &router,
        "GET",
        "/api/v1/budget/check?feature=text_generation&tenant_id=acme&estimated_cost=0.5",
        None,
        None,
    )
    .await;
    assert_eq!(body["data"]["allowed"], false);
    assert_eq!(body["data"]["reason"], "tenant budget for acme exceeded");

    let (status, body) = call(
        &router,
        "PUT",
        "/api/v1/budgets/tenant:acme",
        Some(json!({ "amount": 10.0 })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["amount"], 10.0);

    let (status, _) = call(
        &router,
        "POST",
        "/inference/text-generation",
        Some(json!({ "prompt": "hi" })),
        Some("acme"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn default_budgets_are_seeded() {
    let router = gateway().await;
    let (_, body) = call(&router, "GET", "/api/v1/budgets", None, None).await;
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["global", "service:text_to_image"]);

    let (_, body) = call(&router, "GET", "/api/v1/budgets?kind=service", None, None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn scale_endpoints() {
    let router = gateway().await;
    let (_, body) = call(&router, "GET", "/api/v1/scale", None, None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (status, body) = call(
        &router,
        "POST",
        "/api/v1/scale/text_to_image/up",
        Some(json!({ "count": 2 })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["replicas"], 2);

    let (status, body) = call(&router, "POST", "/api/v1/scale/text_to_image/check", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["current_replicas"], 2);

    let (status, _) = call(
        &router,
        "PUT",
        "/api/v1/scale/chat",
        Some(json!({
            "feature_id": "ignored",
            "min_instances": 1,
            "max_instances": 2,
            "target_queue_size": 5,
            "idle_timeout_secs": 60,
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(&router, "GET", "/api/v1/scale/chat", None, None).await;
    assert_eq!(body["data"]["feature_id"], "chat");
    assert_eq!(body["data"]["target_cpu"], 70.0);

    let (status, body) = call(&router, "POST", "/api/v1/scale/chat/zero", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), 1001);

    let (status, _) = call(&router, "GET", "/api/v1/scale/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
