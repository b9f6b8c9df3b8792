//! Inference and registration handlers, and the response envelope.
//!
//! Every body is `{ "success": true, "data": ... }` or
//! `{ "success": false, "error": { "code", "message" } }`.

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use infergrid_core::inference::*;
use infergrid_core::time::epoch_secs;
use infergrid_core::{PlatformError, PlatformResult};
use infergrid_registry::{HeartbeatRequest, RegisterRequest, ServiceFilter, ShutdownRequest};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{ApiState, DEFAULT_TENANT, TENANT_HEADER};

/// Code for requests rejected by the rate limiter.
pub const RATE_LIMITED_CODE: u32 = 1003;

/// Code for bodies that do not parse.
pub const BAD_PARAMS_CODE: u32 = 1001;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: u32,
    pub message: String,
}

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub fn error_with(status: StatusCode, code: u32, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }),
    )
        .into_response()
}

/// Map a platform error to its status class and code.
pub fn error_response(err: &PlatformError) -> Response {
    let status = StatusCode::from_u16(err.status_class()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_with(status, err.code(), err.to_string())
}

pub fn reply<T: Serialize>(result: PlatformResult<T>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Unwrap a JSON body, or answer 400 with the parse error.
pub fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    body.map(|Json(v)| v)
        .map_err(|e| error_with(StatusCode::BAD_REQUEST, BAD_PARAMS_CODE, e.body_text()))
}

pub fn tenant_id(headers: &HeaderMap) -> String {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_TENANT)
        .to_string()
}

// ── Inference ──────────────────────────────────────────────────

async fn run_inference(
    state: &ApiState,
    headers: &HeaderMap,
    feature: &str,
    params: Result<InferenceParams, Response>,
) -> Response {
    let tenant = tenant_id(headers);
    if !state.limiter.allow(&tenant, feature) {
        warn!(%tenant, %feature, "rate limited");
        return error_with(
            StatusCode::TOO_MANY_REQUESTS,
            RATE_LIMITED_CODE,
            "rate limit exceeded, retry later",
        );
    }

    let params = match params {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if let Err(e) = params.validate() {
        return error_response(&e);
    }

    let estimate = match state.router.estimate_cost(feature).await {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = state.budget.admit(feature, &tenant, estimate).await {
        return error_response(&e);
    }

    match state.router.route_as(feature, params, Some(&tenant)).await {
        Ok(resp) => {
            debug!(
                request_id = %resp.request_id,
                provider = %resp.provider_id,
                total_ms = resp.timing.total_ms,
                "inference served"
            );
            ApiResponse::ok(resp).into_response()
        }
        Err(e) => {
            warn!(%tenant, %feature, error = %e, "inference failed");
            error_response(&e)
        }
    }
}

/// POST /inference/text-to-image
pub async fn text_to_image(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<TextToImageParams>, JsonRejection>,
) -> Response {
    let params = parse_body(body).map(InferenceParams::TextToImage);
    run_inference(&state, &headers, "text_to_image", params).await
}

/// POST /inference/image-edit
pub async fn image_edit(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<ImageEditParams>, JsonRejection>,
) -> Response {
    let params = parse_body(body).map(InferenceParams::ImageEdit);
    run_inference(&state, &headers, "image_editing", params).await
}

/// POST /inference/image-stylize
pub async fn image_stylize(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<StylizeParams>, JsonRejection>,
) -> Response {
    let params = parse_body(body).map(InferenceParams::Stylization);
    run_inference(&state, &headers, "image_stylization", params).await
}

/// POST /inference/text-generation
pub async fn text_generation(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<TextGenerationParams>, JsonRejection>,
) -> Response {
    let params = parse_body(body).map(InferenceParams::TextGeneration);
    run_inference(&state, &headers, "text_generation", params).await
}

// ── Services ───────────────────────────────────────────────────

/// POST /api/v1/services/register
pub async fn register_service(
    State(state): State<ApiState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    match parse_body(body) {
        Ok(req) => reply(state.registry.register(req).await),
        Err(resp) => resp,
    }
}

/// POST /api/v1/services/{id}/heartbeat
pub async fn heartbeat(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Response {
    let mut req = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if req.service_id.is_empty() {
        req.service_id = id;
    } else if req.service_id != id {
        return error_response(&PlatformError::InvalidRequest(format!(
            "body service_id {} does not match path {id}",
            req.service_id
        )));
    }
    reply(state.registry.heartbeat(req).await)
}

/// POST /api/v1/services/{id}/shutdown
///
/// The body is optional.
pub async fn shutdown_service(State(state): State<ApiState>, Path(id): Path<String>, body: Bytes) -> Response {
    let req = if body.is_empty() {
        ShutdownRequest::default()
    } else {
        match serde_json::from_slice::<ShutdownRequest>(&body) {
            Ok(req) => req,
            Err(e) => return error_with(StatusCode::BAD_REQUEST, BAD_PARAMS_CODE, e.to_string()),
        }
    };
    reply(state.registry.shutdown(&id, &req.reason).await)
}

/// POST /api/v1/services/{id}/config
pub async fn push_config(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    match parse_body(body) {
        Ok(config) => reply(state.registry.push_config(&id, config).await),
        Err(resp) => resp,
    }
}

/// GET /api/v1/services
pub async fn list_services(State(state): State<ApiState>, Query(filter): Query<ServiceFilter>) -> Response {
    let mut list = state.registry.list_services(&filter).await;
    list.services = list.services.iter().map(|s| s.redacted()).collect();
    ApiResponse::ok(list).into_response()
}

/// GET /api/v1/services/{id}
pub async fn get_service(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    reply(state.registry.get_service(&id).await.map(|s| s.redacted()))
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "time": epoch_secs(),
    }))
}
