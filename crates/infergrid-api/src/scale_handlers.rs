//! Scale config and manual scaling handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use infergrid_core::config::ScaleConfig;
use serde::{Deserialize, Serialize};

use crate::ApiState;
use crate::handlers::{ApiResponse, parse_body, reply};

/// GET /api/v1/scale
pub async fn list_scale_configs(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.scaler.list_scale_configs().await).into_response()
}

/// GET /api/v1/scale/{feature}
pub async fn get_scale_config(State(state): State<ApiState>, Path(feature): Path<String>) -> Response {
    reply(state.scaler.get_scale_config(&feature).await)
}

/// PUT /api/v1/scale/{feature}
///
/// The path names the feature; a `feature_id` in the body is ignored.
pub async fn update_scale_config(
    State(state): State<ApiState>,
    Path(feature): Path<String>,
    body: Result<Json<ScaleConfig>, JsonRejection>,
) -> Response {
    let mut config = match parse_body(body) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    config.feature_id = feature;
    let result = state.scaler.update_scale_config(config.clone()).await.map(|()| config);
    reply(result)
}

/// POST /api/v1/scale/{feature}/check
pub async fn check_scale(State(state): State<ApiState>, Path(feature): Path<String>) -> Response {
    reply(state.scaler.check_scale(&feature).await)
}

#[derive(Debug, Deserialize)]
pub struct ScaleUpRequest {
    #[serde(default = "one")]
    pub count: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Serialize)]
pub struct ReplicaCount {
    pub feature_id: String,
    pub replicas: u32,
}

/// POST /api/v1/scale/{feature}/up
pub async fn scale_up(
    State(state): State<ApiState>,
    Path(feature): Path<String>,
    body: Result<Json<ScaleUpRequest>, JsonRejection>,
) -> Response {
    let req = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    let result = state
        .scaler
        .scale_up(&feature, req.count)
        .await
        .map(|replicas| ReplicaCount {
            feature_id: feature.clone(),
            replicas,
        });
    reply(result)
}

/// POST /api/v1/scale/{feature}/zero
pub async fn scale_to_zero(State(state): State<ApiState>, Path(feature): Path<String>) -> Response {
    let result = state.scaler.scale_to_zero(&feature).await.map(|()| ReplicaCount {
        feature_id: feature.clone(),
        replicas: 0,
    });
    reply(result)
}
