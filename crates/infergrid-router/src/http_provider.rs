//! JSON-over-HTTP provider for self-hosted instances and plain HTTP vendors.
//!
//! Each call opens one HTTP/1.1 connection to the endpoint, posts the
//! request parameters as JSON, and decodes the JSON answer. The whole
//! exchange is bounded by the configured timeout.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use infergrid_core::inference::*;
use infergrid_core::{PlatformError, PlatformResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::provider::{Provider, ProviderSettings};

pub const TEXT_PATH: &str = "/v1/text/generate";
pub const IMAGE_PATH: &str = "/v1/images/generate";
pub const EDIT_PATH: &str = "/v1/images/edit";
pub const STYLIZE_PATH: &str = "/v1/images/stylize";
pub const HEALTH_PATH: &str = "/health";

pub struct HttpProvider {
    /// `host:port` to connect to.
    address: String,
    /// Path prefix from the endpoint, without a trailing slash.
    base_path: String,
    api_key: Option<String>,
    model: Option<String>,
    timeout: Duration,
}

/// Split `http://host:port/prefix` into `("host:port", "/prefix")`.
fn split_endpoint(endpoint: &str) -> (String, String) {
    let rest = endpoint.strip_prefix("http://").unwrap_or(endpoint);
    let rest = rest.trim_end_matches('/');
    match rest.find('/') {
        Some(i) => (rest[..i].to_string(), rest[i..].to_string()),
        None => (rest.to_string(), String::new()),
    }
}

#[derive(Serialize)]
struct Envelope<'a, P: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(flatten)]
    params: &'a P,
}

fn transport(code: &str, err: impl std::fmt::Display) -> PlatformError {
    PlatformError::provider(code, err.to_string(), true)
}

impl HttpProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        let (address, base_path) = split_endpoint(settings.endpoint.as_deref().unwrap_or_default());
        Self {
            address,
            base_path,
            api_key: settings.api_key,
            model: settings.model,
            timeout: settings.timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> PlatformResult<(StatusCode, Bytes)> {
        if self.address.is_empty() || self.address.starts_with("https:") {
            return Err(PlatformError::provider(
                "bad_endpoint",
                format!("endpoint {:?} is not a plain http address", self.address),
                false,
            ));
        }
        let uri = format!("http://{}{}{path}", self.address, self.base_path);

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&self.address)
                .await
                .map_err(|e| transport("connect_failed", e))?;
            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| transport("handshake_failed", e))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let mut builder = http::Request::builder()
                .method(method)
                .uri(&uri)
                .header("host", &self.address)
                .header("user-agent", "infergrid-router/0.1")
                .header("content-type", "application/json");
            if let Some(key) = &self.api_key {
                builder = builder.header("authorization", format!("Bearer {key}"));
            }
            let req = builder
                .body(Full::new(Bytes::from(body.unwrap_or_default())))
                .map_err(|e| PlatformError::provider("bad_request", e.to_string(), false))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| transport("request_failed", e))?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| transport("body_failed", e))?
                .to_bytes();
            Ok((status, bytes))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%uri, "provider request timed out");
                Err(PlatformError::provider("timeout", format!("{uri} timed out"), true))
            }
        }
    }

    async fn post_json<P, T>(&self, path: &str, params: &P) -> PlatformResult<T>
    where
        P: Serialize + Sync,
        T: DeserializeOwned + Send,
    {
        let envelope = Envelope {
            model: self.model.as_deref(),
            params,
        };
        let payload = serde_json::to_vec(&envelope)
            .map_err(|e| PlatformError::InvalidRequest(format!("encode request: {e}")))?;

        let (status, body) = self.send(Method::POST, path, Some(payload)).await?;
        if !status.is_success() {
            let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
            debug!(%status, address = %self.address, path, "provider returned an error status");
            return Err(PlatformError::provider(
                format!("http_{}", status.as_u16()),
                String::from_utf8_lossy(&body).into_owned(),
                retryable,
            ));
        }
        serde_json::from_slice(&body).map_err(|e| PlatformError::provider("invalid_response", e.to_string(), false))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate_text(&self, params: &TextGenerationParams) -> PlatformResult<TextOutput> {
        self.post_json(TEXT_PATH, params).await
    }

    async fn generate_image(&self, params: &TextToImageParams) -> PlatformResult<ImageOutput> {
        self.post_json(IMAGE_PATH, params).await
    }

    async fn edit_image(&self, params: &ImageEditParams) -> PlatformResult<ImageOutput> {
        self.post_json(EDIT_PATH, params).await
    }

    async fn stylize_image(&self, params: &StylizeParams) -> PlatformResult<ImageOutput> {
        self.post_json(STYLIZE_PATH, params).await
    }

    async fn health_check(&self) -> PlatformResult<()> {
        let (status, _) = self.send(Method::GET, HEALTH_PATH, None).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(PlatformError::provider(format!("http_{}", status.as_u16()), "health check failed", true))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    #[test]
    fn endpoint_parsing() {
        assert_eq!(
            split_endpoint("http://10.0.0.5:9000"),
            ("10.0.0.5:9000".to_string(), String::new())
        );
        assert_eq!(
            split_endpoint("http://gpu-1:8000/api/"),
            ("gpu-1:8000".to_string(), "/api".to_string())
        );
        assert_eq!(split_endpoint("host:1"), ("host:1".to_string(), String::new()));
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn provider(endpoint: String) -> HttpProvider {
        HttpProvider::new(ProviderSettings {
            endpoint: Some(endpoint),
            model: Some("sdxl".into()),
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn posts_params_and_decodes_output() {
        let router = Router::new()
            .route(
                IMAGE_PATH,
                post(|Json(body): Json<serde_json::Value>| async move {
                    let url = format!("{}:{}", body["model"].as_str().unwrap_or(""), body["prompt"].as_str().unwrap_or(""));
                    Json(serde_json::json!({ "images": [{ "url": url }] }))
                }),
            )
            .route(HEALTH_PATH, get(|| async { "ok" }));
        let p = provider(serve(router).await);

        let out = p
            .generate_image(&TextToImageParams {
                prompt: "a cat".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(out.images[0].url.as_deref(), Some("sdxl:a cat"));
        p.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let router = Router::new().route(
            TEXT_PATH,
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let p = provider(serve(router).await);
        let err = p
            .generate_text(&TextGenerationParams {
                prompt: Some("hi".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, PlatformError::Provider { ref code, .. } if code == "http_503"));
    }

    #[tokio::test]
    async fn connection_refused_is_retryable() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let err = provider(format!("http://{addr}"))
            .generate_text(&TextGenerationParams::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
