//! RoutingEngine — resolve, filter, select, execute, fall back.
//!
//! The engine holds no routing state of its own besides a random source;
//! every call reads the registry, key manager and catalog afresh, and
//! never holds one component's lock while calling another.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use infergrid_budget::AdmissionController;
use infergrid_core::catalog::{ConfigStore, Feature, ProviderConfig, ProviderKind};
use infergrid_core::inference::{InferenceOutput, InferenceParams, InferenceResponse, Timing};
use infergrid_core::time::{epoch_millis, epoch_nanos};
use infergrid_core::{PlatformError, PlatformResult};
use infergrid_registry::ServiceRegistry;
use infergrid_state::{CostRecord, ServiceInstance};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::keys::{KeyManager, KeyUsage};
use crate::provider::{ProviderFactory, ProviderSettings, SELF_HOSTED_VENDOR, dispatch};
use crate::selection;

const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

pub fn generate_request_id() -> String {
    format!("req-{}", epoch_nanos())
}

/// Per-request bookkeeping shared by the first attempt and fallbacks.
struct RequestContext<'a> {
    request_id: String,
    tenant_id: Option<&'a str>,
    received: Instant,
    received_at: u64,
}

/// What one provider attempt produced, before accounting.
struct Attempt {
    output: InferenceOutput,
    instance_id: Option<String>,
    key_id: Option<String>,
}

pub struct RoutingEngine {
    config: Arc<dyn ConfigStore>,
    registry: Arc<ServiceRegistry>,
    keys: Arc<dyn KeyManager>,
    providers: ProviderFactory,
    budget: Arc<AdmissionController>,
    rng: Mutex<StdRng>,
    provider_timeout: Duration,
}

impl RoutingEngine {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        registry: Arc<ServiceRegistry>,
        keys: Arc<dyn KeyManager>,
        providers: ProviderFactory,
        budget: Arc<AdmissionController>,
    ) -> Self {
        Self {
            config,
            registry,
            keys,
            providers,
            budget,
            rng: Mutex::new(StdRng::from_entropy()),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Deterministic selection, for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    // ── Routing ────────────────────────────────────────────────────

    pub async fn route(&self, feature: &str, params: InferenceParams) -> PlatformResult<InferenceResponse> {
        self.route_as(feature, params, None).await
    }

    /// Route on behalf of `tenant_id`, which is carried on the cost record.
    pub async fn route_as(
        &self,
        feature: &str,
        params: InferenceParams,
        tenant_id: Option<&str>,
    ) -> PlatformResult<InferenceResponse> {
        let ctx = RequestContext {
            request_id: generate_request_id(),
            tenant_id,
            received: Instant::now(),
            received_at: epoch_millis(),
        };
        params.validate()?;

        let resolved = self.resolve_feature(feature).await?;
        if !resolved.enabled {
            return Err(PlatformError::Unavailable(format!("feature {} is disabled", resolved.id)));
        }

        let candidates = self.filter_providers(&resolved).await;
        if candidates.is_empty() {
            return Err(PlatformError::Unavailable(format!(
                "no available provider for feature: {feature}"
            )));
        }

        let routing = resolved.routing();
        let selected = {
            let mut rng = self.rng.lock().expect("routing rng lock");
            selection::select(routing.strategy, &resolved, &candidates, &mut *rng)
        }
        .unwrap_or(0);
        debug!(
            request_id = %ctx.request_id,
            feature = %resolved.id,
            provider = %candidates[selected].id,
            strategy = ?routing.strategy,
            candidates = candidates.len(),
            "provider selected"
        );

        let err = match self.execute(&ctx, &resolved, &candidates[selected], &params).await {
            Ok(resp) => return Ok(resp),
            Err(err) => err,
        };
        warn!(
            request_id = %ctx.request_id,
            provider = %candidates[selected].id,
            error = %err,
            "provider call failed"
        );
        if !routing.fallback_enabled {
            return Err(err);
        }

        for (i, provider) in candidates.iter().enumerate() {
            if i == selected {
                continue;
            }
            match self.execute(&ctx, &resolved, provider, &params).await {
                Ok(mut resp) => {
                    resp.fallback_used = true;
                    info!(
                        request_id = %ctx.request_id,
                        from = %candidates[selected].id,
                        to = %provider.id,
                        "fallback succeeded"
                    );
                    return Ok(resp);
                }
                Err(e) => {
                    warn!(request_id = %ctx.request_id, provider = %provider.id, error = %e, "fallback attempt failed");
                }
            }
        }
        Err(err)
    }

    /// Pre-dispatch cost estimate: the highest per-request cost of the
    /// feature, or zero when none is configured.
    pub async fn estimate_cost(&self, feature: &str) -> PlatformResult<f64> {
        let resolved = self.resolve_feature(feature).await?;
        Ok(resolved
            .cost
            .as_ref()
            .map(|c| c.third_party_per_request.values().copied().fold(0.0, f64::max))
            .unwrap_or(0.0))
    }

    // ── Steps ──────────────────────────────────────────────────────

    /// By id first, then the first feature of a category with that name.
    async fn resolve_feature(&self, feature: &str) -> PlatformResult<Feature> {
        if let Ok(f) = self.config.get_feature(feature).await {
            return Ok(f);
        }
        self.config
            .features_by_category(feature)
            .await
            .ok()
            .and_then(|fs| fs.into_iter().next())
            .ok_or_else(|| PlatformError::NotFound(format!("feature not found: {feature}")))
    }

    /// Healthy instances serving `feature`, by feature id then category.
    async fn healthy_instances(&self, feature: &Feature) -> Vec<ServiceInstance> {
        let instances = self.registry.get_healthy_services(&feature.id).await;
        if !instances.is_empty() || feature.category == feature.id {
            return instances;
        }
        self.registry.get_healthy_services(&feature.category).await
    }

    /// Enabled providers that can serve right now, in configured order.
    async fn filter_providers(&self, feature: &Feature) -> Vec<ProviderConfig> {
        let mut available = Vec::new();
        for p in feature.providers.iter().filter(|p| p.enabled) {
            let usable = match p.kind {
                ProviderKind::SelfHosted => !self.healthy_instances(feature).await.is_empty(),
                ProviderKind::ThirdParty => self
                    .keys
                    .get_active_key(&p.vendor, p.key_service(&feature.id))
                    .await
                    .is_ok(),
            };
            if usable {
                available.push(p.clone());
            } else {
                debug!(feature = %feature.id, provider = %p.id, "provider filtered out");
            }
        }
        available
    }

    async fn execute(
        &self,
        ctx: &RequestContext<'_>,
        feature: &Feature,
        provider: &ProviderConfig,
        params: &InferenceParams,
    ) -> PlatformResult<InferenceResponse> {
        let dispatched = Instant::now();
        let dispatched_at = epoch_millis();

        let attempt = match provider.kind {
            ProviderKind::SelfHosted => self.execute_self_hosted(feature, provider, params).await?,
            ProviderKind::ThirdParty => self.execute_third_party(feature, provider, params).await?,
        };

        let exec = dispatched.elapsed();
        let cost = match provider.kind {
            ProviderKind::SelfHosted => feature
                .cost
                .as_ref()
                .map(|c| c.self_hosted_per_hour * exec.as_secs_f64() / 3600.0)
                .unwrap_or(0.0),
            ProviderKind::ThirdParty => feature.request_cost(&provider.id).unwrap_or(0.0),
        };
        let (tokens_input, tokens_output, image_count) = match &attempt.output {
            InferenceOutput::Text(t) => (t.tokens_input, t.tokens_output, 0),
            InferenceOutput::Images(i) => (0, 0, i.images.len() as u32),
        };

        let response = InferenceResponse {
            request_id: ctx.request_id.clone(),
            feature: feature.id.clone(),
            provider_kind: provider.kind,
            provider_id: provider.id.clone(),
            instance_id: attempt.instance_id,
            output: attempt.output,
            fallback_used: false,
            timing: Timing {
                received_at: ctx.received_at,
                dispatched_at,
                completed_at: epoch_millis(),
                wait_ms: dispatched.duration_since(ctx.received).as_millis() as u64,
                exec_ms: exec.as_millis() as u64,
                total_ms: ctx.received.elapsed().as_millis() as u64,
            },
            tokens_input,
            tokens_output,
            image_count,
            cost,
        };
        self.account(ctx, &response, attempt.key_id.as_deref()).await;
        Ok(response)
    }

    /// Least-loaded healthy instance.
    async fn execute_self_hosted(
        &self,
        feature: &Feature,
        provider: &ProviderConfig,
        params: &InferenceParams,
    ) -> PlatformResult<Attempt> {
        let instances = self.healthy_instances(feature).await;
        let instance = instances
            .iter()
            .min_by(|a, b| a.metrics.current_load.total_cmp(&b.metrics.current_load))
            .ok_or_else(|| PlatformError::Unavailable(format!("no healthy instance for {}", feature.id)))?;

        let vendor = if provider.vendor.is_empty() {
            SELF_HOSTED_VENDOR
        } else {
            provider.vendor.as_str()
        };
        let client = self.providers.create(
            vendor,
            ProviderSettings {
                api_key: None,
                endpoint: Some(instance.endpoint()),
                model: provider.model.clone(),
                timeout: self.provider_timeout,
            },
        )?;
        let output = dispatch(client.as_ref(), params).await;
        client.close().await;
        Ok(Attempt {
            output: output?,
            instance_id: Some(instance.id.clone()),
            key_id: None,
        })
    }

    async fn execute_third_party(
        &self,
        feature: &Feature,
        provider: &ProviderConfig,
        params: &InferenceParams,
    ) -> PlatformResult<Attempt> {
        let key = self
            .keys
            .get_active_key(&provider.vendor, provider.key_service(&feature.id))
            .await?;
        let secret = self.keys.plaintext_key(&key).await?;
        let client = self.providers.create(
            &provider.vendor,
            ProviderSettings {
                api_key: Some(secret),
                endpoint: provider.endpoint.clone(),
                model: provider.model.clone(),
                timeout: self.provider_timeout,
            },
        )?;
        let output = dispatch(client.as_ref(), params).await;
        client.close().await;
        Ok(Attempt {
            output: output?,
            instance_id: None,
            key_id: Some(key.id),
        })
    }

    /// Report cost and key usage. Failures are logged only.
    async fn account(&self, ctx: &RequestContext<'_>, response: &InferenceResponse, key_id: Option<&str>) {
        let record = CostRecord {
            id: Uuid::new_v4().to_string(),
            request_id: response.request_id.clone(),
            feature: response.feature.clone(),
            provider_id: response.provider_id.clone(),
            tenant_id: ctx.tenant_id.map(str::to_string),
            amount: response.cost,
            timestamp: epoch_millis(),
        };
        if let Err(e) = self.budget.record_cost(record).await {
            warn!(request_id = %response.request_id, error = %e, "failed to record cost");
        }

        if let Some(key_id) = key_id {
            let usage = KeyUsage {
                request_id: response.request_id.clone(),
                feature: response.feature.clone(),
                tokens_input: response.tokens_input,
                tokens_output: response.tokens_output,
                image_count: response.image_count,
                cost: response.cost,
                latency_ms: response.timing.exec_ms,
            };
            if let Err(e) = self.keys.record_usage(key_id, usage).await {
                warn!(request_id = %response.request_id, %key_id, error = %e, "failed to record key usage");
            }
        }
    }
}
