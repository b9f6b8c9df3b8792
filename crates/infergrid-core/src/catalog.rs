//! Feature catalog: features, their candidate providers, and routing policy.
//!
//! Catalog management lives outside the control plane. The router only
//! reads it through [`ConfigStore`]; [`StaticConfigStore`] serves a catalog
//! loaded once from `infergrid.toml`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, PlatformResult};

// ── Provider ───────────────────────────────────────────────────

/// How a provider is operated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Served by our own registered instance pool.
    SelfHosted,
    /// Served by an external vendor API.
    ThirdParty,
}

/// Vendor-side request limits declared for a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderRateLimit {
    #[serde(default)]
    pub rpm: u32,
    #[serde(default)]
    pub tpm: u32,
    #[serde(default)]
    pub concurrent: u32,
}

/// One concrete way to fulfil a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// Vendor name used to pick a client from the provider factory.
    #[serde(default)]
    pub vendor: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower is preferred.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Key service name passed to the key manager; defaults to the feature id.
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub min_instances: u32,
    #[serde(default)]
    pub max_instances: u32,
    #[serde(default)]
    pub rate_limit: Option<ProviderRateLimit>,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    1
}

fn default_weight() -> u32 {
    1
}

impl ProviderConfig {
    /// Enabled provider with priority 1, weight 1, and no endpoint details.
    pub fn new(id: &str, kind: ProviderKind, vendor: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            vendor: vendor.to_string(),
            enabled: true,
            priority: default_priority(),
            weight: default_weight(),
            service: None,
            model: None,
            endpoint: None,
            image: None,
            min_instances: 0,
            max_instances: 0,
            rate_limit: None,
        }
    }

    pub fn is_self_hosted(&self) -> bool {
        self.kind == ProviderKind::SelfHosted
    }

    /// Service name used when looking up vendor keys.
    pub fn key_service<'a>(&'a self, feature_id: &'a str) -> &'a str {
        self.service.as_deref().unwrap_or(feature_id)
    }
}

// ── Routing policy ─────────────────────────────────────────────

/// Provider selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Priority,
    Weighted,
    CostBased,
}

/// Backoff shape for retries. Declared for catalog completeness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    #[default]
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingStrategy {
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default)]
    pub fallback_enabled: bool,
    /// Seconds. Not enforced on outbound provider calls.
    #[serde(default)]
    pub timeout_secs: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_backoff: RetryBackoff,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    #[serde(default)]
    pub self_hosted_per_hour: f64,
    /// Provider id → cost of one request.
    #[serde(default)]
    pub third_party_per_request: HashMap<String, f64>,
}

// ── Feature ────────────────────────────────────────────────────

/// A named AI capability with its candidate providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// e.g. `image_generation`, `text_generation`, `image_editing`.
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// `None` means priority routing without fallback.
    #[serde(default)]
    pub routing: Option<RoutingStrategy>,
    #[serde(default)]
    pub cost: Option<CostConfig>,
}

impl Feature {
    pub fn provider(&self, provider_id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == provider_id)
    }

    /// Effective routing policy.
    pub fn routing(&self) -> RoutingStrategy {
        self.routing.clone().unwrap_or_default()
    }

    /// Configured per-request cost for a third-party provider.
    pub fn request_cost(&self, provider_id: &str) -> Option<f64> {
        self.cost
            .as_ref()
            .and_then(|c| c.third_party_per_request.get(provider_id).copied())
    }
}

// ── ConfigStore ────────────────────────────────────────────────

/// Read access to the feature catalog.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Look up a feature by id.
    async fn get_feature(&self, id: &str) -> PlatformResult<Feature>;

    /// All features in a category.
    async fn features_by_category(&self, category: &str) -> PlatformResult<Vec<Feature>>;
}

/// Immutable catalog held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    features: HashMap<String, Feature>,
}

impl StaticConfigStore {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            features: features.into_iter().map(|f| (f.id.clone(), f)).collect(),
        }
    }

    pub fn list(&self) -> Vec<&Feature> {
        let mut all: Vec<&Feature> = self.features.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[async_trait]
impl ConfigStore for StaticConfigStore {
    async fn get_feature(&self, id: &str) -> PlatformResult<Feature> {
        self.features
            .get(id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("feature {id}")))
    }

    async fn features_by_category(&self, category: &str) -> PlatformResult<Vec<Feature>> {
        let mut found: Vec<Feature> = self
            .features
            .values()
            .filter(|f| f.category == category)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(id: &str, category: &str) -> Feature {
        Feature {
            id: id.to_string(),
            name: id.to_string(),
            category: category.to_string(),
            description: String::new(),
            enabled: true,
            providers: vec![],
            routing: None,
            cost: None,
        }
    }

    #[tokio::test]
    async fn lookup_by_id_and_category() {
        let store = StaticConfigStore::new(vec![
            feature("text_to_image", "image_generation"),
            feature("sdxl_turbo", "image_generation"),
            feature("chat", "text_generation"),
        ]);

        assert_eq!(store.get_feature("chat").await.unwrap().category, "text_generation");
        let images = store.features_by_category("image_generation").await.unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].id, "sdxl_turbo");
    }

    #[tokio::test]
    async fn unknown_feature_is_not_found() {
        let store = StaticConfigStore::default();
        let err = store.get_feature("nope").await.unwrap_err();
        assert!(matches!(err, PlatformError::NotFound(_)));
        assert!(store.features_by_category("nope").await.unwrap().is_empty());
    }

    #[test]
    fn provider_toml_defaults() {
        let p: ProviderConfig = toml::from_str(
            r#"
id = "dalle"
type = "third_party"
vendor = "openai"
"#,
        )
        .unwrap();
        assert!(p.enabled);
        assert_eq!(p.priority, 1);
        assert_eq!(p.weight, 1);
        assert_eq!(p.key_service("text_to_image"), "text_to_image");
    }

    #[test]
    fn missing_routing_defaults_to_priority() {
        let f = feature("x", "y");
        assert_eq!(f.routing().strategy, StrategyKind::Priority);
        assert!(!f.routing().fallback_enabled);
    }
}
