//! Vendor key capability consumed by the router.

use std::collections::HashMap;

use async_trait::async_trait;
use infergrid_core::config::{KeyConfig, KeyTier};
use infergrid_core::{PlatformError, PlatformResult};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Key metadata. The secret itself never leaves the manager except
/// through [`KeyManager::plaintext_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub vendor: String,
    pub service: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub tier: KeyTier,
    pub enabled: bool,
}

/// One billed call made with a key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyUsage {
    pub request_id: String,
    pub feature: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub image_count: u32,
    pub cost: f64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyUsageTotals {
    pub requests: u64,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub images: u64,
    pub cost: f64,
    pub last_used_ms: u64,
}

#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Best enabled key for `vendor`/`service`: lowest tier first.
    async fn get_active_key(&self, vendor: &str, service: &str) -> PlatformResult<ApiKey>;

    async fn plaintext_key(&self, key: &ApiKey) -> PlatformResult<String>;

    async fn record_usage(&self, key_id: &str, usage: KeyUsage) -> PlatformResult<()>;
}

struct StoredKey {
    key: ApiKey,
    secret: String,
}

/// Keys held in process memory, loaded from config and the environment.
#[derive(Default)]
pub struct InMemoryKeyManager {
    keys: RwLock<HashMap<String, StoredKey>>,
    usage: RwLock<HashMap<String, KeyUsageTotals>>,
}

impl InMemoryKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `configs`, reading each secret from the variable named by
    /// `secret_env`. Keys whose variable is unset are skipped.
    pub fn from_config(configs: &[KeyConfig]) -> Self {
        let mut keys = HashMap::new();
        for cfg in configs {
            let secret = match std::env::var(&cfg.secret_env) {
                Ok(s) if !s.is_empty() => s,
                _ => {
                    warn!(key_id = %cfg.id, env = %cfg.secret_env, "key secret not set, skipping");
                    continue;
                }
            };
            let key = ApiKey {
                id: cfg.id.clone(),
                vendor: cfg.vendor.clone(),
                service: cfg.service.clone(),
                alias: cfg.alias.clone(),
                tier: cfg.tier,
                enabled: cfg.enabled,
            };
            keys.insert(key.id.clone(), StoredKey { key, secret });
        }
        info!(count = keys.len(), "vendor keys loaded");
        Self {
            keys: RwLock::new(keys),
            usage: RwLock::default(),
        }
    }

    pub async fn add_key(&self, key: ApiKey, secret: impl Into<String>) {
        debug!(key_id = %key.id, vendor = %key.vendor, "key added");
        self.keys.write().await.insert(
            key.id.clone(),
            StoredKey {
                key,
                secret: secret.into(),
            },
        );
    }

    pub async fn set_enabled(&self, key_id: &str, enabled: bool) -> PlatformResult<()> {
        let mut keys = self.keys.write().await;
        let stored = keys
            .get_mut(key_id)
            .ok_or_else(|| PlatformError::NotFound(format!("key {key_id}")))?;
        stored.key.enabled = enabled;
        info!(%key_id, enabled, "key state changed");
        Ok(())
    }

    pub async fn usage(&self, key_id: &str) -> KeyUsageTotals {
        self.usage.read().await.get(key_id).cloned().unwrap_or_default()
    }

    pub async fn list_keys(&self) -> Vec<ApiKey> {
        let mut keys: Vec<ApiKey> = self.keys.read().await.values().map(|s| s.key.clone()).collect();
        keys.sort_by(|a, b| a.id.cmp(&b.id));
        keys
    }
}

#[async_trait]
impl KeyManager for InMemoryKeyManager {
    async fn get_active_key(&self, vendor: &str, service: &str) -> PlatformResult<ApiKey> {
        let keys = self.keys.read().await;
        keys.values()
            .map(|s| &s.key)
            .filter(|k| k.enabled && k.vendor == vendor && k.service == service)
            .min_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.id.cmp(&b.id)))
            .cloned()
            .ok_or_else(|| PlatformError::Unavailable(format!("no active key for {vendor}/{service}")))
    }

    async fn plaintext_key(&self, key: &ApiKey) -> PlatformResult<String> {
        self.keys
            .read()
            .await
            .get(&key.id)
            .map(|s| s.secret.clone())
            .ok_or_else(|| PlatformError::NotFound(format!("key {}", key.id)))
    }

    async fn record_usage(&self, key_id: &str, usage: KeyUsage) -> PlatformResult<()> {
        let mut totals = self.usage.write().await;
        let t = totals.entry(key_id.to_string()).or_default();
        t.requests += 1;
        t.tokens_input += usage.tokens_input as u64;
        t.tokens_output += usage.tokens_output as u64;
        t.images += usage.image_count as u64;
        t.cost += usage.cost;
        t.last_used_ms = infergrid_core::time::epoch_millis();
        Ok(())
    }
}
