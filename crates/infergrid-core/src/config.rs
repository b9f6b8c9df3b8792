//! infergrid.toml configuration parser.
//!
//! Every section has defaults, so an empty file yields a working
//! single-node control plane.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::budget::{AlertAction, AlertThreshold, BudgetKind, BudgetPeriod};
use crate::catalog::Feature;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub autoscale: AutoscaleConfig,
    #[serde(default)]
    pub ratelimit: RateLimitConfig,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub keys: Vec<KeyConfig>,
}

impl PlatformConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PlatformConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/infergrid")
}

// ── Registry ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Interval instances are told to heartbeat at.
    pub heartbeat_interval_secs: u64,
    pub sweep_interval_secs: u64,
    /// Silence longer than this counts as a missed heartbeat on each sweep.
    pub heartbeat_timeout_secs: u64,
    pub miss_threshold: u32,
    /// Error rate above which an instance is Degraded.
    pub error_rate_threshold: f64,
    pub shutdown_grace_secs: u64,
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            sweep_interval_secs: 10,
            heartbeat_timeout_secs: 90,
            miss_threshold: 3,
            error_rate_threshold: 0.10,
            shutdown_grace_secs: 30,
            event_capacity: 100,
        }
    }
}

// ── Budget ─────────────────────────────────────────────────────

/// A budget seeded at startup when storage holds none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSeed {
    pub name: String,
    pub kind: BudgetKind,
    #[serde(default)]
    pub target_id: String,
    pub amount: f64,
    pub period: BudgetPeriod,
    #[serde(default)]
    pub alerts: Vec<AlertThreshold>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub reconcile_interval_secs: u64,
    pub alert_capacity: usize,
    pub defaults: Vec<BudgetSeed>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 60,
            alert_capacity: 100,
            defaults: default_budget_seeds(),
        }
    }
}

/// Global monthly ceiling plus a daily ceiling for text-to-image.
pub fn default_budget_seeds() -> Vec<BudgetSeed> {
    vec![
        BudgetSeed {
            name: "Global Monthly Budget".to_string(),
            kind: BudgetKind::Global,
            target_id: String::new(),
            amount: 30_000.0,
            period: BudgetPeriod::Monthly,
            alerts: vec![
                AlertThreshold::new(0.7, AlertAction::Notify),
                AlertThreshold::new(0.9, AlertAction::SwitchToThirdParty),
            ],
        },
        BudgetSeed {
            name: "Text-to-Image Daily Budget".to_string(),
            kind: BudgetKind::Service,
            target_id: "text_to_image".to_string(),
            amount: 1_000.0,
            period: BudgetPeriod::Daily,
            alerts: vec![
                AlertThreshold::new(0.7, AlertAction::Notify),
                AlertThreshold::new(0.9, AlertAction::Block),
            ],
        },
    ]
}

// ── Autoscale ──────────────────────────────────────────────────

/// Scaling policy for one feature's self-hosted deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleConfig {
    pub feature_id: String,
    #[serde(default)]
    pub min_instances: u32,
    pub max_instances: u32,
    /// Mean CPU percent above which to scale up.
    #[serde(default = "default_target_cpu")]
    pub target_cpu: f64,
    #[serde(default = "default_target_memory")]
    pub target_memory: f64,
    pub target_queue_size: u64,
    pub idle_timeout_secs: u64,
    #[serde(default = "default_scale_up_cooldown")]
    pub scale_up_cooldown_secs: u64,
    #[serde(default = "default_scale_down_cooldown")]
    pub scale_down_cooldown_secs: u64,
    /// Defaults to `<feature_id>-inference`.
    #[serde(default)]
    pub deployment_name: Option<String>,
    /// Defaults to the `[autoscale]` namespace.
    #[serde(default)]
    pub namespace: Option<String>,
}

fn default_target_cpu() -> f64 {
    70.0
}

fn default_target_memory() -> f64 {
    80.0
}

fn default_scale_up_cooldown() -> u64 {
    60
}

fn default_scale_down_cooldown() -> u64 {
    300
}

impl ScaleConfig {
    pub fn new(feature_id: &str, min: u32, max: u32, queue: u64, idle_secs: u64) -> Self {
        Self {
            feature_id: feature_id.to_string(),
            min_instances: min,
            max_instances: max,
            target_cpu: default_target_cpu(),
            target_memory: default_target_memory(),
            target_queue_size: queue,
            idle_timeout_secs: idle_secs,
            scale_up_cooldown_secs: default_scale_up_cooldown(),
            scale_down_cooldown_secs: default_scale_down_cooldown(),
            deployment_name: None,
            namespace: None,
        }
    }

    pub fn deployment_name(&self) -> String {
        self.deployment_name
            .clone()
            .unwrap_or_else(|| format!("{}-inference", self.feature_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    pub interval_secs: u64,
    pub namespace: String,
    pub event_capacity: usize,
    pub features: Vec<ScaleConfig>,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            namespace: "ai-platform".to_string(),
            event_capacity: 100,
            features: default_scale_configs(),
        }
    }
}

pub fn default_scale_configs() -> Vec<ScaleConfig> {
    vec![
        ScaleConfig::new("text_to_image", 0, 5, 50, 900),
        ScaleConfig::new("image_editing", 0, 3, 30, 600),
        ScaleConfig::new("image_stylization", 0, 2, 20, 600),
    ]
}

// ── Rate limiting ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    #[default]
    TokenBucket,
    LeakyBucket,
    SlidingWindow,
}

/// Per tenant+feature limit. An empty feature applies to every feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitOverride {
    pub tenant: String,
    #[serde(default)]
    pub feature: String,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub algorithm: RateLimitAlgorithm,
    /// Requests allowed per window.
    pub limit: u32,
    pub window_secs: u64,
    pub overrides: Vec<RateLimitOverride>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            algorithm: RateLimitAlgorithm::default(),
            limit: 100,
            window_secs: 60,
            overrides: Vec::new(),
        }
    }
}

// ── Vendor keys ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyTier {
    #[default]
    Primary,
    Backup,
    Overflow,
}

/// A vendor credential. The secret itself is read from `secret_env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    pub id: String,
    pub vendor: String,
    pub service: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub tier: KeyTier,
    pub secret_env: String,
    #[serde(default = "key_enabled")]
    pub enabled: bool,
}

fn key_enabled() -> bool {
    true
}
