//! Per tenant+feature rate limiting in front of routing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use infergrid_core::config::{RateLimitAlgorithm, RateLimitConfig};
use tracing::{debug, info};

use crate::algorithms::{Admission, LeakyBucket, SlidingWindow, TokenBucket};

/// Admission check consumed by the gateway.
pub trait RateLimiter: Send + Sync {
    /// Admit one request for `tenant` on `feature`.
    fn allow(&self, tenant: &str, feature: &str) -> bool;

    /// Requests per window currently applied to `tenant` on `feature`.
    fn get_limit(&self, tenant: &str, feature: &str) -> u32;

    /// Override the limit. An empty `feature` applies tenant-wide.
    fn set_limit(&self, tenant: &str, feature: &str, limit: u32);
}

/// Scope of a configured limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LimitKey {
    Tenant(String),
    Feature { tenant: String, feature: String },
}

impl LimitKey {
    fn new(tenant: &str, feature: &str) -> Self {
        if feature.is_empty() {
            Self::Tenant(tenant.to_string())
        } else {
            Self::Feature {
                tenant: tenant.to_string(),
                feature: feature.to_string(),
            }
        }
    }
}

/// (tenant, feature)
type StateKey = (String, String);

struct Slot {
    admission: Box<dyn Admission>,
    last_seen: Instant,
}

#[derive(Default)]
struct Slots {
    by_key: HashMap<StateKey, Slot>,
    last_sweep: Option<Instant>,
}

impl Slots {
    /// Drop slots idle for at least `window`, at most once per `window`.
    ///
    /// A slot idle that long has fully refilled, drained or expired, so
    /// recreating it on the next request admits exactly the same traffic.
    fn sweep(&mut self, now: Instant, window: Duration) {
        let due = self
            .last_sweep
            .is_none_or(|last| now.saturating_duration_since(last) >= window);
        if !due {
            return;
        }
        let before = self.by_key.len();
        self.by_key
            .retain(|_, slot| now.saturating_duration_since(slot.last_seen) < window);
        self.last_sweep = Some(now);
        let evicted = before - self.by_key.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.by_key.len(), "idle rate limit states evicted");
        }
    }
}

/// In-memory limiter keeping one admission state per tenant+feature.
pub struct KeyedRateLimiter {
    algorithm: RateLimitAlgorithm,
    default_limit: u32,
    window: Duration,
    limits: Mutex<HashMap<LimitKey, u32>>,
    slots: Mutex<Slots>,
}

impl KeyedRateLimiter {
    pub fn new(algorithm: RateLimitAlgorithm, default_limit: u32, window: Duration) -> Self {
        Self {
            algorithm,
            default_limit,
            window,
            limits: Mutex::new(HashMap::new()),
            slots: Mutex::new(Slots::default()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        let limiter = Self::new(
            config.algorithm,
            config.limit,
            Duration::from_secs(config.window_secs.max(1)),
        );
        for o in &config.overrides {
            limiter.set_limit(&o.tenant, &o.feature, o.limit);
        }
        info!(
            algorithm = ?config.algorithm,
            limit = config.limit,
            window_secs = config.window_secs,
            overrides = config.overrides.len(),
            "rate limiter configured"
        );
        limiter
    }

    /// Admit one request at an explicit instant.
    pub fn allow_at(&self, tenant: &str, feature: &str, now: Instant) -> bool {
        let limit = self.get_limit(tenant, feature);
        let mut slots = self.slots.lock().expect("rate limiter lock");
        slots.sweep(now, self.window);
        let slot = slots
            .by_key
            .entry((tenant.to_string(), feature.to_string()))
            .or_insert_with(|| Slot {
                admission: self.new_state(limit, now),
                last_seen: now,
            });
        slot.last_seen = now;
        let allowed = slot.admission.try_acquire(now);
        if !allowed {
            debug!(%tenant, %feature, limit, "rate limit exceeded");
        }
        allowed
    }

    /// Number of tenant+feature pairs currently holding state.
    pub fn tracked(&self) -> usize {
        self.slots.lock().expect("rate limiter lock").by_key.len()
    }

    fn new_state(&self, limit: u32, now: Instant) -> Box<dyn Admission> {
        let per_sec = limit as f64 / self.window.as_secs_f64();
        match self.algorithm {
            RateLimitAlgorithm::TokenBucket => Box::new(TokenBucket::new(limit, per_sec, now)),
            RateLimitAlgorithm::LeakyBucket => Box::new(LeakyBucket::new(limit, per_sec, now)),
            RateLimitAlgorithm::SlidingWindow => Box::new(SlidingWindow::new(limit, self.window)),
        }
    }
}

impl RateLimiter for KeyedRateLimiter {
    fn allow(&self, tenant: &str, feature: &str) -> bool {
        self.allow_at(tenant, feature, Instant::now())
    }

    fn get_limit(&self, tenant: &str, feature: &str) -> u32 {
        let limits = self.limits.lock().expect("rate limiter lock");
        limits
            .get(&LimitKey::new(tenant, feature))
            .or_else(|| limits.get(&LimitKey::Tenant(tenant.to_string())))
            .copied()
            .unwrap_or(self.default_limit)
    }

    fn set_limit(&self, tenant: &str, feature: &str, limit: u32) {
        self.limits
            .lock()
            .expect("rate limiter lock")
            .insert(LimitKey::new(tenant, feature), limit);

        // Rebuild affected states so the new limit applies immediately.
        let mut slots = self.slots.lock().expect("rate limiter lock");
        slots
            .by_key
            .retain(|(t, f), _| t != tenant || (!feature.is_empty() && f != feature));
        debug!(%tenant, %feature, limit, "rate limit updated");
    }
}
