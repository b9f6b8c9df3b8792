//! Admission algorithms. Each takes an explicit `now` so tests can drive
//! time without sleeping.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A single rate-limit state machine.
pub trait Admission: Send {
    /// Try to admit one request at `now`.
    fn try_acquire(&mut self, now: Instant) -> bool;
}

/// Continuous-refill token bucket. Allows bursts up to `capacity`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

impl Admission for TokenBucket {
    fn try_acquire(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Leaky bucket as a meter: admitted requests fill the bucket, which drains
/// at a constant rate. Smooths bursts instead of allowing them.
#[derive(Debug, Clone)]
pub struct LeakyBucket {
    capacity: f64,
    leak_per_sec: f64,
    level: f64,
    last_leak: Instant,
}

impl LeakyBucket {
    pub fn new(capacity: u32, leak_per_sec: f64, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            leak_per_sec,
            level: 0.0,
            last_leak: now,
        }
    }

    pub fn level(&self) -> f64 {
        self.level
    }
}

impl Admission for LeakyBucket {
    fn try_acquire(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_leak);
        self.level = (self.level - elapsed.as_secs_f64() * self.leak_per_sec).max(0.0);
        self.last_leak = now;

        if self.level + 1.0 <= self.capacity {
            self.level += 1.0;
            true
        } else {
            false
        }
    }
}

/// Exact sliding-window log: at most `limit` admissions in any `window`.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    admitted: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit as usize,
            window,
            admitted: VecDeque::new(),
        }
    }

    pub fn in_window(&self) -> usize {
        self.admitted.len()
    }
}

impl Admission for SlidingWindow {
    fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.admitted.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }

        if self.admitted.len() < self.limit {
            self.admitted.push_back(now);
            true
        } else {
            false
        }
    }
}
