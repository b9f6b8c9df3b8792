//! infergrid-ratelimit — request-rate admission per tenant and feature.
//!
//! Three interchangeable algorithms sit behind one [`RateLimiter`] trait:
//! token bucket (bursty), leaky bucket (smoothing), and an exact sliding
//! window. The default policy is 100 requests per 60-second window.

pub mod algorithms;
pub mod limiter;

pub use algorithms::{Admission, LeakyBucket, SlidingWindow, TokenBucket};
pub use limiter::{KeyedRateLimiter, RateLimiter};
