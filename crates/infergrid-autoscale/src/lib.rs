//! infergrid-autoscale — replica scaling for self-hosted inference pools.
//!
//! Aggregates the registry's view of a feature's instances, compares it
//! against the feature's `ScaleConfig`, and steps the deployment's
//! replica count through a `ClusterClient`. Scale events are published
//! on a best-effort feed.
//!
//! # Decision
//!
//! ```text
//! cpu   = mean cpu_utilization over Healthy ∪ Degraded instances
//! queue = sum of queue_size
//! rps   = processed-count delta / seconds since the previous check
//! idle  = seconds since queue or rps was last non-zero
//!
//! if replicas < max and (cpu > target_cpu or queue > target_queue or rps > 100):
//!     replicas + 1                       (unless within scale_up_cooldown)
//!
//! if replicas > min and (idle >= idle_timeout or (cpu < target_cpu / 2 and queue == 0)):
//!     max(replicas - 1, min)             (unless within scale_down_cooldown)
//!     reaching 0 is scale_to_zero and requires idle >= idle_timeout
//! ```

pub mod cluster;
pub mod scaler;
pub mod task;

pub use cluster::{ClusterClient, InMemoryClusterClient};
pub use scaler::{AutoScaler, RPS_CEILING, ScaleAction, ScaleDecision, ScaleEvent, ScaleMetrics};
pub use task::{ScaleTask, run_scale_loop};
