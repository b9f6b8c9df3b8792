//! infergrid-registry — fleet membership and health for self-hosted instances.
//!
//! Instances register over the registration protocol, then report load and
//! error counters by heartbeat. The registry keeps the authoritative
//! in-memory view and persists snapshots to the state store.
//!
//! # Architecture
//!
//! ```text
//! ServiceRegistry
//!   ├── register / heartbeat / shutdown / mark_terminated
//!   ├── HealthPolicy (error rate → Degraded, stale sweeps → Unhealthy)
//!   ├── EventFeed<HeartbeatEvent> for watchers
//!   └── fire-and-forget snapshot writes to StateStore
//! run_timeout_sweep / SweepTask
//!   └── every 10s: check_heartbeat_timeouts()
//! ```
//!
//! # State machine
//!
//! Healthy ⇄ Degraded on heartbeat error rate (> 10%). Three consecutive
//! stale sweeps (no heartbeat for 90s) mark an instance Unhealthy; one
//! valid heartbeat restores it. Shutdown moves any live instance to
//! Draining, and an external confirmation moves Draining to Terminated.

pub mod health;
pub mod protocol;
pub mod registry;
pub mod sweeper;

pub use health::{HealthPolicy, SweepOutcome};
pub use protocol::*;
pub use registry::{ServiceRegistry, generate_service_id};
pub use sweeper::{SweepTask, run_timeout_sweep};
