//! infergrid-budget — hierarchical spend control in front of dispatch.
//!
//! # Architecture
//!
//! ```text
//! AdmissionController
//!   ├── check_budget()  ← gateway, before routing (global → service → tenant)
//!   ├── record_cost()   ← router, after every billed response
//!   ├── watch_alerts()  → best-effort BudgetAlert stream
//!   └── reconcile()     → flushes spend deltas into daily statistics
//!
//! run_reconciliation() → periodic reconcile loop
//! ```

pub mod alerts;
pub mod controller;
pub mod period;
pub mod reconcile;

pub use alerts::{AlertType, BudgetAlert};
pub use controller::{AdmissionController, BudgetCheck, BudgetInfo, BudgetRequest, BudgetUpdate, Spending};
pub use reconcile::{ReconcileTask, run_reconciliation};
