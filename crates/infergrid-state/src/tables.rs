//! redb table definitions for the InferGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Registered instances keyed by `{service_id}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("registered_services");

/// Budgets keyed by `{budget_id}`.
pub const BUDGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("budgets");

/// Cost records keyed by `{timestamp:020}:{record_id}`.
pub const COST_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("cost_records");

/// Daily spend keyed by `{date}:{scope}`.
pub const COST_STATISTICS: TableDefinition<&str, &[u8]> = TableDefinition::new("cost_statistics");
