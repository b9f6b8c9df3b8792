//! infergrid-router — decides which backend serves each inference request.
//!
//! # Architecture
//!
//! ```text
//! RoutingEngine::route(feature, params)
//!   1. resolve   ConfigStore: by id, else first feature of the category
//!   2. filter    enabled + (healthy instance | active key)
//!   3. select    priority | weighted | cost_based
//!   4. execute   ProviderFactory → Provider, fallback in candidate order
//!   5. account   cost → AdmissionController, usage → KeyManager
//! ```

pub mod engine;
pub mod http_provider;
pub mod keys;
pub mod provider;
pub mod selection;

pub use engine::RoutingEngine;
pub use http_provider::HttpProvider;
pub use keys::{ApiKey, InMemoryKeyManager, KeyManager, KeyUsage, KeyUsageTotals};
pub use provider::{Provider, ProviderFactory, ProviderSettings, SELF_HOSTED_VENDOR};
