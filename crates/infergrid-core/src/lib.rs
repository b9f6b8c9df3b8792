//! infergrid-core — shared vocabulary for the InferGrid control plane.
//!
//! Holds the error taxonomy, the feature catalog and its read-only
//! `ConfigStore`, typed inference requests, configuration parsing, and the
//! best-effort event feeds every component publishes notifications on.

pub mod budget;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod inference;
pub mod time;

pub use catalog::{ConfigStore, Feature, ProviderConfig, ProviderKind, StaticConfigStore};
pub use config::PlatformConfig;
pub use error::{PlatformError, PlatformResult};
pub use events::EventFeed;
