// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod management;
pub mod metrics;
pub mod registry;
pub mod rolling;
pub mod source;
pub mod stats;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::EngineConfig;
pub use crate::engine::LiveSources;
pub use crate::error::{FetchError, RegistryError};
pub use crate::ingest::types::{Fetcher, FetcherSet, Record};
pub use crate::management::ManagementApi;
pub use crate::source::{NewSource, Source, SourceId, SourceStatus, SourceType, SourceUpdate};
