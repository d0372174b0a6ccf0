// src/ingest/types.rs
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::FetchError;
use crate::source::{Source, SourceType};

/// One raw record returned by a fetcher, before it becomes a window entry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct Record {
    /// Feed-provided identity (guid, link, API id). Derived from the payload when absent.
    pub id: Option<String>,
    pub payload: Value,
    /// Normally left empty; the store stamps insertion time.
    pub ingested_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(payload: Value) -> Self {
        Self {
            id: None,
            payload,
            ingested_at: None,
        }
    }

    pub fn with_id(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Some(id.into()),
            payload,
            ingested_at: None,
        }
    }
}

/// Performs the network call for one source type.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Vec<Record>, FetchError>;
    fn name(&self) -> &'static str;
}

/// Fetchers keyed by source type. Types without an entry fail every cycle
/// with `FetchError::Misconfigured`.
#[derive(Clone, Default)]
pub struct FetcherSet {
    by_type: HashMap<SourceType, Arc<dyn Fetcher>>,
}

impl FetcherSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source_type: SourceType, fetcher: Arc<dyn Fetcher>) -> Self {
        self.by_type.insert(source_type, fetcher);
        self
    }

    pub fn insert(&mut self, source_type: SourceType, fetcher: Arc<dyn Fetcher>) {
        self.by_type.insert(source_type, fetcher);
    }

    pub fn get(&self, source_type: SourceType) -> Option<Arc<dyn Fetcher>> {
        self.by_type.get(&source_type).cloned()
    }

    /// Same fetcher for every known type. Handy for tests and single-backend setups.
    pub fn uniform(fetcher: Arc<dyn Fetcher>) -> Self {
        let mut set = Self::new();
        for t in SourceType::ALL {
            set.insert(t, fetcher.clone());
        }
        set
    }
}
