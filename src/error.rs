//! Error taxonomy for the management surface and the fetch path.
//!
//! `RegistryError` is caller-visible (register / update / delete and friends).
//! `FetchError` never reaches a caller: the scheduler records it as an
//! ingestion failure for the source that produced it.

use std::time::Duration;

use thiserror::Error;

use crate::source::{SourceId, SourceStatus};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("source not found: {0}")]
    NotFound(SourceId),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: SourceStatus, to: SourceStatus },
}

impl RegistryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable kind, used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::NotFound(_) => "NotFound",
            Self::InvalidTransition { .. } => "InvalidTransitionError",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetch timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Format(String),

    #[error("source misconfigured: {0}")]
    Misconfigured(String),
}

impl FetchError {
    /// Label used for the `outcome` metric dimension and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
            Self::Format(_) => "format",
            Self::Misconfigured(_) => "misconfigured",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Format(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}
