//! Source data model: ids, types, lifecycle status and the registration /
//! update inputs together with their validation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::RegistryError;

/// Opaque, immutable source identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(Uuid);

impl SourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SourceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Weather,
    News,
    Rss,
    Api,
    Social,
    Custom,
}

impl SourceType {
    pub const ALL: [SourceType; 6] = [
        SourceType::Weather,
        SourceType::News,
        SourceType::Rss,
        SourceType::Api,
        SourceType::Social,
        SourceType::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::News => "news",
            Self::Rss => "rss",
            Self::Api => "api",
            Self::Social => "social",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(t))
            .ok_or_else(|| RegistryError::validation(format!("unknown sourceType '{t}'")))
    }
}

/// Lifecycle status. `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Paused,
    Error,
    Deleted,
}

impl SourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Deleted => "deleted",
        }
    }

    /// Central transition table. Re-requesting the current status is a no-op
    /// and therefore allowed (except for `deleted`, which is final).
    pub fn can_transition_to(self, to: SourceStatus) -> bool {
        use SourceStatus::*;
        match (self, to) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            (from, to) if from == to => true,
            (Active, Paused) | (Paused, Active) => true,
            (Active, Error) | (Error, Active) => true,
            // operator parks a failing source
            (Error, Paused) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "error" => Ok(Self::Error),
            "deleted" => Ok(Self::Deleted),
            other => Err(RegistryError::validation(format!("unknown status '{other}'"))),
        }
    }
}

/// Bounds applied to registration and live updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLimits {
    pub min_max_entries: usize,
    pub max_max_entries: usize,
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    pub default_max_entries: usize,
    pub default_interval_secs: u64,
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self {
            min_max_entries: 10,
            max_max_entries: 10_000,
            min_interval_secs: 60,
            max_interval_secs: 86_400,
            default_max_entries: 500,
            default_interval_secs: 300,
        }
    }
}

impl SourceLimits {
    pub fn check_max_entries(&self, v: i64) -> Result<usize, RegistryError> {
        let lo = self.min_max_entries as i64;
        let hi = self.max_max_entries as i64;
        if (lo..=hi).contains(&v) {
            Ok(v as usize)
        } else {
            Err(RegistryError::validation(format!(
                "maxEntries must be between {lo} and {hi}, got {v}"
            )))
        }
    }

    pub fn check_interval(&self, v: i64) -> Result<u64, RegistryError> {
        let lo = self.min_interval_secs as i64;
        let hi = self.max_interval_secs as i64;
        if (lo..=hi).contains(&v) {
            Ok(v as u64)
        } else {
            Err(RegistryError::validation(format!(
                "ingestionInterval must be between {lo} and {hi} seconds, got {v}"
            )))
        }
    }
}

/// A registered feed configuration. Owned by the registry; everybody else
/// gets clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub source_id: SourceId,
    pub source_name: String,
    pub source_type: SourceType,
    pub source_url: String,
    pub config: Map<String, Value>,
    pub max_entries: usize,
    /// Seconds between cycle starts.
    pub ingestion_interval: u64,
    pub status: SourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    pub fn is_active(&self) -> bool {
        self.status == SourceStatus::Active
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ingestion_interval)
    }

    /// String value from the opaque `config` map.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// Registration input. Numeric fields are signed so that out-of-range input
/// surfaces as a validation error instead of a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSource {
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub max_entries: Option<i64>,
    #[serde(default)]
    pub ingestion_interval: Option<i64>,
    #[serde(default)]
    pub config: Option<Value>,
}

impl NewSource {
    pub fn new(
        name: impl Into<String>,
        source_type: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            source_name: name.into(),
            source_type: source_type.into(),
            source_url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_max_entries(mut self, n: i64) -> Self {
        self.max_entries = Some(n);
        self
    }

    pub fn with_interval(mut self, secs: i64) -> Self {
        self.ingestion_interval = Some(secs);
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Validate and build an `active` source with a fresh id.
    pub fn into_source(self, limits: &SourceLimits) -> Result<Source, RegistryError> {
        let name = self.source_name.trim();
        if name.is_empty() {
            return Err(RegistryError::validation("sourceName must not be empty"));
        }
        let url = self.source_url.trim();
        if url.is_empty() {
            return Err(RegistryError::validation("sourceUrl must not be empty"));
        }
        let source_type: SourceType = self.source_type.parse()?;

        let max_entries = match self.max_entries {
            Some(v) => limits.check_max_entries(v)?,
            None => limits.default_max_entries,
        };
        let ingestion_interval = match self.ingestion_interval {
            Some(v) => limits.check_interval(v)?,
            None => limits.default_interval_secs,
        };
        let config = match self.config {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(m)) => m,
            Some(_) => return Err(RegistryError::validation("config must be a JSON object")),
        };

        let now = Utc::now();
        Ok(Source {
            source_id: SourceId::new(),
            source_name: name.to_string(),
            source_type,
            source_url: url.to_string(),
            config,
            max_entries,
            ingestion_interval,
            status: SourceStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update accepted by `update`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceUpdate {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub max_entries: Option<i64>,
    #[serde(default)]
    pub ingestion_interval: Option<i64>,
}

impl SourceUpdate {
    pub fn status(status: SourceStatus) -> Self {
        Self {
            status: Some(status.as_str().to_string()),
            ..Self::default()
        }
    }

    pub fn max_entries(n: i64) -> Self {
        Self {
            max_entries: Some(n),
            ..Self::default()
        }
    }

    pub fn interval(secs: i64) -> Self {
        Self {
            ingestion_interval: Some(secs),
            ..Self::default()
        }
    }
}

/// `SourceUpdate` after validation against the limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidatedUpdate {
    pub status: Option<SourceStatus>,
    pub max_entries: Option<usize>,
    pub ingestion_interval: Option<u64>,
}

impl SourceUpdate {
    pub fn validate(&self, limits: &SourceLimits) -> Result<ValidatedUpdate, RegistryError> {
        Ok(ValidatedUpdate {
            status: self.status.as_deref().map(str::parse).transpose()?,
            max_entries: self
                .max_entries
                .map(|v| limits.check_max_entries(v))
                .transpose()?,
            ingestion_interval: self
                .ingestion_interval
                .map(|v| limits.check_interval(v))
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_applied_on_register() {
        let s = NewSource::new("Tech", "rss", "https://example.com/feed.xml")
            .into_source(&SourceLimits::default())
            .unwrap();
        assert_eq!(s.max_entries, 500);
        assert_eq!(s.ingestion_interval, 300);
        assert_eq!(s.status, SourceStatus::Active);
        assert!(s.config.is_empty());
    }

    #[test]
    fn rejects_blank_name_url_and_unknown_type() {
        let limits = SourceLimits::default();
        let e = NewSource::new("  ", "rss", "u").into_source(&limits).unwrap_err();
        assert!(matches!(e, RegistryError::Validation(_)));
        let e = NewSource::new("n", "rss", "").into_source(&limits).unwrap_err();
        assert!(matches!(e, RegistryError::Validation(_)));
        let e = NewSource::new("n", "podcast", "u").into_source(&limits).unwrap_err();
        assert!(e.to_string().contains("podcast"));
    }

    #[test]
    fn bounds_are_inclusive() {
        let limits = SourceLimits::default();
        let base = || NewSource::new("n", "api", "https://x");
        assert!(base().with_max_entries(10).into_source(&limits).is_ok());
        assert!(base().with_max_entries(10_000).into_source(&limits).is_ok());
        assert!(base().with_max_entries(9).into_source(&limits).is_err());
        assert!(base().with_max_entries(10_001).into_source(&limits).is_err());
        assert!(base().with_interval(60).into_source(&limits).is_ok());
        assert!(base().with_interval(59).into_source(&limits).is_err());
        assert!(base().with_interval(-1).into_source(&limits).is_err());
    }

    #[test]
    fn config_must_be_object() {
        let limits = SourceLimits::default();
        let ok = NewSource::new("n", "weather", "https://x")
            .with_config(json!({"cities": ["Tokyo"]}))
            .into_source(&limits)
            .unwrap();
        assert_eq!(ok.config["cities"], json!(["Tokyo"]));
        assert!(NewSource::new("n", "weather", "https://x")
            .with_config(json!([1, 2]))
            .into_source(&limits)
            .is_err());
    }

    #[test]
    fn transition_table() {
        use SourceStatus::*;
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(Active.can_transition_to(Error));
        assert!(Error.can_transition_to(Active));
        assert!(Paused.can_transition_to(Deleted));
        assert!(!Paused.can_transition_to(Error));
        assert!(!Deleted.can_transition_to(Active));
        assert!(Active.can_transition_to(Active));
    }

    #[test]
    fn type_parsing_is_case_insensitive() {
        assert_eq!("RSS".parse::<SourceType>().unwrap(), SourceType::Rss);
        assert_eq!(" news ".parse::<SourceType>().unwrap(), SourceType::News);
    }
}
