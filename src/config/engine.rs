// src/config/engine.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::ingest::scheduler::SchedulerConfig;
use crate::source::SourceLimits;
use crate::stats::FailurePolicy;

pub const ENV_CONFIG_PATH: &str = "LIVE_SOURCES_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/live_sources.toml";
pub const ENV_MAX_CONCURRENT_FETCHES: &str = "LIVE_SOURCES_MAX_CONCURRENT_FETCHES";
pub const ENV_FAILURE_THRESHOLD: &str = "LIVE_SOURCES_FAILURE_THRESHOLD";

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; live-sources/0.1; +https://github.com/live-sources)";

/// Engine-wide knobs. Every field has a default, so a partial (or empty)
/// TOML file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub min_ingestion_interval_secs: u64,
    pub max_ingestion_interval_secs: u64,
    pub min_max_entries: usize,
    pub max_max_entries: usize,
    pub default_max_entries: usize,
    pub default_ingestion_interval_secs: u64,
    /// Consecutive failed cycles before a source is moved to `error`.
    pub failure_threshold: u32,
    pub reset_failures_on_success: bool,
    pub max_concurrent_fetches: usize,
    pub fetch_timeout_cap_secs: u64,
    pub rss_items_per_fetch: usize,
    pub user_agent: String,
    /// Lifecycle event buffer; a lagging scheduler falls back to a full reconcile.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = SourceLimits::default();
        let policy = FailurePolicy::default();
        let sched = SchedulerConfig::default();
        Self {
            min_ingestion_interval_secs: limits.min_interval_secs,
            max_ingestion_interval_secs: limits.max_interval_secs,
            min_max_entries: limits.min_max_entries,
            max_max_entries: limits.max_max_entries,
            default_max_entries: limits.default_max_entries,
            default_ingestion_interval_secs: limits.default_interval_secs,
            failure_threshold: policy.threshold,
            reset_failures_on_success: policy.reset_on_success,
            max_concurrent_fetches: sched.max_concurrent_fetches,
            fetch_timeout_cap_secs: sched.fetch_timeout_cap.as_secs(),
            rss_items_per_fetch: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            event_buffer: 256,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML string and sanitize it. Env overrides are not applied.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: EngineConfig = toml::from_str(s).context("parsing engine config")?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $LIVE_SOURCES_CONFIG_PATH (must exist when set)
    /// 2) config/live_sources.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from(&default_p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Some(n) = parse_env_num::<usize>(ENV_MAX_CONCURRENT_FETCHES) {
            self.max_concurrent_fetches = n;
        }
        if let Some(n) = parse_env_num::<u32>(ENV_FAILURE_THRESHOLD) {
            self.failure_threshold = n;
        }
        self.sanitize();
    }

    /// Repair nonsensical values instead of refusing to start.
    pub fn sanitize(&mut self) {
        let d = Self::default();
        // repair zeros before ordering the bounds
        if self.max_ingestion_interval_secs == 0 {
            self.max_ingestion_interval_secs = d.max_ingestion_interval_secs;
        }
        if self.min_ingestion_interval_secs == 0 {
            self.min_ingestion_interval_secs = d.min_ingestion_interval_secs;
        }
        if self.min_ingestion_interval_secs > self.max_ingestion_interval_secs {
            std::mem::swap(
                &mut self.min_ingestion_interval_secs,
                &mut self.max_ingestion_interval_secs,
            );
        }
        if self.max_max_entries == 0 {
            self.max_max_entries = d.max_max_entries;
        }
        if self.min_max_entries == 0 {
            self.min_max_entries = 1;
        }
        if self.min_max_entries > self.max_max_entries {
            std::mem::swap(&mut self.min_max_entries, &mut self.max_max_entries);
        }
        self.default_max_entries = self
            .default_max_entries
            .clamp(self.min_max_entries, self.max_max_entries);
        self.default_ingestion_interval_secs = self
            .default_ingestion_interval_secs
            .clamp(self.min_ingestion_interval_secs, self.max_ingestion_interval_secs);
        if self.failure_threshold == 0 {
            self.failure_threshold = d.failure_threshold;
        }
        if self.max_concurrent_fetches == 0 {
            self.max_concurrent_fetches = d.max_concurrent_fetches;
        }
        if self.fetch_timeout_cap_secs == 0 {
            self.fetch_timeout_cap_secs = d.fetch_timeout_cap_secs;
        }
        if self.rss_items_per_fetch == 0 {
            self.rss_items_per_fetch = d.rss_items_per_fetch;
        }
        if self.user_agent.trim().is_empty() {
            self.user_agent = d.user_agent;
        }
        if self.event_buffer == 0 {
            self.event_buffer = d.event_buffer;
        }
    }

    pub fn limits(&self) -> SourceLimits {
        SourceLimits {
            min_max_entries: self.min_max_entries,
            max_max_entries: self.max_max_entries,
            min_interval_secs: self.min_ingestion_interval_secs,
            max_interval_secs: self.max_ingestion_interval_secs,
            default_max_entries: self.default_max_entries,
            default_interval_secs: self.default_ingestion_interval_secs,
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy {
            threshold: self.failure_threshold,
            reset_on_success: self.reset_failures_on_success,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_fetches: self.max_concurrent_fetches,
            fetch_timeout_cap: Duration::from_secs(self.fetch_timeout_cap_secs),
        }
    }
}

fn parse_env_num<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn empty_toml_is_defaults() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_toml_overrides_and_sanitizes() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            failure_threshold = 3
            min_max_entries = 500
            max_max_entries = 20
            default_max_entries = 1000
            max_concurrent_fetches = 0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.failure_threshold, 3);
        assert_eq!((cfg.min_max_entries, cfg.max_max_entries), (20, 500));
        assert_eq!(cfg.default_max_entries, 500);
        assert_eq!(cfg.max_concurrent_fetches, 16);
        assert_eq!(cfg.limits().max_max_entries, 500);
        assert_eq!(cfg.failure_policy().threshold, 3);
    }

    #[test]
    fn zero_upper_bounds_never_become_the_lower_bound() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            max_ingestion_interval_secs = 0
            max_max_entries = 0
            "#,
        )
        .unwrap();
        let d = EngineConfig::default();
        assert_eq!(cfg.min_ingestion_interval_secs, d.min_ingestion_interval_secs);
        assert_eq!(cfg.max_ingestion_interval_secs, d.max_ingestion_interval_secs);
        assert!(cfg.min_max_entries >= 1);
        assert_eq!(cfg.max_max_entries, d.max_max_entries);

        let limits = cfg.limits();
        assert!(limits.check_interval(0).is_err());
        assert!(limits.check_max_entries(0).is_err());
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(EngineConfig::from_toml_str("failure_threshold = \"many\"").is_err());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);
        env::remove_var(ENV_MAX_CONCURRENT_FETCHES);
        env::remove_var(ENV_FAILURE_THRESHOLD);

        // nothing on disk
        assert_eq!(EngineConfig::load_default().unwrap(), EngineConfig::default());

        // config/live_sources.toml in cwd
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(tmp.path().join(DEFAULT_CONFIG_PATH), "rss_items_per_fetch = 4").unwrap();
        assert_eq!(EngineConfig::load_default().unwrap().rss_items_per_fetch, 4);

        // explicit path wins, env numbers override the file
        let p = tmp.path().join("custom.toml");
        fs::write(&p, "rss_items_per_fetch = 7\nfailure_threshold = 2").unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        env::set_var(ENV_FAILURE_THRESHOLD, "9");
        let cfg = EngineConfig::load_default().unwrap();
        assert_eq!(cfg.rss_items_per_fetch, 7);
        assert_eq!(cfg.failure_threshold, 9);

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(EngineConfig::load_default().is_err());

        env::remove_var(ENV_CONFIG_PATH);
        env::remove_var(ENV_FAILURE_THRESHOLD);
        env::set_current_dir(&old).unwrap();
    }
}
