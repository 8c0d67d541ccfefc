//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (HYDROSYNC_*)
//! 2. TOML config file (if HYDROSYNC_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::service::ServicePolicy;
use crate::sync::SyncOptions;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (HYDROSYNC_*)
/// 2. TOML config file (if HYDROSYNC_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Endpoint of source A.
    ///
    /// Set via HYDROSYNC_HYDRO_URL environment variable.
    #[serde(default = "default_hydro_url")]
    pub hydro_url: String,

    /// Endpoint of source B.
    ///
    /// Set via HYDROSYNC_HYDRO2_URL environment variable.
    #[serde(default = "default_hydro2_url")]
    pub hydro2_url: String,

    /// User-Agent string for upstream requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upstream request timeout in milliseconds.
    ///
    /// Set via HYDROSYNC_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Path to the SQLite station store.
    ///
    /// Set via HYDROSYNC_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Lifetime of a per-source cache entry.
    #[serde(default = "default_source_ttl_secs")]
    pub source_ttl_secs: u64,

    /// Lifetime of the merged cache entry.
    #[serde(default = "default_merged_ttl_secs")]
    pub merged_ttl_secs: u64,

    /// Readings older than this are reported as stale.
    #[serde(default = "default_freshness_threshold_hours")]
    pub freshness_threshold_hours: f64,

    /// How long an expired entry stays usable as a fallback.
    #[serde(default = "default_stale_grace_secs")]
    pub stale_grace_secs: u64,

    /// UTC offset applied to upstream timestamps that carry no zone.
    #[serde(default = "default_source_utc_offset_minutes")]
    pub source_utc_offset_minutes: i32,

    #[serde(default = "default_sync_batch_size")]
    pub sync_batch_size: usize,

    #[serde(default)]
    pub sync_station_limit: Option<usize>,

    #[serde(default = "default_sync_concurrency")]
    pub sync_concurrency: usize,

    /// Whether sync requires the caller to present `sync_token`.
    #[serde(default)]
    pub sync_auth_required: bool,

    /// Shared token checked when `sync_auth_required` is set.
    ///
    /// Set via HYDROSYNC_SYNC_TOKEN environment variable.
    #[serde(default)]
    pub sync_token: Option<String>,
}

fn default_hydro_url() -> String {
    "https://danepubliczne.imgw.pl/api/data/hydro/".into()
}

fn default_hydro2_url() -> String {
    "https://danepubliczne.imgw.pl/api/data/hydro2/".into()
}

fn default_user_agent() -> String {
    "hydrosync/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./hydrosync.sqlite")
}

fn default_source_ttl_secs() -> u64 {
    300
}

fn default_merged_ttl_secs() -> u64 {
    300
}

fn default_freshness_threshold_hours() -> f64 {
    6.0
}

fn default_stale_grace_secs() -> u64 {
    3600
}

fn default_source_utc_offset_minutes() -> i32 {
    60
}

fn default_sync_batch_size() -> usize {
    50
}

fn default_sync_concurrency() -> usize {
    4
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            hydro_url: default_hydro_url(),
            hydro2_url: default_hydro2_url(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            db_path: default_db_path(),
            source_ttl_secs: default_source_ttl_secs(),
            merged_ttl_secs: default_merged_ttl_secs(),
            freshness_threshold_hours: default_freshness_threshold_hours(),
            stale_grace_secs: default_stale_grace_secs(),
            source_utc_offset_minutes: default_source_utc_offset_minutes(),
            sync_batch_size: default_sync_batch_size(),
            sync_station_limit: None,
            sync_concurrency: default_sync_concurrency(),
            sync_auth_required: false,
            sync_token: None,
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Offset used to interpret zone-less upstream timestamps.
    pub fn source_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.source_utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Cache and freshness policy for the smart data service.
    pub fn service_policy(&self) -> ServicePolicy {
        ServicePolicy {
            source_ttl: Duration::from_secs(self.source_ttl_secs),
            merged_ttl: Duration::from_secs(self.merged_ttl_secs),
            freshness_threshold_hours: self.freshness_threshold_hours,
            stale_grace: Duration::from_secs(self.stale_grace_secs),
            fetch_timeout: self.timeout(),
        }
    }

    /// Default sync parameters; callers may override per run.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            batch_size: self.sync_batch_size,
            station_limit: self.sync_station_limit,
            auth_required: self.sync_auth_required,
            concurrency: self.sync_concurrency,
        }
    }

    /// Whether a presented token satisfies the sync gate.
    pub fn sync_token_matches(&self, presented: Option<&str>) -> bool {
        match (self.sync_token.as_deref(), presented) {
            (Some(expected), Some(given)) => expected == given,
            _ => false,
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `HYDROSYNC_`
    /// 2. TOML file from `HYDROSYNC_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("HYDROSYNC_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("HYDROSYNC_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./hydrosync.sqlite"));
        assert_eq!(config.user_agent, "hydrosync/0.1");
        assert_eq!(config.timeout_ms, 20_000);
        assert_eq!(config.source_ttl_secs, 300);
        assert_eq!(config.merged_ttl_secs, 300);
        assert_eq!(config.freshness_threshold_hours, 6.0);
        assert_eq!(config.source_utc_offset_minutes, 60);
        assert!(!config.sync_auth_required);
        assert!(config.sync_token.is_none());
    }

    #[test]
    fn test_service_policy_durations() {
        let config = AppConfig { source_ttl_secs: 600, merged_ttl_secs: 120, ..Default::default() };
        let policy = config.service_policy();
        assert_eq!(policy.source_ttl, Duration::from_secs(600));
        assert_eq!(policy.merged_ttl, Duration::from_secs(120));
        assert_eq!(policy.fetch_timeout, Duration::from_millis(20_000));
    }

    #[test]
    fn test_source_offset() {
        let config = AppConfig { source_utc_offset_minutes: 120, ..Default::default() };
        assert_eq!(config.source_offset().local_minus_utc(), 7200);
    }

    #[test]
    fn test_sync_token_matches() {
        let config = AppConfig { sync_token: Some("secret".into()), ..Default::default() };
        assert!(config.sync_token_matches(Some("secret")));
        assert!(!config.sync_token_matches(Some("guess")));
        assert!(!config.sync_token_matches(None));

        let unset = AppConfig::default();
        assert!(!unset.sync_token_matches(Some("anything")));
    }
}
