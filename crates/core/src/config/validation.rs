//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

const MAX_TTL_SECS: u64 = 24 * 60 * 60;

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - an upstream URL is not http(s)
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - a cache TTL is 0 or longer than a day
    /// - `freshness_threshold_hours` is not positive
    /// - `source_utc_offset_minutes` is outside -12h..=+14h
    /// - `sync_batch_size` or `sync_concurrency` is 0
    ///
    /// Returns `ConfigError::Missing` if sync auth is required but no token is configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, url) in [("hydro_url", &self.hydro_url), ("hydro2_url", &self.hydro2_url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(invalid(field, "must be an http(s) URL"));
            }
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        for (field, ttl) in [("source_ttl_secs", self.source_ttl_secs), ("merged_ttl_secs", self.merged_ttl_secs)] {
            if ttl == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
            if ttl > MAX_TTL_SECS {
                return Err(invalid(field, "must not exceed 24 hours"));
            }
        }

        if !(self.freshness_threshold_hours.is_finite() && self.freshness_threshold_hours > 0.0) {
            return Err(invalid("freshness_threshold_hours", "must be a positive number of hours"));
        }

        if !(-720..=840).contains(&self.source_utc_offset_minutes) {
            return Err(invalid("source_utc_offset_minutes", "must be between -720 and 840"));
        }

        if self.sync_batch_size == 0 {
            return Err(invalid("sync_batch_size", "must be greater than 0"));
        }
        if self.sync_concurrency == 0 {
            return Err(invalid("sync_concurrency", "must be greater than 0"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.sync_auth_required && self.sync_token.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing {
                field: "sync_token".into(),
                hint: "Set HYDROSYNC_SYNC_TOKEN or disable sync_auth_required".into(),
            });
        }

        if self.merged_ttl_secs > self.source_ttl_secs {
            tracing::warn!(
                merged_ttl_secs = self.merged_ttl_secs,
                source_ttl_secs = self.source_ttl_secs,
                "merged_ttl_secs exceeds source_ttl_secs; merged snapshot will outlive its inputs"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_url() {
        let config = AppConfig { hydro2_url: "ftp://example.com".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "hydro2_url"));
    }

    #[test]
    fn test_validate_timeout_too_small() {
        let config = AppConfig { timeout_ms: 50, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_validate_zero_ttl() {
        let config = AppConfig { source_ttl_secs: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "source_ttl_secs"));
    }

    #[test]
    fn test_validate_ttl_exceeds_limit() {
        let config = AppConfig { merged_ttl_secs: MAX_TTL_SECS + 1, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "merged_ttl_secs"));
    }

    #[test]
    fn test_validate_freshness_threshold() {
        let config = AppConfig { freshness_threshold_hours: 0.0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "freshness_threshold_hours"));
    }

    #[test]
    fn test_validate_offset_range() {
        let config = AppConfig { source_utc_offset_minutes: 900, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "source_utc_offset_minutes"));
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let config = AppConfig { sync_batch_size: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "sync_batch_size"));
    }

    #[test]
    fn test_validate_auth_without_token() {
        let config = AppConfig { sync_auth_required: true, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Missing { field, .. }) if field == "sync_token"));

        let config = AppConfig { sync_auth_required: true, sync_token: Some("t0ken".into()), ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
