//! Runtime configuration for the purchasing service.
//!
//! | variable                       | default   |
//! |--------------------------------|-----------|
//! | `PROCURELY_APPROVAL_THRESHOLD` | `200000`  |
//! | `PROCURELY_LOG_FORMAT`         | `json`    |
//!
//! Amounts are in minor currency units.

use anyhow::Context;
use thiserror::Error;
use tracing::warn;

use procurely_observability::LogFormat;
use procurely_purchasing::{ApprovalPolicy, DEFAULT_APPROVAL_THRESHOLD};

pub const APPROVAL_THRESHOLD_VAR: &str = "PROCURELY_APPROVAL_THRESHOLD";
pub const LOG_FORMAT_VAR: &str = "PROCURELY_LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer amount in minor units, got '{value}'")]
    InvalidThreshold { var: &'static str, value: String },
    #[error("{var}: {message}")]
    InvalidLogFormat { var: &'static str, message: String },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PurchasingConfig {
    pub approval_threshold_minor_units: u64,
    pub log_format: LogFormat,
}

impl Default for PurchasingConfig {
    fn default() -> Self {
        Self {
            approval_threshold_minor_units: DEFAULT_APPROVAL_THRESHOLD,
            log_format: LogFormat::default(),
        }
    }
}

impl PurchasingConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`; `None` means unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let approval_threshold_minor_units = match lookup(APPROVAL_THRESHOLD_VAR) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidThreshold {
                    var: APPROVAL_THRESHOLD_VAR,
                    value: raw.clone(),
                })?,
            None => {
                warn!(
                    var = APPROVAL_THRESHOLD_VAR,
                    default = defaults.approval_threshold_minor_units,
                    "approval threshold not set; using default"
                );
                defaults.approval_threshold_minor_units
            }
        };

        let log_format = match lookup(LOG_FORMAT_VAR) {
            Some(raw) => raw.parse::<LogFormat>().map_err(|e| ConfigError::InvalidLogFormat {
                var: LOG_FORMAT_VAR,
                message: e.to_string(),
            })?,
            None => defaults.log_format,
        };

        Ok(Self {
            approval_threshold_minor_units,
            log_format,
        })
    }

    /// Load from the environment, attaching context for process startup.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_env().context("invalid purchasing configuration")
    }

    pub fn approval_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::new(self.approval_threshold_minor_units)
    }

    /// Install the process-wide subscriber in the configured format.
    pub fn init_logging(&self) {
        procurely_observability::init_with(self.log_format);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_values_fall_back_to_defaults() {
        let config = PurchasingConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PurchasingConfig::default());
        assert_eq!(config.approval_policy().threshold, DEFAULT_APPROVAL_THRESHOLD);
    }

    #[test]
    fn reads_threshold_and_format() {
        let config = PurchasingConfig::from_lookup(lookup(&[
            (APPROVAL_THRESHOLD_VAR, " 50000 "),
            (LOG_FORMAT_VAR, "pretty"),
        ]))
        .unwrap();

        assert_eq!(config.approval_threshold_minor_units, 50_000);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.approval_policy().requires_approval(50_001));
        assert!(!config.approval_policy().requires_approval(50_000));
    }

    #[test]
    fn configured_format_drives_logging_setup() {
        let config = PurchasingConfig::from_lookup(lookup(&[(LOG_FORMAT_VAR, "Pretty")])).unwrap();
        assert_eq!(config.log_format, LogFormat::Pretty);

        config.init_logging();
        // A second install is ignored rather than panicking.
        config.init_logging();
        tracing::info!(format = %config.log_format, "logging ready");
    }

    #[test]
    fn rejects_unparsable_values() {
        let err = PurchasingConfig::from_lookup(lookup(&[(APPROVAL_THRESHOLD_VAR, "-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { .. }));

        let err = PurchasingConfig::from_lookup(lookup(&[(LOG_FORMAT_VAR, "xml")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogFormat { .. }));
    }
}
