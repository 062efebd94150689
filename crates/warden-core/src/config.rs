//! Reaper configuration.
//!
//! Sources, lowest to highest precedence:
//! - built-in defaults
//! - a JSON file (`ReaperConfig::from_json_file`)
//! - environment variables (`ReaperConfig::apply_env`):
//!   - `WARDEN_STALE_THRESHOLD_HOURS` (default: 12)
//!   - `WARDEN_LONG_RUNNING_THRESHOLD_HOURS` (default: 1)
//!   - `WARDEN_GRACE_MINUTES` (default: 30)
//!   - `WARDEN_OVERALL_TIMEOUT_SECONDS` (default: 60)
//!   - `WARDEN_PER_QUERY_TIMEOUT_SECONDS` (default: 30)
//!   - `WARDEN_PER_CANCEL_TIMEOUT_SECONDS` (default: 20)
//!
//! The binary applies its own flags on top. `validate` bounds every value:
//! thresholds up to `MAX_THRESHOLD_HOURS`, grace up to `MAX_GRACE_MINUTES`,
//! timeouts between 1 and `MAX_TIMEOUT_SECONDS`.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ScanKind, ThresholdWindow, WardenError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    #[error(transparent)]
    Threshold(#[from] WardenError),

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("{field} must be at most {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },
}

/// Longest accepted grace period (one week).
pub const MAX_GRACE_MINUTES: u64 = 7 * 24 * 60;

/// Longest accepted timeout of any kind (one day).
pub const MAX_TIMEOUT_SECONDS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaperConfig {
    /// SCHEDULED runs whose expected start is older than this are stale.
    pub stale_threshold_hours: f64,

    /// RUNNING runs that started longer ago than this are long-running.
    pub long_running_threshold_hours: f64,

    /// An invocation starting this late (or later) cancels itself.
    pub grace_minutes: u64,

    /// Ceiling for self-check through the last cancellation.
    pub overall_timeout_seconds: u64,

    pub per_query_timeout_seconds: u64,

    pub per_cancel_timeout_seconds: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            stale_threshold_hours: 12.0,
            long_running_threshold_hours: 1.0,
            grace_minutes: 30,
            overall_timeout_seconds: 60,
            per_query_timeout_seconds: 30,
            per_cancel_timeout_seconds: 20,
        }
    }
}

impl ReaperConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Overlay `WARDEN_*` environment variables.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Overlay variables resolved through `lookup` (tests pass a map).
    pub fn apply_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        overlay(&lookup, "WARDEN_STALE_THRESHOLD_HOURS", &mut self.stale_threshold_hours)?;
        overlay(
            &lookup,
            "WARDEN_LONG_RUNNING_THRESHOLD_HOURS",
            &mut self.long_running_threshold_hours,
        )?;
        overlay(&lookup, "WARDEN_GRACE_MINUTES", &mut self.grace_minutes)?;
        overlay(
            &lookup,
            "WARDEN_OVERALL_TIMEOUT_SECONDS",
            &mut self.overall_timeout_seconds,
        )?;
        overlay(
            &lookup,
            "WARDEN_PER_QUERY_TIMEOUT_SECONDS",
            &mut self.per_query_timeout_seconds,
        )?;
        overlay(
            &lookup,
            "WARDEN_PER_CANCEL_TIMEOUT_SECONDS",
            &mut self.per_cancel_timeout_seconds,
        )?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stale_window()?;
        self.long_running_window()?;
        at_most("grace_minutes", self.grace_minutes, MAX_GRACE_MINUTES)?;
        for (field, value) in [
            ("overall_timeout_seconds", self.overall_timeout_seconds),
            ("per_query_timeout_seconds", self.per_query_timeout_seconds),
            ("per_cancel_timeout_seconds", self.per_cancel_timeout_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroTimeout(field));
            }
            at_most(field, value, MAX_TIMEOUT_SECONDS)?;
        }
        Ok(())
    }

    pub fn stale_window(&self) -> Result<ThresholdWindow, WardenError> {
        ThresholdWindow::new(ScanKind::Stale, self.stale_threshold_hours)
    }

    pub fn long_running_window(&self) -> Result<ThresholdWindow, WardenError> {
        ThresholdWindow::new(ScanKind::LongRunning, self.long_running_threshold_hours)
    }

    // 以下の getter は validate() の上限で切り詰める（未検証の値でも panic しない）

    pub fn grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.grace_minutes.min(MAX_GRACE_MINUTES) as i64)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_seconds.min(MAX_TIMEOUT_SECONDS))
    }

    pub fn per_query_timeout(&self) -> Duration {
        Duration::from_secs(self.per_query_timeout_seconds.min(MAX_TIMEOUT_SECONDS))
    }

    pub fn per_cancel_timeout(&self) -> Duration {
        Duration::from_secs(self.per_cancel_timeout_seconds.min(MAX_TIMEOUT_SECONDS))
    }
}

fn at_most(field: &'static str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::OutOfRange { field, value, max });
    }
    Ok(())
}

fn overlay<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(var) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { var, value })?;
    }
    Ok(())
}
