//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS, DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
    DEFAULT_RESYNC_PERIOD_SECS, DEFAULT_SYSTEM_NAMESPACE, DEFAULT_TRACKER_SWEEP_INTERVAL_SECS,
    DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace holding the processor and gateway image ConfigMaps and
    /// the `builders` ConfigMap
    pub system_namespace: String,
    /// Requeue interval after a successful pass (seconds)
    /// Also the lease of tracker entries
    pub resync_period_secs: u64,
    /// Exponential backoff starting value (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Delay before restarting a controller whose stream ended (seconds)
    pub watch_restart_delay_secs: u64,
    /// Reconciles running at once, per controller
    pub max_concurrent_reconciliations: u16,
    /// Log format (json, text)
    pub log_format: String,
    /// Interval between tracker sweeps (seconds)
    pub tracker_sweep_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            system_namespace: DEFAULT_SYSTEM_NAMESPACE.to_string(),
            resync_period_secs: DEFAULT_RESYNC_PERIOD_SECS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            log_format: "text".to_string(),
            tracker_sweep_interval_secs: DEFAULT_TRACKER_SWEEP_INTERVAL_SECS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            system_namespace: env_var_or_default_str("SYSTEM_NAMESPACE", DEFAULT_SYSTEM_NAMESPACE),
            resync_period_secs: env_var_or_default("RESYNC_PERIOD_SECS", DEFAULT_RESYNC_PERIOD_SECS),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
            tracker_sweep_interval_secs: env_var_or_default(
                "TRACKER_SWEEP_INTERVAL_SECS",
                DEFAULT_TRACKER_SWEEP_INTERVAL_SECS,
            ),
        }
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    /// Get backoff start duration
    pub fn backoff_start_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_start_ms)
    }

    /// Get backoff max duration
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    pub fn tracker_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.tracker_sweep_interval_secs)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
pub(crate) fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
