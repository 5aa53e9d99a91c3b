//! Process-level configuration read from the environment.
//!
//! Transport credentials are read by each channel's own `from_env`; this
//! module covers storage, logging and scheduler timing.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Default SQLite location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:huddle.db?mode=rwc";

/// Non-empty, trimmed value of an environment variable.
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable, falling back to `default` when unset or invalid.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env_string(key) {
        Some(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Ignoring unparseable environment value");
                default
            }
        },
        None => default,
    }
}

/// Parse a boolean flag such as `true`, `0` or `off`.
pub fn env_bool(key: &str, default: bool) -> bool {
    match env_string(key).map(|v| v.to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// Timing of the scheduler's two duty cycles.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub reminder_tick: Duration,
    pub campaign_tick: Duration,
    /// Window in which an earlier reminder for the same event and category suppresses a new one.
    pub reminder_lookback: chrono::Duration,
    /// Half-width of the band around each milestone.
    pub reminder_tolerance: chrono::Duration,
    /// How long a claimed campaign stays locked if the executor dies mid-run.
    pub campaign_lease: chrono::Duration,
    pub max_campaigns_per_tick: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reminder_tick: Duration::from_secs(300),
            campaign_tick: Duration::from_secs(60),
            reminder_lookback: chrono::Duration::minutes(30),
            reminder_tolerance: chrono::Duration::minutes(5),
            campaign_lease: chrono::Duration::minutes(10),
            max_campaigns_per_tick: 50,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env_or_default() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_bool("SCHEDULER_ENABLED", defaults.enabled),
            reminder_tick: Duration::from_secs(env_parse("REMINDER_TICK_SECS", 300u64).max(1)),
            campaign_tick: Duration::from_secs(env_parse("CAMPAIGN_TICK_SECS", 60u64).max(1)),
            reminder_lookback: chrono::Duration::minutes(env_parse("REMINDER_LOOKBACK_MINS", 30i64)),
            reminder_tolerance: chrono::Duration::minutes(env_parse("REMINDER_TOLERANCE_MINS", 5i64)),
            campaign_lease: chrono::Duration::minutes(env_parse("CAMPAIGN_LEASE_MINS", 10i64).max(1)),
            max_campaigns_per_tick: env_parse("MAX_CAMPAIGNS_PER_TICK", 50i64).max(1),
            ..defaults
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Maximum pooled SQLite connections; `DATABASE_POOL_SIZE` overrides the core-derived default.
    pub pool_size: u32,
    pub log_dir: Option<String>,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env_string("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            pool_size: env_parse("DATABASE_POOL_SIZE", crate::database::default_pool_size()).max(1),
            log_dir: env_string("LOG_DIR"),
            scheduler: SchedulerConfig::from_env_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.reminder_tick, Duration::from_secs(300));
        assert_eq!(config.campaign_tick, Duration::from_secs(60));
        assert_eq!(config.reminder_lookback, chrono::Duration::minutes(30));
        assert_eq!(config.reminder_tolerance, chrono::Duration::minutes(5));
    }

    #[test]
    fn test_env_parse_falls_back_on_missing_key() {
        assert_eq!(env_parse("HUDDLE_TEST_SURELY_UNSET_KEY", 42u32), 42);
    }
}
