//! Core configuration module
//!
//! Every operational knob of the execution core lives here, loaded from
//! environment variables (a `.env` file is honoured) with documented
//! defaults. Services receive the config by value at construction and never
//! read the environment themselves.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Configuration for the execution core
///
/// Field defaults match the documented operational defaults: a five-slot
/// runner, a 30-second scheduler tick, 5 s / 50 MB sandbox budgets and a
/// 100-requests-per-15-minutes rate-limit base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Path to the SQLite database file
    pub database_path: String,
    /// Maximum concurrently running executions
    pub max_concurrent_executions: usize,
    /// Scheduler tick period
    pub scheduler_tick_seconds: u64,
    /// Capacity bound of the runner's priority queue
    pub execution_queue_capacity: usize,
    /// Grace period between a cancellation signal and a hard stop
    pub cancellation_grace_seconds: u64,
    /// Audit buffer size before a forced flush
    pub audit_buffer_size: usize,
    /// Audit flush interval
    pub audit_flush_interval_seconds: u64,
    /// Telemetry sample buffer size
    pub telemetry_buffer_size: usize,
    /// Telemetry flush interval
    pub telemetry_flush_interval_seconds: u64,
    /// Default per-group alert cooldown
    pub alert_cooldown_seconds: u64,
    /// Bound on retained alert history
    pub alert_history_size: usize,
    /// Sandbox wall-clock budget per evaluation
    pub sandbox_timeout_ms: u64,
    /// Sandbox peak allocation budget
    pub sandbox_memory_bytes: usize,
    /// Sandbox expression complexity ceiling
    pub sandbox_complexity_ceiling: usize,
    /// Rate-limit window
    pub rate_limit_window_ms: u64,
    /// Rate-limit base allowance per anonymous identity per window
    pub rate_limit_base_max: u64,
    /// CIDR blocks whose clients bypass rate limiting
    pub trusted_cidrs: Vec<String>,
    /// Where the connection-info encryption key comes from (env var name)
    pub encryption_key_env: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: "dataweaver.db".to_string(),
            max_concurrent_executions: 5,
            scheduler_tick_seconds: 30,
            execution_queue_capacity: 1000,
            cancellation_grace_seconds: 5,
            audit_buffer_size: 100,
            audit_flush_interval_seconds: 30,
            telemetry_buffer_size: 1000,
            telemetry_flush_interval_seconds: 30,
            alert_cooldown_seconds: 60,
            alert_history_size: 1000,
            sandbox_timeout_ms: 5_000,
            sandbox_memory_bytes: 50 * 1024 * 1024,
            sandbox_complexity_ceiling: 100,
            rate_limit_window_ms: 15 * 60 * 1000,
            rate_limit_base_max: 100,
            trusted_cidrs: Vec::new(),
            encryption_key_env: "DATAWEAVER_ENCRYPTION_KEY".to_string(),
        }
    }
}

impl CoreConfig {
    /// Loads the configuration from environment variables
    ///
    /// Unset or unparsable variables fall back to the defaults above. Call
    /// `dotenv::dotenv().ok()` before this to honour a `.env` file.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: env_string("DATAWEAVER_DB_PATH", defaults.database_path),
            max_concurrent_executions: env_parse(
                "DATAWEAVER_MAX_CONCURRENT",
                defaults.max_concurrent_executions,
            ),
            scheduler_tick_seconds: env_parse(
                "DATAWEAVER_SCHEDULER_TICK_SECONDS",
                defaults.scheduler_tick_seconds,
            ),
            execution_queue_capacity: env_parse(
                "DATAWEAVER_QUEUE_CAPACITY",
                defaults.execution_queue_capacity,
            ),
            cancellation_grace_seconds: env_parse(
                "DATAWEAVER_CANCEL_GRACE_SECONDS",
                defaults.cancellation_grace_seconds,
            ),
            audit_buffer_size: env_parse("DATAWEAVER_AUDIT_BUFFER_SIZE", defaults.audit_buffer_size),
            audit_flush_interval_seconds: env_parse(
                "DATAWEAVER_AUDIT_FLUSH_SECONDS",
                defaults.audit_flush_interval_seconds,
            ),
            telemetry_buffer_size: env_parse(
                "DATAWEAVER_TELEMETRY_BUFFER_SIZE",
                defaults.telemetry_buffer_size,
            ),
            telemetry_flush_interval_seconds: env_parse(
                "DATAWEAVER_TELEMETRY_FLUSH_SECONDS",
                defaults.telemetry_flush_interval_seconds,
            ),
            alert_cooldown_seconds: env_parse(
                "DATAWEAVER_ALERT_COOLDOWN_SECONDS",
                defaults.alert_cooldown_seconds,
            ),
            alert_history_size: env_parse(
                "DATAWEAVER_ALERT_HISTORY_SIZE",
                defaults.alert_history_size,
            ),
            sandbox_timeout_ms: env_parse("DATAWEAVER_SANDBOX_TIMEOUT_MS", defaults.sandbox_timeout_ms),
            sandbox_memory_bytes: env_parse(
                "DATAWEAVER_SANDBOX_MEMORY_BYTES",
                defaults.sandbox_memory_bytes,
            ),
            sandbox_complexity_ceiling: env_parse(
                "DATAWEAVER_SANDBOX_COMPLEXITY",
                defaults.sandbox_complexity_ceiling,
            ),
            rate_limit_window_ms: env_parse(
                "DATAWEAVER_RATE_LIMIT_WINDOW_MS",
                defaults.rate_limit_window_ms,
            ),
            rate_limit_base_max: env_parse(
                "DATAWEAVER_RATE_LIMIT_BASE_MAX",
                defaults.rate_limit_base_max,
            ),
            trusted_cidrs: env::var("DATAWEAVER_TRUSTED_CIDRS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.trusted_cidrs),
            encryption_key_env: env_string("DATAWEAVER_ENCRYPTION_KEY_ENV", defaults.encryption_key_env),
        }
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_seconds)
    }

    pub fn cancellation_grace(&self) -> Duration {
        Duration::from_secs(self.cancellation_grace_seconds)
    }

    pub fn audit_flush_interval(&self) -> Duration {
        Duration::from_secs(self.audit_flush_interval_seconds)
    }

    pub fn telemetry_flush_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_flush_interval_seconds)
    }
}

fn env_string(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.max_concurrent_executions, 5);
        assert_eq!(config.scheduler_tick_seconds, 30);
        assert_eq!(config.sandbox_timeout_ms, 5_000);
        assert_eq!(config.sandbox_memory_bytes, 50 * 1024 * 1024);
        assert_eq!(config.rate_limit_base_max, 100);
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("DATAWEAVER_TEST_PARSE", "not-a-number");
        let value: u64 = env_parse("DATAWEAVER_TEST_PARSE", 7);
        assert_eq!(value, 7);
        std::env::remove_var("DATAWEAVER_TEST_PARSE");
    }
}
