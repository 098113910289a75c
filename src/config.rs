//! Layered, environment-first configuration (`SPEC_FULL.md` §6, ambient
//! config section), grounded on the teacher's `ActonHtmxConfig` shape — here
//! the `figment`-based loading the teacher had left as `TODO` is implemented.
//!
//! Precedence: environment variables (highest) > `config.toml` > defaults.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Per-operation-type timeout overrides, keyed by the `OperationType::key()`
/// string. Populated from `OPERATION_TIMEOUTS_JSON`.
pub type TimeoutOverrides = HashMap<String, u64>;

/// Complete runtime configuration for the operation queue service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationQueueConfig {
    /// Redis-compatible connection string for the backing queue store.
    pub queue_url: String,

    /// Per-type handler timeout overrides in milliseconds.
    pub operation_timeouts_json: TimeoutOverrides,

    pub preemption_deadline_ms: u64,
    pub preemption_poll_interval_ms: u64,
    pub lease_duration_ms: u64,

    pub ws_heartbeat_ms: u64,
    pub ws_buffer_size: usize,
    pub ws_buffer_ttl_ms: u64,

    /// HMAC secret used to verify bearer JWTs at both REST and WS boundaries.
    pub jwt_secret: String,

    pub log_level: String,

    pub rate_limit_per_user_rpm: u32,
    pub rate_limit_per_ip_rpm: u32,
    pub rate_limit_window_secs: u64,

    pub shutdown_grace_secs: u64,
    pub http_bind_addr: String,
}

impl Default for OperationQueueConfig {
    fn default() -> Self {
        Self {
            queue_url: "redis://127.0.0.1:6379".to_string(),
            operation_timeouts_json: HashMap::new(),
            preemption_deadline_ms: 30_000,
            preemption_poll_interval_ms: 500,
            lease_duration_ms: 600_000,
            ws_heartbeat_ms: 30_000,
            ws_buffer_size: 200,
            ws_buffer_ttl_ms: 300_000,
            jwt_secret: "change-me-in-production".to_string(),
            log_level: "info".to_string(),
            rate_limit_per_user_rpm: 120,
            rate_limit_per_ip_rpm: 300,
            rate_limit_window_secs: 60,
            shutdown_grace_secs: 30,
            http_bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl OperationQueueConfig {
    /// Load configuration, merging `./config.toml` (if present) under
    /// environment variables and hardcoded defaults.
    ///
    /// # Errors
    /// Returns an error if an environment variable or config file value
    /// can't be deserialized into its target field.
    pub fn load() -> anyhow::Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::raw().only(&[
                "QUEUE_URL",
                "OPERATION_TIMEOUTS_JSON",
                "PREEMPTION_DEADLINE_MS",
                "PREEMPTION_POLL_INTERVAL_MS",
                "LEASE_DURATION_MS",
                "WS_HEARTBEAT_MS",
                "WS_BUFFER_SIZE",
                "WS_BUFFER_TTL_MS",
                "JWT_SECRET",
                "LOG_LEVEL",
                "RATE_LIMIT_PER_USER_RPM",
                "RATE_LIMIT_PER_IP_RPM",
                "RATE_LIMIT_WINDOW_SECS",
                "SHUTDOWN_GRACE_SECS",
                "HTTP_BIND_ADDR",
            ])
            .map(|key| key.as_str().to_lowercase()));

        Ok(figment.extract()?)
    }

    #[must_use]
    pub fn preemption_deadline(&self) -> Duration {
        Duration::from_millis(self.preemption_deadline_ms)
    }

    #[must_use]
    pub fn preemption_poll_interval(&self) -> Duration {
        Duration::from_millis(self.preemption_poll_interval_ms)
    }

    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    #[must_use]
    pub fn ws_heartbeat(&self) -> Duration {
        Duration::from_millis(self.ws_heartbeat_ms)
    }

    #[must_use]
    pub fn ws_buffer_ttl(&self) -> Duration {
        Duration::from_millis(self.ws_buffer_ttl_ms)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Timeout override for a specific operation key, if configured.
    #[must_use]
    pub fn timeout_override(&self, operation_key: &str) -> Option<Duration> {
        self.operation_timeouts_json.get(operation_key).map(|ms| Duration::from_millis(*ms))
    }
}
