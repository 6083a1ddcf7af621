//! # Sync Engine Configuration
//!
//! Section-per-concern configuration structs with explicit defaults, loadable
//! from the environment (`PORTAL_SYNC__*`). Every field is defaulted so the
//! engine runs with no configuration at all; deployments override only what
//! they need (typically the rate budget, which mirrors the external workspace
//! API's documented quota).
//!
//! ## Usage
//!
//! ```rust
//! use portal_sync::config::SyncConfig;
//!
//! let config = SyncConfig::default();
//! assert_eq!(config.rate_limit.max_requests_per_window, 3);
//! assert_eq!(config.dispatcher.default_max_attempts, 3);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Root configuration for the sync engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Outbound call budget against the external workspace API
    pub rate_limit: RateLimitConfig,

    /// Retry backoff policy for transient failures
    pub backoff: BackoffConfig,

    /// Dispatcher loop and attempt-ceiling settings
    pub dispatcher: DispatcherConfig,

    /// Per-call executor settings
    pub executor: ExecutorConfig,
}

impl SyncConfig {
    /// Load configuration from `PORTAL_SYNC__*` environment variables,
    /// falling back to defaults for anything unset.
    ///
    /// Example: `PORTAL_SYNC__RATE_LIMIT__MAX_REQUESTS_PER_WINDOW=5`.
    pub fn from_env() -> Result<Self> {
        let loaded = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("PORTAL_SYNC")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SyncError::Configuration(e.to_string()))?;

        loaded
            .try_deserialize()
            .map_err(|e| SyncError::Configuration(e.to_string()))
    }
}

/// Fixed-window call budget configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Calls allowed per window
    pub max_requests_per_window: u32,

    /// Window length in milliseconds
    pub window_ms: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: 3,
            window_ms: 1000,
        }
    }
}

/// Exponential backoff configuration for retryable task failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Base delay in milliseconds
    pub base_delay_ms: u64,

    /// Multiplier applied per attempt (`base * multiplier^attempts`)
    pub backoff_multiplier: f64,

    /// Ceiling on the computed delay, in milliseconds
    pub max_delay_ms: u64,

    /// Whether to add positive jitter to computed delays
    pub jitter_enabled: bool,

    /// Maximum jitter as a fraction of the computed delay (0.0 - 1.0)
    pub jitter_max_percentage: f64,
}

impl BackoffConfig {
    /// Delay before a task that has finished `attempts` executions becomes
    /// eligible again. Jitter only ever lengthens the delay, so the
    /// `base * multiplier^attempts` lower bound always holds.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let base = Duration::from_millis(self.base_delay_ms);
        let delay = base.mul_f64(self.backoff_multiplier.powi(attempts as i32));

        let jittered = if self.jitter_enabled && self.jitter_max_percentage > 0.0 {
            let jitter = fastrand::f64() * self.jitter_max_percentage;
            delay.mul_f64(1.0 + jitter)
        } else {
            delay
        };

        jittered.min(Duration::from_millis(self.max_delay_ms))
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 300_000,
            jitter_enabled: true,
            jitter_max_percentage: 0.1,
        }
    }
}

/// Dispatcher loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Tick interval in milliseconds for the dispatch loop
    pub tick_ms: u64,

    /// Attempt ceiling applied to tasks that do not specify their own
    pub default_max_attempts: u32,
}

impl DispatcherConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_ms: 250,
            default_max_attempts: 3,
        }
    }
}

/// Per-call executor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Bound on a single external call, in milliseconds
    pub call_timeout_ms: u64,
}

impl ExecutorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
        }
    }
}
