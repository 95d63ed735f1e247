//! Centralized Configuration Management
//!
//! All tunables for retry, reconnection, queueing and maintenance live here so
//! the runtime can be configured from one serializable [`SdkConfig`].

use core::fmt;
use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::backoff::exponential_delay;
use crate::errors::{SdkError, SdkResult};

/// Serialize `Duration` fields as integer milliseconds
mod duration_millis {
    use core::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

// ----------------------------------------------------------------------------
// Retry Policy
// ----------------------------------------------------------------------------

/// Bounded exponential backoff policy for a retried operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed before the budget is exhausted
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Growth factor applied per attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Policy used for outbound sends
    pub fn for_sends() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before the given (1-based) attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        exponential_delay(
            self.initial_delay,
            self.max_delay,
            self.backoff_multiplier,
            attempt,
        )
    }

    fn validate(&self, name: &str) -> SdkResult<()> {
        validate_backoff(name, self.initial_delay, self.max_delay, self.backoff_multiplier)
    }
}

// ----------------------------------------------------------------------------
// Reconnection Configuration
// ----------------------------------------------------------------------------

/// Per-route reconnection behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectionConfig {
    /// Whether dropped routes are reconnected automatically
    pub enabled: bool,
    /// Reconnection attempts before giving up
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectionConfig {
    /// Configuration with automatic reconnection turned off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Same defaults with a different attempt budget
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay before the given (1-based) reconnection attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        exponential_delay(
            self.initial_delay,
            self.max_delay,
            self.backoff_multiplier,
            attempt,
        )
    }

    fn validate(&self) -> SdkResult<()> {
        if self.enabled && self.max_attempts == 0 {
            return Err(SdkError::config_error(
                "reconnection.max_attempts must be positive when reconnection is enabled",
            ));
        }
        validate_backoff(
            "reconnection",
            self.initial_delay,
            self.max_delay,
            self.backoff_multiplier,
        )
    }
}

// ----------------------------------------------------------------------------
// Event Queue Configuration
// ----------------------------------------------------------------------------

/// Capacity limits for the offline event queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQueueConfig {
    /// Cap on queued events across all routes
    pub max_queue_size: usize,
    /// Optional cap on queued events for any single route
    pub max_events_per_route: Option<usize>,
}

impl Default for EventQueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_events_per_route: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Maintenance Configuration
// ----------------------------------------------------------------------------

/// Periodic cleanup settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// How long processed events are kept before purge
    #[serde(with = "duration_millis")]
    pub event_retention: Duration,
    /// Interval of the background maintenance task
    #[serde(with = "duration_millis")]
    pub cleanup_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            event_retention: Duration::from_secs(7 * 24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

// ----------------------------------------------------------------------------
// Logging
// ----------------------------------------------------------------------------

/// Log verbosity for console logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ----------------------------------------------------------------------------
// SDK Configuration
// ----------------------------------------------------------------------------

/// Top-level SDK configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Retry policy wrapped around `RoutePlugin::connect`
    pub connect_retry: RetryPolicy,
    /// Retry policy wrapped around outbound sends
    pub send_retry: RetryPolicy,
    /// Default reconnection behavior for routes without an override
    pub reconnection: ReconnectionConfig,
    pub event_queue: EventQueueConfig,
    pub maintenance: MaintenanceConfig,
    pub log_level: LogLevel,
}

impl SdkConfig {
    /// Millisecond-scale delays so tests run quickly
    pub fn for_testing() -> Self {
        let fast = RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(10),
            2.0,
        );
        Self {
            connect_retry: fast.clone(),
            send_retry: fast,
            reconnection: ReconnectionConfig {
                enabled: true,
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(20),
                backoff_multiplier: 2.0,
            },
            event_queue: EventQueueConfig::default(),
            maintenance: MaintenanceConfig::default(),
            log_level: LogLevel::Debug,
        }
    }

    /// Faster first retries and a longer reconnection budget for flaky networks
    pub fn aggressive() -> Self {
        Self {
            connect_retry: RetryPolicy::new(
                5,
                Duration::from_millis(250),
                Duration::from_secs(15),
                1.5,
            ),
            send_retry: RetryPolicy::new(
                5,
                Duration::from_millis(100),
                Duration::from_secs(5),
                2.0,
            ),
            reconnection: ReconnectionConfig {
                enabled: true,
                max_attempts: 20,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(120),
                backoff_multiplier: 2.0,
            },
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON (durations in milliseconds)
    pub fn from_json_str(json: &str) -> SdkResult<Self> {
        let config: SdkConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this configuration as pretty JSON
    pub fn to_json_string(&self) -> SdkResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations the managers cannot honor
    pub fn validate(&self) -> SdkResult<()> {
        self.connect_retry.validate("connect_retry")?;
        self.send_retry.validate("send_retry")?;
        self.reconnection.validate()?;
        if self.event_queue.max_queue_size == 0 {
            return Err(SdkError::config_error(
                "event_queue.max_queue_size must be positive",
            ));
        }
        if self.event_queue.max_events_per_route == Some(0) {
            return Err(SdkError::config_error(
                "event_queue.max_events_per_route must be positive when set",
            ));
        }
        if self.maintenance.cleanup_interval.is_zero() {
            return Err(SdkError::config_error(
                "maintenance.cleanup_interval must be positive",
            ));
        }
        Ok(())
    }
}

fn validate_backoff(
    name: &str,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
) -> SdkResult<()> {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return Err(SdkError::config_error(format!(
            "{name}.backoff_multiplier must be a positive number"
        )));
    }
    if initial_delay > max_delay {
        return Err(SdkError::config_error(format!(
            "{name}.initial_delay must not exceed max_delay"
        )));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
