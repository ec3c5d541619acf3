//! Retry policy value object and error classification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error codes reported by the host download service and the preroll step.
pub mod codes {
    pub const SERVER_FAILED: &str = "SERVER_FAILED";
    pub const SERVER_BAD_CONTENT: &str = "SERVER_BAD_CONTENT";
    pub const SERVER_UNAUTHORIZED: &str = "SERVER_UNAUTHORIZED";
    pub const SERVER_FORBIDDEN: &str = "SERVER_FORBIDDEN";
    pub const NETWORK_FAILED: &str = "NETWORK_FAILED";
    pub const NETWORK_PREFIX: &str = "NETWORK_";
    /// Recorded when the helper reports a cancelled transfer.
    pub const CANCELLED: &str = "cancelled";
    /// Recorded when the helper channel goes away mid-transfer. Network
    /// class, so a lost helper is retried.
    pub const DISCONNECTED: &str = "NETWORK_DISCONNECTED";
}

/// Whether a transfer error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Recoverable,
    Fatal,
}

/// Classify a transfer error code.
///
/// Generic server failures and every network-class code are recoverable.
pub fn classify(code: &str) -> ErrorClass {
    if code == codes::SERVER_FAILED || code.starts_with(codes::NETWORK_PREFIX) {
        ErrorClass::Recoverable
    } else {
        ErrorClass::Fatal
    }
}

/// Retry policy for recoverable transfer errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before a RETRYING download becomes eligible again, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Growth factor applied per attempt. `1.0` keeps the delay constant.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound for the grown delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    5 * 60 * 1000
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_delay_ms() -> u64 {
    60 * 60 * 1000
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy matching the `retries` / `retry-time` preferences.
    pub fn from_preferences(max_retries: u32, retry_minutes: u64) -> Self {
        let retry_delay_ms = retry_minutes.saturating_mul(60_000);
        Self {
            max_retries,
            retry_delay_ms,
            max_delay_ms: retry_delay_ms.max(default_max_delay_ms()),
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.backoff_multiplier = multiplier;
        self.max_delay_ms = max_delay.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    /// Check whether a download that already retried `retries` times may retry again.
    pub fn should_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Pause duration for the given 1-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.retry_delay_ms as f64 * self.backoff_multiplier.max(1.0).powi(exponent);
        let capped = delay.min(self.max_delay_ms.max(self.retry_delay_ms) as f64);
        Duration::from_millis(capped as u64)
    }

    /// Wall-clock time after which the download may resume.
    pub fn deadline_for(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for_attempt(attempt))
            .unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}
