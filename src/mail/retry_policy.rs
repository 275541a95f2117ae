//! Retry policy for failed deliveries.
//!
//! Geometric backoff: after the n-th failure the entry waits
//! `backoff_base * 2^n`, capped at `max_backoff`.

use super::transport::DeliveryError;
use crate::config::MailSettings;
use crate::clock::chrono_duration;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// What happens to an entry after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Retry { next_attempt_at: DateTime<Utc> },
    Abandon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after which an entry is dropped for good.
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    /// Upper bound on a single backoff interval.
    pub max_backoff_secs: u64,
}

impl RetryPolicy {
    pub fn new(settings: &MailSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            backoff_base_secs: settings.backoff_base_secs,
            max_backoff_secs: settings.max_backoff_secs,
        }
    }

    /// Backoff after `attempts` failed attempts.
    pub fn backoff_secs(&self, attempts: u32) -> u64 {
        let factor = 2u64.checked_pow(attempts).unwrap_or(u64::MAX);
        self.backoff_base_secs
            .saturating_mul(factor)
            .min(self.max_backoff_secs)
            .max(1)
    }

    pub fn next_attempt_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        now + chrono_duration(Duration::from_secs(self.backoff_secs(attempts)))
    }

    /// `attempts` is the count including the attempt that just failed.
    pub fn should_retry(&self, error: &DeliveryError, attempts: u32) -> bool {
        error.is_retryable() && attempts < self.max_attempts
    }

    pub fn on_failure(
        &self,
        error: &DeliveryError,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> FailureDisposition {
        if self.should_retry(error, attempts) {
            FailureDisposition::Retry {
                next_attempt_at: self.next_attempt_at(now, attempts),
            }
        } else {
            FailureDisposition::Abandon
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 1800,
            max_backoff_secs: 7 * 86400,
        }
    }
}
